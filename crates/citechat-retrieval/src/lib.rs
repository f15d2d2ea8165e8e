//! Retrieval scoping, excerpt resolution and a reference vector store

mod excerpt;
mod filter;
mod store;

pub use excerpt::{Excerpt, resolve_excerpts};
pub use filter::RetrievalFilterBuilder;
pub use store::InMemoryEmbeddingStore;
