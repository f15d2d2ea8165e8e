//! Collaborator traits consumed by the chat core

pub mod embedding;
pub mod llm;
pub mod storage;

pub use embedding::{EmbeddingModel, EmbeddingStore};
pub use llm::ChatModel;
pub use storage::ChatHistoryBackend;
