//! Core types and traits for the citechat retrieval-augmented chat

pub mod error;
pub mod history;
pub mod identity;
pub mod library;
pub mod message;
pub mod traits;
pub mod types;

pub use error::{ChatError, Result};
pub use history::ChatHistory;
pub use identity::{
    EntryIdentity, GroupIdentity, HistoryKey, NonPersistableReason, Persistence,
};
pub use library::{
    BibEntry, CitationKeyGenerator, EntryId, Group, GroupId, LibraryContext, LibraryEvent,
    LibraryId, LinkedFile,
};
pub use message::{ChatMessage, Role};
pub use traits::embedding::{
    EmbeddingMatch, EmbeddingModel, EmbeddingSearchRequest, EmbeddingStore, MetadataFilter,
    TextSegment, LINK_METADATA_KEY,
};
pub use traits::llm::{ChatModel, LLMError};
pub use traits::storage::ChatHistoryBackend;
pub use types::{FinishReason, LLMResponse, TokenUsage};
