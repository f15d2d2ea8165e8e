//! Chat and embedding model doubles for citechat

pub mod embedding;
pub mod mock;

pub use citechat_core::{ChatMessage, ChatModel, EmbeddingModel, FinishReason, LLMError, LLMResponse, Role};
pub use embedding::MockEmbeddingModel;
pub use mock::{MockCall, MockChatModel};
