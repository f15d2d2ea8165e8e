//! Chat model trait

use async_trait::async_trait;
use thiserror::Error;

use crate::message::ChatMessage;
use crate::types::LLMResponse;

/// A stateless chat completion model.
///
/// Every call carries the whole context; implementations keep no conversation
/// state between calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse, LLMError>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {message}")]
    API {
        message: String,
        status: Option<u16>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimit {
        retry_after: Option<std::time::Duration>,
    },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(String),
}
