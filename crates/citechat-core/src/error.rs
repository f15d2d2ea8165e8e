//! Error types shared by every citechat crate

use thiserror::Error;

use crate::traits::llm::LLMError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown entry: {0}")]
    UnknownEntry(String),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Chat history store is closed")]
    StoreClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl From<LLMError> for ChatError {
    fn from(err: LLMError) -> Self {
        ChatError::LLM(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ChatError {
    fn from(err: serde_yaml::Error) -> Self {
        ChatError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_conversion() {
        let err: ChatError = LLMError::Network("connection reset".into()).into();
        assert!(matches!(err, ChatError::LLM(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: ChatError = parse.unwrap_err().into();
        assert!(matches!(err, ChatError::Serialization(_)));
    }
}
