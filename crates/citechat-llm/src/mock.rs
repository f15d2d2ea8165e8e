use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use citechat_core::{ChatMessage, ChatModel, FinishReason, LLMError, LLMResponse, TokenUsage};

/// Scripted chat model for tests
#[derive(Clone)]
pub struct MockChatModel {
    inner: Arc<RwLock<MockChatModelInner>>,
}

struct MockChatModelInner {
    name: String,
    replies: Vec<Result<String, String>>,
    reply_index: usize,
    cycle_replies: bool,
    call_history: Vec<MockCall>,
    should_error: bool,
    error_message: String,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub messages: Vec<ChatMessage>,
    pub timestamp: std::time::Instant,
}

impl MockChatModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockChatModelInner {
                name: name.into(),
                replies: Vec::new(),
                reply_index: 0,
                cycle_replies: false,
                call_history: Vec::new(),
                should_error: false,
                error_message: "Mock error".to_string(),
                latency_ms: 0,
            })),
        }
    }

    pub fn set_response(&self, response: impl Into<String>) {
        self.set_responses(vec![response.into()], false);
    }

    /// Replies are handed out in order; the last one repeats unless `cycle`.
    pub fn set_responses(&self, responses: Vec<String>, cycle: bool) {
        let mut inner = self.inner.write();
        inner.replies = responses.into_iter().map(Ok).collect();
        inner.reply_index = 0;
        inner.cycle_replies = cycle;
    }

    /// Script successes and failures call by call.
    pub fn set_script(&self, script: Vec<Result<String, String>>) {
        let mut inner = self.inner.write();
        inner.replies = script;
        inner.reply_index = 0;
        inner.cycle_replies = false;
    }

    pub fn set_error(&self, error_message: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.should_error = true;
        inner.error_message = error_message.into();
    }

    pub fn clear_error(&self) {
        self.inner.write().should_error = false;
    }

    pub fn set_latency(&self, latency_ms: u64) {
        self.inner.write().latency_ms = latency_ms;
    }

    pub fn call_count(&self) -> usize {
        self.inner.read().call_history.len()
    }

    pub fn call_history(&self) -> Vec<MockCall> {
        self.inner.read().call_history.clone()
    }

    pub fn last_call(&self) -> Option<MockCall> {
        self.inner.read().call_history.last().cloned()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.replies.clear();
        inner.reply_index = 0;
        inner.cycle_replies = false;
        inner.call_history.clear();
        inner.should_error = false;
        inner.error_message = "Mock error".to_string();
        inner.latency_ms = 0;
    }

    fn next_reply(&self) -> Result<String, String> {
        let mut inner = self.inner.write();

        if inner.replies.is_empty() {
            return Ok("Mock response".to_string());
        }

        let reply = inner.replies[inner.reply_index].clone();
        if inner.cycle_replies {
            inner.reply_index = (inner.reply_index + 1) % inner.replies.len();
        } else if inner.reply_index < inner.replies.len() - 1 {
            inner.reply_index += 1;
        }
        reply
    }

    fn record_call(&self, messages: &[ChatMessage]) {
        self.inner.write().call_history.push(MockCall {
            messages: messages.to_vec(),
            timestamp: std::time::Instant::now(),
        });
    }

    async fn simulate_latency(&self) {
        let latency_ms = self.inner.read().latency_ms;
        if latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(latency_ms)).await;
        }
    }

    fn estimate_tokens(messages: &[ChatMessage]) -> u32 {
        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        (total_chars / 4) as u32
    }
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse, LLMError> {
        self.record_call(messages);
        self.simulate_latency().await;

        let (should_error, error_message) = {
            let inner = self.inner.read();
            (inner.should_error, inner.error_message.clone())
        };
        if should_error {
            return Err(LLMError::Other(error_message));
        }

        let content = self.next_reply().map_err(LLMError::Other)?;
        let usage = TokenUsage::new(
            Self::estimate_tokens(messages),
            (content.len() / 4) as u32,
        );
        Ok(LLMResponse::new(content, FinishReason::Stop)
            .with_usage(usage)
            .with_model("mock-model"))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

impl std::fmt::Debug for MockChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MockChatModel")
            .field("name", &inner.name)
            .field("calls", &inner.call_history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_model_basic() {
        let mock = MockChatModel::new("test");
        mock.set_response("Mock answer");

        let response = mock.chat(&[ChatMessage::user("Hello")]).await.unwrap();
        assert_eq!(response.content, "Mock answer");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert!(response.usage.is_some());
    }

    #[tokio::test]
    async fn test_multiple_responses_repeat_last() {
        let mock = MockChatModel::new("test");
        mock.set_responses(vec!["First".into(), "Second".into()], false);
        let messages = vec![ChatMessage::user("Hello")];

        assert_eq!(mock.chat(&messages).await.unwrap().content, "First");
        assert_eq!(mock.chat(&messages).await.unwrap().content, "Second");
        assert_eq!(mock.chat(&messages).await.unwrap().content, "Second");
    }

    #[tokio::test]
    async fn test_cycle_responses() {
        let mock = MockChatModel::new("test");
        mock.set_responses(vec!["A".into(), "B".into()], true);
        let messages = vec![ChatMessage::user("Hello")];

        assert_eq!(mock.chat(&messages).await.unwrap().content, "A");
        assert_eq!(mock.chat(&messages).await.unwrap().content, "B");
        assert_eq!(mock.chat(&messages).await.unwrap().content, "A");
    }

    #[tokio::test]
    async fn test_script_mixes_failures() {
        let mock = MockChatModel::new("test");
        mock.set_script(vec![Ok("fine".into()), Err("follow-up broke".into())]);
        let messages = vec![ChatMessage::user("Hello")];

        assert!(mock.chat(&messages).await.is_ok());
        let err = mock.chat(&messages).await.unwrap_err();
        assert!(err.to_string().contains("follow-up broke"));
    }

    #[tokio::test]
    async fn test_error_and_clear() {
        let mock = MockChatModel::new("test");
        mock.set_error("Test error");
        let messages = vec![ChatMessage::user("Hello")];

        let result = mock.chat(&messages).await;
        assert!(result.unwrap_err().to_string().contains("Test error"));

        mock.clear_error();
        assert!(mock.chat(&messages).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_history() {
        let mock = MockChatModel::new("test");
        assert_eq!(mock.call_count(), 0);

        mock.chat(&[ChatMessage::user("First")]).await.unwrap();
        mock.chat(&[ChatMessage::user("Second")]).await.unwrap();

        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.last_call().unwrap().messages[0].content, "Second");

        mock.reset();
        assert_eq!(mock.call_count(), 0);
    }
}
