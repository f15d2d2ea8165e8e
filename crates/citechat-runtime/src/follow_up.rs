//! Follow-up question suggestions

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use citechat_core::{ChatMessage, ChatModel, Result};
use citechat_template::AiTemplates;

use crate::config::FollowUpConfig;

static NUMBERED_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\.\s*(.+)$").ok());

const QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’', '`'];
const BULLETS: &[char] = &['-', '*', '•'];

/// Asks the chat model for follow-up questions to the last exchange.
#[derive(Clone)]
pub struct FollowUpGenerator {
    model: Arc<dyn ChatModel>,
    templates: AiTemplates,
}

impl FollowUpGenerator {
    pub fn new(model: Arc<dyn ChatModel>, templates: AiTemplates) -> Self {
        Self { model, templates }
    }

    pub async fn generate(
        &self,
        user_message: &str,
        ai_response: &str,
        config: &FollowUpConfig,
    ) -> Result<Vec<String>> {
        if config.count == 0 {
            return Ok(Vec::new());
        }

        let prompt = self
            .templates
            .render_follow_up(user_message, ai_response, config.count)?;
        let response = self.model.chat(&[ChatMessage::user(prompt)]).await?;

        let questions = parse_follow_up_questions(&response.content, config);
        debug!(questions = questions.len(), "Generated follow-up questions");
        Ok(questions)
    }

    /// Suggestions never fail a chat turn: any error becomes an empty list.
    pub async fn generate_or_empty(
        &self,
        user_message: &str,
        ai_response: &str,
        config: &FollowUpConfig,
    ) -> Vec<String> {
        match self.generate(user_message, ai_response, config).await {
            Ok(questions) => questions,
            Err(e) => {
                warn!(error = %e, "Follow-up question generation failed");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for FollowUpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FollowUpGenerator")
            .field("model", &self.model.model_name())
            .finish()
    }
}

/// Read questions out of free-form model output.
///
/// A numbered list is preferred. When it yields no valid question every
/// non-empty line is a candidate once bullets, numbering and quotes are
/// stripped. Candidates outside the configured length bounds are dropped and
/// at most `config.count` are returned.
pub fn parse_follow_up_questions(text: &str, config: &FollowUpConfig) -> Vec<String> {
    let numbered: Vec<String> = match NUMBERED_LINE.as_ref() {
        Some(pattern) => text
            .lines()
            .filter_map(|line| pattern.captures(line))
            .filter_map(|captures| captures.get(1))
            .map(|m| strip_quotes(m.as_str()))
            .collect(),
        None => Vec::new(),
    };

    let questions = select(numbered, config);
    if !questions.is_empty() {
        return questions;
    }
    select(text.lines().map(strip_markers), config)
}

fn select(candidates: impl IntoIterator<Item = String>, config: &FollowUpConfig) -> Vec<String> {
    candidates
        .into_iter()
        .filter(|question| is_valid(question, config))
        .take(config.count)
        .collect()
}

fn strip_quotes(text: &str) -> String {
    text.trim().trim_matches(QUOTES).trim().to_string()
}

fn strip_markers(line: &str) -> String {
    let line = line.trim().trim_start_matches(BULLETS).trim_start();

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    let line = if digits > 0 && line[digits..].starts_with('.') {
        &line[digits + 1..]
    } else {
        line
    };

    strip_quotes(line)
}

fn is_valid(question: &str, config: &FollowUpConfig) -> bool {
    let length = question.chars().count();
    !question.trim().is_empty() && length >= config.min_length && length <= config.max_length
}

#[cfg(test)]
mod tests {
    use super::*;
    use citechat_llm::MockChatModel;

    fn config(count: usize) -> FollowUpConfig {
        FollowUpConfig {
            count,
            ..Default::default()
        }
    }

    #[test]
    fn test_numbered_list() {
        let text = "Here are some ideas:\n1. What dataset was used?\n2. \"How large is the model?\"\n3. Who funded it?";
        let questions = parse_follow_up_questions(text, &config(3));
        assert_eq!(
            questions,
            vec![
                "What dataset was used?",
                "How large is the model?",
                "Who funded it?"
            ]
        );
    }

    #[test]
    fn test_bullet_fallback() {
        let text = "- What dataset was used?\n* How large is the model?\n\n• 'Who funded it?'";
        let questions = parse_follow_up_questions(text, &config(5));
        assert_eq!(
            questions,
            vec![
                "What dataset was used?",
                "How large is the model?",
                "Who funded it?"
            ]
        );
    }

    #[test]
    fn test_count_and_length_bounds() {
        let long = format!("1. {}?", "x".repeat(150));
        let text = format!("1. Why?\n{}\n2. What is the baseline?\n3. Is code available?\n4. How was it evaluated?", long);
        let questions = parse_follow_up_questions(&text, &config(2));

        assert_eq!(
            questions,
            vec!["What is the baseline?", "Is code available?"]
        );
        for q in &questions {
            let len = q.chars().count();
            assert!((5..=100).contains(&len));
        }
    }

    #[test]
    fn test_unusable_numbered_lines_fall_back_to_all_lines() {
        let text = format!(
            "1. Why?\n2. {}?\n- What dataset was used?\n- How large is the model?",
            "x".repeat(150)
        );
        let questions = parse_follow_up_questions(&text, &config(3));
        assert_eq!(
            questions,
            vec!["What dataset was used?", "How large is the model?"]
        );
    }

    #[test]
    fn test_blank_output() {
        assert!(parse_follow_up_questions("   \n\n", &config(3)).is_empty());
    }

    #[tokio::test]
    async fn test_generate_uses_template() {
        let model = MockChatModel::new("follow-up");
        model.set_response("1. What are the limitations?\n2. How does it compare?");
        let generator = FollowUpGenerator::new(Arc::new(model.clone()), AiTemplates::new());

        let questions = generator
            .generate("What is it?", "A new method.", &config(3))
            .await
            .unwrap();

        assert_eq!(questions.len(), 2);
        let call = model.last_call().unwrap();
        assert_eq!(call.messages.len(), 1);
        assert!(call.messages[0].content.contains("What is it?"));
        assert!(call.messages[0].content.contains("A new method."));
    }

    #[tokio::test]
    async fn test_generate_or_empty_swallows_errors() {
        let model = MockChatModel::new("follow-up");
        model.set_error("rate limited");
        let generator = FollowUpGenerator::new(Arc::new(model.clone()), AiTemplates::new());

        assert!(generator.generate("Q", "A", &config(3)).await.is_err());
        assert!(
            generator
                .generate_or_empty("Q", "A", &config(3))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_zero_count_skips_model() {
        let model = MockChatModel::new("follow-up");
        let generator = FollowUpGenerator::new(Arc::new(model.clone()), AiTemplates::new());

        assert!(generator.generate("Q", "A", &config(0)).await.unwrap().is_empty());
        assert_eq!(model.call_count(), 0);
    }
}
