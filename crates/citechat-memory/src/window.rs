//! Token-window memory with one pinned system message

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use citechat_core::{ChatHistory, ChatMessage, Role};

use crate::token::{HeuristicTokenEstimator, TokenEstimator};

/// Model-facing projection of a conversation.
///
/// Holds exactly one system message plus the newest conversational messages
/// whose estimated size fits in what the budget leaves after the system
/// message. The system message itself is kept even when it alone exceeds
/// the budget.
#[derive(Clone)]
pub struct WindowedMemory {
    budget: u32,
    system: ChatMessage,
    messages: VecDeque<ChatMessage>,
    used_tokens: u32,
    estimator: Arc<dyn TokenEstimator>,
}

impl WindowedMemory {
    /// Build a window from scratch. System and error messages in `prior` are
    /// skipped, as is any user message not directly answered by the
    /// assistant. The newest messages win.
    pub fn build(
        budget: u32,
        system_text: &str,
        prior: &[ChatMessage],
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        let system = ChatMessage::system(system_text);
        let limit = budget.saturating_sub(estimator.estimate_message(&system));

        let mut messages = VecDeque::new();
        let mut used_tokens = 0u32;
        let retained = prior.iter().enumerate().rev().filter(|(i, m)| {
            m.is_conversational() && (m.role != Role::User || is_answered(prior, *i))
        });
        for (_, message) in retained {
            let tokens = estimator.estimate_message(message);
            if used_tokens + tokens > limit {
                break;
            }
            used_tokens += tokens;
            messages.push_front(message.clone());
        }

        Self {
            budget,
            system,
            messages,
            used_tokens,
            estimator,
        }
    }

    /// Append a message, evicting the oldest ones until the budget holds.
    pub fn push(&mut self, message: ChatMessage) {
        if !message.is_conversational() {
            return;
        }
        self.used_tokens += self.estimator.estimate_message(&message);
        self.messages.push_back(message);
        self.evict_to_fit();
    }

    /// Replace the system message in place.
    pub fn set_system_message(&mut self, text: &str) {
        self.system = ChatMessage::system(text);
        self.evict_to_fit();
    }

    /// Model input for one call: the window plus `prompt` as the newest
    /// message. Older messages are dropped to make room for the prompt; the
    /// prompt itself is always included. The window is left untouched.
    pub fn snapshot_with(&self, prompt: ChatMessage) -> Vec<ChatMessage> {
        let limit = self
            .message_limit()
            .saturating_sub(self.estimator.estimate_message(&prompt));

        let mut used_tokens = self.used_tokens;
        let mut skip = 0;
        for message in &self.messages {
            if used_tokens <= limit {
                break;
            }
            used_tokens -= self.estimator.estimate_message(message);
            skip += 1;
        }

        let mut result = Vec::with_capacity(self.messages.len() - skip + 2);
        result.push(self.system.clone());
        result.extend(self.messages.iter().skip(skip).cloned());
        result.push(prompt);
        result
    }

    /// System message first, then the retained conversation.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut result = Vec::with_capacity(self.messages.len() + 1);
        result.push(self.system.clone());
        result.extend(self.messages.iter().cloned());
        result
    }

    pub fn system_message(&self) -> &ChatMessage {
        &self.system
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Estimated tokens of everything except the system message.
    pub fn used_tokens(&self) -> u32 {
        self.used_tokens
    }

    pub fn total_tokens(&self) -> u32 {
        self.used_tokens + self.estimator.estimate_message(&self.system)
    }

    /// Number of retained non-system messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn message_limit(&self) -> u32 {
        self.budget
            .saturating_sub(self.estimator.estimate_message(&self.system))
    }

    fn evict_to_fit(&mut self) {
        let limit = self.message_limit();
        while self.used_tokens > limit {
            match self.messages.pop_front() {
                Some(evicted) => {
                    self.used_tokens -= self.estimator.estimate_message(&evicted);
                }
                None => break,
            }
        }
    }
}

fn is_answered(prior: &[ChatMessage], index: usize) -> bool {
    prior
        .get(index + 1)
        .is_some_and(|next| next.role == Role::Assistant && !next.error)
}

impl std::fmt::Debug for WindowedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedMemory")
            .field("budget", &self.budget)
            .field("messages", &self.messages.len())
            .field("used_tokens", &self.used_tokens)
            .finish()
    }
}

/// Chat memory bound to a conversation's visible history.
///
/// The window is a pure function of (budget, system text, history) and is
/// rebuilt from scratch whenever the budget or system text changes.
pub struct ChatMemoryWindow {
    history: ChatHistory,
    estimator: Arc<dyn TokenEstimator>,
    budget: u32,
    system_text: String,
    window: WindowedMemory,
}

impl ChatMemoryWindow {
    pub fn new(history: ChatHistory, budget: u32, system_text: impl Into<String>) -> Self {
        Self::with_estimator(history, budget, system_text, Arc::new(HeuristicTokenEstimator))
    }

    pub fn with_estimator(
        history: ChatHistory,
        budget: u32,
        system_text: impl Into<String>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        let system_text = system_text.into();
        let window = WindowedMemory::build(
            budget,
            &system_text,
            &history.messages(),
            Arc::clone(&estimator),
        );
        Self {
            history,
            estimator,
            budget,
            system_text,
            window,
        }
    }

    pub fn rebuild(&mut self) {
        self.window = WindowedMemory::build(
            self.budget,
            &self.system_text,
            &self.history.messages(),
            Arc::clone(&self.estimator),
        );
        debug!(
            budget = self.budget,
            retained = self.window.len(),
            used_tokens = self.window.used_tokens(),
            "Rebuilt chat memory window"
        );
    }

    pub fn set_budget(&mut self, budget: u32) {
        if budget != self.budget {
            self.budget = budget;
            self.rebuild();
        }
    }

    pub fn set_system_message(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.system_text {
            self.system_text = text;
            self.rebuild();
        }
    }

    pub fn set_estimator(&mut self, estimator: Arc<dyn TokenEstimator>) {
        self.estimator = estimator;
        self.rebuild();
    }

    /// Add to both the window and the visible history.
    pub fn append(&mut self, message: ChatMessage) {
        self.window.push(message.clone());
        self.history.push(message);
    }

    /// Add to the window only; the message is already in the visible history.
    pub fn remember(&mut self, message: ChatMessage) {
        self.window.push(message);
    }

    pub fn snapshot_with(&self, prompt: ChatMessage) -> Vec<ChatMessage> {
        self.window.snapshot_with(prompt)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.window.messages()
    }

    pub fn window(&self) -> &WindowedMemory {
        &self.window
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn system_text(&self) -> &str {
        &self.system_text
    }
}
