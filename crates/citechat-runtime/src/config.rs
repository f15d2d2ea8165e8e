//! AI preferences and their change notification

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use citechat_core::{ChatError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiPreferences {
    /// Token budget of the memory window, system message included.
    #[serde(default = "default_context_window_size")]
    pub context_window_size: u32,

    #[serde(default = "default_rag_max_results_count")]
    pub rag_max_results_count: usize,

    #[serde(default = "default_rag_min_score")]
    pub rag_min_score: f32,

    #[serde(default)]
    pub follow_up: FollowUpConfig,

    #[serde(default = "default_true")]
    pub generate_missing_citation_keys: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of questions kept.
    #[serde(default = "default_follow_up_count")]
    pub count: usize,

    #[serde(default = "default_follow_up_min_length")]
    pub min_length: usize,

    #[serde(default = "default_follow_up_max_length")]
    pub max_length: usize,
}

fn default_context_window_size() -> u32 {
    4096
}

fn default_rag_max_results_count() -> usize {
    10
}

fn default_rag_min_score() -> f32 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_follow_up_count() -> usize {
    3
}

fn default_follow_up_min_length() -> usize {
    5
}

fn default_follow_up_max_length() -> usize {
    100
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: default_follow_up_count(),
            min_length: default_follow_up_min_length(),
            max_length: default_follow_up_max_length(),
        }
    }
}

impl Default for AiPreferences {
    fn default() -> Self {
        Self {
            context_window_size: default_context_window_size(),
            rag_max_results_count: default_rag_max_results_count(),
            rag_min_score: default_rag_min_score(),
            follow_up: FollowUpConfig::default(),
            generate_missing_citation_keys: true,
        }
    }
}

impl AiPreferences {
    pub fn validate(&self) -> Result<()> {
        if self.context_window_size == 0 {
            return Err(ChatError::Config(
                "context_window_size must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rag_min_score) {
            return Err(ChatError::Config(format!(
                "rag_min_score must be within 0.0..=1.0, got {}",
                self.rag_min_score
            )));
        }
        if self.follow_up.min_length > self.follow_up.max_length {
            return Err(ChatError::Config(
                "follow_up.min_length exceeds follow_up.max_length".into(),
            ));
        }
        Ok(())
    }
}

/// Shared, observable preferences. Clones share state.
#[derive(Clone)]
pub struct PreferencesHandle {
    sender: Arc<watch::Sender<AiPreferences>>,
}

impl PreferencesHandle {
    pub fn new(preferences: AiPreferences) -> Self {
        let (sender, _) = watch::channel(preferences);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> AiPreferences {
        self.sender.borrow().clone()
    }

    /// Apply `update`; observers are notified only if something changed.
    pub fn update(&self, update: impl FnOnce(&mut AiPreferences)) {
        self.sender.send_if_modified(|preferences| {
            let before = preferences.clone();
            update(preferences);
            *preferences != before
        });
    }

    pub fn set(&self, preferences: AiPreferences) {
        self.update(|current| *current = preferences);
    }

    pub fn subscribe(&self) -> watch::Receiver<AiPreferences> {
        self.sender.subscribe()
    }
}

impl Default for PreferencesHandle {
    fn default() -> Self {
        Self::new(AiPreferences::default())
    }
}

impl std::fmt::Debug for PreferencesHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PreferencesHandle").field(&self.get()).finish()
    }
}
