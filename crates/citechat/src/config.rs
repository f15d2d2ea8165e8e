use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use citechat_core::{ChatError, Result};
use citechat_runtime::{AiPreferences, AiService, ChatCollaborators, PreferencesHandle};
use citechat_storage::{StorageConfig, create_backend};
use citechat_template::TemplatesConfig;

/// Everything needed to stand up an [`AiService`] apart from the models.
///
/// ```yaml
/// preferences:
///   context_window_size: 8192
///   follow_up:
///     count: 5
/// templates:
///   directory: ./templates
/// storage:
///   type: file
///   path: ./chat-histories
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiteChatConfig {
    #[serde(default)]
    pub preferences: AiPreferences,

    #[serde(default)]
    pub templates: TemplatesConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl CiteChatConfig {
    pub fn from_yaml(yaml_content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ChatError::Io)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.preferences.validate()
    }

    /// Load the templates, open the storage backend and build the service.
    pub async fn build_service(&self, collaborators: ChatCollaborators) -> Result<AiService> {
        let templates = self.templates.build()?;
        let backend = create_backend(&self.storage).await?;
        info!(storage = ?self.storage, "Creating AI service");
        Ok(AiService::new(
            collaborators,
            templates,
            PreferencesHandle::new(self.preferences.clone()),
            backend,
        ))
    }
}
