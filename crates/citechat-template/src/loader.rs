//! Template file loading and template configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use citechat_core::{ChatError, Result};

use crate::templates::{AiTemplateKind, AiTemplates};

const TEMPLATE_EXTENSION: &str = "jinja";

/// Loads template text from a list of directories, first match wins
#[derive(Debug, Clone, Default)]
pub struct TemplateLoader {
    search_paths: Vec<PathBuf>,
}

impl TemplateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.search_paths.push(path.into());
        self
    }

    fn candidate(&self, dir: &std::path::Path, name: &str) -> PathBuf {
        if name.ends_with(&format!(".{}", TEMPLATE_EXTENSION)) {
            dir.join(name)
        } else {
            dir.join(format!("{}.{}", name, TEMPLATE_EXTENSION))
        }
    }

    pub fn load_template(&self, name: &str) -> Result<String> {
        for search_path in &self.search_paths {
            let path = self.candidate(search_path, name);
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    ChatError::TemplateError(format!("Failed to read {}: {}", path.display(), e))
                });
            }
        }

        Err(ChatError::TemplateError(format!(
            "Template '{}' not found in search paths: {:?}",
            name, self.search_paths
        )))
    }

    pub fn template_exists(&self, name: &str) -> bool {
        self.search_paths
            .iter()
            .any(|dir| self.candidate(dir, name).exists())
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

/// Template overrides. Inline text beats a file in `directory`, which beats
/// the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub follow_up_questions: Option<String>,
}

impl TemplatesConfig {
    fn inline(&self, kind: AiTemplateKind) -> Option<&str> {
        match kind {
            AiTemplateKind::SystemMessage => self.system_message.as_deref(),
            AiTemplateKind::UserMessage => self.user_message.as_deref(),
            AiTemplateKind::FollowUpQuestions => self.follow_up_questions.as_deref(),
        }
    }

    pub fn build(&self) -> Result<AiTemplates> {
        let templates = AiTemplates::new();

        let mut loader = TemplateLoader::new();
        if let Some(dir) = &self.directory {
            loader.add_search_path(dir);
        }

        for kind in AiTemplateKind::ALL {
            if let Some(text) = self.inline(kind) {
                templates.set(kind, text)?;
            } else if loader.template_exists(kind.file_stem()) {
                debug!(template = ?kind, "Loading template from file");
                templates.set(kind, loader.load_template(kind.file_stem())?)?;
            }
        }

        Ok(templates)
    }
}
