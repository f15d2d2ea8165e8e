//! The three chat templates and their change notification

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use minijinja::context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use citechat_core::{BibEntry, Result};

use crate::renderer::TemplateRenderer;

pub const DEFAULT_SYSTEM_MESSAGE_TEMPLATE: &str = "\
You are an AI assistant that analyses research papers. You answer questions about them.
You will be given excerpts from the papers together with the question.
Answer using the excerpts and the bibliographic information below. If the answer is not
in them, say that you do not know. Cite the papers you use by their citation key.

Here is the information about the library entries you are chatting about:
{% for entry in entries %}
{{ entry.bibtex }}
{% endfor %}";

pub const DEFAULT_USER_MESSAGE_TEMPLATE: &str = "\
{{ message }}
{% if excerpts %}

Here are some relevant excerpts from the papers:
{% for excerpt in excerpts %}

{% if excerpt.citation_key %}From {{ excerpt.citation_key }}:
{% endif %}
{{ excerpt.text }}
{% endfor %}
{% endif %}";

pub const DEFAULT_FOLLOW_UP_TEMPLATE: &str = "\
Based on the following exchange, suggest {{ count }} short follow-up questions the user might
ask next about the same papers. Write each question on its own line as a numbered list
(1. 2. 3.) and output nothing else.

User: {{ user_message }}
Assistant: {{ ai_response }}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiTemplateKind {
    SystemMessage,
    UserMessage,
    FollowUpQuestions,
}

impl AiTemplateKind {
    pub const ALL: [AiTemplateKind; 3] = [
        AiTemplateKind::SystemMessage,
        AiTemplateKind::UserMessage,
        AiTemplateKind::FollowUpQuestions,
    ];

    pub fn default_text(self) -> &'static str {
        match self {
            AiTemplateKind::SystemMessage => DEFAULT_SYSTEM_MESSAGE_TEMPLATE,
            AiTemplateKind::UserMessage => DEFAULT_USER_MESSAGE_TEMPLATE,
            AiTemplateKind::FollowUpQuestions => DEFAULT_FOLLOW_UP_TEMPLATE,
        }
    }

    /// Base file name used by the template loader
    pub fn file_stem(self) -> &'static str {
        match self {
            AiTemplateKind::SystemMessage => "system-message",
            AiTemplateKind::UserMessage => "user-message",
            AiTemplateKind::FollowUpQuestions => "follow-up-questions",
        }
    }
}

#[derive(Serialize)]
struct EntryView<'a> {
    citation_key: &'a str,
    entry_type: &'a str,
    fields: &'a BTreeMap<String, String>,
    bibtex: String,
}

impl<'a> From<&'a BibEntry> for EntryView<'a> {
    fn from(entry: &'a BibEntry) -> Self {
        Self {
            citation_key: entry.citation_key().unwrap_or_default(),
            entry_type: &entry.entry_type,
            fields: &entry.fields,
            bibtex: entry.to_bibtex(),
        }
    }
}

/// Shared, editable template set. Clones share state; every change bumps a
/// revision that sessions watch to rebuild their system message.
#[derive(Clone)]
pub struct AiTemplates {
    inner: Arc<TemplatesInner>,
}

struct TemplatesInner {
    texts: RwLock<HashMap<AiTemplateKind, String>>,
    renderer: TemplateRenderer,
    changes: watch::Sender<u64>,
}

impl AiTemplates {
    pub fn new() -> Self {
        let texts = AiTemplateKind::ALL
            .iter()
            .map(|kind| (*kind, kind.default_text().to_string()))
            .collect();
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(TemplatesInner {
                texts: RwLock::new(texts),
                renderer: TemplateRenderer::new(),
                changes,
            }),
        }
    }

    pub fn get(&self, kind: AiTemplateKind) -> String {
        self.inner
            .texts
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_text().to_string())
    }

    /// Replace a template. Unparseable text is rejected and the old one kept.
    pub fn set(&self, kind: AiTemplateKind, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.inner.renderer.validate(&text)?;

        let changed = {
            let mut texts = self.inner.texts.write();
            if texts.get(&kind) == Some(&text) {
                false
            } else {
                texts.insert(kind, text);
                true
            }
        };

        if changed {
            debug!(template = ?kind, "Template changed");
            self.inner.changes.send_modify(|revision| *revision += 1);
        }
        Ok(())
    }

    pub fn reset(&self, kind: AiTemplateKind) {
        // Defaults always parse.
        let _ = self.set(kind, kind.default_text());
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.changes.borrow()
    }

    pub fn render_system_message(&self, entries: &[BibEntry]) -> Result<String> {
        let entries: Vec<EntryView<'_>> = entries.iter().map(EntryView::from).collect();
        self.inner.renderer.render(
            &self.get(AiTemplateKind::SystemMessage),
            context! { entries => entries },
        )
    }

    /// Wrap the raw user text together with the retrieved excerpts.
    pub fn render_user_message<E: Serialize>(&self, message: &str, excerpts: &[E]) -> Result<String> {
        self.inner.renderer.render(
            &self.get(AiTemplateKind::UserMessage),
            context! { message => message, excerpts => excerpts },
        )
    }

    pub fn render_follow_up(
        &self,
        user_message: &str,
        ai_response: &str,
        count: usize,
    ) -> Result<String> {
        self.inner.renderer.render(
            &self.get(AiTemplateKind::FollowUpQuestions),
            context! {
                user_message => user_message,
                ai_response => ai_response,
                count => count,
            },
        )
    }
}

impl Default for AiTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AiTemplates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiTemplates")
            .field("revision", &self.revision())
            .finish()
    }
}
