use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable surrogate identifier assigned when an entry is created.
///
/// Citation keys are user-editable and may repeat, so in-memory bookkeeping
/// is keyed by this id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file attached to an entry. `link` is the identifier ingested documents
/// carry in their `link` metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedFile {
    #[serde(default)]
    pub description: String,
    pub link: String,
    #[serde(default)]
    pub file_type: String,
}

impl LinkedFile {
    pub fn new(link: impl Into<String>) -> Self {
        let link = link.into();
        let file_type = link
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_uppercase())
            .unwrap_or_default();
        Self {
            description: String::new(),
            link,
            file_type,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibEntry {
    #[serde(default)]
    pub id: EntryId,
    #[serde(default = "default_entry_type")]
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_key: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<LinkedFile>,
}

fn default_entry_type() -> String {
    "misc".to_string()
}

impl BibEntry {
    pub fn new(entry_type: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            entry_type: entry_type.into(),
            citation_key: None,
            fields: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    pub fn with_citation_key(mut self, key: impl Into<String>) -> Self {
        self.citation_key = Some(key.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into().to_lowercase(), value.into());
        self
    }

    pub fn with_file(mut self, file: LinkedFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    /// The citation key if present and non-blank.
    pub fn citation_key(&self) -> Option<&str> {
        self.citation_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn has_file_link(&self, link: &str) -> bool {
        self.files.iter().any(|f| f.link == link)
    }

    /// Canonical BibTeX-like rendering used when describing entries to the model.
    pub fn to_bibtex(&self) -> String {
        let mut out = format!(
            "@{}{{{},\n",
            self.entry_type,
            self.citation_key().unwrap_or_default()
        );
        for (name, value) in &self.fields {
            out.push_str(&format!("  {} = {{{}}},\n", name, value));
        }
        out.push('}');
        out
    }
}
