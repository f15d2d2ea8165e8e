//! Embedding model and vector store traits

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata key holding the linked-file identifier a segment was ingested from.
pub const LINK_METADATA_KEY: &str = "link";

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A stored chunk of document text plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TextSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.metadata
            .insert(LINK_METADATA_KEY.to_string(), link.into());
        self
    }

    pub fn link(&self) -> Option<&str> {
        self.metadata.get(LINK_METADATA_KEY).map(String::as_str)
    }
}

/// Predicate over segment metadata used to scope a vector search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MetadataFilter {
    IsIn { key: String, values: BTreeSet<String> },
}

impl MetadataFilter {
    pub fn link_in(values: impl IntoIterator<Item = String>) -> Self {
        MetadataFilter::IsIn {
            key: LINK_METADATA_KEY.to_string(),
            values: values.into_iter().collect(),
        }
    }

    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        match self {
            MetadataFilter::IsIn { key, values } => metadata
                .get(key)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingSearchRequest {
    pub query: Vec<f32>,
    pub max_results: usize,
    pub min_score: f32,
    pub filter: Option<MetadataFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatch {
    pub score: f32,
    pub segment: TextSegment,
}

/// Vector store queried for excerpts. Matches come back ranked, best first.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn search(&self, request: &EmbeddingSearchRequest) -> Result<Vec<EmbeddingMatch>>;
}
