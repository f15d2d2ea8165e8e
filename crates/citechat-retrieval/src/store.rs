//! Brute-force vector store kept in memory

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use citechat_core::{
    EmbeddingMatch, EmbeddingModel, EmbeddingSearchRequest, EmbeddingStore, Result, TextSegment,
};

#[derive(Debug, Clone)]
struct StoredSegment {
    embedding: Vec<f32>,
    segment: TextSegment,
}

/// Linear-scan store scoring by cosine similarity. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEmbeddingStore {
    segments: Arc<RwLock<Vec<StoredSegment>>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, embedding: Vec<f32>, segment: TextSegment) {
        self.segments.write().push(StoredSegment { embedding, segment });
    }

    /// Embed `segment.text` with `model` and store it.
    pub async fn add_segment(
        &self,
        model: &dyn EmbeddingModel,
        segment: TextSegment,
    ) -> Result<()> {
        let embedding = model.embed(&segment.text).await?;
        self.add(embedding, segment);
        Ok(())
    }

    /// Drop every segment ingested from `link`. Returns how many were removed.
    pub fn remove_link(&self, link: &str) -> usize {
        let mut segments = self.segments.write();
        let before = segments.len();
        segments.retain(|s| s.segment.link() != Some(link));
        before - segments.len()
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    pub fn clear(&self) {
        self.segments.write().clear();
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn search(&self, request: &EmbeddingSearchRequest) -> Result<Vec<EmbeddingMatch>> {
        let mut matches: Vec<EmbeddingMatch> = {
            let segments = self.segments.read();
            segments
                .iter()
                .filter(|s| {
                    request
                        .filter
                        .as_ref()
                        .map(|f| f.matches(&s.segment.metadata))
                        .unwrap_or(true)
                })
                .map(|s| EmbeddingMatch {
                    score: cosine_similarity(&request.query, &s.embedding),
                    segment: s.segment.clone(),
                })
                .filter(|m| m.score >= request.min_score)
                .collect()
        };

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(request.max_results);

        debug!(
            results = matches.len(),
            filtered = request.filter.is_some(),
            "Embedding search"
        );
        Ok(matches)
    }
}

/// Cosine similarity (normalized dot product)
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
