//! Deterministic embedding model for tests

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use citechat_core::{ChatError, EmbeddingModel, Result};

const DEFAULT_DIMENSIONS: usize = 64;

/// Hashes lower-cased words into a fixed number of buckets and normalizes the
/// result, so texts sharing words get a high cosine similarity.
#[derive(Clone)]
pub struct MockEmbeddingModel {
    dimensions: usize,
    inner: Arc<RwLock<MockEmbeddingInner>>,
}

#[derive(Default)]
struct MockEmbeddingInner {
    calls: Vec<String>,
    error: Option<String>,
}

impl MockEmbeddingModel {
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            inner: Arc::new(RwLock::new(MockEmbeddingInner::default())),
        }
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.inner.write().error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.inner.write().error = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.read().calls.clone()
    }

    /// The vector `embed` would return, without recording a call.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % self.dimensions;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for MockEmbeddingModel {
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf29ce484222325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingModel for MockEmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        {
            let mut inner = self.inner.write();
            inner.calls.push(text.to_string());
            if let Some(message) = &inner.error {
                return Err(ChatError::Embedding(message.clone()));
            }
        }
        Ok(self.vector_for(text))
    }
}
