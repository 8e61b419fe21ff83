//! Embedding provider contract and batching (§4.5 "Embedding contract").
//!
//! Vendor embedding models plug in behind `EmbeddingProvider` the same way
//! ASR/TTS vendors plug in behind their own adapter traits — the batching and
//! rate-limit delay live here, independent of which model backs it.

use async_trait::async_trait;
use thiserror::Error;

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimension(&self) -> usize;

    /// Embed a single batch of texts. Callers respect `maxBatchSize`; this
    /// does not re-chunk internally.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: usize,
}

/// Naive whitespace token estimate — good enough for cost accounting, not
/// billing-accurate.
fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Batches `texts` through `provider` respecting `maxBatchSize` and sleeping
/// `interBatchDelayMs` between batches to respect vendor rate limits.
pub async fn embed_all(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    config: &EmbeddingConfig,
) -> Result<EmbeddingResult, EmbeddingError> {
    let mut vectors = Vec::with_capacity(texts.len());
    let mut total_tokens = 0usize;

    let mut batches = texts.chunks(config.max_batch_size.max(1)).peekable();
    while let Some(batch) = batches.next() {
        let embedded = provider.embed_batch(batch).await?;
        total_tokens += batch.iter().map(|t| estimate_tokens(t)).sum::<usize>();
        vectors.extend(embedded);
        if batches.peek().is_some() && config.inter_batch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(config.inter_batch_delay_ms)).await;
        }
    }

    Ok(EmbeddingResult { vectors, total_tokens })
}

/// Deterministic hash-based embedding — a test double standing in for a real
/// vendor model. Maps each text to a fixed-dimension vector derived from a
/// simple rolling hash of its bytes, normalized so cosine similarity behaves
/// sanely in tests.
pub struct HashEmbeddingProvider {
    dim: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let mut state: u64 = 1469598103934665603; // FNV offset basis
        for (i, byte) in text.bytes().enumerate() {
            state ^= byte as u64;
            state = state.wrapping_mul(1099511628211);
            let bucket = (state as usize) % self.dim;
            let sign = if (state >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 / ((i + 1) as f32));
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn model_name(&self) -> &str {
        "local-hash-384"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let provider = HashEmbeddingProvider::new(16);
        let a = provider.embed_batch(&["hello world".to_string()]).await.unwrap();
        let b = provider.embed_batch(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn distinct_texts_usually_produce_distinct_vectors() {
        let provider = HashEmbeddingProvider::new(32);
        let a = provider.embed_batch(&["alpha".to_string()]).await.unwrap();
        let b = provider.embed_batch(&["beta".to_string()]).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embed_all_batches_and_counts_tokens() {
        let provider = HashEmbeddingProvider::new(8);
        let config = EmbeddingConfig { model: "test".into(), max_batch_size: 2, inter_batch_delay_ms: 0 };
        let texts: Vec<String> = (0..5).map(|i| format!("text number {i}")).collect();
        let result = embed_all(&provider, &texts, &config).await.unwrap();
        assert_eq!(result.vectors.len(), 5);
        assert!(result.total_tokens > 0);
    }
}
