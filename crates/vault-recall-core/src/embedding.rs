//! Embedding provider trait and vector helpers.
//!
//! The HTTP client for the embedding service lives in the `vault-recall`
//! app crate. Tests plug in deterministic implementations.

use anyhow::Result;
use async_trait::async_trait;

/// Text to vector conversion.
///
/// Implementations cache the probed dimension for their lifetime and
/// must return `embed_batch` results in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, e.g. `"nomic-embed-text"`.
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts. The default calls [`Embedder::embed`] once per
    /// text, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Vector dimensionality of the model.
    async fn dimensions(&self) -> Result<usize>;

    /// Verify the provider is reachable and serves the configured model.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Cosine similarity in `[-1.0, 1.0]`. Mismatched or zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting;

    #[async_trait]
    impl Embedder for Counting {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
        async fn dimensions(&self) -> Result<usize> {
            Ok(2)
        }
    }

    #[tokio::test]
    async fn test_default_batch_preserves_order() {
        let texts = vec!["a".to_string(), "abc".to_string(), "ab".to_string()];
        let out = Counting.embed_batch(&texts).await.unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![3.0, 1.0], vec![2.0, 1.0]]);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_mismatch() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
