use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::error::AppError;
use crate::utils::config::{AppConfig, EmbeddingBackend};

/// Embedding source for chunk texts and queries. The OpenAI backend talks to
/// the configured endpoint with retries; the hashed backend produces
/// deterministic bag-of-words vectors for offline runs and tests.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: usize,
        batch_size: usize,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::Hashed => Ok(Self::hashed(config.embedding_dimensions)),
            EmbeddingBackend::OpenAi => {
                let client = client.ok_or_else(|| {
                    AppError::Validation(
                        "openai embedding backend requires an OpenAI client".to_string(),
                    )
                })?;
                Ok(Self {
                    inner: EmbeddingInner::OpenAi {
                        client,
                        model: config.embedding_model.clone(),
                        dimensions: config.embedding_dimensions,
                        batch_size: config.embedding_batch_size.max(1),
                    },
                })
            }
        }
    }

    pub fn hashed(dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::OpenAi { .. } => "openai",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::OpenAi { dimensions, .. } => *dimensions,
            EmbeddingInner::Hashed { dimension } => *dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::EmbeddingUnavailable("no embedding returned".to_string()))
    }

    /// Encodes texts in configured batch sizes, preserving input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect()),
            EmbeddingInner::OpenAi {
                client,
                model,
                dimensions,
                batch_size,
            } => {
                let mut vectors = Vec::with_capacity(texts.len());
                for batch in texts.chunks(*batch_size) {
                    let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);

                    let response = Retry::spawn(retry_strategy, || async {
                        let request = CreateEmbeddingRequestArgs::default()
                            .model(model.clone())
                            .dimensions(*dimensions as u32)
                            .input(batch.to_vec())
                            .build()?;
                        client.embeddings().create(request).await
                    })
                    .await
                    .map_err(|e| AppError::EmbeddingUnavailable(e.to_string()))?;

                    if response.data.len() != batch.len() {
                        return Err(AppError::EmbeddingUnavailable(format!(
                            "embedding service returned {} vectors for {} inputs",
                            response.data.len(),
                            batch.len()
                        )));
                    }
                    vectors.extend(response.data.into_iter().map(|d| d.embedding));

                    debug!(
                        batch = batch.len(),
                        total = vectors.len(),
                        "Encoded embedding batch"
                    );
                }
                Ok(vectors)
            }
        }
    }
}

/// Deterministic l2-normalized bag-of-words embedding. Tokens hash into
/// buckets, so equal texts always produce equal vectors.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        if let Some(slot) = vector.get_mut(idx) {
            *slot += 1.0;
        }
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashed_embeddings_are_deterministic_and_normalized() {
        let provider = EmbeddingProvider::hashed(64);
        let first = provider.embed("수강신청 일정 안내").await.expect("embed");
        let second = provider.embed("수강신청 일정 안내").await.expect("embed");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let norm = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashed_batch_preserves_order() {
        let provider = EmbeddingProvider::hashed(32);
        let texts = vec!["장학금".to_string(), "기숙사".to_string()];
        let batch = provider.embed_batch(&texts).await.expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], provider.embed("장학금").await.expect("embed"));
        assert_eq!(batch[1], provider.embed("기숙사").await.expect("embed"));
    }

    #[tokio::test]
    async fn test_empty_text_embeds_to_zero_vector() {
        let provider = EmbeddingProvider::hashed(16);
        let vector = provider.embed("").await.expect("embed");
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_backend_label_and_dimension() {
        let provider = EmbeddingProvider::hashed(8);
        assert_eq!(provider.backend_label(), "hashed");
        assert_eq!(provider.dimension(), 8);
    }
}
