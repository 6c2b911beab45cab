//! The embedding port and its adapters
//!
//! The core never talks HTTP shapes itself: everything that needs dense
//! vectors goes through [`EmbeddingProvider`], the only asynchronous
//! boundary in the system. Two implementations ship with the crate:
//!
//! - [`HttpEmbeddingProvider`]: posts OpenAI-style JSON to the
//!   collection's configured proxy URL
//! - [`HashEmbedding`]: deterministic token-hash vectors for tests and
//!   demos (not semantic)

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::types::MAX_BATCH_SIZE;

/// Outbound dependency that maps text to dense vectors
///
/// `model` and `proxy_url` are forwarded opaquely from the collection
/// settings; the adapter decides what they mean. Implementations must
/// return exactly one embedding per input text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts
    async fn embed(
        &self,
        texts: &[String],
        model: &str,
        proxy_url: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Adapter description for logging
    fn name(&self) -> &str;
}

/// Type-erased provider handle
pub type BoxedEmbeddingProvider = Arc<dyn EmbeddingProvider>;

/// Per-request limit on a single text
const MAX_TEXT_CHARS: usize = 4000;
/// Per-request limit across all texts
const MAX_TOTAL_CHARS: usize = 50_000;

/// HTTP adapter speaking the OpenAI embeddings wire shape
///
/// Every request carries a deterministic `Idempotency-Key` derived from
/// its content, so a retried call cannot double-bill the upstream service.
#[derive(Clone, Default)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
}

impl HttpEmbeddingProvider {
    /// Adapter with a fresh connection pool
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

/// Reject requests the upstream service would refuse anyway
fn validate_request(texts: &[String], proxy_url: &str) -> std::result::Result<(), ProviderError> {
    if texts.is_empty() {
        return Err(ProviderError::Other("no texts to embed".to_string()));
    }
    if texts.len() > MAX_BATCH_SIZE {
        return Err(ProviderError::Other(format!(
            "too many texts in one request (max {MAX_BATCH_SIZE})"
        )));
    }
    let total_chars: usize = texts.iter().map(|t| t.len()).sum();
    if total_chars > MAX_TOTAL_CHARS {
        return Err(ProviderError::Other(format!(
            "total text content too large (max {MAX_TOTAL_CHARS} characters)"
        )));
    }
    for (i, text) in texts.iter().enumerate() {
        if text.trim().is_empty() {
            return Err(ProviderError::Other(format!("text at index {i} is empty")));
        }
        if text.len() > MAX_TEXT_CHARS {
            return Err(ProviderError::Other(format!(
                "text at index {i} is too long ({} chars, max {MAX_TEXT_CHARS})",
                text.len()
            )));
        }
    }
    if !proxy_url.starts_with("https://") {
        return Err(ProviderError::Other(
            "proxy URL must use HTTPS".to_string(),
        ));
    }
    Ok(())
}

/// Content hash of the request, stable across retries
fn idempotency_key(texts: &[String], model: &str, proxy_url: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(proxy_url.as_bytes());
    for text in texts {
        hasher.update(text.as_bytes());
        hasher.update(b"|");
    }
    let hash = hasher.finalize();
    let tag = hash[..8]
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_mul(256).wrapping_add(b as u64));
    format!("shoal-{tag:016x}")
}

fn parse_response(
    body: &serde_json::Value,
    expected: usize,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    if let Some(error) = body.get("error") {
        let detail: String = error.to_string().chars().take(200).collect();
        return Err(ProviderError::InvalidResponse(format!(
            "provider error object: {detail}"
        )));
    }

    let data = body
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing 'data' array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for (i, item) in data.iter().enumerate() {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                ProviderError::InvalidResponse(format!("missing embedding for item {i}"))
            })?;
        let embedding: std::result::Result<Vec<f32>, ProviderError> = values
            .iter()
            .enumerate()
            .map(|(j, v)| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    ProviderError::InvalidResponse(format!(
                        "non-numeric value at position {j} in embedding {i}"
                    ))
                })
            })
            .collect();
        embeddings.push(embedding?);
    }

    if embeddings.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "embedding count mismatch: expected {expected}, got {}",
            embeddings.len()
        )));
    }
    Ok(embeddings)
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(
        &self,
        texts: &[String],
        model: &str,
        proxy_url: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        validate_request(texts, proxy_url)?;

        let request_body = serde_json::json!({
            "input": texts,
            "model": model,
            "encoding_format": "float",
        });

        let response = self
            .client
            .post(proxy_url)
            .header("Idempotency-Key", idempotency_key(texts, model, proxy_url))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let detail: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(ProviderError::Other(format!("HTTP {status}: {detail}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        parse_response(&body, texts.len())
    }

    fn name(&self) -> &str {
        "HttpEmbeddingProvider"
    }
}

/// Deterministic token-hash embeddings
///
/// Tokens hash into fixed slots of a unit-normalized bag-of-words vector,
/// so texts sharing words score high and repeated calls agree exactly.
/// This is a test and demo fixture, not a semantic model.
#[derive(Clone, Debug)]
pub struct HashEmbedding {
    dimensions: usize,
}

impl HashEmbedding {
    /// Fixture with the given dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut embedding = vec![0.0f32; self.dimensions];
        let mut tokens = 0usize;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            embedding[(hasher.finish() as usize) % self.dimensions] += 1.0;
            tokens += 1;
        }
        if tokens == 0 {
            // Tokenless input still gets a stable non-zero vector
            for (i, byte) in text.bytes().enumerate() {
                embedding[i % self.dimensions] += byte as f32 / 255.0;
            }
            if text.is_empty() {
                embedding[0] = 1.0;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(
        &self,
        texts: &[String],
        _model: &str,
        _proxy_url: &str,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn name(&self) -> &str {
        "HashEmbedding (deterministic fixture)"
    }
}
