//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use shoal_core::{
    AddDocumentRequest, CreateCollectionRequest, EmbeddingProvider, HashEmbedding, ProviderError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Embedding provider with per-text overrides and scripted failures
///
/// Texts found in `overrides` get their prescribed vector; everything else
/// falls back to deterministic hash embeddings. Calls whose index appears
/// in `fail_on` error with a transport failure.
pub struct ScriptedProvider {
    inner: HashEmbedding,
    calls: AtomicUsize,
    overrides: Mutex<HashMap<String, Vec<f32>>>,
    fail_on: Vec<usize>,
}

impl ScriptedProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: HashEmbedding::new(dimensions),
            calls: AtomicUsize::new(0),
            overrides: Mutex::new(HashMap::new()),
            fail_on: Vec::new(),
        }
    }

    pub fn failing_on(dimensions: usize, fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            ..Self::new(dimensions)
        }
    }

    /// Prescribe the (unit-normalized) embedding for an exact text
    pub fn set_embedding(&self, text: &str, embedding: Vec<f32>) {
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        let normalized = embedding.iter().map(|x| x / norm).collect();
        self.overrides.lock().insert(text.to_string(), normalized);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn embed(
        &self,
        texts: &[String],
        model: &str,
        proxy_url: &str,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&call) {
            return Err(ProviderError::Transport(format!(
                "scripted failure on call {call}"
            )));
        }

        // Snapshot the overrides so no lock is held across an await
        let overrides = self.overrides.lock().clone();
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            match overrides.get(text) {
                Some(embedding) => out.push(embedding.clone()),
                None => out.extend(self.inner.embed(&[text.clone()], model, proxy_url).await?),
            }
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "ScriptedProvider"
    }
}

pub fn collection_request(id: &str) -> CreateCollectionRequest {
    CreateCollectionRequest {
        id: id.to_string(),
        name: format!("Collection {id}"),
        description: None,
        settings: None,
    }
}

pub fn document_request(collection_id: &str, title: &str, content: &str) -> AddDocumentRequest {
    AddDocumentRequest {
        collection_id: collection_id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        content_type: None,
        source_url: None,
        author: None,
        tags: None,
    }
}
