use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::Embedder;
use crate::error::CollaboratorError;

pub const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

/// Embedding client for an Ollama server.
///
/// Uses `POST /api/embed` and falls back to the legacy `POST /api/embeddings`
/// when the server is too old to know the newer route.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    embedding: Vec<f32>,
}

impl EmbedResponse {
    fn into_vector(self) -> Option<Vec<f32>> {
        let vector = match self.embeddings.into_iter().next() {
            Some(first) => first,
            None => self.embedding,
        };
        (!vector.is_empty()).then_some(vector)
    }
}

impl OllamaEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_OLLAMA_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    async fn post(&self, route: &str, body: serde_json::Value) -> Result<reqwest::Response, CollaboratorError> {
        let url = format!("{}{route}", self.base_url);
        self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                debug!("Ollama timed out at {url}");
                CollaboratorError::Timeout(self.timeout)
            } else {
                CollaboratorError::Unavailable(format!(
                    "Ollama not reachable at {} ({e})",
                    self.base_url
                ))
            }
        })
    }

    async fn read_vector(resp: reqwest::Response) -> Result<Vec<f32>, CollaboratorError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::Unavailable(format!(
                "Ollama embed returned {status}: {body}"
            )));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(format!("embedding response: {e}")))?;
        parsed
            .into_vector()
            .ok_or_else(|| CollaboratorError::Malformed("empty embedding vector".into()))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let resp = self
            .post("/api/embed", json!({ "model": self.model, "input": text }))
            .await?;

        if resp.status() != StatusCode::NOT_FOUND {
            let vector = Self::read_vector(resp).await?;
            debug!("Embedded {} chars into {} dims", text.len(), vector.len());
            return Ok(vector);
        }

        info!("Ollama /api/embed not found, trying legacy /api/embeddings");
        let resp = self
            .post("/api/embeddings", json!({ "model": self.model, "prompt": text }))
            .await?;
        Self::read_vector(resp).await
    }
}
