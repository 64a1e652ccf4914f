use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Body of a single tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolRequest {
    pub action_name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

/// Sends one request to a tool service. Exactly one attempt per call.
///
/// Timeouts are enforced by the dispatch client; transports only report what
/// the network did.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn send(
        &self,
        endpoint: &Url,
        request: &ToolRequest,
    ) -> Result<TransportResponse, TransportError>;
}

/// JSON-over-HTTP transport: `POST {endpoint}/execute/{action_name}`.
#[derive(Clone, Default)]
pub struct HttpToolTransport {
    client: Client,
}

impl HttpToolTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Endpoints that already end in `/execute` only get the action appended.
pub fn action_url(endpoint: &Url, action_name: &str) -> String {
    let base = endpoint.as_str().trim_end_matches('/');
    if base.ends_with("/execute") {
        format!("{base}/{action_name}")
    } else {
        format!("{base}/execute/{action_name}")
    }
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn send(
        &self,
        endpoint: &Url,
        request: &ToolRequest,
    ) -> Result<TransportResponse, TransportError> {
        let url = action_url(endpoint, &request.action_name);
        debug!("POST {url}");

        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}
