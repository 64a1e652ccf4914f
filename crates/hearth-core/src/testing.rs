//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::agent::prompt::{DecisionPrompt, ReplyRequest};
use crate::error::CollaboratorError;
use crate::llm::{DecisionModel, Embedder, ResponseGenerator};
use crate::tools::catalog::SAMPLE_CATALOG;
use crate::tools::transport::{ToolRequest, ToolTransport, TransportError, TransportResponse};
use crate::tools::ToolRegistry;

pub(crate) fn sample_registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::from_json(SAMPLE_CATALOG).unwrap())
}

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Status(u16, String),
    Delayed(Duration, u16, String),
    Network(String),
    Hang,
}

/// Transport that replays queued responses, then repeats a fallback.
pub(crate) struct ScriptedTransport {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, ToolRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(fallback: Scripted) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, step: Scripted) {
        self.queue.lock().unwrap().push_back(step);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<(String, ToolRequest)> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn send(
        &self,
        endpoint: &Url,
        request: &ToolRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), request.clone()));
        let step = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Scripted::Status(status, body) => Ok(TransportResponse { status, body }),
            Scripted::Delayed(delay, status, body) => {
                tokio::time::sleep(delay).await;
                Ok(TransportResponse { status, body })
            }
            Scripted::Network(detail) => Err(TransportError::Network(detail)),
            Scripted::Hang => std::future::pending().await,
        }
    }
}

/// Returns the same vector for every input.
pub(crate) struct FixedEmbedder(pub Vec<f32>);

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Ok(self.0.clone())
    }
}

pub(crate) struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("embedding service down".into()))
    }
}

/// Decision model answering with a fixed result, optionally after a delay.
pub(crate) struct ScriptedDecisionModel {
    answer: Result<String, CollaboratorError>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<DecisionPrompt>>,
}

impl ScriptedDecisionModel {
    pub(crate) fn answering(raw: &str) -> Self {
        Self {
            answer: Ok(raw.to_string()),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(err: CollaboratorError) -> Self {
        Self {
            answer: Err(err),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn prompts(&self) -> Vec<DecisionPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionModel for ScriptedDecisionModel {
    async fn propose(&self, prompt: &DecisionPrompt) -> Result<String, CollaboratorError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.clone()
    }
}

/// Reply generator that echoes what it was given and keeps the requests.
pub(crate) struct RecordingGenerator {
    fail: bool,
    requests: Mutex<Vec<ReplyRequest>>,
}

impl RecordingGenerator {
    pub(crate) fn new() -> Self {
        Self {
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for RecordingGenerator {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, CollaboratorError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(CollaboratorError::Unavailable("generator down".into()));
        }
        Ok(format!("reply to: {}", request.utterance))
    }
}
