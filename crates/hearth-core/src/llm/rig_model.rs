use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::{AssistantContent, Text, UserContent};
use rig::OneOrMany;
use tracing::debug;

use super::{preview, DecisionModel, ResponseGenerator};
use crate::agent::prompt::{DecisionPrompt, ReplyRequest};
use crate::error::CollaboratorError;

/// Decision and reply adapter over a rig completion model.
///
/// Decisions run at a low fixed temperature; replies use the configured one.
#[allow(deprecated)]
#[derive(Clone)]
pub struct RigChatModel {
    model: CompletionModelHandle<'static>,
    model_name: String,
    temperature: f64,
    max_tokens: u64,
}

const DECISION_TEMPERATURE: f64 = 0.1;
const DECISION_MAX_TOKENS: u64 = 512;

fn user_message(text: &str) -> Message {
    Message::User {
        content: OneOrMany::one(UserContent::Text(Text {
            text: text.to_string(),
        })),
    }
}

fn assistant_message(text: &str) -> Message {
    Message::Assistant {
        id: None,
        content: OneOrMany::one(AssistantContent::Text(Text {
            text: text.to_string(),
        })),
    }
}

#[allow(deprecated)]
impl RigChatModel {
    pub fn new(
        model: CompletionModelHandle<'static>,
        model_name: impl Into<String>,
        temperature: f64,
        max_tokens: u64,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature,
            max_tokens,
        }
    }

    async fn complete(
        &self,
        preamble: String,
        mut messages: Vec<Message>,
        prompt: Message,
        temperature: f64,
        max_tokens: u64,
    ) -> Result<String, CollaboratorError> {
        messages.push(prompt.clone());
        debug!(
            "LLM request to {}: {} messages, temp={temperature}, max_tokens={max_tokens}",
            self.model_name,
            messages.len()
        );

        let request = CompletionRequest {
            preamble: Some(preamble),
            chat_history: OneOrMany::many(messages).unwrap_or_else(|_| OneOrMany::one(prompt)),
            documents: Vec::new(),
            tools: Vec::new(),
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            tool_choice: None,
            additional_params: None,
        };

        let response = self
            .model
            .completion(request)
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("LLM completion error: {e}")))?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect();

        if text.trim().is_empty() {
            return Err(CollaboratorError::Malformed(
                "model returned no text content".into(),
            ));
        }
        debug!("LLM response from {}: {}", self.model_name, preview(&text, 300));
        Ok(text)
    }
}

#[allow(deprecated)]
#[async_trait]
impl DecisionModel for RigChatModel {
    async fn propose(&self, prompt: &DecisionPrompt) -> Result<String, CollaboratorError> {
        self.complete(
            prompt.system.clone(),
            Vec::new(),
            user_message(&prompt.user),
            DECISION_TEMPERATURE,
            DECISION_MAX_TOKENS,
        )
        .await
    }
}

#[allow(deprecated)]
#[async_trait]
impl ResponseGenerator for RigChatModel {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, CollaboratorError> {
        let history: Vec<Message> = request
            .history
            .iter()
            .flat_map(|(user, assistant)| [user_message(user), assistant_message(assistant)])
            .collect();
        self.complete(
            request.system_prompt(),
            history,
            user_message(&request.utterance),
            self.temperature,
            self.max_tokens,
        )
        .await
    }
}
