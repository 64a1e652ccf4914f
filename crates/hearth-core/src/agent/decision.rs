use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::agent::prompt::{render_context, DecisionPrompt};
use crate::error::{CollaboratorError, DecisionValidationError};
use crate::llm::{preview, strip_markdown_fences, DecisionModel};
use crate::memory::ScoredRecord;
use crate::tools::ToolRegistry;

/// A validated tool invocation. Only produced for actions that resolve in the
/// registry with every required parameter present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub action_name: String,
    pub arguments: Map<String, Value>,
}

/// The outcome of deciding one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ToolCallDecision {
    NoToolCall { reason: Option<String> },
    ToolCall(ToolCall),
}

impl ToolCallDecision {
    pub fn no_tool(reason: impl Into<String>) -> Self {
        ToolCallDecision::NoToolCall {
            reason: Some(reason.into()),
        }
    }
}

/// Shape the decision model is asked to emit.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(tag = "decision", rename_all = "snake_case")]
enum RawDecision {
    /// Answer directly without calling a tool.
    #[serde(alias = "no_tool_needed")]
    NoToolCall {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Call exactly one tool action.
    ToolCall {
        tool_name: String,
        action_name: String,
        #[serde(default)]
        arguments: Map<String, Value>,
    },
}

/// Turns an utterance plus retrieved context into a validated decision.
///
/// Never fails: model outages, timeouts, unparseable output and invalid
/// proposals all become `NoToolCall` with a reason, logged at `warn!`.
pub struct DecisionEngine {
    registry: Arc<ToolRegistry>,
    model: Arc<dyn DecisionModel>,
    timeout: Duration,
    response_schema: String,
}

impl DecisionEngine {
    pub fn new(registry: Arc<ToolRegistry>, model: Arc<dyn DecisionModel>, timeout: Duration) -> Self {
        let response_schema =
            serde_json::to_string_pretty(&schemars::schema_for!(RawDecision)).unwrap_or_default();
        Self {
            registry,
            model,
            timeout,
            response_schema,
        }
    }

    pub fn prompt(&self, utterance: &str, context: &[ScoredRecord]) -> DecisionPrompt {
        DecisionPrompt::build(
            utterance,
            &render_context(context),
            &self.registry.describe_for_prompt(),
            &self.response_schema,
        )
    }

    pub async fn decide(&self, utterance: &str, context: &[ScoredRecord]) -> ToolCallDecision {
        let prompt = self.prompt(utterance, context);

        let raw = match tokio::time::timeout(self.timeout, self.model.propose(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return coerce(DecisionValidationError::Unavailable(e.to_string())),
            Err(_) => {
                return coerce(DecisionValidationError::Unavailable(
                    CollaboratorError::Timeout(self.timeout).to_string(),
                ))
            }
        };
        debug!("Decision model raw output: {}", preview(&raw, 500));

        match self.validate(&raw) {
            Ok(decision) => {
                if let ToolCallDecision::ToolCall(call) = &decision {
                    info!("Decision: {}.{}", call.tool_name, call.action_name);
                }
                decision
            }
            Err(e) => coerce(e),
        }
    }

    /// Parse raw model output and check it against the registry.
    pub fn validate(&self, raw: &str) -> Result<ToolCallDecision, DecisionValidationError> {
        let proposed = parse_raw(raw)?;

        let (tool_name, action_name, arguments) = match proposed {
            RawDecision::NoToolCall { reason } => {
                return Ok(ToolCallDecision::NoToolCall { reason })
            }
            RawDecision::ToolCall {
                tool_name,
                action_name,
                arguments,
            } => (tool_name, action_name, arguments),
        };

        let Some(action) = self.registry.resolve(&tool_name, &action_name) else {
            return Err(DecisionValidationError::UnknownToolOrAction {
                tool: tool_name,
                action: action_name,
            });
        };

        let missing = action.missing_required(&arguments);
        if !missing.is_empty() {
            return Err(DecisionValidationError::MissingParameters(missing));
        }

        let before = arguments.len();
        let arguments = action.retain_declared(arguments);
        if arguments.len() < before {
            debug!(
                "Dropped {} undeclared argument(s) for {tool_name}.{action_name}",
                before - arguments.len()
            );
        }

        Ok(ToolCallDecision::ToolCall(ToolCall {
            tool_name,
            action_name,
            arguments,
        }))
    }
}

fn coerce(err: DecisionValidationError) -> ToolCallDecision {
    warn!("Decision coerced to no tool call: {err}");
    ToolCallDecision::no_tool(err.to_string())
}

fn parse_raw(raw: &str) -> Result<RawDecision, DecisionValidationError> {
    let text = strip_markdown_fences(raw);
    if text.is_empty() {
        return Err(DecisionValidationError::Unparseable);
    }
    if let Ok(decision) = serde_json::from_str(text) {
        return Ok(decision);
    }
    // Models sometimes wrap the object in prose.
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str(&text[start..=end]).map_err(|_| DecisionValidationError::Unparseable)
        }
        _ => Err(DecisionValidationError::Unparseable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_registry, ScriptedDecisionModel};
    use serde_json::json;

    fn engine(model: ScriptedDecisionModel) -> DecisionEngine {
        DecisionEngine::new(sample_registry(), Arc::new(model), Duration::from_secs(30))
    }

    fn reason(decision: &ToolCallDecision) -> &str {
        match decision {
            ToolCallDecision::NoToolCall { reason } => reason.as_deref().unwrap_or(""),
            ToolCallDecision::ToolCall(call) => panic!("unexpected tool call {call:?}"),
        }
    }

    #[tokio::test]
    async fn valid_tool_call_passes_through() {
        let raw = json!({
            "decision": "tool_call",
            "tool_name": "screen_tool",
            "action_name": "check_screen_time_allowed",
            "arguments": { "user_id": "u1", "device_type": "tablet" }
        })
        .to_string();
        let decision = engine(ScriptedDecisionModel::answering(&raw))
            .decide("can I use the tablet?", &[])
            .await;
        match decision {
            ToolCallDecision::ToolCall(call) => {
                assert_eq!(call.tool_name, "screen_tool");
                assert_eq!(call.arguments["device_type"], "tablet");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_required_params_are_named() {
        let raw = json!({
            "decision": "tool_call",
            "tool_name": "chore_tool",
            "action_name": "create_chore",
            "arguments": { "title": "Take out trash" }
        })
        .to_string();
        let decision = engine(ScriptedDecisionModel::answering(&raw))
            .decide("add a chore to take out the trash", &[])
            .await;
        assert_eq!(
            reason(&decision),
            "missing required parameter: assigned_to_id, frequency"
        );
    }

    #[tokio::test]
    async fn unknown_tool_or_action_is_refused() {
        for (tool, action) in [("weather_tool", "forecast"), ("chore_tool", "delete_all")] {
            let raw = json!({
                "decision": "tool_call",
                "tool_name": tool,
                "action_name": action,
                "arguments": {}
            })
            .to_string();
            let decision = engine(ScriptedDecisionModel::answering(&raw))
                .decide("hello", &[])
                .await;
            assert!(reason(&decision).starts_with("unknown tool/action"));
        }
    }

    #[tokio::test]
    async fn undeclared_keys_dropped_silently() {
        let raw = json!({
            "decision": "tool_call",
            "tool_name": "chore_tool",
            "action_name": "update_chore_status",
            "arguments": { "chore_id": "c1", "status": "completed", "confidence": 0.9 }
        })
        .to_string();
        let decision = engine(ScriptedDecisionModel::answering(&raw))
            .decide("I finished my chore", &[])
            .await;
        match decision {
            ToolCallDecision::ToolCall(call) => {
                assert!(!call.arguments.contains_key("confidence"));
                assert_eq!(call.arguments.len(), 2);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_fails_closed() {
        for raw in ["", "   ", "I think you should call the chore tool", "{\"decision\": \"maybe\"}"] {
            let decision = engine(ScriptedDecisionModel::answering(raw))
                .decide("hello", &[])
                .await;
            assert_eq!(reason(&decision), "decision unparseable", "raw: {raw:?}");
        }
    }

    #[tokio::test]
    async fn fenced_and_wrapped_json_accepted() {
        let fenced = "```json\n{\"decision\": \"no_tool_call\", \"reason\": \"chit-chat\"}\n```";
        let decision = engine(ScriptedDecisionModel::answering(fenced))
            .decide("hi", &[])
            .await;
        assert_eq!(reason(&decision), "chit-chat");

        let wrapped = "Sure! {\"decision\": \"no_tool_needed\"} Hope that helps.";
        let decision = engine(ScriptedDecisionModel::answering(wrapped))
            .decide("hi", &[])
            .await;
        assert_eq!(decision, ToolCallDecision::NoToolCall { reason: None });
    }

    #[tokio::test]
    async fn model_outage_is_not_an_error() {
        let decision = engine(ScriptedDecisionModel::failing(CollaboratorError::Unavailable(
            "connection refused".into(),
        )))
        .decide("hi", &[])
        .await;
        assert!(reason(&decision).starts_with("decision unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let model = ScriptedDecisionModel::answering("{\"decision\": \"no_tool_call\"}")
            .delayed(Duration::from_secs(60));
        let decision = engine(model).decide("hi", &[]).await;
        assert!(reason(&decision).contains("timed out"));
    }

    #[tokio::test]
    async fn prompt_carries_catalog_and_schema() {
        let model = Arc::new(ScriptedDecisionModel::answering("{\"decision\": \"no_tool_call\"}"));
        let engine = DecisionEngine::new(sample_registry(), model.clone(), Duration::from_secs(5));
        engine.decide("what chores do I have?", &[]).await;

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        let system = &prompts[0].system;
        assert!(system.contains("chore_tool.create_chore"));
        assert!(system.contains("tool_call"));
        assert!(system.contains("no_tool_call"));
        assert!(prompts[0].user.contains("what chores do I have?"));
    }
}
