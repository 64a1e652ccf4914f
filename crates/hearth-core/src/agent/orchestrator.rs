use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::decision::{DecisionEngine, ToolCallDecision};
use crate::agent::prompt::{render_context, ReplyRequest};
use crate::error::{DispatchError, MemoryError, TurnError};
use crate::llm::ResponseGenerator;
use crate::memory::{
    MemoryKind, MemoryStore, Scope, ScoredRecord, SearchFilters, DEFAULT_IMPORTANCE,
    IMPORTANCE_KEY, KIND_KEY, SOURCE_KEY,
};
use crate::tools::{ToolDispatchClient, ToolResult};

pub const OUTCOME_KEY: &str = "outcome";
pub const TOOL_KEY: &str = "tool";
pub const TURN_SOURCE: &str = "turn";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Memory records retrieved as context per turn.
    pub context_k: usize,
    pub score_threshold: Option<f32>,
    pub tool_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            context_k: 3,
            score_threshold: None,
            tool_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub scope: Scope,
    pub utterance: String,
    pub user_name: Option<String>,
    /// Earlier (user, assistant) exchanges, oldest first.
    pub history: Vec<(String, String)>,
}

impl TurnRequest {
    pub fn new(scope: Scope, utterance: impl Into<String>) -> Self {
        Self {
            scope,
            utterance: utterance.into(),
            user_name: None,
            history: Vec::new(),
        }
    }
}

/// What happened at the tool step of a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    NotAttempted,
    Succeeded(ToolResult),
    /// Circuit open, timeout or network failure.
    Unavailable {
        tool: String,
        action: String,
        detail: String,
    },
    /// The tool answered but rejected the call.
    Failed {
        tool: String,
        action: String,
        detail: String,
    },
}

impl ToolOutcome {
    fn from_dispatch(tool: &str, action: &str, result: Result<ToolResult, DispatchError>) -> Self {
        match result {
            Ok(result) => ToolOutcome::Succeeded(result),
            Err(e @ DispatchError::ToolUnavailable { .. }) => ToolOutcome::Unavailable {
                tool: tool.to_string(),
                action: action.to_string(),
                detail: e.to_string(),
            },
            Err(e) => ToolOutcome::Failed {
                tool: tool.to_string(),
                action: action.to_string(),
                detail: e.to_string(),
            },
        }
    }

    /// Value stored under the `outcome` metadata key.
    pub fn status(&self) -> &'static str {
        match self {
            ToolOutcome::NotAttempted => "none",
            ToolOutcome::Succeeded(_) => "success",
            ToolOutcome::Unavailable { .. } => "unavailable",
            ToolOutcome::Failed { .. } => "error",
        }
    }

    fn qualified_tool(&self) -> Option<String> {
        match self {
            ToolOutcome::NotAttempted => None,
            ToolOutcome::Succeeded(r) => Some(format!("{}.{}", r.tool_name, r.action_name)),
            ToolOutcome::Unavailable { tool, action, .. }
            | ToolOutcome::Failed { tool, action, .. } => Some(format!("{tool}.{action}")),
        }
    }

    /// Sentence handed to the reply generator and stored with the turn.
    pub fn describe(&self) -> Option<String> {
        match self {
            ToolOutcome::NotAttempted => None,
            ToolOutcome::Succeeded(r) => Some(format!(
                "Tool '{}.{}' executed successfully. Result: {}",
                r.tool_name, r.action_name, r.payload
            )),
            ToolOutcome::Unavailable { detail, .. } => Some(detail.clone()),
            ToolOutcome::Failed { tool, action, detail } => Some(format!(
                "Error: tool '{tool}.{action}' could not complete the request. {detail}"
            )),
        }
    }

    /// Reply used when the response generator is unavailable.
    fn fallback_reply(&self) -> String {
        match self {
            ToolOutcome::NotAttempted => {
                "I'm sorry, I can't put together an answer right now. Please try again in a moment."
                    .to_string()
            }
            ToolOutcome::Succeeded(r) => format!(
                "Done. The {} request ({}) went through.",
                r.tool_name, r.action_name
            ),
            ToolOutcome::Unavailable { tool, .. } => format!(
                "The {tool} service is temporarily unavailable, so I couldn't do that right now. \
                 Please try again later."
            ),
            ToolOutcome::Failed { tool, .. } => {
                format!("The {tool} service couldn't complete that request.")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub reply: String,
    pub decision: ToolCallDecision,
    pub tool_outcome: ToolOutcome,
    pub context: Vec<ScoredRecord>,
    pub memory_id: Uuid,
}

/// Runs one conversation turn: retrieve, decide, dispatch, reply, record.
///
/// Steps run strictly in order. Dropping the future cancels whatever external
/// call is in flight and skips the remaining steps, except that once the
/// final store has started it runs to completion on its own task.
pub struct Orchestrator {
    memory: Arc<MemoryStore>,
    engine: DecisionEngine,
    dispatcher: Arc<ToolDispatchClient>,
    generator: Arc<dyn ResponseGenerator>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<MemoryStore>,
        engine: DecisionEngine,
        dispatcher: Arc<ToolDispatchClient>,
        generator: Arc<dyn ResponseGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            memory,
            engine,
            dispatcher,
            generator,
            config,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatchClient> {
        &self.dispatcher
    }

    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnResponse, TurnError> {
        let TurnRequest {
            scope,
            utterance,
            user_name,
            history,
        } = request;
        info!("Turn in {scope}: '{}'", crate::llm::preview(&utterance, 100));

        // 1. Context
        let filters = SearchFilters::default().with_min_score(self.config.score_threshold);
        let context = self
            .memory
            .search(scope, &utterance, self.config.context_k, &filters)
            .await
            .map_err(TurnError::Context)?;
        debug!("Retrieved {} context records", context.len());

        // 2. Decision
        let decision = self.engine.decide(&utterance, &context).await;

        // 3. Dispatch
        let tool_outcome = match &decision {
            ToolCallDecision::NoToolCall { reason } => {
                debug!("No tool call ({})", reason.as_deref().unwrap_or("none given"));
                ToolOutcome::NotAttempted
            }
            ToolCallDecision::ToolCall(call) => {
                let result = self
                    .dispatcher
                    .execute(
                        &call.tool_name,
                        &call.action_name,
                        call.arguments.clone(),
                        self.config.tool_timeout,
                    )
                    .await;
                ToolOutcome::from_dispatch(&call.tool_name, &call.action_name, result)
            }
        };

        // 4. Reply
        let reply_request = ReplyRequest {
            utterance: utterance.clone(),
            user_name,
            context_text: render_context(&context),
            history,
            tool_outcome: tool_outcome.describe(),
        };
        let reply = match tokio::time::timeout(
            self.config.generation_timeout,
            self.generator.generate(&reply_request),
        )
        .await
        {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => {
                warn!("Response generator returned an empty reply, using fallback");
                tool_outcome.fallback_reply()
            }
            Ok(Err(e)) => {
                warn!("Response generator failed: {e}, using fallback");
                tool_outcome.fallback_reply()
            }
            Err(_) => {
                warn!(
                    "Response generator timed out after {:?}, using fallback",
                    self.config.generation_timeout
                );
                tool_outcome.fallback_reply()
            }
        };

        // 5. Record
        let content = turn_content(&utterance, &reply, &tool_outcome);
        let metadata = turn_metadata(&tool_outcome);
        let memory = Arc::clone(&self.memory);
        let store = tokio::spawn(async move { memory.store(scope, &content, metadata).await });
        let memory_id = store
            .await
            .map_err(|e| {
                TurnError::Record(MemoryError::PersistenceFailure(format!(
                    "store task failed: {e}"
                )))
            })?
            .map_err(TurnError::Record)?;

        Ok(TurnResponse {
            reply,
            decision,
            tool_outcome,
            context,
            memory_id,
        })
    }
}

fn turn_content(utterance: &str, reply: &str, outcome: &ToolOutcome) -> String {
    let mut content = format!("User: {utterance}\nAssistant: {reply}");
    if let Some(described) = outcome.describe() {
        content.push_str("\nTool: ");
        content.push_str(&described);
    }
    content
}

fn turn_metadata(outcome: &ToolOutcome) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(KIND_KEY.into(), json!(MemoryKind::Conversation.as_str()));
    metadata.insert(SOURCE_KEY.into(), json!(TURN_SOURCE));
    metadata.insert(IMPORTANCE_KEY.into(), json!(DEFAULT_IMPORTANCE));
    metadata.insert(OUTCOME_KEY.into(), json!(outcome.status()));
    if let Some(tool) = outcome.qualified_tool() {
        metadata.insert(TOOL_KEY.into(), json!(tool));
    }
    metadata
}
