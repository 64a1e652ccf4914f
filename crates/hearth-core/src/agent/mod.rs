pub mod decision;
pub mod orchestrator;
pub mod prompt;

pub use decision::{DecisionEngine, ToolCall, ToolCallDecision};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ToolOutcome, TurnRequest, TurnResponse};
pub use prompt::{render_context, DecisionPrompt, ReplyRequest};
