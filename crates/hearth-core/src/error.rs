//! Error taxonomy for the orchestration core.
//!
//! Each component owns one error type. Only `RegistryLoadError` (startup) and
//! `TurnError` (context retrieval or turn recording failed) ever abort work;
//! decision and dispatch errors are folded into the turn as degraded outcomes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::memory::Scope;

/// The tool catalog could not be turned into a registry.
#[derive(Debug, Error)]
pub enum RegistryLoadError {
    #[error("failed to read tool catalog '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tool catalog is malformed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tool at index {index} has no name")]
    MissingName { index: usize },

    #[error("tool '{tool}' has no endpoint")]
    MissingEndpoint { tool: String },

    #[error("tool '{tool}' has an invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        tool: String,
        endpoint: String,
        reason: String,
    },

    #[error("tool '{tool}' declares no actions")]
    NoActions { tool: String },

    #[error("tool '{tool}' has an action without a name")]
    MissingActionName { tool: String },

    #[error("duplicate tool name '{0}'")]
    DuplicateTool(String),

    #[error("tool '{tool}' declares action '{action}' more than once")]
    DuplicateAction { tool: String, action: String },
}

/// Failure talking to an external model service (embedding, decision, reply).
///
/// Unavailability and timeouts are kept apart from malformed responses so
/// callers can tell "try later" from "the service answered nonsense".
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("service timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("memory persistence failed: {0}")]
    PersistenceFailure(String),

    /// A backend produced a record outside the query scope. Raised instead of
    /// filtering so that the defect is never hidden behind an empty result.
    #[error("record {record_id} from scope {found} surfaced in a search of scope {expected}")]
    ScopeViolation {
        record_id: Uuid,
        expected: Scope,
        found: Scope,
    },

    #[error("refusing to store empty memory content")]
    EmptyContent,
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::PersistenceFailure(e.to_string())
    }
}

/// Why a tool could not be reached at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    CircuitOpen,
    Timeout,
    Network(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::CircuitOpen => write!(f, "circuit open"),
            UnavailableReason::Timeout => write!(f, "timed out"),
            UnavailableReason::Network(detail) => write!(f, "network error: {detail}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("tool '{tool}' is temporarily unavailable ({reason})")]
    ToolUnavailable {
        tool: String,
        reason: UnavailableReason,
    },

    /// The tool answered, but not with a 2xx.
    #[error("tool '{tool}.{action}' rejected the call with HTTP {status}: {body}")]
    ToolExecutionError {
        tool: String,
        action: String,
        status: u16,
        body: String,
    },

    #[error("tool '{tool}.{action}' is not registered")]
    UnknownAction { tool: String, action: String },

    #[error("tool '{tool}.{action}' is missing required parameter(s): {}", .missing.join(", "))]
    MissingParameters {
        tool: String,
        action: String,
        missing: Vec<String>,
    },
}

/// Reasons a proposed decision is coerced to `NoToolCall`.
///
/// The `Display` output is used verbatim as the `NoToolCall` reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecisionValidationError {
    #[error("unknown tool/action: {tool}.{action}")]
    UnknownToolOrAction { tool: String, action: String },

    #[error("missing required parameter: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("decision unparseable")]
    Unparseable,

    #[error("decision unavailable: {0}")]
    Unavailable(String),
}

/// A turn could not be completed. Only memory failures end a turn early.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("failed to retrieve context: {0}")]
    Context(#[source] MemoryError),

    #[error("failed to record turn: {0}")]
    Record(#[source] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameters_reason_lists_names() {
        let err = DecisionValidationError::MissingParameters(vec![
            "assigned_to_id".into(),
            "frequency".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "missing required parameter: assigned_to_id, frequency"
        );
    }

    #[test]
    fn unavailable_reason_display() {
        let err = DispatchError::ToolUnavailable {
            tool: "chore_tool".into(),
            reason: UnavailableReason::CircuitOpen,
        };
        assert_eq!(
            err.to_string(),
            "tool 'chore_tool' is temporarily unavailable (circuit open)"
        );
    }

    #[test]
    fn rusqlite_errors_become_persistence_failures() {
        let err: MemoryError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, MemoryError::PersistenceFailure(_)));
    }
}
