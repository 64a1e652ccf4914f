pub mod agent;
pub mod error;
pub mod llm;
pub mod memory;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use agent::{DecisionEngine, Orchestrator, OrchestratorConfig, ToolCallDecision, TurnRequest};
pub use error::{DispatchError, MemoryError, RegistryLoadError, TurnError};
pub use memory::{MemoryStore, Scope, SqliteMemoryBackend};
pub use tools::{ToolDispatchClient, ToolRegistry};
