//! Tool catalog, registry and dispatch.

pub mod catalog;
pub mod circuit;
pub mod dispatch;
pub mod registry;
pub mod transport;

pub use catalog::{parse_catalog, ActionEntry, ToolEntry, SAMPLE_CATALOG};
pub use circuit::{CircuitBreakerConfig, CircuitBreakers, CircuitSnapshot, CircuitState};
pub use dispatch::{ToolDispatchClient, ToolResult};
pub use registry::{ActionDescriptor, ToolAction, ToolDefinition, ToolRegistry};
pub use transport::{HttpToolTransport, ToolRequest, ToolTransport, TransportError, TransportResponse};
