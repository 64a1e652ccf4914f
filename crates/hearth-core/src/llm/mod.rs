//! Ports to the model services the core talks to, plus their adapters.
//!
//! The core only sees the three traits below. Network adapters translate
//! transport failures into `CollaboratorError` so callers can degrade.

pub mod hashing;
pub mod model_pool;
pub mod ollama;
pub mod rig_model;

use async_trait::async_trait;

use crate::agent::prompt::{DecisionPrompt, ReplyRequest};
use crate::error::CollaboratorError;

pub use hashing::HashingEmbedder;
pub use model_pool::ModelPool;
pub use ollama::OllamaEmbedder;
pub use rig_model::RigChatModel;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

/// Proposes a structured tool decision. Returns the raw model text; parsing
/// and validation belong to the decision engine.
#[async_trait]
pub trait DecisionModel: Send + Sync {
    async fn propose(&self, prompt: &DecisionPrompt) -> Result<String, CollaboratorError>;
}

/// Writes the natural-language reply for a turn.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: &ReplyRequest) -> Result<String, CollaboratorError>;
}

/// Strip markdown code fences (```json ... ``` or ``` ... ```) from LLM output.
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

/// Find the largest byte index <= `max` that is a UTF-8 char boundary.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Shorten model output for log lines.
pub(crate) fn preview(text: &str, max: usize) -> &str {
    &text[..floor_char_boundary(text, max)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fences_json() {
        let input = "```json\n{\"decision\": \"no_tool_call\"}\n```";
        assert_eq!(strip_markdown_fences(input), "{\"decision\": \"no_tool_call\"}");
    }

    #[test]
    fn strip_fences_plain_and_unclosed() {
        assert_eq!(strip_markdown_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_markdown_fences("```json\n{}"), "{}");
        assert_eq!(strip_markdown_fences("  {}  "), "{}");
    }

    #[test]
    fn floor_char_boundary_respects_utf8() {
        let s = "héllo";
        // 'é' spans bytes 1..3
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 100), s.len());
        assert_eq!(preview(s, 3), "hé");
    }
}
