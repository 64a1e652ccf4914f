use serde::Serialize;

use crate::memory::ScoredRecord;
use crate::tools::ActionDescriptor;

pub const NO_CONTEXT: &str = "No specific relevant history found.";

/// Render retrieved memories as a bullet list for prompts.
pub fn render_context(records: &[ScoredRecord]) -> String {
    if records.is_empty() {
        return NO_CONTEXT.to_string();
    }
    records
        .iter()
        .map(|r| format!("- {} (score: {:.2})", r.record.content, r.score))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Input for the structured decision call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionPrompt {
    pub system: String,
    pub user: String,
}

impl DecisionPrompt {
    pub fn build(
        utterance: &str,
        context_text: &str,
        actions: &[ActionDescriptor],
        response_schema: &str,
    ) -> Self {
        let catalog = if actions.is_empty() {
            "(no tools are registered)".to_string()
        } else {
            actions
                .iter()
                .map(describe_action)
                .collect::<Vec<_>>()
                .join("\n")
        };

        let system = format!(
            "You route requests for a family assistant. Decide whether the user's \
             message needs exactly ONE of the tool actions below, or none.\n\n\
             # Available actions\n\n{catalog}\n\n\
             # Rules\n\n\
             - Pick a tool action only when the message clearly asks for what it does.\n\
             - Fill arguments ONLY from the message and the context. Never invent ids.\n\
             - If a required argument is unknown, or the message is conversational, \
             answer with decision \"no_tool_call\".\n\n\
             # Response format\n\n\
             Respond with ONLY a JSON object matching this schema, no markdown fences:\n\
             {response_schema}"
        );

        let user = format!(
            "User message: \"{utterance}\"\n\nRelevant context from memory:\n{context_text}"
        );

        Self { system, user }
    }
}

fn describe_action(action: &ActionDescriptor) -> String {
    let list = |params: &[String]| {
        if params.is_empty() {
            "none".to_string()
        } else {
            params.join(", ")
        }
    };
    format!(
        "- {}.{}: {} (required: {}; optional: {})",
        action.tool_name,
        action.action_name,
        action.description,
        list(&action.required_params),
        list(&action.optional_params)
    )
}

/// Everything the reply generator sees for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyRequest {
    pub utterance: String,
    pub user_name: Option<String>,
    pub context_text: String,
    /// Earlier (user, assistant) exchanges, oldest first.
    pub history: Vec<(String, String)>,
    /// What happened when a tool was called, if one was.
    pub tool_outcome: Option<String>,
}

impl ReplyRequest {
    pub fn system_prompt(&self) -> String {
        let mut parts = vec![format!(
            "You are Hearth, a helpful family assistant. Relevant context:\n{}",
            self.context_text
        )];
        if let Some(name) = &self.user_name {
            parts.push(format!("You are talking with {name}."));
        }
        if let Some(outcome) = &self.tool_outcome {
            parts.push(format!(
                "Tool execution information: {outcome}\n\
                 Now give a concise, helpful answer to the user's message based on the tool result. \
                 If the tool was unavailable or rejected the request, say so plainly."
            ));
        }
        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRecord, Scope};
    use chrono::Utc;
    use serde_json::Map;
    use uuid::Uuid;

    fn scored(content: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            record: MemoryRecord {
                id: Uuid::new_v4(),
                scope: Scope::family(Uuid::new_v4()),
                content: content.into(),
                embedding: vec![],
                metadata: Map::new(),
                created_at: Utc::now(),
            },
            score,
        }
    }

    #[test]
    fn context_rendering() {
        assert_eq!(render_context(&[]), NO_CONTEXT);
        let text = render_context(&[scored("bedtime is nine", 0.8765), scored("likes lego", 0.5)]);
        assert_eq!(text, "- bedtime is nine (score: 0.88)\n- likes lego (score: 0.50)");
    }

    #[test]
    fn decision_prompt_lists_actions_in_order() {
        let actions = vec![
            ActionDescriptor {
                tool_name: "chore_tool".into(),
                action_name: "create_chore".into(),
                description: "Create a chore.".into(),
                required_params: vec!["title".into()],
                optional_params: vec![],
            },
            ActionDescriptor {
                tool_name: "screen_tool".into(),
                action_name: "check_screen_time_allowed".into(),
                description: "Check allowance.".into(),
                required_params: vec!["user_id".into()],
                optional_params: vec!["device_type".into()],
            },
        ];
        let prompt = DecisionPrompt::build("can I play?", NO_CONTEXT, &actions, "{}");
        let chore = prompt.system.find("- chore_tool.create_chore").unwrap();
        let screen = prompt.system.find("- screen_tool.check_screen_time_allowed").unwrap();
        assert!(chore < screen);
        assert!(prompt.system.contains("(required: title; optional: none)"));
        assert!(prompt.user.contains("\"can I play?\""));
        assert!(prompt.user.contains(NO_CONTEXT));
    }

    #[test]
    fn reply_prompt_mentions_tool_outcome_only_when_present() {
        let mut req = ReplyRequest {
            utterance: "hi".into(),
            user_name: Some("Emma".into()),
            context_text: NO_CONTEXT.into(),
            history: vec![],
            tool_outcome: None,
        };
        assert!(!req.system_prompt().contains("Tool execution information"));
        assert!(req.system_prompt().contains("talking with Emma"));

        req.tool_outcome = Some("tool 'chore_tool' is temporarily unavailable (timed out)".into());
        assert!(req.system_prompt().contains("temporarily unavailable"));
    }
}
