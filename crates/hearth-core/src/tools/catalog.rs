use serde::{Deserialize, Serialize};

use crate::error::RegistryLoadError;

/// One tool entry as written in the catalog file.
///
/// Every field defaults so that structural gaps surface as precise
/// `RegistryLoadError`s during validation instead of a generic parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolEntry {
    pub name: String,
    pub display_name: Option<String>,
    pub description: String,
    #[serde(alias = "server_url")]
    pub endpoint: String,
    pub actions: Vec<ActionEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionEntry {
    pub name: String,
    pub description: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
}

/// Accepted top-level shapes: `{"tools": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped { tools: Vec<ToolEntry> },
    Bare(Vec<ToolEntry>),
}

/// Parse catalog JSON into raw entries. Validation happens in the registry.
pub fn parse_catalog(json: &str) -> Result<Vec<ToolEntry>, RegistryLoadError> {
    let doc: CatalogDocument = serde_json::from_str(json)?;
    Ok(match doc {
        CatalogDocument::Wrapped { tools } => tools,
        CatalogDocument::Bare(tools) => tools,
    })
}

/// Catalog written by `hearth onboard`, describing the chore and screen-time
/// tool servers.
pub const SAMPLE_CATALOG: &str = r#"{
  "tools": [
    {
      "name": "chore_tool",
      "display_name": "Chore Tool",
      "description": "Create, inspect and update household chores.",
      "endpoint": "http://chore-tool:8000",
      "actions": [
        {
          "name": "create_chore",
          "description": "Create a new chore and assign it to a family member.",
          "required_params": ["title", "assigned_to_id", "frequency"],
          "optional_params": ["description", "due_date", "points"]
        },
        {
          "name": "get_chore_status",
          "description": "Look up chores by id or by assignee.",
          "required_params": [],
          "optional_params": ["chore_id", "user_id"]
        },
        {
          "name": "update_chore_status",
          "description": "Mark a chore pending, completed, verified or overdue.",
          "required_params": ["chore_id", "status"],
          "optional_params": []
        }
      ]
    },
    {
      "name": "screen_tool",
      "display_name": "Screen Time Tool",
      "description": "Track and check screen time allowances.",
      "endpoint": "http://screen-tool:8000",
      "actions": [
        {
          "name": "check_screen_time_allowed",
          "description": "Check whether a user may use a device right now.",
          "required_params": ["user_id"],
          "optional_params": ["device_type"]
        },
        {
          "name": "get_screen_time_usage",
          "description": "Summarise screen time used over a date range.",
          "required_params": ["user_id"],
          "optional_params": ["start_date", "end_date"]
        },
        {
          "name": "report_screen_time_usage",
          "description": "Record minutes of screen time used on a device.",
          "required_params": ["user_id", "device_id", "device_type", "minutes_used"],
          "optional_params": ["date"]
        }
      ]
    }
  ]
}"#;
