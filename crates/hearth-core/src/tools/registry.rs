use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;
use url::Url;

use super::catalog::{parse_catalog, ToolEntry};
use crate::error::RegistryLoadError;

/// A single named operation of a tool and its parameter contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAction {
    pub name: String,
    pub description: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
}

impl ToolAction {
    pub fn declares(&self, param: &str) -> bool {
        self.required_params.iter().any(|p| p == param)
            || self.optional_params.iter().any(|p| p == param)
    }

    /// Required parameters absent from `args`. A JSON `null` counts as absent.
    pub fn missing_required(&self, args: &Map<String, Value>) -> Vec<String> {
        self.required_params
            .iter()
            .filter(|p| args.get(p.as_str()).map_or(true, Value::is_null))
            .cloned()
            .collect()
    }

    /// Keep only the keys this action declares.
    pub fn retain_declared(&self, mut args: Map<String, Value>) -> Map<String, Value> {
        args.retain(|key, _| self.declares(key));
        args
    }
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub endpoint: Url,
    pub actions: Vec<ToolAction>,
}

impl ToolDefinition {
    pub fn action(&self, name: &str) -> Option<&ToolAction> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// Flattened catalog row used to build decision prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
    pub tool_name: String,
    pub action_name: String,
    pub description: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
}

/// Immutable catalog of tool services and their actions.
///
/// Built once at startup and shared behind an `Arc`; there are no mutating
/// methods after construction.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn from_file(path: &Path) -> Result<Self, RegistryLoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryLoadError> {
        Self::load(parse_catalog(json)?)
    }

    /// Validate catalog entries and build the registry.
    ///
    /// Either every entry is valid and the whole catalog is returned, or
    /// nothing is: there is no partially loaded state.
    pub fn load(entries: Vec<ToolEntry>) -> Result<Self, RegistryLoadError> {
        let mut tools = BTreeMap::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                return Err(RegistryLoadError::MissingName { index });
            }
            if tools.contains_key(&name) {
                return Err(RegistryLoadError::DuplicateTool(name));
            }

            let endpoint_raw = entry.endpoint.trim();
            if endpoint_raw.is_empty() {
                return Err(RegistryLoadError::MissingEndpoint { tool: name });
            }
            let endpoint = parse_endpoint(&name, endpoint_raw)?;

            if entry.actions.is_empty() {
                return Err(RegistryLoadError::NoActions { tool: name });
            }
            let mut seen = HashSet::new();
            let mut actions = Vec::with_capacity(entry.actions.len());
            for action in entry.actions {
                let action_name = action.name.trim().to_string();
                if action_name.is_empty() {
                    return Err(RegistryLoadError::MissingActionName { tool: name });
                }
                if !seen.insert(action_name.clone()) {
                    return Err(RegistryLoadError::DuplicateAction {
                        tool: name,
                        action: action_name,
                    });
                }
                actions.push(ToolAction {
                    name: action_name,
                    description: action.description,
                    required_params: action.required_params,
                    optional_params: action.optional_params,
                });
            }

            let display_name = entry
                .display_name
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| name.clone());

            tools.insert(
                name.clone(),
                ToolDefinition {
                    name,
                    display_name,
                    description: entry.description,
                    endpoint,
                    actions,
                },
            );
        }

        let action_count: usize = tools.values().map(|t| t.actions.len()).sum();
        info!(
            "Loaded tool catalog: {} tools, {action_count} actions",
            tools.len()
        );
        Ok(Self { tools })
    }

    pub fn resolve(&self, tool_name: &str, action_name: &str) -> Option<&ToolAction> {
        self.tools.get(tool_name)?.action(action_name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Every action, ordered by tool name then action name.
    pub fn describe_for_prompt(&self) -> Vec<ActionDescriptor> {
        let mut rows: Vec<ActionDescriptor> = self
            .tools
            .values()
            .flat_map(|tool| {
                tool.actions.iter().map(move |action| ActionDescriptor {
                    tool_name: tool.name.clone(),
                    action_name: action.name.clone(),
                    description: action.description.clone(),
                    required_params: action.required_params.clone(),
                    optional_params: action.optional_params.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            a.tool_name
                .cmp(&b.tool_name)
                .then_with(|| a.action_name.cmp(&b.action_name))
        });
        rows
    }

    /// Catalog in OpenAI function-calling format, one function per action
    /// named `{tool}__{action}`. Parameters are typed as strings.
    pub fn function_definitions(&self) -> Vec<Value> {
        self.describe_for_prompt()
            .into_iter()
            .map(|row| {
                let properties: Map<String, Value> = row
                    .required_params
                    .iter()
                    .chain(row.optional_params.iter())
                    .map(|p| (p.clone(), json!({ "type": "string" })))
                    .collect();
                json!({
                    "type": "function",
                    "function": {
                        "name": format!("{}__{}", row.tool_name, row.action_name),
                        "description": row.description,
                        "parameters": {
                            "type": "object",
                            "properties": properties,
                            "required": row.required_params,
                        }
                    }
                })
            })
            .collect()
    }
}

fn parse_endpoint(tool: &str, raw: &str) -> Result<Url, RegistryLoadError> {
    let invalid = |reason: String| RegistryLoadError::InvalidEndpoint {
        tool: tool.to_string(),
        endpoint: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}
