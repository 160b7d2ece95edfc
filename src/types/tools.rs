//! Tool reference and definition types

use serde::{Deserialize, Serialize};

/// Reference to a tool, as named by a caller.
///
/// Built-in tools are owned by the gateway; external tools belong to a
/// provider and are addressed by that provider's own tool id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolRef {
    Builtin { name: String },
    External { provider_id: String, tool_id: String },
}

impl ToolRef {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self::Builtin { name: name.into() }
    }

    pub fn external(provider_id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self::External {
            provider_id: provider_id.into(),
            tool_id: tool_id.into(),
        }
    }
}

impl std::fmt::Display for ToolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin { name } => write!(f, "builtin:{name}"),
            Self::External {
                provider_id,
                tool_id,
            } => write!(f, "{provider_id}:{tool_id}"),
        }
    }
}

/// Tool definition forwarded to providers as a function schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// JSON schema for function parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// OpenAI-style `{"type":"function","function":{...}}` wrapper.
    pub fn to_openai_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}
