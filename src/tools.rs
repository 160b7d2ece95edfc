//! Tool registry
//!
//! Maps `ToolRef`s to the definitions forwarded to providers. The gateway
//! only advertises tools; executing them is the caller's concern.

use std::collections::HashMap;

use crate::error::GatewayError;
use crate::types::{ToolDefinition, ToolRef};

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    builtin: HashMap<String, ToolDefinition>,
    external: HashMap<(String, String), ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway-owned tool under its definition name.
    pub fn register_builtin(&mut self, definition: ToolDefinition) {
        self.builtin.insert(definition.name.clone(), definition);
    }

    /// Register a tool hosted by `provider_id` under `tool_id`.
    pub fn register_external(
        &mut self,
        provider_id: impl Into<String>,
        tool_id: impl Into<String>,
        definition: ToolDefinition,
    ) {
        self.external
            .insert((provider_id.into(), tool_id.into()), definition);
    }

    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.external.is_empty()
    }

    pub fn resolve(&self, tool: &ToolRef) -> Result<ToolDefinition, GatewayError> {
        let found = match tool {
            ToolRef::Builtin { name } => self.builtin.get(name),
            ToolRef::External {
                provider_id,
                tool_id,
            } => self.external.get(&(provider_id.clone(), tool_id.clone())),
        };
        found
            .cloned()
            .ok_or_else(|| GatewayError::InvalidInput(format!("unknown tool '{tool}'")))
    }

    /// Resolve every reference for a call dispatched to `provider_id`.
    ///
    /// External tools can only be forwarded to the provider that hosts them.
    pub fn resolve_for(
        &self,
        provider_id: &str,
        tools: &[ToolRef],
    ) -> Result<Vec<ToolDefinition>, GatewayError> {
        tools
            .iter()
            .map(|tool| {
                if let ToolRef::External {
                    provider_id: owner, ..
                } = tool
                {
                    if owner != provider_id {
                        return Err(GatewayError::InvalidInput(format!(
                            "tool '{tool}' is not available on provider '{provider_id}'"
                        )));
                    }
                }
                self.resolve(tool)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register_builtin(ToolDefinition::function(
            "clock",
            "Current time",
            json!({"type": "object"}),
        ));
        tools.register_external(
            "acme",
            "search",
            ToolDefinition::function("web_search", "Search", json!({"type": "object"})),
        );
        tools
    }

    #[test]
    fn resolves_builtin_and_external() {
        let tools = registry();
        assert_eq!(tools.resolve(&ToolRef::builtin("clock")).unwrap().name, "clock");
        let defs = tools
            .resolve_for(
                "acme",
                &[ToolRef::builtin("clock"), ToolRef::external("acme", "search")],
            )
            .unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].name, "web_search");
    }

    #[test]
    fn unknown_tool_is_invalid_input() {
        let err = registry().resolve(&ToolRef::builtin("nope")).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[test]
    fn external_tool_bound_to_its_provider() {
        let err = registry()
            .resolve_for("other", &[ToolRef::external("acme", "search")])
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }
}
