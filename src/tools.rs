use serde_json::{json, Value};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

use crate::extractor::UPDATE_UI;

#[derive(Error, Debug, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Invalid tool parameters: {0}")]
    InvalidParameters(String),
}

/// Actions the storefront UI knows how to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
pub enum UiAction {
    #[strum(serialize = "FILTER")]
    Filter,
    #[strum(serialize = "HIGHLIGHT")]
    Highlight,
    #[strum(serialize = "NAVIGATE")]
    Navigate,
    #[strum(serialize = "ADD_TO_CART")]
    AddToCart,
}

#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool
    pub fn register_tool(&mut self, tool: Tool) {
        self.tools.push(tool);
    }

    /// Find a tool by name
    pub fn find_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Execute a tool by name, returning the response object sent back to the model
    pub fn execute_tool(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        if self.find_tool(name).is_none() {
            return Err(ToolError::NotFound(format!("Tool '{}' not found", name)));
        }

        match name {
            UPDATE_UI => update_ui(arguments),
            _ => Err(ToolError::NotFound(format!("Tool '{}' not found", name))),
        }
    }

    /// Function declarations for the live session setup
    pub fn get_function_declarations(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters
                })
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the `update_ui` tool
pub fn create_default_registry() -> ToolRegistry {
    let actions: Vec<String> = UiAction::iter().map(|a| a.to_string()).collect();

    let mut registry = ToolRegistry::new();
    registry.register_tool(Tool {
        name: UPDATE_UI.to_string(),
        description: format!(
            "Updates the UI based on the user's intent. Actions: {}.",
            actions.join(", ")
        ),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "action": {
                    "type": "STRING",
                    "description": format!("The action to perform ({}).", actions.join(", "))
                },
                "target": {
                    "type": "STRING",
                    "description": "The target of the action (e.g. 'laptops', 'macbook')."
                },
                "details": {
                    "type": "STRING",
                    "description": "Additional details (optional)."
                }
            },
            "required": ["action", "target"]
        }),
    });

    registry
}

/// Canonical result of a `update_ui` call
pub fn update_ui(arguments: &Value) -> Result<Value, ToolError> {
    let action = string_argument(arguments, "action")?;
    let target = string_argument(arguments, "target")?;
    let details = arguments
        .get("details")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if action.parse::<UiAction>().is_err() {
        log::warn!("⚠️  update_ui called with unrecognized action '{}'", action);
    }
    log::debug!(
        "update_ui called with action={}, target={}, details={}",
        action,
        target,
        details
    );

    Ok(json!({
        "result": format!("UI Updated: {} {} {}", action, target, details)
    }))
}

fn string_argument<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing string argument '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_action_names() {
        assert_eq!(UiAction::AddToCart.to_string(), "ADD_TO_CART");
        assert_eq!("FILTER".parse::<UiAction>(), Ok(UiAction::Filter));
        assert!("filter".parse::<UiAction>().is_err());
        assert_eq!(UiAction::iter().count(), 4);
    }

    #[test]
    fn test_default_registry_declarations() {
        let registry = create_default_registry();
        let declarations = registry.get_function_declarations();
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0]["name"], "update_ui");
        assert_eq!(
            declarations[0]["parameters"]["required"],
            json!(["action", "target"])
        );
        assert!(declarations[0]["description"]
            .as_str()
            .unwrap()
            .contains("ADD_TO_CART"));
    }

    #[test]
    fn test_update_ui_result() {
        let result = update_ui(&json!({"action": "FILTER", "target": "laptop"})).unwrap();
        assert_eq!(result, json!({"result": "UI Updated: FILTER laptop "}));

        let result = update_ui(&json!({
            "action": "HIGHLIGHT",
            "target": "p1",
            "details": "red"
        }))
        .unwrap();
        assert_eq!(result["result"], "UI Updated: HIGHLIGHT p1 red");
    }

    #[test]
    fn test_update_ui_missing_arguments() {
        assert!(matches!(
            update_ui(&json!({"action": "FILTER"})),
            Err(ToolError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_execute_unknown_tool() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.execute_tool("get_weather", &json!({})),
            Err(ToolError::NotFound(_))
        ));
        assert!(registry
            .execute_tool("update_ui", &json!({"action": "NAVIGATE", "target": "checkout"}))
            .is_ok());
    }
}
