//! Detection of `update_ui` invocations inside upstream events.
//!
//! The live model reports a UI intent in one of two shapes: a structured
//! `functionCall` part, or an `executableCode` part holding generated Python
//! that calls `update_ui(...)`. Both are normalized into [`UiCommand`]s.

use crate::pyexpr::{self, Constant, Expr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the UI tool the browser understands.
pub const UPDATE_UI: &str = "update_ui";

/// Envelopes that carry a list of content parts, searched in this order.
const PART_LISTS: &[&[&str]] = &[
    &["content", "parts"],
    &["serverContent", "modelTurn", "parts"],
];

/// Raw Live API tool call envelope; every entry is a function call.
const FUNCTION_CALL_LIST: &[&str] = &["toolCall", "functionCalls"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("'{0}' is not an array")]
    NotAnArray(String),

    #[error("part {index} of '{location}' is not an object")]
    InvalidPart { location: String, index: usize },

    #[error("arguments of function call '{0}' are not an object")]
    InvalidArgs(String),
}

/// A normalized UI command forwarded to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiCommand {
    pub action: String,
    pub target: String,
    #[serde(default)]
    pub details: String,
}

impl UiCommand {
    /// Build a command from a call's argument mapping.
    ///
    /// Returns `None` unless both `action` and `target` are non-empty strings.
    /// A missing or null `details` becomes `""`; any other non-string value is
    /// kept as its JSON text.
    pub fn from_args(args: &Map<String, Value>) -> Option<Self> {
        let action = non_empty_str(args.get("action"))?;
        let target = non_empty_str(args.get("target"))?;
        let details = match args.get("details") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(details)) => details.clone(),
            Some(other) => other.to_string(),
        };

        Some(Self {
            action: action.to_string(),
            target: target.to_string(),
            details,
        })
    }

    /// The command as an argument mapping, `details` always included.
    pub fn to_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("action".to_string(), Value::String(self.action.clone()));
        args.insert("target".to_string(), Value::String(self.target.clone()));
        args.insert("details".to_string(), Value::String(self.details.clone()));
        args
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// One content part of an upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum Part<'a> {
    FunctionCall {
        name: &'a str,
        args: Option<&'a Map<String, Value>>,
    },
    ExecutableCode {
        code: &'a str,
    },
    Other,
}

impl<'a> Part<'a> {
    /// Classify a `{name, args}` function call object.
    fn from_function_call(call: &'a Value) -> Result<Self, ExtractError> {
        let name = match call.get("name") {
            Some(Value::String(name)) => name.as_str(),
            _ => return Ok(Part::Other),
        };
        let args = match call.get("args") {
            None | Some(Value::Null) => None,
            Some(Value::Object(args)) => Some(args),
            Some(_) => return Err(ExtractError::InvalidArgs(name.to_string())),
        };
        Ok(Part::FunctionCall { name, args })
    }
}

/// What one upstream event yielded.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Extraction {
    pub commands: Vec<UiCommand>,
    /// Malformed lists and parts that were passed over.
    pub skipped: Vec<ExtractError>,
}

/// Finds UI commands in upstream events.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    tool_name: String,
}

impl Default for CommandExtractor {
    fn default() -> Self {
        Self::new(UPDATE_UI)
    }
}

impl CommandExtractor {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
        }
    }

    /// Every part carried by `event`, in envelope order then array order.
    ///
    /// A content part holding both a `functionCall` and an `executableCode`
    /// yields both. Malformed entries are reported next to the parts and do
    /// not stop the search.
    pub fn parts<'a>(&self, event: &'a Value) -> (Vec<Part<'a>>, Vec<ExtractError>) {
        let mut parts = Vec::new();
        let mut skipped = Vec::new();

        for path in PART_LISTS {
            let entries = match lookup_array(event, path) {
                Ok(Some(entries)) => entries,
                Ok(None) => continue,
                Err(e) => {
                    skipped.push(e);
                    continue;
                }
            };

            for (index, entry) in entries.iter().enumerate() {
                let object = match entry.as_object() {
                    Some(object) => object,
                    None => {
                        skipped.push(ExtractError::InvalidPart {
                            location: path.join("."),
                            index,
                        });
                        continue;
                    }
                };
                log::debug!("🔍 Part keys: {:?}", object.keys().collect::<Vec<_>>());

                let mut classified = false;
                if let Some(call) = object.get("functionCall") {
                    match Part::from_function_call(call) {
                        Ok(part) => parts.push(part),
                        Err(e) => skipped.push(e),
                    }
                    classified = true;
                }
                if let Some(Value::String(code)) =
                    object.get("executableCode").and_then(|code| code.get("code"))
                {
                    parts.push(Part::ExecutableCode { code });
                    classified = true;
                }
                if !classified {
                    parts.push(Part::Other);
                }
            }
        }

        match lookup_array(event, FUNCTION_CALL_LIST) {
            Ok(Some(calls)) => {
                for (index, call) in calls.iter().enumerate() {
                    if !call.is_object() {
                        skipped.push(ExtractError::InvalidPart {
                            location: FUNCTION_CALL_LIST.join("."),
                            index,
                        });
                        continue;
                    }
                    match Part::from_function_call(call) {
                        Ok(part) => parts.push(part),
                        Err(e) => skipped.push(e),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => skipped.push(e),
        }

        (parts, skipped)
    }

    /// Extract every UI command from one upstream event.
    ///
    /// Code that fails to parse yields nothing. Malformed lists and parts are
    /// reported in [`Extraction::skipped`]; commands from the rest of the
    /// event are still returned.
    pub fn extract(&self, event: &Value) -> Extraction {
        let (parts, skipped) = self.parts(event);
        let mut commands = Vec::new();

        for part in parts {
            match part {
                Part::FunctionCall { name, args } if name == self.tool_name => {
                    let empty = Map::new();
                    let args = args.unwrap_or(&empty);
                    match UiCommand::from_args(args) {
                        Some(command) => {
                            log::info!(
                                "🎯 Function call {}: {} {}",
                                self.tool_name,
                                command.action,
                                command.target
                            );
                            commands.push(command);
                        }
                        None => log::warn!(
                            "⚠️  Ignoring {} call without action/target: {}",
                            self.tool_name,
                            Value::Object(args.clone())
                        ),
                    }
                }
                Part::ExecutableCode { code } if code.contains(self.tool_name.as_str()) => {
                    commands.extend(self.commands_from_code(code));
                }
                _ => {}
            }
        }

        Extraction { commands, skipped }
    }

    /// Commands from every matching call in a generated code fragment.
    pub fn commands_from_code(&self, code: &str) -> Vec<UiCommand> {
        log::debug!("🐍 Executable code: {}", code);

        let module = match pyexpr::parse_module(code) {
            Ok(module) => module,
            Err(e) => {
                log::warn!("⚠️  Could not parse executable code: {}", e);
                return Vec::new();
            }
        };

        let mut found_call = false;
        let mut commands = Vec::new();
        for call in module.calls() {
            if call.callee_name() != Some(self.tool_name.as_str()) {
                continue;
            }
            found_call = true;

            let args: Map<String, Value> = call
                .keywords
                .iter()
                .filter_map(|kw| {
                    let name = kw.arg.as_ref()?;
                    match &kw.value {
                        Expr::Constant(constant) => {
                            Some((name.clone(), constant_to_json(constant)?))
                        }
                        _ => None,
                    }
                })
                .collect();

            match UiCommand::from_args(&args) {
                Some(command) => {
                    log::info!(
                        "🎯 Code call {}: {} {}",
                        self.tool_name,
                        command.action,
                        command.target
                    );
                    commands.push(command);
                }
                None => log::warn!(
                    "⚠️  Ignoring {} call in code without action/target",
                    self.tool_name
                ),
            }
        }

        if !found_call {
            log::debug!("Parsed code but found no {} calls", self.tool_name);
        }
        commands
    }
}

/// The array at `path`, `None` when any segment is missing or null.
fn lookup_array<'a>(event: &'a Value, path: &[&str]) -> Result<Option<&'a Vec<Value>>, ExtractError> {
    let mut current = event;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    match current {
        Value::Null => Ok(None),
        Value::Array(items) => Ok(Some(items)),
        _ => Err(ExtractError::NotAnArray(path.join("."))),
    }
}

fn constant_to_json(constant: &Constant) -> Option<Value> {
    match constant {
        Constant::None => Some(Value::Null),
        Constant::Bool(b) => Some(Value::Bool(*b)),
        Constant::Int(i) => Some(Value::from(*i)),
        Constant::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
        Constant::Str(s) => Some(Value::String(s.clone())),
        Constant::Bytes(_) | Constant::Complex(_) | Constant::Ellipsis => None,
    }
}
