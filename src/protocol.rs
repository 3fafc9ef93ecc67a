//! Browser client wire protocol.
//!
//! Inbound binary frames are raw 16-bit little-endian mono PCM at 16 kHz.
//! Inbound text frames are JSON objects with a `type` discriminator.
//! Outbound frames are JSON text: one tool-call message per UI command,
//! followed by the raw upstream event.

use crate::extractor::{UiCommand, UPDATE_UI};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// MIME type attached to forwarded client audio: 16 kHz 16-bit mono PCM
pub const AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// MIME type used when an image message does not declare one
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Text-frame messages sent by the browser
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Decoded client input, ready for the upstream queue
#[derive(Debug, Clone, PartialEq)]
pub enum ClientInput {
    Audio(Vec<u8>),
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

impl ClientInput {
    /// Decode a binary frame. Audio is forwarded unmodified.
    pub fn from_binary(data: impl Into<Vec<u8>>) -> Self {
        ClientInput::Audio(data.into())
    }

    /// Decode a text frame.
    ///
    /// Returns `Ok(None)` for well-formed JSON whose `type` is not understood.
    pub fn from_text(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("text") | Some("image") => {}
            other => {
                log::debug!("Ignoring client message of type {:?}", other);
                return Ok(None);
            }
        }

        match serde_json::from_value::<ClientMessage>(value)? {
            ClientMessage::Text { text } => Ok(Some(ClientInput::Text(text))),
            ClientMessage::Image { data, mime_type } => {
                let (declared_mime, payload) = split_data_url(&data);
                let data = STANDARD.decode(payload.trim())?;
                let mime_type = mime_type
                    .filter(|m| !m.is_empty())
                    .or(declared_mime)
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
                Ok(Some(ClientInput::Image { mime_type, data }))
            }
        }
    }
}

/// Strip a `data:<mime>;base64,` prefix, returning the embedded MIME type.
fn split_data_url(data: &str) -> (Option<String>, &str) {
    let Some(rest) = data.strip_prefix("data:") else {
        return (None, data);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            (mime.map(str::to_string), payload)
        }
        None => (None, data),
    }
}

/// Outbound `toolCalls` message for one UI command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    pub tool_calls: Vec<ToolCallBatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Map<String, Value>,
}

impl ToolCallMessage {
    /// Args are `action`, `target` and `details`; `details` is sent even when empty.
    pub fn from_command(command: &UiCommand) -> Self {
        Self {
            tool_calls: vec![ToolCallBatch {
                function_calls: vec![FunctionCall {
                    name: UPDATE_UI.to_string(),
                    args: command.to_args(),
                }],
            }],
        }
    }

    /// The first command carried by this message, if any.
    pub fn command(&self) -> Option<UiCommand> {
        self.tool_calls
            .iter()
            .flat_map(|batch| batch.function_calls.iter())
            .find(|call| call.name == UPDATE_UI)
            .and_then(|call| UiCommand::from_args(&call.args))
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binary_frame_is_audio() {
        let pcm = vec![0u8; 3200];
        assert_eq!(ClientInput::from_binary(pcm.clone()), ClientInput::Audio(pcm));
    }

    #[test]
    fn test_text_message() {
        let input = ClientInput::from_text(r#"{"type":"text","text":"show me laptops"}"#).unwrap();
        assert_eq!(input, Some(ClientInput::Text("show me laptops".to_string())));
    }

    #[test]
    fn test_image_message() {
        let input =
            ClientInput::from_text(r#"{"type":"image","data":"AQID","mimeType":"image/png"}"#)
                .unwrap();
        assert_eq!(
            input,
            Some(ClientInput::Image {
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn test_image_mime_defaults_to_jpeg() {
        let input = ClientInput::from_text(r#"{"type":"image","data":"AQID"}"#).unwrap();
        assert!(matches!(
            input,
            Some(ClientInput::Image { ref mime_type, .. }) if mime_type == "image/jpeg"
        ));
    }

    #[test]
    fn test_image_data_url_prefix() {
        let input =
            ClientInput::from_text(r#"{"type":"image","data":"data:image/webp;base64,AQID"}"#)
                .unwrap();
        assert_eq!(
            input,
            Some(ClientInput::Image {
                mime_type: "image/webp".to_string(),
                data: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            ClientInput::from_text("{not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            ClientInput::from_text(r#"{"type":"image","data":"!!!not base64"}"#),
            Err(ProtocolError::Base64(_))
        ));
        assert!(matches!(
            ClientInput::from_text(r#"{"type":"text"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        assert_eq!(ClientInput::from_text(r#"{"type":"ping"}"#).unwrap(), None);
        assert_eq!(ClientInput::from_text(r#"{"text":"no type"}"#).unwrap(), None);
    }

    // Outbound args always carry `details` next to `action` and `target`,
    // empty when the model gave none.
    #[test]
    fn test_tool_call_message_shape() {
        let command = UiCommand {
            action: "FILTER".to_string(),
            target: "laptop".to_string(),
            details: String::new(),
        };
        let json: Value =
            serde_json::from_str(&ToolCallMessage::from_command(&command).to_json().unwrap())
                .unwrap();
        assert_eq!(
            json,
            json!({
                "toolCalls": [{
                    "functionCalls": [{
                        "name": "update_ui",
                        "args": {"action": "FILTER", "target": "laptop", "details": ""}
                    }]
                }]
            })
        );
    }

    #[test]
    fn test_tool_call_message_keeps_details() {
        let command = UiCommand {
            action: "HIGHLIGHT".to_string(),
            target: "p1".to_string(),
            details: "best seller".to_string(),
        };
        let json: Value =
            serde_json::from_str(&ToolCallMessage::from_command(&command).to_json().unwrap())
                .unwrap();
        let args = &json["toolCalls"][0]["functionCalls"][0]["args"];
        assert_eq!(args["action"], "HIGHLIGHT");
        assert_eq!(args["target"], "p1");
        assert_eq!(args["details"], "best seller");
        assert_eq!(args.as_object().unwrap().len(), 3);
    }
}
