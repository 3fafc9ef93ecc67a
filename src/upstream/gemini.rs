//! Gemini Live (`BidiGenerateContent`) runtime over a WebSocket.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretBox};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use super::{Content, EventStream, LiveRequest, LiveRuntime, Part, UpstreamError};
use crate::session::SessionKey;
use crate::tools::ToolRegistry;

pub const LIVE_API_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Session setup sent as the first upstream message
#[derive(Debug, Clone)]
pub struct LiveSetup {
    /// Model name without the `models/` prefix
    pub model: String,
    pub system_instruction: String,
    pub function_declarations: Vec<Value>,
    /// Request input and output audio transcripts
    pub transcription: bool,
}

impl LiveSetup {
    pub fn to_message(&self) -> Value {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        let mut setup = json!({
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"]
            },
            "systemInstruction": {
                "parts": [{"text": self.system_instruction}]
            },
            "tools": [{
                "functionDeclarations": self.function_declarations
            }]
        });
        if self.transcription {
            setup["inputAudioTranscription"] = json!({});
            setup["outputAudioTranscription"] = json!({});
        }

        json!({ "setup": setup })
    }
}

/// Encode a queued request as a client message. `Close` has no wire form.
pub fn encode_request(request: &LiveRequest) -> Option<Value> {
    match request {
        LiveRequest::Realtime(blob) => Some(json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": blob.mime_type,
                    "data": STANDARD.encode(&blob.data)
                }]
            }
        })),
        LiveRequest::Content(content) => Some(json!({
            "clientContent": {
                "turns": [encode_content(content)],
                "turnComplete": true
            }
        })),
        LiveRequest::Close => None,
    }
}

fn encode_content(content: &Content) -> Value {
    let parts: Vec<Value> = content
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineData(blob) => json!({
                "inlineData": {
                    "mimeType": blob.mime_type,
                    "data": STANDARD.encode(&blob.data)
                }
            }),
        })
        .collect();

    json!({ "role": content.role, "parts": parts })
}

/// Answer every function call in a `toolCall` event.
///
/// Returns `None` when the event carries no function calls.
pub fn tool_responses(event: &Value, tools: &ToolRegistry) -> Option<Value> {
    let calls = event
        .get("toolCall")?
        .get("functionCalls")?
        .as_array()
        .filter(|calls| !calls.is_empty())?;

    let responses: Vec<Value> = calls
        .iter()
        .map(|call| {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            let response = match tools.execute_tool(name, &args) {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("⚠️  Tool call {} failed: {}", name, e);
                    json!({ "error": e.to_string() })
                }
            };

            let mut entry = json!({ "name": name, "response": response });
            if let Some(id) = call.get("id") {
                entry["id"] = id.clone();
            }
            entry
        })
        .collect();

    Some(json!({ "toolResponse": { "functionResponses": responses } }))
}

/// A decoded server frame
#[derive(Debug, PartialEq)]
pub enum Frame {
    Event(Value),
    Skip,
    Closed(String),
}

pub fn decode_frame(message: Message) -> Result<Frame, UpstreamError> {
    match message {
        Message::Text(text) => Ok(Frame::Event(serde_json::from_str(text.as_str())?)),
        Message::Binary(data) => Ok(Frame::Event(serde_json::from_slice(data.as_slice())?)),
        Message::Close(frame) => Ok(Frame::Closed(
            frame
                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                .unwrap_or_else(|| "no close frame".to_string()),
        )),
        _ => Ok(Frame::Skip),
    }
}

/// Gemini Live runtime. One upstream WebSocket per `run_live` call.
pub struct GeminiLive {
    api_key: SecretBox<String>,
    setup: LiveSetup,
    tools: Arc<ToolRegistry>,
}

impl GeminiLive {
    pub fn new(api_key: &str, setup: LiveSetup, tools: ToolRegistry) -> Self {
        Self {
            api_key: SecretBox::new(Box::new(api_key.to_string())),
            setup,
            tools: Arc::new(tools),
        }
    }

    fn url(&self) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(LIVE_API_URL)?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

#[async_trait::async_trait]
impl LiveRuntime for GeminiLive {
    async fn run_live(
        &self,
        session: &SessionKey,
        mut requests: mpsc::UnboundedReceiver<LiveRequest>,
    ) -> Result<EventStream, UpstreamError> {
        log::info!(
            "🔌 Connecting to Gemini Live for session {} (model {})",
            session,
            self.setup.model
        );

        let url = self.url()?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(self.setup.to_message().to_string().into()))
            .await?;

        // The server acknowledges setup before anything else
        loop {
            let frame = match read.next().await {
                Some(message) => decode_frame(message?)?,
                None => return Err(UpstreamError::Closed("connection ended during setup".to_string())),
            };
            match frame {
                Frame::Event(event) if event.get("setupComplete").is_some() => break,
                Frame::Event(event) => {
                    return Err(UpstreamError::UnexpectedMessage(event.to_string()));
                }
                Frame::Skip => continue,
                Frame::Closed(reason) => return Err(UpstreamError::Closed(reason)),
            }
        }
        log::info!("✅ Gemini Live session ready");

        let (tool_tx, mut tool_rx) = mpsc::unbounded_channel::<Value>();

        // Writer: queued client requests plus automatic tool responses
        let writer = tokio::spawn(async move {
            let mut sent = 0usize;
            loop {
                let message = tokio::select! {
                    request = requests.recv() => match request {
                        Some(LiveRequest::Close) | None => break,
                        Some(request) => encode_request(&request),
                    },
                    Some(response) = tool_rx.recv() => Some(response),
                };

                if let Some(message) = message {
                    if let Err(e) = write.send(Message::Text(message.to_string().into())).await {
                        log::warn!("⚠️  Failed to send upstream message: {}", e);
                        break;
                    }
                    sent += 1;
                }
            }

            log::info!("🔌 Closing upstream writer after {} messages", sent);
            let _ = write.close().await;
        });

        let tools = Arc::clone(&self.tools);
        let stream = async_stream::stream! {
            while let Some(message) = read.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        yield Err(UpstreamError::from(e));
                        break;
                    }
                };

                match decode_frame(message) {
                    Ok(Frame::Event(event)) => {
                        if let Some(response) = tool_responses(&event, &tools) {
                            if tool_tx.send(response).is_err() {
                                log::warn!("⚠️  Upstream writer gone, tool response dropped");
                            }
                        }
                        yield Ok(event);
                    }
                    Ok(Frame::Skip) => {}
                    Ok(Frame::Closed(reason)) => {
                        log::info!("🔌 Gemini Live closed the session: {}", reason);
                        break;
                    }
                    Err(e) => log::warn!("⚠️  Dropping undecodable upstream frame: {}", e),
                }
            }
            writer.abort();
        };

        Ok(Box::pin(stream))
    }
}
