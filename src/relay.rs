//! WebSocket relay between browser clients and a [`LiveRuntime`].
//!
//! Each connection runs two pumps concurrently. The client pump decodes
//! browser frames into live requests; the upstream pump forwards runtime
//! events back to the browser, preceded by a `toolCalls` message for every UI
//! command found in the event. When either pump ends the other is cancelled,
//! and a guard closes the request queue and releases the session.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::extractor::CommandExtractor;
use crate::protocol::{ClientInput, ToolCallMessage};
use crate::session::{InMemorySessionService, SessionKey};
use crate::upstream::{LiveRequest, LiveRequestQueue, LiveRuntime, UpstreamError};

/// State shared by every connection
#[derive(Clone)]
struct Shared {
    runtime: Arc<dyn LiveRuntime>,
    sessions: Arc<InMemorySessionService>,
    session_key: SessionKey,
    extractor: CommandExtractor,
}

/// Closes the request queue and releases the session when dropped
struct SessionGuard {
    queue: LiveRequestQueue,
    sessions: Arc<InMemorySessionService>,
    key: SessionKey,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.queue.close();
        self.sessions.release(&self.key);
        log::info!("🛑 Session {} closed", self.key);
    }
}

pub struct RelayServer {
    listener: TcpListener,
    shared: Shared,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(config: &ServerConfig, runtime: Arc<dyn LiveRuntime>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        log::info!("🎯 Relay listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            shared: Shared {
                runtime,
                sessions: Arc::new(InMemorySessionService::new()),
                session_key: config.session_key(),
                extractor: CommandExtractor::default(),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn sessions(&self) -> Arc<InMemorySessionService> {
        Arc::clone(&self.shared.sessions)
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    log::info!("🎯 Connection attempt from {}", addr);
                    let shared = self.shared.clone();
                    let cancel = shutdown.child_token();
                    tokio::spawn(async move {
                        match shared.handle_connection(stream, addr, cancel).await {
                            Ok(()) => log::info!("✅ Client {} disconnected cleanly", addr),
                            Err(e) => log::error!("❌ Client {} error: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    log::error!("❌ Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        log::info!("🛑 Relay shutting down");
        Ok(())
    }
}

impl Shared {
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let ws_stream = accept_async(stream).await?;
        log::info!("🎯 Client {} connected", addr);

        let (mut outgoing, incoming) = ws_stream.split();
        let (queue, requests) = LiveRequestQueue::new();

        self.sessions.create_session(&self.session_key);
        self.sessions.attach(&self.session_key);
        let _guard = SessionGuard {
            queue: queue.clone(),
            sessions: Arc::clone(&self.sessions),
            key: self.session_key.clone(),
        };

        let client_pump = async {
            let result = tokio::select! {
                result = forward_client_messages(incoming, &queue) => result,
                _ = cancel.cancelled() => Ok(0),
            };
            cancel.cancel();
            queue.close();
            result
        };

        let upstream_pump = async {
            let run = async {
                let events = self.runtime.run_live(&self.session_key, requests).await?;
                forward_upstream_events(events, &mut outgoing, &self.extractor).await
            };
            let result = tokio::select! {
                result = run => result,
                _ = cancel.cancelled() => Ok(0),
            };
            cancel.cancel();
            result
        };

        let (client_result, upstream_result) = tokio::join!(client_pump, upstream_pump);

        match client_result {
            Ok(count) => log::info!("📨 Client {} pump finished after {} messages", addr, count),
            Err(e) => log::warn!("⚠️  Error receiving from client {}: {}", addr, e),
        }
        let _ = outgoing.close().await;

        let count = upstream_result?;
        log::info!("📤 Upstream pump for {} finished after {} events", addr, count);
        Ok(())
    }
}

/// Client to upstream pump.
///
/// Binary frames become realtime audio, text frames are decoded as JSON
/// messages. Malformed messages are logged and dropped. Returns the number of
/// requests forwarded; a receive error ends the pump with that error.
pub async fn forward_client_messages<S>(mut incoming: S, queue: &LiveRequestQueue) -> Result<usize>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    let mut forwarded = 0;

    while let Some(message) = incoming.next().await {
        let input = match message? {
            Message::Binary(data) => {
                log::trace!("Audio chunk {} bytes", data.len());
                ClientInput::from_binary(data.as_slice().to_vec())
            }
            Message::Text(text) => {
                log::info!("📨 Received text message: {}", preview(text.as_str(), 50));
                match ClientInput::from_text(text.as_str()) {
                    Ok(Some(input)) => input,
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("⚠️  Dropping client message: {}", e);
                        continue;
                    }
                }
            }
            Message::Close(frame) => {
                log::info!("👋 Client closed the connection: {:?}", frame);
                break;
            }
            _ => continue,
        };

        queue.send(LiveRequest::from(input))?;
        forwarded += 1;
    }

    Ok(forwarded)
}

/// Upstream to client pump.
///
/// For every event, sends one `toolCalls` message per extracted UI command and
/// then the raw event. Returns the number of events forwarded.
pub async fn forward_upstream_events<E, K>(
    mut events: E,
    outgoing: &mut K,
    extractor: &CommandExtractor,
) -> Result<usize>
where
    E: Stream<Item = std::result::Result<Value, UpstreamError>> + Unpin,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let mut forwarded = 0;

    while let Some(event) = events.next().await {
        let event = event?;
        log_transcripts(&event);

        for message in command_messages(&event, extractor) {
            send_text(outgoing, message).await?;
        }
        send_text(outgoing, event.to_string()).await?;
        forwarded += 1;
    }

    Ok(forwarded)
}

/// Serialized `toolCalls` messages for the UI commands in `event`.
///
/// Malformed parts are logged and passed over; they never stop the raw event
/// or the commands found elsewhere in it.
pub fn command_messages(event: &Value, extractor: &CommandExtractor) -> Vec<String> {
    let extraction = extractor.extract(event);
    for problem in &extraction.skipped {
        log::warn!("⚠️  Skipped malformed part of upstream event: {}", problem);
    }

    extraction
        .commands
        .iter()
        .filter_map(|command| match ToolCallMessage::from_command(command).to_json() {
            Ok(json) => {
                log::info!("📤 Forwarding UI command: {} {}", command.action, command.target);
                Some(json)
            }
            Err(e) => {
                log::error!("❌ Failed to encode UI command: {}", e);
                None
            }
        })
        .collect()
}

async fn send_text<K>(outgoing: &mut K, text: String) -> Result<()>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    outgoing
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))
}

fn log_transcripts(event: &Value) {
    for key in ["inputTranscription", "outputTranscription"] {
        let transcription = event
            .get(key)
            .or_else(|| event.get("serverContent").and_then(|c| c.get(key)));
        if let Some(text) = transcription.and_then(|t| t.get("text")).and_then(Value::as_str) {
            log::debug!("📝 {}: {}", key, preview(text, 300));
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("hi", 50), "hi");
    }

    #[test]
    fn test_command_messages_for_function_call() {
        let event = json!({
            "content": {"parts": [{"functionCall": {"name": "update_ui", "args": {"action": "HIGHLIGHT", "target": "p1"}}}]}
        });
        let messages = command_messages(&event, &CommandExtractor::default());
        assert_eq!(messages.len(), 1);
        let message: ToolCallMessage = serde_json::from_str(&messages[0]).unwrap();
        let command = message.command().unwrap();
        assert_eq!(command.action, "HIGHLIGHT");
        assert_eq!(command.details, "");
    }

    #[test]
    fn test_command_messages_swallow_structure_errors() {
        let event = json!({"content": {"parts": "oops"}});
        assert!(command_messages(&event, &CommandExtractor::default()).is_empty());
    }

    #[test]
    fn test_command_messages_keep_commands_before_a_broken_part() {
        let event = json!({
            "content": {"parts": [
                {"functionCall": {"name": "update_ui", "args": {"action": "FILTER", "target": "laptop"}}},
                "text"
            ]}
        });
        let messages = command_messages(&event, &CommandExtractor::default());
        assert_eq!(messages.len(), 1);
        let message: ToolCallMessage = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(message.command().unwrap().target, "laptop");
    }
}
