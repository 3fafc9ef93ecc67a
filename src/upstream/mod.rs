//! Client to runtime plumbing.
//!
//! The relay pushes [`LiveRequest`]s into a [`LiveRequestQueue`]; a
//! [`LiveRuntime`] consumes them and hands back a stream of JSON events.

use futures_util::Stream;
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{ClientInput, AUDIO_MIME};
use crate::session::SessionKey;

pub mod gemini;

pub use gemini::{GeminiLive, LiveSetup};

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Live request queue is closed")]
    QueueClosed,

    #[error("Upstream closed the connection: {0}")]
    Closed(String),

    #[error("Unexpected upstream message: {0}")]
    UnexpectedMessage(String),
}

/// Binary payload with its MIME type
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData(Blob),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }
}

/// A single request from the client side of the relay
#[derive(Debug, Clone, PartialEq)]
pub enum LiveRequest {
    /// Streaming media, e.g. microphone audio
    Realtime(Blob),
    /// A complete user turn
    Content(Content),
    /// No further requests will follow
    Close,
}

impl From<ClientInput> for LiveRequest {
    fn from(input: ClientInput) -> Self {
        match input {
            ClientInput::Audio(data) => LiveRequest::Realtime(Blob {
                mime_type: AUDIO_MIME.to_string(),
                data,
            }),
            ClientInput::Text(text) => LiveRequest::Content(Content::user(vec![Part::Text(text)])),
            ClientInput::Image { mime_type, data } => {
                LiveRequest::Content(Content::user(vec![Part::InlineData(Blob {
                    mime_type,
                    data,
                })]))
            }
        }
    }
}

/// Sending half of the request channel. The client pump only enqueues.
#[derive(Debug, Clone)]
pub struct LiveRequestQueue {
    sender: mpsc::UnboundedSender<LiveRequest>,
}

impl LiveRequestQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LiveRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, request: LiveRequest) -> Result<(), UpstreamError> {
        self.sender
            .send(request)
            .map_err(|_| UpstreamError::QueueClosed)
    }

    pub fn send_realtime(&self, blob: Blob) -> Result<(), UpstreamError> {
        self.send(LiveRequest::Realtime(blob))
    }

    pub fn send_content(&self, content: Content) -> Result<(), UpstreamError> {
        self.send(LiveRequest::Content(content))
    }

    /// Tell the runtime no more requests are coming. Safe to call repeatedly.
    pub fn close(&self) {
        if self.sender.send(LiveRequest::Close).is_err() {
            log::debug!("Live request queue already closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Value, UpstreamError>> + Send + 'static>>;

/// A hosted conversational runtime driven by a request queue
#[async_trait::async_trait]
pub trait LiveRuntime: Send + Sync + 'static {
    /// Start a live run for `session`, consuming `requests` until
    /// [`LiveRequest::Close`] or until the receiver's senders are gone.
    async fn run_live(
        &self,
        session: &SessionKey,
        requests: mpsc::UnboundedReceiver<LiveRequest>,
    ) -> Result<EventStream, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_input_conversion() {
        let request = LiveRequest::from(ClientInput::Audio(vec![0; 3200]));
        assert_eq!(
            request,
            LiveRequest::Realtime(Blob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: vec![0; 3200],
            })
        );

        let request = LiveRequest::from(ClientInput::Text("hello".to_string()));
        assert_eq!(
            request,
            LiveRequest::Content(Content::user(vec![Part::Text("hello".to_string())]))
        );
    }

    #[tokio::test]
    async fn test_queue_close() {
        let (queue, mut rx) = LiveRequestQueue::new();
        queue
            .send_realtime(Blob {
                mime_type: AUDIO_MIME.to_string(),
                data: vec![1, 2],
            })
            .unwrap();
        queue.close();

        assert!(matches!(rx.recv().await, Some(LiveRequest::Realtime(_))));
        assert_eq!(rx.recv().await, Some(LiveRequest::Close));

        drop(rx);
        assert!(queue.is_closed());
        assert!(matches!(
            queue.send_content(Content::user(Vec::new())),
            Err(UpstreamError::QueueClosed)
        ));
        queue.close();
    }
}
