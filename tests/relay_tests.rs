//! # Relay Tests
//!
//! The two per-connection pumps driven with in-memory streams and sinks, and
//! the full relay over a real TCP socket with a mock live runtime standing in
//! for Gemini Live.

use concierge_relay::config::ServerConfig;
use concierge_relay::extractor::CommandExtractor;
use concierge_relay::protocol::{ToolCallMessage, AUDIO_MIME};
use concierge_relay::relay::{forward_client_messages, forward_upstream_events, RelayServer};
use concierge_relay::session::SessionKey;
use concierge_relay::upstream::{
    Blob, EventStream, LiveRequest, LiveRequestQueue, LiveRuntime, Part, UpstreamError,
};
use concierge_relay::RelayError;
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

/// Runtime that answers every audio blob with an `update_ui` function call
/// and every content turn with a text part.
struct MockRuntime {
    tap: mpsc::UnboundedSender<LiveRequest>,
    /// End the event stream after this many events
    max_events: Option<usize>,
}

#[async_trait::async_trait]
impl LiveRuntime for MockRuntime {
    async fn run_live(
        &self,
        _session: &SessionKey,
        mut requests: mpsc::UnboundedReceiver<LiveRequest>,
    ) -> Result<EventStream, UpstreamError> {
        let tap = self.tap.clone();
        let max_events = self.max_events;

        let events = async_stream::stream! {
            let mut sent = 0;
            while let Some(request) = requests.recv().await {
                let _ = tap.send(request.clone());
                match request {
                    LiveRequest::Realtime(blob) => {
                        yield Ok(json!({
                            "content": {"parts": [{
                                "functionCall": {
                                    "name": "update_ui",
                                    "args": {"action": "FILTER", "target": "laptop"}
                                }
                            }]},
                            "echo": {"mimeType": blob.mime_type, "bytes": blob.data.len()}
                        }));
                    }
                    LiveRequest::Content(content) => {
                        yield Ok(json!({
                            "serverContent": {"modelTurn": {"parts": [
                                {"text": format!("{} parts", content.parts.len())}
                            ]}}
                        }));
                    }
                    LiveRequest::Close => break,
                }
                sent += 1;
                if Some(sent) == max_events {
                    break;
                }
            }
        };

        Ok(Box::pin(events))
    }
}

async fn start_relay(
    max_events: Option<usize>,
) -> (
    String,
    mpsc::UnboundedReceiver<LiveRequest>,
    Arc<concierge_relay::session::InMemorySessionService>,
    CancellationToken,
) {
    let (tap, tapped) = mpsc::unbounded_channel();
    let runtime = Arc::new(MockRuntime { tap, max_events });

    let config = ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let server = RelayServer::bind(&config, runtime).await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let sessions = server.sessions();

    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));

    (url, tapped, sessions, shutdown)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<LiveRequest>) -> Vec<LiveRequest> {
    let mut requests = Vec::new();
    while let Ok(request) = rx.try_recv() {
        requests.push(request);
    }
    requests
}

fn ok(message: Message) -> Result<Message, tungstenite::Error> {
    Ok(message)
}

#[test_log::test(tokio::test)]
async fn test_audio_is_forwarded_unmodified() {
    let (queue, mut rx) = LiveRequestQueue::new();
    let pcm: Vec<u8> = (0..3200).map(|i| (i % 251) as u8).collect();

    let incoming = stream::iter(vec![ok(Message::Binary(pcm.clone().into()))]);
    let forwarded = forward_client_messages(incoming, &queue).await.unwrap();

    assert_eq!(forwarded, 1);
    assert_eq!(
        drain(&mut rx),
        vec![LiveRequest::Realtime(Blob {
            mime_type: AUDIO_MIME.to_string(),
            data: pcm,
        })]
    );
}

#[test_log::test(tokio::test)]
async fn test_image_and_text_messages() {
    let (queue, mut rx) = LiveRequestQueue::new();
    let incoming = stream::iter(vec![
        ok(Message::Text(
            r#"{"type":"image","data":"/9j/","mimeType":"image/jpeg"}"#.to_string().into(),
        )),
        ok(Message::Text(r#"{"type":"text","text":"show laptops"}"#.to_string().into())),
    ]);

    assert_eq!(forward_client_messages(incoming, &queue).await.unwrap(), 2);

    let requests = drain(&mut rx);
    match &requests[0] {
        LiveRequest::Content(content) => {
            assert_eq!(content.role, "user");
            assert_eq!(
                content.parts,
                vec![Part::InlineData(Blob {
                    mime_type: "image/jpeg".to_string(),
                    data: vec![0xff, 0xd8, 0xff],
                })]
            );
        }
        other => panic!("expected content, got {:?}", other),
    }
    assert!(matches!(
        &requests[1],
        LiveRequest::Content(content) if content.parts == vec![Part::Text("show laptops".to_string())]
    ));
}

#[test_log::test(tokio::test)]
async fn test_malformed_messages_are_dropped() {
    let (queue, mut rx) = LiveRequestQueue::new();
    let incoming = stream::iter(vec![
        ok(Message::Text(r#"{"type":"image","data":"%%%"}"#.to_string().into())),
        ok(Message::Text("not json at all".to_string().into())),
        ok(Message::Text(r#"{"type":"subscribe"}"#.to_string().into())),
        ok(Message::Binary(vec![0u8; 4].into())),
    ]);

    assert_eq!(forward_client_messages(incoming, &queue).await.unwrap(), 1);
    assert!(matches!(drain(&mut rx).as_slice(), [LiveRequest::Realtime(_)]));
}

#[test_log::test(tokio::test)]
async fn test_close_and_receive_errors_end_the_client_pump() {
    let (queue, mut rx) = LiveRequestQueue::new();
    let incoming = stream::iter(vec![
        ok(Message::Binary(vec![1u8; 2].into())),
        ok(Message::Close(None)),
        ok(Message::Binary(vec![2u8; 2].into())),
    ]);
    assert_eq!(forward_client_messages(incoming, &queue).await.unwrap(), 1);
    assert_eq!(drain(&mut rx).len(), 1);

    let incoming = stream::iter(vec![
        ok(Message::Binary(vec![1u8; 2].into())),
        Err(tungstenite::Error::ConnectionClosed),
        ok(Message::Binary(vec![2u8; 2].into())),
    ]);
    assert!(matches!(
        forward_client_messages(incoming, &queue).await,
        Err(RelayError::WebSocket(_))
    ));
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_commands_precede_raw_event() {
    let event = json!({
        "content": {"parts": [
            {"executableCode": {"code": "update_ui(action='FILTER', target='laptop')\ntools.update_ui(action='HIGHLIGHT', target='p2')"}}
        ]}
    });
    let events = stream::iter(vec![Ok::<Value, UpstreamError>(event.clone())]);
    let mut sink: Vec<Message> = Vec::new();

    let forwarded = forward_upstream_events(events, &mut sink, &CommandExtractor::default())
        .await
        .unwrap();
    assert_eq!(forwarded, 1);
    assert_eq!(sink.len(), 3);

    let texts: Vec<String> = sink.iter().map(|m| m.to_text().unwrap().to_string()).collect();
    let first: ToolCallMessage = serde_json::from_str(&texts[0]).unwrap();
    let second: ToolCallMessage = serde_json::from_str(&texts[1]).unwrap();
    assert_eq!(first.command().unwrap().action, "FILTER");
    assert_eq!(second.command().unwrap().target, "p2");
    assert_eq!(serde_json::from_str::<Value>(&texts[2]).unwrap(), event);
}

#[test_log::test(tokio::test)]
async fn test_events_without_commands_are_forwarded() {
    let events = stream::iter(vec![
        Ok::<Value, UpstreamError>(json!({"serverContent": {"turnComplete": true}})),
        Ok(json!({"content": {"parts": "not a list"}})),
        Ok(json!({"content": {"parts": [{"executableCode": {"code": "update_ui(("}}]}})),
    ]);
    let mut sink: Vec<Message> = Vec::new();

    let forwarded = forward_upstream_events(events, &mut sink, &CommandExtractor::default())
        .await
        .unwrap();
    assert_eq!(forwarded, 3);
    assert_eq!(sink.len(), 3);
    assert!(sink[1].to_text().unwrap().contains("not a list"));
}

#[test_log::test(tokio::test)]
async fn test_upstream_error_ends_the_pump() {
    let events = stream::iter(vec![
        Ok(json!({"serverContent": {}})),
        Err(UpstreamError::Closed("going away".to_string())),
        Ok(json!({"serverContent": {}})),
    ]);
    let mut sink: Vec<Message> = Vec::new();

    let result = forward_upstream_events(events, &mut sink, &CommandExtractor::default()).await;
    assert!(matches!(result, Err(RelayError::Upstream(_))));
    assert_eq!(sink.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_relay_end_to_end() {
    let (url, mut tapped, sessions, shutdown) = start_relay(None).await;

    let (ws_stream, _) = connect_async(url.as_str()).await.unwrap();
    let (mut write, mut read) = ws_stream.split();

    write.send(Message::Binary(vec![0u8; 3200].into())).await.unwrap();

    let tool_call = timeout(WAIT, read.next()).await.unwrap().unwrap().unwrap();
    let tool_call: ToolCallMessage = serde_json::from_str(tool_call.to_text().unwrap()).unwrap();
    let command = tool_call.command().unwrap();
    assert_eq!((command.action.as_str(), command.target.as_str()), ("FILTER", "laptop"));

    let raw = timeout(WAIT, read.next()).await.unwrap().unwrap().unwrap();
    let raw: Value = serde_json::from_str(raw.to_text().unwrap()).unwrap();
    assert_eq!(raw["echo"], json!({"mimeType": "audio/pcm;rate=16000", "bytes": 3200}));

    match timeout(WAIT, tapped.recv()).await.unwrap() {
        Some(LiveRequest::Realtime(blob)) => assert_eq!(blob.data, vec![0u8; 3200]),
        other => panic!("expected realtime audio, got {:?}", other),
    }

    let key = ServerConfig::default().session_key();
    assert_eq!(sessions.get_session(&key).unwrap().connections, 1);

    // client leaving releases the session
    write.send(Message::Close(None)).await.unwrap();
    timeout(WAIT, async {
        while sessions.get_session(&key).map(|s| s.connections) != Some(0) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
}

#[test_log::test(tokio::test)]
async fn test_upstream_end_closes_client() {
    let (url, _tapped, sessions, shutdown) = start_relay(Some(1)).await;

    let (ws_stream, _) = connect_async(url.as_str()).await.unwrap();
    let (mut write, mut read) = ws_stream.split();
    write
        .send(Message::Text(r#"{"type":"text","text":"hi"}"#.to_string().into()))
        .await
        .unwrap();

    let raw = timeout(WAIT, read.next()).await.unwrap().unwrap().unwrap();
    assert!(raw.to_text().unwrap().contains("1 parts"));

    // the runtime ended its stream, so the relay closes the socket
    let closed = timeout(WAIT, async {
        loop {
            match read.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    let key = ServerConfig::default().session_key();
    timeout(WAIT, async {
        while sessions.get_session(&key).map(|s| s.connections) != Some(0) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
}
