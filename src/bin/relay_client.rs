use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// 1x1 white pixel JPEG
const PIXEL_JPEG: &str = "/9j/4AAQSkZJRgABAQEAYABgAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAEDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09ebn6Onq8fLz9PX29/j5+v/EAB8BAAMBAQEBAQEBAQEAAAAAAAABAgMEBQYHCAkKC//EALURAAIBAgQEAwQHBQQEAAECdwABAgMRBAUhMQYSQVEHYXETIjKBCBRCkaGxwQkjM1LwFWJy0QoWJDThJfEXGBkaJicoKSo1Njc4OTpDREVGR0hJSlNUVVZXWFlaY2RlZmdoaWprbG1ub3O0ubLb3N/h4t/k5ebn6Onq8fLz9PX29/j5+v/sA2wEAAhEBAgAA/wAAVP/aAAwDAQACEQMRAD8C/wAA/9k=";

#[derive(Parser, Debug)]
#[command(name = "relay-client")]
#[command(about = "Send a test message to a running relay and print the first reply")]
struct Args {
    /// Relay WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Seconds to wait for a reply
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    message: Sample,
}

#[derive(Subcommand, Debug)]
enum Sample {
    /// Send 0.1s of silence (16 kHz 16-bit mono PCM)
    Audio {
        #[arg(long, default_value = "3200")]
        bytes: usize,
    },
    /// Send a 1x1 JPEG as an image message
    Image,
    /// Send a text message
    Text { text: String },
}

impl Sample {
    fn message(&self) -> Message {
        match self {
            Sample::Audio { bytes } => Message::Binary(vec![0u8; *bytes].into()),
            Sample::Image => Message::Text(
                json!({"type": "image", "data": PIXEL_JPEG, "mimeType": "image/jpeg"})
                    .to_string()
                    .into(),
            ),
            Sample::Text { text } => {
                Message::Text(json!({"type": "text", "text": text}).to_string().into())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    log::info!("🚀 Starting relay client with args: {:?}", args);

    let (ws_stream, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    println!("Connected to {}", args.url);
    let (mut write, mut read) = ws_stream.split();

    write
        .send(args.message.message())
        .await
        .context("Failed to send message")?;
    println!("Sent {:?}", args.message);

    let reply = tokio::time::timeout(Duration::from_secs(args.timeout), read.next()).await;
    match reply {
        Ok(Some(Ok(Message::Text(text)))) => {
            let preview: String = text.as_str().chars().take(100).collect();
            println!("Received: {}...", preview);
        }
        Ok(Some(Ok(other))) => println!("Received: {:?}", other),
        Ok(Some(Err(e))) => println!("Error: {}", e),
        Ok(None) => println!("Connection closed without a reply"),
        Err(_) => println!("No reply within {}s", args.timeout),
    }

    let _ = write.close().await;
    Ok(())
}
