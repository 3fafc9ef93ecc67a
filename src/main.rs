use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use concierge_relay::config::{load_config, ServerConfig};
use concierge_relay::prompts::{load_inventory, SystemPrompts, DEFAULT_INVENTORY_PATH};
use concierge_relay::relay::RelayServer;
use concierge_relay::tools::create_default_registry;
use concierge_relay::upstream::{GeminiLive, LiveSetup};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the WebSocket server to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    address: String,

    /// Model name, overrides DEMO_AGENT_MODEL
    #[arg(short, long)]
    model: Option<String>,

    /// Product inventory JSON embedded in the system instruction
    #[arg(short, long, default_value = DEFAULT_INVENTORY_PATH)]
    inventory: PathBuf,

    /// Do not request audio transcripts from the runtime
    #[arg(long)]
    no_transcription: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    log::info!("🚀 Starting concierge-relay with args: {:?}", args);

    let api_config = load_config().context("Failed to load configuration")?;
    let model = args.model.unwrap_or_else(|| api_config.model.clone());

    let config = ServerConfig {
        bind_address: args.address,
        inventory_path: args.inventory,
        transcription: !args.no_transcription,
        ..ServerConfig::default()
    };

    let inventory = load_inventory(&config.inventory_path);
    let tools = create_default_registry();
    let setup = LiveSetup {
        model,
        system_instruction: SystemPrompts::sales_concierge(&inventory),
        function_declarations: tools.get_function_declarations(),
        transcription: config.transcription,
    };
    log::info!("🤖 Using model {}", setup.model);

    let runtime = Arc::new(GeminiLive::new(api_config.google_key(), setup, tools));
    let server = RelayServer::bind(&config, runtime)
        .await
        .context("Failed to bind relay server")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("🛑 Received Ctrl+C, shutting down...");
        }
        signal.cancel();
    });

    server.run(shutdown).await.context("Relay server failed")?;
    println!("\n👋 Goodbye!");
    Ok(())
}
