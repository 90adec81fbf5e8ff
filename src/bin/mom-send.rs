//! MOM Send
//!
//! One-shot publisher for poking topics by hand: connect, publish a single
//! message, disconnect. Useful for exercising handlers end to end.
//!
//! ## Usage
//!
//! ```bash
//! # Text message
//! mom-send --topic sensors/temperature --message "21.5"
//!
//! # JSON document, validated before sending
//! mom-send --topic events/orders --message '{"id": 42, "total": 9.99}' --json
//!
//! # Raw bytes from a file
//! mom-send --topic firmware/chunk --file ./chunk.bin
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use mombus::client::MomClient;
use mombus::config::MomConfig;
use mombus::logging::init_default_logging;
use mombus::transport::mqtt::MqttTransport;

/// Publish a single message to a MOM topic
#[derive(Parser)]
#[command(name = "mom-send")]
#[command(about = "Publish a single message to a MOM topic")]
#[command(version)]
struct Args {
    /// Topic to publish to
    #[arg(short, long)]
    topic: String,

    /// Message body (UTF-8 text)
    #[arg(short, long, conflicts_with = "file")]
    message: Option<String>,

    /// Read the payload from a file instead (raw bytes)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Validate that the payload parses as JSON before sending
    #[arg(long)]
    json: bool,

    /// TOML config file (overrides --broker-url and --client-id)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// Client identifier
    #[arg(long, default_value = "mom-send")]
    client_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_default_logging();

    let args = Args::parse();

    let payload: Vec<u8> = match (&args.message, &args.file) {
        (Some(message), None) => message.clone().into_bytes(),
        (None, Some(path)) => std::fs::read(path)?,
        _ => {
            eprintln!("Provide exactly one of --message or --file");
            std::process::exit(1);
        }
    };

    if args.json {
        if let Err(e) = serde_json::from_slice::<serde_json::Value>(&payload) {
            eprintln!("Payload is not valid JSON: {e}");
            std::process::exit(1);
        }
    }

    let config = match &args.config {
        Some(path) => MomConfig::load_from_file(path)?,
        None => MomConfig::for_broker(&args.client_id, &args.broker_url)?,
    };

    let transport = MqttTransport::new(&config.client.id, &config.broker)?;
    let mut client = MomClient::connect_new(transport).await?;

    client.publish(&args.topic, payload).await;
    info!("Message published to: {}", args.topic);

    // QoS 0 publishes leave through the transport task; give it a beat
    // before the clean disconnect.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    client.disconnect().await?;

    Ok(())
}
