//! MOM Monitor
//!
//! Subscribes to broker topics through the mombus client and prints every
//! message after decoding. Useful for watching live traffic while developing
//! handlers.
//!
//! ## Usage
//!
//! ```bash
//! # Watch text payloads on two topics
//! mom-monitor --topic sensors/temperature --topic sensors/humidity
//!
//! # Watch whole JSON documents, machine-readable output
//! mom-monitor --topic events/orders --decode json --format json
//!
//! # Project two fields out of JSON payloads
//! mom-monitor --topic events/orders --decode json-fields --fields id,total
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use mombus::client::{ClientListener, MomClient};
use mombus::codec::{DecodedArg, FieldBinding, PayloadFormat};
use mombus::config::MomConfig;
use mombus::error::MomError;
use mombus::handler::{HandlerDescriptor, HandlerFn};
use mombus::logging::init_default_logging;
use mombus::transport::mqtt::MqttTransport;

/// Watch decoded MOM traffic on one or more topics
#[derive(Parser)]
#[command(name = "mom-monitor")]
#[command(about = "Watch decoded MOM traffic on one or more topics")]
#[command(version)]
struct Args {
    /// Topic to subscribe to (repeatable)
    #[arg(short, long = "topic", required = true)]
    topics: Vec<String>,

    /// How payloads are decoded before printing
    #[arg(short, long, default_value = "text")]
    decode: DecodeAs,

    /// Fields to project from JSON payloads (json-fields decoding only)
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Output style
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// TOML config file (overrides --broker-url and --client-id)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// Client identifier
    #[arg(long, default_value = "mom-monitor")]
    client_id: String,
}

/// Payload decoding applied to watched topics
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DecodeAs {
    /// UTF-8 text
    Text,
    /// Raw bytes, printed as a hex preview
    Binary,
    /// Whole JSON document
    Json,
    /// Selected fields of a JSON document (set with --fields)
    JsonFields,
}

impl DecodeAs {
    fn payload_format(self) -> PayloadFormat {
        match self {
            DecodeAs::Text => PayloadFormat::Text,
            DecodeAs::Binary => PayloadFormat::Binary,
            DecodeAs::Json => PayloadFormat::JsonWhole,
            DecodeAs::JsonFields => PayloadFormat::JsonFields,
        }
    }
}

/// Output formatting options
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Color-coded, human-readable with timestamps (default)
    Pretty,
    /// Single line per message, minimal formatting
    Compact,
    /// Raw JSON output for programmatic processing
    Json,
}

const TOPIC_COLOR: &str = "\x1b[1;36m"; // Cyan
const RESET: &str = "\x1b[0m";

/// Render one decoded argument for terminal output
fn render_arg(arg: &DecodedArg, pretty: bool) -> String {
    match arg {
        DecodedArg::Text(text) => text.clone(),
        DecodedArg::Bytes(bytes) => {
            let preview: String = bytes
                .iter()
                .take(32)
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            if bytes.len() > 32 {
                format!("{} bytes: {preview} ...", bytes.len())
            } else {
                format!("{} bytes: {preview}", bytes.len())
            }
        }
        DecodedArg::Json(value) => {
            if pretty {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            } else {
                value.to_string()
            }
        }
    }
}

/// Render one decoded argument for the JSON output mode
fn arg_to_json(arg: &DecodedArg) -> serde_json::Value {
    match arg {
        DecodedArg::Text(text) => serde_json::Value::String(text.clone()),
        DecodedArg::Bytes(bytes) => serde_json::json!({
            "len": bytes.len(),
            "hex": bytes.iter().map(|b| format!("{b:02x}")).collect::<String>(),
        }),
        DecodedArg::Json(value) => value.clone(),
    }
}

fn print_decoded(topic: &str, args: &[DecodedArg], output: OutputFormat) {
    let timestamp = chrono::Utc::now().format("%H:%M:%S%.3f");

    match output {
        OutputFormat::Json => {
            let line = serde_json::json!({
                "timestamp": timestamp.to_string(),
                "topic": topic,
                "args": args.iter().map(arg_to_json).collect::<Vec<_>>(),
            });
            println!("{line}");
        }
        OutputFormat::Compact => {
            let rendered: Vec<String> = args.iter().map(|a| render_arg(a, false)).collect();
            println!("{timestamp} {topic} {}", rendered.join(" | "));
        }
        OutputFormat::Pretty => {
            println!("{TOPIC_COLOR}[{topic}]{RESET} {timestamp}");
            for arg in args {
                println!("{}", render_arg(arg, true));
            }
            println!();
        }
    }
}

/// Build the printing handler for one watched topic
fn watch_descriptor(
    topic: &str,
    decode: DecodeAs,
    fields: &[String],
    output: OutputFormat,
) -> Result<HandlerDescriptor, MomError> {
    // One declared parameter keeps whole-document JSON decoding; a
    // no-argument shape would degrade it to text.
    let params: Vec<Option<FieldBinding>> = match decode {
        DecodeAs::JsonFields => fields
            .iter()
            .map(|f| Some(FieldBinding::new(f.clone())))
            .collect(),
        _ => vec![None],
    };

    let topic_owned = topic.to_string();
    let target: Arc<HandlerFn> = Arc::new(move |args| {
        print_decoded(&topic_owned, args, output);
        Ok(())
    });

    HandlerDescriptor::new(format!("watch:{topic}"), decode.payload_format(), &params, target)
}

/// Prints connection transitions while the monitor runs
struct ConnectionBanner;

impl ClientListener for ConnectionBanner {
    fn connected(&self) {
        info!("Broker connection established");
    }

    fn disconnected(&self) {
        warn!("Broker connection lost, transport is retrying");
    }

    fn connection_failed(&self) {
        warn!("Broker connection attempt failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_default_logging();

    let args = Args::parse();

    if matches!(args.decode, DecodeAs::JsonFields) && args.fields.is_empty() {
        eprintln!("--decode json-fields requires --fields");
        std::process::exit(1);
    }
    if !matches!(args.decode, DecodeAs::JsonFields) && !args.fields.is_empty() {
        eprintln!("--fields only applies to --decode json-fields");
        std::process::exit(1);
    }

    let config = match &args.config {
        Some(path) => MomConfig::load_from_file(path)?,
        None => MomConfig::for_broker(&args.client_id, &args.broker_url)?,
    };

    println!("mombus monitor");
    println!("Broker: {}", config.broker.url);
    println!("Topics: {}", args.topics.join(", "));
    println!("Decoding: {:?}", args.decode);
    println!("Press Ctrl+C to stop");
    println!();

    let transport = MqttTransport::new(&config.client.id, &config.broker)?;
    let mut client = MomClient::new(transport);
    client.add_listener(Arc::new(ConnectionBanner));

    // Register before connecting; the wire subscribes go out on the first
    // Connected event.
    for topic in &args.topics {
        let descriptor = watch_descriptor(topic, args.decode, &args.fields, args.format)?;
        client.subscribe(topic, descriptor).await;
    }

    client.connect().await?;

    signal::ctrl_c().await?;
    info!("Shutting down monitor");
    client.disconnect().await?;

    Ok(())
}
