//! mombus - Message-Oriented Middleware client facade
//!
//! A broker-agnostic MOM client: applications register plain handler
//! functions against topics and mombus takes care of the wire.
//!
//! # Overview
//!
//! This crate provides:
//! - Topic subscription registry with per-topic handler sets
//! - Payload decoding for text, binary, and JSON (whole document or
//!   projected fields)
//! - Dispatch engine that isolates every handler failure to the single
//!   message that caused it
//! - Connection lifecycle listeners and a session state machine
//! - MQTT transport adapter with automatic reconnect and re-subscribe,
//!   plus a [`Transport`] trait for plugging in other brokers
//!
//! # Quick Start
//!
//! ```rust
//! use mombus::client::MomClient;
//! use mombus::handler::HandlerDescriptor;
//! use mombus::testing::MockTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // MockTransport stands in for a broker; swap in MqttTransport for real use.
//! let transport = MockTransport::new();
//! let broker = transport.controller();
//! let client = MomClient::connect_new(transport).await.unwrap();
//!
//! client
//!     .subscribe(
//!         "sensors/temperature",
//!         HandlerDescriptor::text("print-temp", |reading| {
//!             println!("temperature: {reading}");
//!             Ok(())
//!         }),
//!     )
//!     .await;
//!
//! client.publish_text("sensors/temperature", "21.5").await;
//!
//! // Inbound messages decode and dispatch on the client's pump task.
//! broker.inject_message("sensors/temperature", &b"21.5"[..]).await;
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod testing;
pub mod transport;

pub use client::{ClientListener, MomClient, SessionState};
pub use codec::{DecodedArg, Decoder, FieldBinding, FieldEncoding, PayloadFormat};
pub use config::*;
pub use error::{HandlerError, MomError, MomResult};
pub use handler::{HandlerDescriptor, Registration};
pub use registry::{SubscribeOutcome, TopicRegistry};
pub use transport::mqtt::MqttTransport;
pub use transport::{DefaultTransport, Transport, TransportEvent};
