//! # ws-echo-client
//!
//! A WebSocket echo client for the [`monoio`] async runtime. It dials one
//! `ws://` or `wss://` endpoint, logs every message it receives and writes the
//! same payload back, optionally after a fixed delay.
//!
//! Framing, masking and fragment reassembly come from `fastwebsockets`. Ping
//! and close frames are not answered automatically: they are routed to a
//! [`transport::ControlHandler`], which [`EchoClient`] implements.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ws_echo_client::{EchoClient, WsClient};
//!
//! #[monoio::main(timer_enabled = true)]
//! async fn main() -> anyhow::Result<()> {
//!     let protocols = vec!["chat".to_string()];
//!     let client = WsClient::connect("wss://echo.websocket.org/", &protocols).await?;
//!     println!("negotiated protocol: {:?}", client.protocol());
//!
//!     let (mut reader, writer) = client.split();
//!     let echo = EchoClient::new(writer.clone(), Duration::from_secs(1));
//!     let summary = echo.run(&mut reader).await;
//!     writer.close().await;
//!
//!     println!("echoed {} of {} messages", summary.echoed, summary.received);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Everything runs on one monoio thread. The connection is split so the read
//! loop never waits on a write; all writers share one [`client::WsWriter`]
//! whose mutex serialises frames. Delayed echoes run as spawned tasks and are
//! drained before [`EchoClient::run`] returns.
//!
//! [`monoio`]: https://docs.rs/monoio

pub mod client;
pub mod config;
pub mod echo;
pub mod http_upgrade;
pub mod message;
pub mod tasks;
pub mod telemetry;
pub mod tls;
pub mod transport;
pub mod url;

pub use client::{ConnectError, WsClient, WsReader, WsStream, WsWriter};
pub use config::{Cli, Config, ConfigError};
pub use echo::{EchoClient, EchoSummary};
pub use message::{Message, MessageKind};
