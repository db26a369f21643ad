//! # umb-ingest
//!
//! TCP ingest service for weather-station telemetry.
//!
//! Stations connect over raw TCP, send a registration packet naming their
//! identity and wire protocol, then stream frames. Each frame is
//! integrity-checked, decoded into field/value readings, and handed to
//! storage.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): registration parsing, CRC16, UMB and JSON decoders
//! - **Dispatch** ([`handler`]): protocol tag to decoder registry
//! - **Session** ([`session`]): per-connection state machine with idle timeout
//! - **Storage** ([`sink`]): non-blocking hand-off to a store task
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use umb_ingest::{ChannelSink, FieldCatalog, IngestContext, IngestListener, ProtocolRegistry, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Arc::new(FieldCatalog::builtin()?);
//!     let (sink, rx) = ChannelSink::channel(1024);
//!     umb_ingest::sink::spawn_store_task(rx, umb_ingest::sink::LogStore);
//!
//!     let ctx = Arc::new(IngestContext::new(
//!         SessionConfig::default(),
//!         ProtocolRegistry::with_defaults(catalog),
//!         Arc::new(sink),
//!     ));
//!
//!     IngestListener::bind("0.0.0.0:18120").await?.serve(ctx).await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

pub use catalog::FieldCatalog;
pub use error::{DecodeError, IngestError};
pub use handler::{FrameDecoder, ProtocolRegistry};
pub use session::{IngestContext, Session, SessionConfig, SessionReport};
pub use sink::{ChannelSink, ReadingSink, StationBatch};
pub use transport::IngestListener;
