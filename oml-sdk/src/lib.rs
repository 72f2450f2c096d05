//! # oml-sdk
//!
//! Client SDK for streaming measurements to an OML collection endpoint.
//!
//! Applications describe each kind of observation as a measurement point,
//! register it with a [`Client`], and inject tuples. The client stamps each
//! tuple with a relative timestamp and a sequence number and hands it to one
//! background worker per destination, which writes it to a file, standard
//! output or a TCP collection server using the OMSP text protocol.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oml_sdk::{values, Client, ClientOptions, FieldType, MeasurementPoint};
//!
//! let client = Client::new();
//! let sin = client.define(
//!     MeasurementPoint::builder("sin")
//!         .field("label", FieldType::String)
//!         .field("angle", FieldType::Int32)
//!         .field("value", FieldType::Double)
//!         .build(),
//! )?;
//!
//! client.init(
//!     ClientOptions::new()
//!         .domain("foo")
//!         .sender_id("n1")
//!         .app_name("demo")
//!         .collect_uri("tcp:localhost:3003"),
//! )?;
//!
//! for angle in (0..360).step_by(15) {
//!     let value = (angle as f64).to_radians().sin();
//!     client.inject(&sin, &values![format!("label_{}", angle), angle, value])?;
//! }
//!
//! // drains every queued row before returning
//! client.stop();
//! # Ok::<(), oml_sdk::Error>(())
//! ```
//!
//! ## Features
//!
//! - **Non-blocking injection**: producers only enqueue; I/O happens on the
//!   channel's worker thread
//! - **Transparent reconnect**: a broken connection is retried and the
//!   header with every known schema is resent before data continues
//! - **Multiple destinations**: route measurement points to named channels
//!   or to separate domains
//! - **`tracing` integration**: forward log events with [`OmlLayer`]
//!   (feature `layer`, on by default)

mod benchmark;
mod channel;
mod client;
mod domain;
mod error;
mod options;
mod registry;
mod transport;

#[cfg(feature = "layer")]
mod layer;

pub use benchmark::{benchmark_point, Benchmark, BENCHMARK_MEASUREMENT_POINT};
pub use channel::{
    Channel, ChannelState, Message, ProtocolHeader, ReconnectPolicy, DEFAULT_CHANNEL,
    DEFAULT_RECONNECT_DELAY,
};
pub use client::Client;
pub use domain::{DomainContext, ROOT_SUBJECT};
pub use error::{Error, Result};
pub use options::{default_sender_id, ClientOptions, Settings};
pub use registry::{MeasurementPointHandle, Registry};
pub use transport::{CollectionUri, Connector, Transport, UriConnector, WriterTransport, DEFAULT_PORT};

#[cfg(feature = "layer")]
pub use layer::{log_point, OmlLayer, LOG_MEASUREMENT_POINT};

// Re-export types for convenience
pub use oml_types::{
    values, FieldDef, FieldType, MeasurementPoint, MeasurementPointBuilder, Value, PROTOCOL_VERSION,
};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A random 64-bit identifier for `guid` fields.
///
/// ```rust
/// let a = oml_sdk::generate_guid();
/// let b = oml_sdk::generate_guid();
/// assert_ne!(a, b);
/// ```
pub fn generate_guid() -> u64 {
    rand::random()
}
