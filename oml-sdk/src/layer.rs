//! Forward `tracing` events as measurements.
//!
//! Each event becomes one row of the `Log` measurement point. Events from
//! this crate are skipped so that injecting a log row never feeds back into
//! itself.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use oml_types::{values, FieldType, MeasurementPoint};
use tracing::field::{Field, Visit};
use tracing::{debug, Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::client::Client;
use crate::error::Result;
use crate::registry::MeasurementPointHandle;

/// Name of the measurement point log rows are sent to.
pub const LOG_MEASUREMENT_POINT: &str = "Log";

const OWN_TARGET: &str = "oml_sdk";

/// Events from this crate would feed back into the channels they describe.
fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// A [`Layer`] that injects every event into a [`Client`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use oml_sdk::{Client, ClientOptions, OmlLayer};
/// use tracing_subscriber::layer::SubscriberExt;
/// use tracing_subscriber::util::SubscriberInitExt;
///
/// let client = Arc::new(Client::new());
/// let layer = OmlLayer::new(client.clone())?;
/// client.init(ClientOptions::new().domain("foo").collect_uri("file:-"))?;
/// tracing_subscriber::registry().with(layer).init();
///
/// tracing::info!("hello");
/// # Ok::<(), oml_sdk::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct OmlLayer {
    client: Arc<Client>,
    mp: MeasurementPointHandle,
}

impl OmlLayer {
    /// Register the `Log` measurement point on `client`.
    pub fn new(client: Arc<Client>) -> Result<Self> {
        let mp = client.define(log_point())?;
        Ok(Self { client, mp })
    }

    /// The measurement point log rows are injected into.
    pub fn measurement_point(&self) -> &MeasurementPointHandle {
        &self.mp
    }
}

/// Descriptor of the `Log` measurement point.
pub fn log_point() -> MeasurementPoint {
    MeasurementPoint::builder(LOG_MEASUREMENT_POINT)
        .field("data", FieldType::String)
        .field("file", FieldType::String)
        .field("level", FieldType::String)
        .field("line", FieldType::String)
        .field("logger", FieldType::String)
        .field("method", FieldType::String)
        .field("time", FieldType::String)
        .build()
}

impl<S: Subscriber> Layer<S> for OmlLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_own_target(meta.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let row = values![
            visitor.finish(),
            meta.file().unwrap_or_default(),
            meta.level().as_str(),
            meta.line().map(|l| l.to_string()).unwrap_or_default(),
            meta.target(),
            meta.module_path().unwrap_or_default(),
            chrono::Utc::now().to_rfc3339(),
        ];
        if let Err(e) = self.client.inject(&self.mp, &row) {
            debug!(error = %e, "dropping log event");
        }
    }
}

/// Collects the message and any extra fields as `key=value` pairs.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}
