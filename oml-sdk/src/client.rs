//! Client lifecycle.
//!
//! ```text
//! Uninitialized --configure--> Configured --start--> Running
//!       ^                                               |
//!       +--------------------- stop --------------------+
//! ```
//!
//! Injection is a no-op unless the client is running.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use oml_types::{MeasurementPoint, Value};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ProtocolHeader, ReconnectPolicy};
use crate::domain::DomainContext;
use crate::error::{Error, Result};
use crate::options::{ClientOptions, Settings};
use crate::registry::{MeasurementPointHandle, Registry};
use crate::transport::UriConnector;
use crate::VERSION;

#[derive(Debug)]
enum Lifecycle {
    Uninitialized,
    Configured(Arc<Settings>),
    Running(Arc<Running>),
}

impl Lifecycle {
    fn name(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Configured(_) => "configured",
            Lifecycle::Running(_) => "running",
        }
    }
}

/// Contexts of one run.
#[derive(Debug)]
struct Running {
    settings: Arc<Settings>,
    default_domain: Arc<DomainContext>,
    /// Domains requested by individual measurement points, opened on first use.
    domains: Mutex<BTreeMap<String, Arc<DomainContext>>>,
}

impl Running {
    fn domain_for(&self, point: &MeasurementPoint) -> Result<Arc<DomainContext>> {
        let name = match point.domain.as_deref() {
            None => return Ok(self.default_domain.clone()),
            Some(name) if name == self.default_domain.domain() => {
                return Ok(self.default_domain.clone())
            }
            Some(name) => name,
        };

        let mut domains = self.domains.lock();
        if let Some(domain) = domains.get(name) {
            return Ok(domain.clone());
        }
        let domain = Arc::new(open_domain(&self.settings, name, DomainKind::Secondary)?);
        domains.insert(name.to_string(), domain.clone());
        Ok(domain)
    }

    fn close(&self) {
        let domains = std::mem::take(&mut *self.domains.lock());
        for (name, domain) in domains {
            debug!(domain = %name, "closing domain");
            domain.close();
        }
        self.default_domain.close();
    }
}

/// Entry point for applications.
///
/// A client owns its registry and every open channel. Several clients can
/// coexist in one process.
///
/// ```rust,no_run
/// use oml_sdk::{values, Client, ClientOptions, FieldType, MeasurementPoint};
///
/// let client = Client::new();
/// let sin = client.define(
///     MeasurementPoint::builder("sin")
///         .field("label", FieldType::String)
///         .field("angle", FieldType::Int32)
///         .field("value", FieldType::Double)
///         .build(),
/// )?;
///
/// client.configure(
///     ClientOptions::new()
///         .domain("foo")
///         .sender_id("n1")
///         .app_name("demo")
///         .collect_uri("file:-"),
/// )?;
/// client.start()?;
/// client.inject(&sin, &values!["label_0", 0, 0.0])?;
/// client.stop();
/// # Ok::<(), oml_sdk::Error>(())
/// ```
#[derive(Debug)]
pub struct Client {
    registry: Registry,
    state: RwLock<Lifecycle>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            state: RwLock::new(Lifecycle::Uninitialized),
        }
    }

    /// Configure and start in one call.
    pub fn init(&self, options: ClientOptions) -> Result<()> {
        self.configure(options)?;
        self.start()
    }

    /// The measurement-point registry of this client.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register or update a measurement point.
    pub fn define(&self, point: MeasurementPoint) -> Result<MeasurementPointHandle> {
        self.registry.define(point)
    }

    /// Resolve options into settings. Allowed until the client is started;
    /// a second call replaces the first.
    pub fn configure(&self, options: ClientOptions) -> Result<()> {
        let mut state = self.state.write();
        if let Lifecycle::Running(_) = *state {
            return Err(Error::InvalidState {
                operation: "configure",
                state: "running",
            });
        }

        let settings = options.resolve_from_env()?;
        info!("OML client for Rust v{} [OMSPv{}]", VERSION, settings.protocol);
        if settings.noop {
            info!(domain = %settings.domain, "noop mode, measurements are validated and discarded");
        } else {
            info!(
                domain = %settings.domain,
                sender_id = %settings.sender_id,
                app_name = %settings.app_name,
                "configured"
            );
        }

        *state = Lifecycle::Configured(Arc::new(settings));
        Ok(())
    }

    /// Open every channel of the configured domain.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write();
        let settings = match &*state {
            Lifecycle::Configured(settings) => settings.clone(),
            other => {
                return Err(Error::InvalidState {
                    operation: "start",
                    state: other.name(),
                })
            }
        };

        let default_domain = Arc::new(open_domain(&settings, &settings.domain, DomainKind::Primary)?);
        info!(
            domain = %settings.domain,
            channels = ?default_domain.channel_names(),
            "measurement collection started"
        );
        *state = Lifecycle::Running(Arc::new(Running {
            settings,
            default_domain,
            domains: Mutex::new(BTreeMap::new()),
        }));
        Ok(())
    }

    /// Drain and close every channel and return to `Uninitialized`.
    ///
    /// Measurement points are unfrozen so the next run can redefine them.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), Lifecycle::Uninitialized);
        if let Lifecycle::Running(running) = previous {
            running.close();
            self.registry.reset();
            info!("measurement collection stopped");
        }
    }

    /// Check if the client is started.
    pub fn is_running(&self) -> bool {
        matches!(*self.state.read(), Lifecycle::Running(_))
    }

    /// Current settings, once configured.
    pub fn settings(&self) -> Option<Arc<Settings>> {
        match &*self.state.read() {
            Lifecycle::Uninitialized => None,
            Lifecycle::Configured(settings) => Some(settings.clone()),
            Lifecycle::Running(running) => Some(running.settings.clone()),
        }
    }

    /// Send one measurement tuple.
    ///
    /// Returns immediately. Fails only on a tuple that does not match the
    /// measurement point, or on a routing error.
    pub fn inject(&self, mp: &MeasurementPointHandle, values: &[Value]) -> Result<()> {
        let Some(running) = self.running() else {
            return Ok(());
        };
        running.domain_for(&mp.point())?.inject(mp, values)
    }

    /// Annotate a measurement point, or one of its fields via `qualifier`.
    pub fn inject_metadata(
        &self,
        mp: &MeasurementPointHandle,
        key: &str,
        value: &str,
        qualifier: Option<&str>,
    ) -> Result<()> {
        let Some(running) = self.running() else {
            return Ok(());
        };
        running
            .domain_for(&mp.point())?
            .inject_metadata(mp, key, value, qualifier)
    }

    /// Annotate the experiment as a whole.
    pub fn inject_experiment_metadata(&self, key: &str, value: &str) {
        if let Some(running) = self.running() {
            running.default_domain.inject_experiment_metadata(key, value);
        }
    }

    fn running(&self) -> Option<Arc<Running>> {
        match &*self.state.read() {
            Lifecycle::Running(running) => Some(running.clone()),
            _ => None,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How the channels of a domain are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DomainKind {
    /// The configured domain. Its channels connect before `start` returns,
    /// so a bad endpoint is reported there.
    Primary,
    /// A domain requested by a measurement point, opened from an injection.
    /// Its channels connect from their worker and share the collection files
    /// of the primary domain, so they never truncate them.
    Secondary,
}

fn open_domain(settings: &Settings, domain: &str, kind: DomainKind) -> Result<DomainContext> {
    let header = ProtocolHeader {
        protocol: settings.protocol,
        domain: domain.to_string(),
        start_time: whole_seconds(SystemTime::now()),
        sender_id: settings.sender_id.clone(),
        app_name: settings.app_name.clone(),
    };

    let mut channels = BTreeMap::new();
    if !settings.noop {
        for (name, uri) in settings.channel_uris() {
            let policy = ReconnectPolicy::fixed(settings.reconnect_delay);
            let channel = match kind {
                DomainKind::Primary => Channel::open(
                    name.clone(),
                    Box::new(UriConnector::new(uri, settings.append)),
                    header.clone(),
                    policy,
                ),
                DomainKind::Secondary => Channel::spawn(
                    name.clone(),
                    Box::new(UriConnector::new(uri, true)),
                    header.clone(),
                    policy,
                ),
            };
            match channel {
                Ok(channel) => {
                    channels.insert(name, Arc::new(channel));
                }
                Err(e) => {
                    warn!(domain = %domain, channel = %name, error = %e, "failed to open channel");
                    return Err(e);
                }
            }
        }
    }
    Ok(DomainContext::new(header, channels))
}

fn whole_seconds(time: SystemTime) -> SystemTime {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oml_types::{values, FieldType};

    fn noop_options() -> ClientOptions {
        ClientOptions::new().app_name("demo").domain("foo").noop(true)
    }

    fn sin() -> MeasurementPoint {
        MeasurementPoint::builder("sin")
            .field("label", FieldType::String)
            .field("value", FieldType::Double)
            .build()
    }

    #[test]
    fn inject_before_start_is_a_noop() {
        let client = Client::new();
        let sin = client.define(sin()).unwrap();
        client.inject(&sin, &values!["a", 1.0]).unwrap();
        // even a malformed tuple is ignored while not running
        client.inject(&sin, &values!["a"]).unwrap();
        assert!(!sin.is_frozen());

        client.configure(noop_options()).unwrap();
        client.inject(&sin, &values!["a", 1.0]).unwrap();
        assert!(!sin.is_frozen());
    }

    #[test]
    fn start_requires_configure() {
        let client = Client::new();
        assert!(matches!(
            client.start(),
            Err(Error::InvalidState {
                operation: "start",
                state: "uninitialized"
            })
        ));
    }

    #[test]
    fn start_twice_fails() {
        let client = Client::new();
        client.init(noop_options()).unwrap();
        assert!(client.is_running());
        assert!(matches!(
            client.start(),
            Err(Error::InvalidState { state: "running", .. })
        ));
        assert!(matches!(
            client.configure(noop_options()),
            Err(Error::InvalidState { operation: "configure", .. })
        ));
    }

    #[test]
    fn running_noop_client_validates() {
        let client = Client::new();
        let sin = client.define(sin()).unwrap();
        client.init(noop_options()).unwrap();

        client.inject(&sin, &values!["a", 1.0]).unwrap();
        assert!(sin.is_frozen());
        assert!(matches!(
            client.inject(&sin, &values!["a"]),
            Err(Error::ArityMismatch { .. })
        ));
    }

    #[test]
    fn stop_allows_a_new_run() {
        let client = Client::new();
        let sin = client.define(sin()).unwrap();
        client.init(noop_options()).unwrap();
        client.inject(&sin, &values!["a", 1.0]).unwrap();
        assert!(client
            .define(MeasurementPoint::builder("sin").field("x", FieldType::Int32).build())
            .is_err());

        client.stop();
        assert!(!client.is_running());
        assert!(client.settings().is_none());
        client.stop();

        client
            .define(MeasurementPoint::builder("sin").field("x", FieldType::Int32).build())
            .unwrap();
        client.init(noop_options()).unwrap();
        client.inject(&sin, &values![1]).unwrap();
    }

    #[test]
    fn failed_start_stays_configured() {
        let client = Client::new();
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file:{}", dir.path().join("missing/out.oml").display());
        client
            .configure(ClientOptions::new().app_name("demo").domain("foo").collect_uri(uri))
            .unwrap();
        assert!(matches!(client.start(), Err(Error::Connection { .. })));
        assert!(client.settings().is_some());
        assert!(!client.is_running());
    }

    #[test]
    fn start_time_is_whole_seconds() {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        assert_eq!(whole_seconds(t), UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    }
}
