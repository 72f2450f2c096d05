//! Client options and their resolution into effective settings.
//!
//! Every parameter is looked up in this order, first hit wins:
//!
//! 1. the config file named by `config_file`
//! 2. the option set at the call site
//! 3. its deprecated alias (logs a warning)
//! 4. the process environment
//! 5. a computed default, if the parameter has one
//!
//! Config files are read with the `config` crate, so the format follows the
//! extension (`.toml`, `.json`, `.yaml`, ...):
//!
//! ```toml
//! domain = "foo"
//! id = "n1"
//! collect = "tcp:collector:3003"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use oml_types::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::channel::{DEFAULT_CHANNEL, DEFAULT_RECONNECT_DELAY};
use crate::error::{Error, Result};
use crate::transport::CollectionUri;

/// Environment variable for the domain.
pub const ENV_DOMAIN: &str = "OML_DOMAIN";
/// Deprecated environment variable for the domain.
pub const ENV_EXP_ID: &str = "OML_EXP_ID";
/// Environment variable for the sender id.
pub const ENV_ID: &str = "OML_ID";
/// Alternative environment variable for the sender id.
pub const ENV_NAME: &str = "OML_NAME";
/// Environment variable for the collection URI.
pub const ENV_COLLECT: &str = "OML_COLLECT";
/// Deprecated environment variable for the collection URI.
pub const ENV_SERVER: &str = "OML_SERVER";
/// Obsolete environment variable, rejected.
pub const ENV_URL: &str = "OML_URL";

/// Options accepted by [`Client::configure`](crate::Client::configure).
///
/// ```rust
/// use oml_sdk::ClientOptions;
///
/// let options = ClientOptions::new()
///     .domain("foo")
///     .sender_id("n1")
///     .app_name("demo")
///     .collect_uri("file:-");
/// assert_eq!(options.domain.as_deref(), Some("foo"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub domain: Option<String>,
    pub sender_id: Option<String>,
    pub app_name: Option<String>,
    pub collect_uri: Option<String>,
    pub protocol: Option<u32>,
    /// Keep the API live but never open a transport.
    pub noop: bool,
    /// Append to collection files instead of truncating them.
    pub append: bool,
    pub reconnect_delay: Duration,
    /// Extra named channels, name to collection URI.
    pub channels: BTreeMap<String, String>,
    pub create_default_channel: bool,
    pub config_file: Option<PathBuf>,
    /// Deprecated alias of `domain`.
    pub exp_id: Option<String>,
    /// Deprecated alias of `collect_uri`.
    pub server: Option<String>,
    /// Obsolete; setting it is an error.
    pub url: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            domain: None,
            sender_id: None,
            app_name: None,
            collect_uri: None,
            protocol: None,
            noop: false,
            append: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            channels: BTreeMap::new(),
            create_default_channel: true,
            config_file: None,
            exp_id: None,
            server: None,
            url: None,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn sender_id(mut self, id: impl Into<String>) -> Self {
        self.sender_id = Some(id.into());
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn collect_uri(mut self, uri: impl Into<String>) -> Self {
        self.collect_uri = Some(uri.into());
        self
    }

    pub fn protocol(mut self, protocol: u32) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Add a named channel that measurement points can route to.
    pub fn channel(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.channels.insert(name.into(), uri.into());
        self
    }

    /// Whether the `default` channel is created from the collection URI.
    pub fn create_default_channel(mut self, create: bool) -> Self {
        self.create_default_channel = create;
        self
    }

    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Resolve against the process environment.
    pub fn resolve_from_env(&self) -> Result<Settings> {
        self.resolve(|key| std::env::var(key).ok())
    }

    /// Resolve against a custom environment lookup.
    pub fn resolve<F>(&self, env: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| present(env(key));

        if present(self.url.clone()).is_some() || env(ENV_URL).is_some() {
            return Err(Error::Configuration(
                "the 'url' option is no longer supported, use 'collect_uri' instead".to_string(),
            ));
        }

        let file = match &self.config_file {
            Some(path) => FileSettings::load(path)?,
            None => FileSettings::default(),
        };

        let protocol = self.protocol.unwrap_or(PROTOCOL_VERSION);
        if protocol != PROTOCOL_VERSION {
            return Err(Error::UnsupportedProtocol(protocol));
        }

        let domain = present(file.domain)
            .or_else(|| present(file.experiment))
            .or_else(|| present(self.domain.clone()))
            .or_else(|| deprecated(&self.exp_id, "exp_id", "domain"))
            .or_else(|| env(ENV_DOMAIN))
            .or_else(|| {
                let value = env(ENV_EXP_ID)?;
                warn!("environment variable {} is deprecated, use {}", ENV_EXP_ID, ENV_DOMAIN);
                Some(value)
            });

        let sender_id = present(file.id)
            .or_else(|| present(self.sender_id.clone()))
            .or_else(|| env(ENV_ID))
            .or_else(|| env(ENV_NAME))
            .unwrap_or_else(default_sender_id);

        let collect = present(file.collect)
            .or_else(|| present(file.url))
            .or_else(|| present(self.collect_uri.clone()))
            .or_else(|| deprecated(&self.server, "server", "collect_uri"))
            .or_else(|| env(ENV_COLLECT))
            .or_else(|| {
                let value = env(ENV_SERVER)?;
                warn!("environment variable {} is deprecated, use {}", ENV_SERVER, ENV_COLLECT);
                Some(value)
            });

        let app_name = match present(self.app_name.clone()).or_else(default_app_name) {
            Some(name) => name,
            None => {
                return Err(Error::MissingParameter {
                    name: "app_name",
                    hint: "set ClientOptions::app_name",
                })
            }
        };

        let mut channels = BTreeMap::new();
        for (name, uri) in &self.channels {
            if self.create_default_channel && name == DEFAULT_CHANNEL {
                return Err(Error::Configuration(format!(
                    "channel name '{}' is reserved for the collection URI",
                    DEFAULT_CHANNEL
                )));
            }
            channels.insert(name.clone(), CollectionUri::parse(uri)?);
        }

        if self.noop {
            return Ok(Settings {
                domain: domain.unwrap_or_else(|| app_name.clone()),
                sender_id,
                app_name,
                collect_uri: collect.map(|uri| CollectionUri::parse(&uri)).transpose()?,
                protocol,
                noop: true,
                append: self.append,
                reconnect_delay: self.reconnect_delay,
                channels,
                create_default_channel: self.create_default_channel,
            });
        }

        let Some(domain) = domain else {
            return Err(Error::MissingParameter {
                name: "domain",
                hint: "use the 'domain' option or OML_DOMAIN",
            });
        };

        let collect_uri = match collect {
            Some(uri) => Some(CollectionUri::parse(&uri)?),
            None if self.create_default_channel => {
                return Err(Error::MissingParameter {
                    name: "collect_uri",
                    hint: "use the 'collect_uri' option or OML_COLLECT",
                })
            }
            None => None,
        };

        if !self.create_default_channel && channels.is_empty() {
            return Err(Error::Configuration(
                "no channel configured: the default channel is disabled and no named channel is set"
                    .to_string(),
            ));
        }

        Ok(Settings {
            domain,
            sender_id,
            app_name,
            collect_uri,
            protocol,
            noop: false,
            append: self.append,
            reconnect_delay: self.reconnect_delay,
            channels,
            create_default_channel: self.create_default_channel,
        })
    }
}

/// Effective configuration after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub domain: String,
    pub sender_id: String,
    pub app_name: String,
    pub collect_uri: Option<CollectionUri>,
    pub protocol: u32,
    pub noop: bool,
    pub append: bool,
    pub reconnect_delay: Duration,
    pub channels: BTreeMap<String, CollectionUri>,
    pub create_default_channel: bool,
}

impl Settings {
    /// Every channel a domain opens, by name.
    pub fn channel_uris(&self) -> BTreeMap<String, CollectionUri> {
        let mut uris = self.channels.clone();
        if self.create_default_channel {
            if let Some(uri) = &self.collect_uri {
                uris.insert(DEFAULT_CHANNEL.to_string(), uri.clone());
            }
        }
        uris
    }
}

/// Keys recognised in a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    domain: Option<String>,
    experiment: Option<String>,
    id: Option<String>,
    collect: Option<String>,
    url: Option<String>,
}

impl FileSettings {
    fn load(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn deprecated(value: &Option<String>, name: &str, replacement: &str) -> Option<String> {
    let value = present(value.clone())?;
    warn!("option '{}' is deprecated, use '{}' instead", name, replacement);
    Some(value)
}

/// `<hostname>-<pid>`.
pub fn default_sender_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

fn default_app_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_stem()?.to_str().map(str::to_string)
}
