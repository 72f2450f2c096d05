//! Error types for the client SDK.

use thiserror::Error;

use oml_types::{EncodeError, FieldType};

/// Errors surfaced to the application.
///
/// Transient transport failures are handled inside the channel worker and
/// never show up here; `Transport` is only returned by direct transport use.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or contradictory configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required parameter was not found through any configuration path.
    #[error("missing value for parameter '{name}' ({hint})")]
    MissingParameter { name: &'static str, hint: &'static str },

    /// Wrong number of values injected.
    #[error("size mismatch between the measurement ({actual}) and the definition of '{measurement_point}' ({expected})")]
    ArityMismatch {
        measurement_point: String,
        expected: usize,
        actual: usize,
    },

    /// A value does not fit its column type.
    #[error("field '{measurement_point}.{field}' is {expected} but got {actual}")]
    TypeMismatch {
        measurement_point: String,
        field: String,
        expected: FieldType,
        actual: &'static str,
    },

    /// Collection URI with an unknown scheme.
    #[error("unsupported scheme '{0}' in collection URI")]
    UnsupportedScheme(String),

    /// Collection URI that cannot be parsed.
    #[error("unable to parse collection URI '{0}'")]
    InvalidUri(String),

    /// The collection endpoint could not be opened.
    #[error("failed to connect to '{uri}': {source}")]
    Connection {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    /// Write failure on an open transport.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The measurement point has already been used and cannot change.
    #[error("measurement point '{0}' is frozen; it cannot be redefined after first use")]
    SchemaFrozen(String),

    /// Only protocol 4 is spoken.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocol(u32),

    /// Lifecycle call made in the wrong state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// A measurement point is routed to a channel that was never configured.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::ArityMismatch {
                point,
                expected,
                actual,
            } => Error::ArityMismatch {
                measurement_point: point,
                expected,
                actual,
            },
            EncodeError::TypeMismatch {
                point,
                field,
                expected,
                actual,
            } => Error::TypeMismatch {
                measurement_point: point,
                field,
                expected,
                actual,
            },
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Result alias used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;
