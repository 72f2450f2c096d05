//! # oml-types
//!
//! Data-only descriptors for OML measurement points and the text encoding
//! used by the OML measurement stream protocol (OMSP).
//!
//! A measurement point is a named, ordered tuple of typed fields. Application
//! code builds a [`MeasurementPoint`] once, hands it to a client, and then
//! injects [`Value`] tuples that match it. This crate knows how to check a
//! tuple against its descriptor and turn it into wire tokens; it performs no
//! I/O and keeps no global state.
//!
//! ## Features
//!
//! - `serde`: derive `Serialize`/`Deserialize` for descriptors and values
//!
//! ## Example
//!
//! ```rust
//! use oml_types::{FieldType, MeasurementPoint, Value};
//!
//! let sin = MeasurementPoint::builder("sin")
//!     .field("label", FieldType::String)
//!     .field("angle", FieldType::Int32)
//!     .field("value", FieldType::Double)
//!     .build();
//!
//! let tokens = sin
//!     .validate_and_serialize(&[Value::from("label_15"), 15.into(), 0.2588.into()])
//!     .unwrap();
//! assert_eq!(tokens, vec!["label_15", "15", "0.2588"]);
//!
//! assert_eq!(
//!     sin.schema_description(1, "demo"),
//!     "1 demo_sin label:string angle:int32 value:double"
//! );
//! ```

mod encode;
mod error;
mod field;
mod point;
mod value;

pub use encode::*;
pub use error::*;
pub use field::*;
pub use point::*;
pub use value::*;

/// Protocol version spoken by this crate family.
pub const PROTOCOL_VERSION: u32 = 4;

/// Schema index reserved for metadata rows (schema definitions, key/value
/// annotations). Application schemas are numbered from 1.
pub const METADATA_SCHEMA_INDEX: u32 = 0;

/// Table name of the reserved metadata schema.
pub const METADATA_SCHEMA_NAME: &str = "_experiment_metadata";

/// Column description of the reserved metadata schema.
pub const METADATA_SCHEMA_COLUMNS: &str = "subject:string key:string value:string";
