//! Error types for descriptor parsing and value encoding.

use thiserror::Error;

use crate::FieldType;

/// Errors raised while checking a tuple against its measurement point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The tuple does not have one value per field.
    #[error("size mismatch between the measurement ({actual}) and the definition of '{point}' ({expected})")]
    ArityMismatch {
        point: String,
        expected: usize,
        actual: usize,
    },

    /// A value cannot be represented as the field's declared type.
    #[error("field '{point}.{field}' is {expected} but got {actual}")]
    TypeMismatch {
        point: String,
        field: String,
        expected: FieldType,
        actual: &'static str,
    },
}

/// Errors raised while parsing textual descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Unknown field type name.
    #[error("unknown field type '{0}'")]
    UnknownType(String),

    /// A column was not of the form `name:type`.
    #[error("malformed column '{0}', expected name:type")]
    MalformedColumn(String),

    /// The descriptor text had no measurement point name.
    #[error("empty measurement point description")]
    Empty,
}
