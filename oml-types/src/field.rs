//! Field definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// Wire type of a measurement-point field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FieldType {
    String,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    Bool,
    Blob,
    Guid,
}

impl FieldType {
    /// All types in declaration order.
    pub const ALL: [FieldType; 9] = [
        FieldType::String,
        FieldType::Int32,
        FieldType::UInt32,
        FieldType::Int64,
        FieldType::UInt64,
        FieldType::Double,
        FieldType::Bool,
        FieldType::Blob,
        FieldType::Guid,
    ];

    /// Name used in schema descriptions.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int32 => "int32",
            FieldType::UInt32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::Blob => "blob",
            FieldType::Guid => "guid",
        }
    }

    /// Check whether this is one of the integer-valued types.
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int32
                | FieldType::UInt32
                | FieldType::Int64
                | FieldType::UInt64
                | FieldType::Guid
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(FieldType::String),
            // `long` and `integer` are legacy spellings of int32
            "int32" | "long" | "integer" => Ok(FieldType::Int32),
            "uint32" => Ok(FieldType::UInt32),
            "int64" => Ok(FieldType::Int64),
            "uint64" => Ok(FieldType::UInt64),
            "double" => Ok(FieldType::Double),
            "bool" | "boolean" => Ok(FieldType::Bool),
            "blob" => Ok(FieldType::Blob),
            "guid" => Ok(FieldType::Guid),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

/// A single named, typed column of a measurement point.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDef {
    /// Column name.
    pub name: String,

    /// Wire type.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub field_type: FieldType,

    /// Free-form options carried with the definition (unit, description, ...).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "BTreeMap::is_empty"))]
    pub options: BTreeMap<String, String>,
}

impl FieldDef {
    /// Create a field with no options.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            options: BTreeMap::new(),
        }
    }

    /// Attach an option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The `name:type` column description.
    pub fn column(&self) -> String {
        format!("{}:{}", self.name, self.field_type)
    }
}

impl FromStr for FieldDef {
    type Err = ParseError;

    /// Parse `name:type`. A bare `name` defaults to `string`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, ty)) if !name.is_empty() => Ok(FieldDef::new(name, ty.parse()?)),
            Some(_) => Err(ParseError::MalformedColumn(s.to_string())),
            None if !s.is_empty() => Ok(FieldDef::new(s, FieldType::String)),
            None => Err(ParseError::MalformedColumn(s.to_string())),
        }
    }
}
