//! Measurement-point descriptors.

use std::fmt;
use std::str::FromStr;

use crate::{encode_value, EncodeError, FieldDef, FieldType, ParseError, Value};

/// Describes one kind of observation: a named, ordered tuple of typed fields.
///
/// Descriptors are plain data. Routing hints (`channels`, `domain`) are read
/// by the client when the point is first used.
///
/// # Example
///
/// ```rust
/// use oml_types::{FieldType, MeasurementPoint};
///
/// let cos = MeasurementPoint::builder("cos")
///     .field("label", FieldType::String)
///     .field("value", FieldType::Double)
///     .channel("ch2")
///     .build();
///
/// assert_eq!(cos.arity(), 2);
/// assert_eq!(cos.table_name("app"), "app_cos");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeasurementPoint {
    /// Measurement point name.
    pub name: String,

    /// Ordered column definitions.
    #[cfg_attr(feature = "serde", serde(default))]
    pub fields: Vec<FieldDef>,

    /// Prefix the table name with the application name.
    #[cfg_attr(feature = "serde", serde(default = "default_add_prefix"))]
    pub add_prefix: bool,

    /// Named channels this point is sent to. Empty means the domain's
    /// default channel.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub channels: Vec<String>,

    /// Domain this point is collected under. `None` means the client's
    /// configured domain.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub domain: Option<String>,
}

#[cfg(feature = "serde")]
fn default_add_prefix() -> bool {
    true
}

impl MeasurementPoint {
    /// Create an empty point with the default options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            add_prefix: true,
            channels: Vec::new(),
            domain: None,
        }
    }

    /// Create a builder.
    pub fn builder(name: impl Into<String>) -> MeasurementPointBuilder {
        MeasurementPointBuilder::new(name)
    }

    /// Number of fields.
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Table name as announced to the collector.
    pub fn table_name(&self, app_name: &str) -> String {
        if self.add_prefix {
            format!("{}_{}", app_name, self.name)
        } else {
            self.name.clone()
        }
    }

    /// Space-separated `name:type` column list.
    pub fn columns(&self) -> String {
        self.fields
            .iter()
            .map(FieldDef::column)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Schema description `<index> <table> <name>:<type> ...`.
    pub fn schema_description(&self, index: u32, app_name: &str) -> String {
        let table = self.table_name(app_name);
        if self.fields.is_empty() {
            format!("{} {}", index, table)
        } else {
            format!("{} {} {}", index, table, self.columns())
        }
    }

    /// Check a tuple against this point and encode every value.
    ///
    /// Returns the encoded field tokens in column order. Timestamp, schema
    /// index and sequence number are not part of the output.
    pub fn validate_and_serialize(&self, values: &[Value]) -> Result<Vec<String>, EncodeError> {
        if values.len() != self.fields.len() {
            return Err(EncodeError::ArityMismatch {
                point: self.name.clone(),
                expected: self.fields.len(),
                actual: values.len(),
            });
        }

        self.fields
            .iter()
            .zip(values)
            .map(|(field, value)| {
                encode_value(field.field_type, value).ok_or_else(|| EncodeError::TypeMismatch {
                    point: self.name.clone(),
                    field: field.name.clone(),
                    expected: field.field_type,
                    actual: value.kind(),
                })
            })
            .collect()
    }
}

impl fmt::Display for MeasurementPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} {}", self.name, self.columns())
        }
    }
}

impl FromStr for MeasurementPoint {
    type Err = ParseError;

    /// Parse the compact form `name col:type col:type ...`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let name = parts.next().ok_or(ParseError::Empty)?;
        let fields = parts.map(str::parse).collect::<Result<Vec<FieldDef>, _>>()?;
        Ok(MeasurementPoint {
            fields,
            ..MeasurementPoint::new(name)
        })
    }
}

/// Builder for [`MeasurementPoint`].
#[derive(Debug)]
pub struct MeasurementPointBuilder {
    point: MeasurementPoint,
}

impl MeasurementPointBuilder {
    /// Create a new builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            point: MeasurementPoint::new(name),
        }
    }

    /// Append a column.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.point.fields.push(FieldDef::new(name, field_type));
        self
    }

    /// Append a fully specified column.
    pub fn field_def(mut self, field: FieldDef) -> Self {
        self.point.fields.push(field);
        self
    }

    /// Whether the table name gets the application prefix. Defaults to true.
    pub fn add_prefix(mut self, add_prefix: bool) -> Self {
        self.point.add_prefix = add_prefix;
        self
    }

    /// Route this point to a named channel. May be called more than once.
    pub fn channel(mut self, name: impl Into<String>) -> Self {
        self.point.channels.push(name.into());
        self
    }

    /// Collect this point under a specific domain.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.point.domain = Some(domain.into());
        self
    }

    /// Build the descriptor.
    pub fn build(self) -> MeasurementPoint {
        self.point
    }
}
