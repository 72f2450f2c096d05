//! Text encoding of field values.
//!
//! Every value becomes a single token that contains no tab and no newline,
//! so that a row can be tab-joined and newline-terminated safely.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::{FieldType, Value};

/// Escape a string for the text protocol.
///
/// Backslash is escaped first so the escapes introduced for `\r`, `\n` and
/// `\t` are not escaped a second time.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_string`], as a collector does when reading a row.
///
/// Unknown escapes are kept verbatim.
pub fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Format a double the way the collector expects it.
///
/// `Debug` keeps a trailing `.0` on integral values and spells the special
/// values `NaN`, `inf` and `-inf`.
pub fn format_double(v: f64) -> String {
    format!("{:?}", v)
}

/// Encode one value for a column of the given type.
///
/// Returns `None` when the value cannot be represented in that column.
pub fn encode_value(field_type: FieldType, value: &Value) -> Option<String> {
    match field_type {
        FieldType::String => match value {
            Value::String(s) => Some(escape_string(s)),
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Double(d) => Some(format_double(*d)),
            Value::Blob(_) => None,
            other => other.as_i128().map(|i| i.to_string()),
        },
        FieldType::Int32 => encode_integer::<i32>(value),
        FieldType::UInt32 => encode_integer::<u32>(value),
        FieldType::Int64 => encode_integer::<i64>(value),
        FieldType::UInt64 | FieldType::Guid => encode_integer::<u64>(value),
        FieldType::Double => match value {
            Value::Null => Some("NaN".to_string()),
            Value::Double(d) => Some(format_double(*d)),
            other => other.as_i128().map(|i| format_double(i as f64)),
        },
        FieldType::Bool => match value {
            Value::Bool(true) => Some("True".to_string()),
            Value::Bool(false) => Some("False".to_string()),
            _ => None,
        },
        FieldType::Blob => match value {
            Value::Blob(bytes) => Some(STANDARD.encode(bytes)),
            Value::String(s) => Some(STANDARD.encode(s.as_bytes())),
            Value::Null => Some(String::new()),
            _ => None,
        },
    }
}

fn encode_integer<T>(value: &Value) -> Option<String>
where
    T: TryFrom<i128> + ToString,
{
    value
        .as_i128()
        .and_then(|i| T::try_from(i).ok())
        .map(|v| v.to_string())
}
