//! Raw values injected by applications.

/// A single raw value of a measurement tuple.
///
/// Values are loosely typed on purpose: an `i64` can feed an `int32` column
/// as long as it fits, and any integer can feed a `double` column. The
/// descriptor decides the final wire type.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// Absent value. Encodes as `NaN` in `double` columns and as an empty
    /// string in `string` columns.
    Null,
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Blob(_) => "blob",
        }
    }

    /// Widen any integer variant.
    pub(crate) fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::Int32(v) => Some(v as i128),
            Value::UInt32(v) => Some(v as i128),
            Value::Int64(v) => Some(v as i128),
            Value::UInt64(v) => Some(v as i128),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int32,
    i16 => Int32,
    i32 => Int32,
    u8 => UInt32,
    u16 => UInt32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Double,
    f64 => Double,
    String => String,
    &str => String,
    Vec<u8> => Blob,
    &[u8] => Blob,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Build a `Vec<Value>` from heterogeneous expressions.
///
/// ```rust
/// use oml_types::{values, Value};
///
/// let row = values!["label_0", 0, 0.0_f64, None::<f64>];
/// assert_eq!(row[3], Value::Null);
/// ```
#[macro_export]
macro_rules! values {
    ($($v:expr),* $(,)?) => {
        vec![$($crate::Value::from($v)),*]
    };
}
