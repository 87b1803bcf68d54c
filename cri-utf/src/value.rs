//! Typed cell values

/// A single table cell.
///
/// Integer widths are preserved as declared by the schema; [`Value::as_int`]
/// widens for callers that only care about the number. String cells keep
/// their raw bytes because not every producer writes UTF-8 (USM `filename`
/// entries are Shift-JIS).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    /// NUL-terminated string-table entry, raw bytes
    Str(Vec<u8>),
    /// Data-region blob
    Bytes(Vec<u8>),
}

impl Value {
    /// Human-readable type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::I8(_) => "i8",
            Value::U16(_) => "u16",
            Value::I16(_) => "i16",
            Value::U32(_) => "u32",
            Value::I32(_) => "i32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Widen any integer variant to `i64`.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::I8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::F32(v) => Some(v),
            _ => None,
        }
    }

    /// String bytes, valid UTF-8 or not.
    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => std::str::from_utf8(v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}
