//! Error types for UTF table parsing

use thiserror::Error;

/// UTF parsing error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes remained than a read requested
    #[error("Short read: stream ended before the requested bytes")]
    ShortRead,

    /// Missing `@UTF` magic
    #[error("Invalid @UTF magic: {0:#010x}")]
    BadMagic(u32),

    /// Input ends inside the fixed table header
    #[error("Truncated table header")]
    TruncatedHeader,

    /// Schema declares a column type this parser does not know
    #[error("Unknown column type: {0:#04x}")]
    UnknownColumnType(u8),

    /// A string/data offset points outside its region
    #[error("Offset {offset:#x} out of range for {region} region")]
    OffsetOutOfRange { region: &'static str, offset: u64 },

    /// A field exists but holds a different type than the accessor expects
    #[error("Field {field:?} is not {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },

    /// A required field is absent from the row
    #[error("Field {0:?} not found")]
    MissingField(String),
}
