//! Error types for HCA decoding

use thiserror::Error;

/// HCA error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing `HCA\0` signature
    #[error("Invalid HCA signature")]
    BadMagic,

    /// Version outside 1.1/1.2/1.3/2.0/3.0
    #[error("Unsupported HCA version: {0:#06x}")]
    UnsupportedVersion(u32),

    /// Input shorter than the declared header or frame
    #[error("Truncated HCA data")]
    Truncated,

    /// Header or frame CRC-16 does not come out to zero
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Frame does not begin with the 0xFFFF sync word
    #[error("Bad frame sync")]
    BadSync,

    /// A header field fails validation
    #[error("Invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A stream feature this decoder rejects
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    /// Compressed frame payload failed to unpack
    #[error("Frame unpack failed")]
    UnpackFailed,

    /// Decoder used before a header was parsed
    #[error("Decoder not initialized")]
    NotInitialized,
}
