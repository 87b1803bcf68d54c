//! Error types for USM demuxing

use thiserror::Error;

/// USM error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the chunk metadata UTF tables
    #[error("UTF table error: {0}")]
    Utf(#[from] cri_utf::Error),

    /// Stream does not begin with a CRID chunk
    #[error("Invalid USM signature: {0:#010x}")]
    BadMagic(u32),

    /// Chunk declares a payload smaller than its header and footer
    #[error("Truncated chunk at offset {0:#x}")]
    TruncatedChunk(u64),

    /// Stream ended before the metadata phase finished
    #[error("Missing metadata terminator")]
    MissingMetadataEnd,
}
