//! Error types for ACB/AWB extraction

use thiserror::Error;

/// ACB/AWB error types
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the underlying UTF table parser
    #[error("UTF table error: {0}")]
    Utf(#[from] cri_utf::Error),

    /// Invalid AFS2 magic bytes
    #[error("Invalid AFS2 magic: {0:#010x}")]
    BadMagic(u32),

    /// AFS2 offset width other than 2 or 4 bytes
    #[error("Unsupported AFS2 offset width: {0}")]
    UnsupportedOffsetWidth(u8),

    /// AFS2 cue-id width other than 2 or 4 bytes
    #[error("Unsupported AFS2 cue-id width: {0}")]
    UnsupportedCueIdWidth(u8),

    /// Cue reference type this extractor does not implement
    #[error("ReferenceType {0} not implemented")]
    UnsupportedReferenceType(i64),

    /// No AWB slot carries the requested cue id
    #[error("Cue ID {0} not found in archive")]
    CueNotFound(u32),
}
