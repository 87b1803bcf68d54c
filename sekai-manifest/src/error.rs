//! Error types for manifest handling

use thiserror::Error;

/// Manifest error types
#[derive(Error, Debug)]
pub enum Error {
    /// Key or IV is not 16 bytes of valid hex
    #[error("Invalid key material: {0}")]
    KeyMaterial(&'static str),

    /// AES-CBC decryption failed (bad padding)
    #[error("Decryption failed: {0}")]
    DecryptFailed(&'static str),

    /// Decrypted body is not the expected MessagePack shape
    #[error("Manifest decode failed: {0}")]
    ManifestDecode(#[from] rmp_serde::decode::Error),

    /// MessagePack encoding failed
    #[error("Manifest encode failed: {0}")]
    ManifestEncode(#[from] rmp_serde::encode::Error),

    /// Raw MessagePack value parsing failed
    #[error("MessagePack value error: {0}")]
    Value(#[from] rmpv::decode::Error),
}
