//! Error types for the update pipeline

use thiserror::Error;

/// Update pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, fatal for the run
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ledger (de)serialization error
    #[error("Ledger error: {0}")]
    Ledger(#[from] serde_json::Error),

    /// Manifest decryption/decoding error
    #[error("Manifest error: {0}")]
    Manifest(#[from] sekai_manifest::Error),

    /// ACB extraction error
    #[error("ACB error: {0}")]
    Acb(#[from] cri_acb::Error),

    /// HCA decode error
    #[error("HCA error: {0}")]
    Hca(#[from] cri_hca::Error),

    /// USM demux error
    #[error("USM error: {0}")]
    Usm(#[from] cri_usm::Error),

    /// Transport-level HTTP failure
    #[error("Network transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status after retries
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// An external tool exited unsuccessfully
    #[error("{program} exited with status {code:?}")]
    SubprocessFailed { program: String, code: Option<i32> },

    /// The run was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Unknown server region name
    #[error("Unknown server region: {0}")]
    UnknownRegion(String),
}
