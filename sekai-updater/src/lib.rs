//! Asset-bundle download orchestration and media export pipeline.
//!
//! One update run flows: load the completion ledger → optional cookie
//! handshake → fetch and decrypt the manifest → plan (skip patterns, ledger
//! hashes, category allow-lists) → prioritized concurrent download →
//! deobfuscate → external bundle extractor → media export (USM demux, ACB →
//! HCA → WAV → transcodes, PNG → WebP, optional upload) → batched ledger
//! flushes with a final unconditional flush.
//!
//! The HTTP inbound surface and configuration file loading live in the
//! binary crate; this crate owns everything from the manifest down.

mod config;
mod error;
pub mod exporter;
mod extractor;
pub mod obfuscate;
mod ledger;
mod plan;
mod region;
mod updater;
mod upload;
mod util;

pub mod convert;

pub use config::{Config, RegionConfig, RemoteStorageConfig, ToolsConfig, UpdateRequest};
pub use error::Error;
pub use ledger::Ledger;
pub use plan::DownloadTask;
pub use region::ServerRegion;
pub use updater::{AssetUpdater, Pools, UpdateSummary};

/// Result type for updater operations
pub type Result<T> = std::result::Result<T, Error>;
