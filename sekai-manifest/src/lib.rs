//! Asset-bundle manifest handling: AES-128-CBC unwrap and MessagePack
//! decoding.
//!
//! Game servers deliver the bundle manifest as an AES-CBC-encrypted
//! MessagePack map. [`Cryptor`] unwraps (and re-wraps) the body;
//! [`Manifest`] is the typed view used by the download pipeline; the
//! [`ordered`] module renders the raw map to JSON with key order preserved
//! for inspection dumps.

mod cryptor;
mod error;
mod model;
pub mod ordered;

pub use cryptor::Cryptor;
pub use error::Error;
pub use model::{BundleDescriptor, Category, Manifest, TargetOs};

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, Error>;
