//! CRI ACB cue-sheet parsing and AFS2 (AWB) payload extraction.
//!
//! An `.acb` file is a single `@UTF` table whose first row embeds further
//! tables (cues, names, waveforms, synths, tracks, events) plus either an
//! embedded AWB blob or references to sidecar `.awb` archives. This crate
//! walks the cue → sequence → track → event → synth → waveform graph to
//! recover named tracks and pulls their payloads out of the AWB archives.

mod afs2;
mod error;
mod extract;
mod track;

pub use afs2::{Afs2Archive, Afs2Entry};
pub use error::Error;
pub use extract::{extract_acb, extract_acb_file};
pub use track::{Encoding, Track, TrackList};

/// Result type for ACB operations
pub type Result<T> = std::result::Result<T, Error>;

/// `AFS2` magic, big-endian
pub const AFS2_MAGIC: u32 = 0x4146_5332;
