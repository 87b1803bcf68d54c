//! Decoder for CRI HCA (High Compression Audio) streams.
//!
//! HCA is a CBR, DCT-based codec: after a checksummed header, the stream is a
//! flat run of fixed-size frames, each carrying 8 subframes of 128 spectral
//! lines per channel. Frames may pass through a byte-substitution cipher
//! keyed by a 56-bit user key. This crate decodes headers and frames to
//! float/PCM16 samples, writes WAV output, and scores candidate keys for
//! encrypted streams.
//!
//! Supported versions: 1.1, 1.2, 1.3, 2.0 and 3.0. MS-stereo streams are
//! rejected at header parse.

mod ath;
mod bitreader;
mod channel;
mod cipher;
mod crc;
mod decoder;
mod error;
mod imdct;
mod keytest;
mod stream;
mod tables;

pub use cipher::effective_key;
pub use decoder::{is_hca, Hca, Info};
pub use error::Error;
pub use keytest::KeyTest;
pub use stream::HcaDecoder;

/// Result type for HCA operations
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) const SUBFRAMES: usize = 8;
pub(crate) const SAMPLES_PER_SUBFRAME: usize = 128;
/// Samples per frame per channel
pub const SAMPLES_PER_FRAME: usize = SUBFRAMES * SAMPLES_PER_SUBFRAME;

pub(crate) const MIN_FRAME_SIZE: usize = 0x8;
pub(crate) const MAX_FRAME_SIZE: usize = 0xFFFF;
pub(crate) const MIN_CHANNELS: usize = 1;
pub(crate) const MAX_CHANNELS: usize = 16;
pub(crate) const MIN_SAMPLE_RATE: u32 = 1;
pub(crate) const MAX_SAMPLE_RATE: u32 = 0x7F_FFFF;

/// Chunk signatures are compared under this mask; encrypted files clear the
/// top bit of each signature byte.
pub(crate) const SIGNATURE_MASK: u32 = 0x7F7F_7F7F;

pub(crate) const VERSION_101: u32 = 0x0101;
pub(crate) const VERSION_102: u32 = 0x0102;
pub(crate) const VERSION_103: u32 = 0x0103;
pub(crate) const VERSION_200: u32 = 0x0200;
pub(crate) const VERSION_300: u32 = 0x0300;

pub(crate) const DEFAULT_RANDOM: u32 = 1;
