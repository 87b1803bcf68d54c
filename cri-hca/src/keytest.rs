//! Key-testing oracle.
//!
//! Candidate keys are scored by decoding a handful of frames: a wrong key
//! fails fast (unpack errors, bit-reader overruns, residual bytes), a right
//! key decodes to plausible audio. Lower positive totals are better; 1 is
//! the best possible score.

use std::io::{Read, Seek, SeekFrom};

use tracing::trace;

use crate::stream::HcaDecoder;

const SCORE_SCALE: i32 = 10;
const MAX_SKIP_BLANKS: i32 = 1200;
const MIN_TEST_FRAMES: i32 = 3;
const MAX_TEST_FRAMES: i32 = 7;
const MAX_FRAME_SCORE: i32 = 600;
const MAX_TOTAL_SCORE: i32 = MAX_TEST_FRAMES * 50 * SCORE_SCALE;

/// Candidate key state, threaded through repeated [`HcaDecoder::test_key`]
/// calls. `start_offset` caches the first non-silent frame so later
/// candidates skip straight to it.
#[derive(Debug, Clone, Default)]
pub struct KeyTest {
    pub key: u64,
    pub subkey: u64,
    pub start_offset: u64,
    pub best_score: i32,
    pub best_key: u64,
}

impl KeyTest {
    pub fn new(key: u64, subkey: u64) -> Self {
        Self {
            key,
            subkey,
            ..Self::default()
        }
    }
}

impl<R: Read + Seek> HcaDecoder<R> {
    /// Score a candidate key, keeping the best seen so far.
    pub fn test_key(&mut self, kt: &mut KeyTest) {
        let score = self.test_score(kt);
        trace!(key = format_args!("{:#x}", kt.key), score, "tested key");

        // Wrong key
        if score < 0 {
            return;
        }

        if kt.best_score <= 0 || (score < kt.best_score && score > 0) {
            kt.best_score = score;
            kt.best_key = kt.key;
        }
    }

    /// Decode up to seven frames under the candidate key, skipping leading
    /// silence. Returns < 0 for a wrong key, 0 when everything was silent,
    /// and a positive quality total otherwise (closer to 1 is better).
    fn test_score(&mut self, kt: &mut KeyTest) -> i32 {
        let frame_count = self.info().frame_count;

        let mut test_frames = 0;
        let mut current_frame = 0u32;
        let mut blank_frames = 0;
        let mut total_score = 0;

        let mut offset = kt.start_offset;
        if offset == 0 {
            offset = self.info().header_size as u64;
        }

        if self.set_encryption_key(kt.key, kt.subkey).is_err() {
            return -1;
        }

        while test_frames < MAX_TEST_FRAMES && current_frame < frame_count {
            let (reader, frame, hca) = self.frame_buffers();
            if reader.seek(SeekFrom::Start(offset)).is_err() {
                break;
            }
            if reader.read_exact(frame).is_err() {
                break;
            }

            let score = hca.test_block(frame);

            // Remember the first non-blank frame for subsequent candidates
            if kt.start_offset == 0 && score != 0 {
                kt.start_offset = offset;
            }
            offset += frame.len() as u64;

            if score < 0 || score > MAX_FRAME_SCORE {
                total_score = -1;
                break;
            }

            current_frame += 1;

            // Ignore silent frames at the beginning
            if score == 0 && blank_frames < MAX_SKIP_BLANKS {
                blank_frames += 1;
                continue;
            }

            test_frames += 1;

            let scaled = match score {
                1 => 1,
                0 => 3 * SCORE_SCALE,
                other => other * SCORE_SCALE,
            };
            total_score += scaled;

            if total_score > MAX_TOTAL_SCORE {
                break;
            }
        }

        // Enough good frames with the minimum possible score: signal best
        if test_frames > MIN_TEST_FRAMES && total_score > 0 && total_score <= test_frames {
            total_score = 1;
        }

        self.hca_mut().decode_reset();
        total_score
    }
}
