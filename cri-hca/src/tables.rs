//! Quantizer lookup tables.
//!
//! The CRC table and ATH base curve are fixed data; the exponential tables
//! follow the documented codec curves (scale factor step 2^(53/128),
//! resolution ranges 2/(2^n − 1)) and are computed once at first use.

use std::sync::LazyLock;

/// ATH curve position to quantizer resolution.
#[rustfmt::skip]
pub(crate) const INVERT_TABLE: [u8; 66] = [
    15, 14, 14, 14, 14, 14, 14, 13, 13, 13, 13, 13, 13, 12, 12, 12,
    12, 12, 12, 11, 11, 11, 11, 11, 11, 10, 10, 10, 10, 10, 10, 10,
     9,  9,  9,  9,  9,  9,  8,  8,  8,  8,  8,  8,  7,  6,  6,  5,
     4,  4,  4,  3,  3,  3,  2,  2,  2,  2,  1,  1,  1,  1,  1,  1,
     1,  1,
];

/// Worst-case bits per quantized coefficient, by resolution.
pub(crate) const MAX_BIT_TABLE: [u8; 16] = [0, 2, 3, 3, 4, 4, 4, 4, 5, 6, 7, 8, 9, 10, 11, 12];

/// Actual bits consumed per `(resolution << 4) | code` for the prefix
/// codebooks (resolutions 0..=7).
#[rustfmt::skip]
pub(crate) const READ_BIT_TABLE: [u8; 128] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    1, 1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 2, 2, 2, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 3, 3, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 4,
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4,
    3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
    3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
];

/// Quantized coefficient per `(resolution << 4) | code` for the prefix
/// codebooks (resolutions 0..=7).
#[rustfmt::skip]
pub(crate) const READ_VAL_TABLE: [f32; 128] = [
    0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,
    0.0,  0.0,  1.0, -1.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,
    0.0,  0.0,  1.0,  1.0, -1.0, -1.0,  2.0, -2.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,
    0.0,  0.0,  1.0, -1.0,  2.0, -2.0,  3.0, -3.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,  0.0,
    0.0,  0.0,  1.0,  1.0, -1.0, -1.0,  2.0,  2.0, -2.0, -2.0,  3.0,  3.0, -3.0, -3.0,  4.0, -4.0,
    0.0,  0.0,  1.0,  1.0, -1.0, -1.0,  2.0,  2.0, -2.0, -2.0,  3.0, -3.0,  4.0, -4.0,  5.0, -5.0,
    0.0,  0.0,  1.0,  1.0, -1.0, -1.0,  2.0, -2.0,  3.0, -3.0,  4.0, -4.0,  5.0, -5.0,  6.0, -6.0,
    0.0,  0.0,  1.0, -1.0,  2.0, -2.0,  3.0, -3.0,  4.0, -4.0,  5.0, -5.0,  6.0, -6.0,  7.0, -7.0,
];

/// Intensity-stereo left-channel ratio by intensity index; the right channel
/// uses `2 - ratio`.
#[rustfmt::skip]
pub(crate) const INTENSITY_RATIO_TABLE: [f32; 16] = [
    2.0, 13.0 / 7.0, 12.0 / 7.0, 11.0 / 7.0, 10.0 / 7.0, 9.0 / 7.0, 8.0 / 7.0, 1.0,
    6.0 / 7.0, 5.0 / 7.0, 4.0 / 7.0, 3.0 / 7.0, 2.0 / 7.0, 1.0 / 7.0, 0.0, 0.0,
];

/// Resolution dequantization step: 2 / (quantizer levels − 1).
#[rustfmt::skip]
pub(crate) const RANGE_TABLE: [f32; 16] = [
    0.0,
    2.0 / 3.0, 2.0 / 5.0, 2.0 / 7.0, 2.0 / 9.0, 2.0 / 11.0, 2.0 / 13.0, 2.0 / 15.0,
    2.0 / 31.0, 2.0 / 63.0, 2.0 / 127.0, 2.0 / 255.0, 2.0 / 511.0, 2.0 / 1023.0,
    2.0 / 2047.0, 2.0 / 4095.0,
];

/// Scale factor to linear gain: 2^((i − 63) · 53/128).
pub(crate) static SCALING_TABLE: LazyLock<[f32; 64]> = LazyLock::new(|| {
    let mut table = [0.0f32; 64];
    for (i, v) in table.iter_mut().enumerate() {
        *v = 2f64.powf((i as f64 - 63.0) * (53.0 / 128.0)) as f32;
    }
    table
});

/// Ratio between two scale factors, indexed by their difference biased to
/// the table center. The extremes map to 0 to kill runaway copies.
pub(crate) static SCALE_CONVERSION_TABLE: LazyLock<[f32; 128]> = LazyLock::new(|| {
    let mut table = [0.0f32; 128];
    for (i, v) in table.iter_mut().enumerate().take(127).skip(1) {
        *v = 2f64.powf((i as f64 - 64.0) * (53.0 / 128.0)) as f32;
    }
    table
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_codebooks_are_consistent() {
        // Every consumed-bits entry stays within the worst case for its
        // resolution, and zero-valued codes never use the long form.
        for resolution in 0..8usize {
            for code in 0..16usize {
                let bits = READ_BIT_TABLE[(resolution << 4) + code];
                assert!(bits <= MAX_BIT_TABLE[resolution]);
            }
        }
    }

    #[test]
    fn test_scaling_table_is_monotonic() {
        assert!((SCALING_TABLE[63] - 1.0).abs() < 1e-6);
        for pair in SCALING_TABLE.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_scale_conversion_extremes_are_zero() {
        assert_eq!(SCALE_CONVERSION_TABLE[0], 0.0);
        assert_eq!(SCALE_CONVERSION_TABLE[127], 0.0);
        assert!((SCALE_CONVERSION_TABLE[64] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_intensity_ratios_pair_to_two() {
        for i in 0..14 {
            let l = INTENSITY_RATIO_TABLE[i];
            let r = 2.0 - l;
            assert!((l + r - 2.0).abs() < 1e-6);
            assert!(l >= 0.0);
        }
        assert_eq!(INTENSITY_RATIO_TABLE[7], 1.0);
    }
}
