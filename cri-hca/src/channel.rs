//! Per-channel frame state and the unpack/transform steps that operate on it.

use crate::bitreader::BitReader;
use crate::{tables, SAMPLES_PER_SUBFRAME, SUBFRAMES, VERSION_200};

/// Raised when compressed frame data fails validation mid-unpack.
pub(crate) struct UnpackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    Discrete,
    StereoPrimary,
    StereoSecondary,
}

pub(crate) struct ChannelState {
    pub kind: ChannelKind,
    pub coded_count: usize,

    pub intensity: [u8; SUBFRAMES],
    pub scale_factors: [u8; SAMPLES_PER_SUBFRAME],
    pub resolution: [u8; SAMPLES_PER_SUBFRAME],
    /// Noise bands fill from the front, valid bands from the back.
    pub noises: [u8; SAMPLES_PER_SUBFRAME],
    pub noise_count: usize,
    pub valid_count: usize,

    pub gain: [f32; SAMPLES_PER_SUBFRAME],
    pub spectra: [[f32; SAMPLES_PER_SUBFRAME]; SUBFRAMES],
    pub imdct_previous: [f32; SAMPLES_PER_SUBFRAME],
    pub wave: [[f32; SAMPLES_PER_SUBFRAME]; SUBFRAMES],
}

impl ChannelState {
    pub fn new(kind: ChannelKind, coded_count: usize) -> Self {
        Self {
            kind,
            coded_count,
            intensity: [0; SUBFRAMES],
            scale_factors: [0; SAMPLES_PER_SUBFRAME],
            resolution: [0; SAMPLES_PER_SUBFRAME],
            noises: [0; SAMPLES_PER_SUBFRAME],
            noise_count: 0,
            valid_count: 0,
            gain: [0.0; SAMPLES_PER_SUBFRAME],
            spectra: [[0.0; SAMPLES_PER_SUBFRAME]; SUBFRAMES],
            imdct_previous: [0.0; SAMPLES_PER_SUBFRAME],
            wave: [[0.0; SAMPLES_PER_SUBFRAME]; SUBFRAMES],
        }
    }

    /// Unpack step 1: scale factors, either raw 6-bit values or delta-coded
    /// with a full-value escape. v3.0 streams with HFR extend the coded span
    /// and mirror the extra scales into the table tail.
    pub fn unpack_scale_factors(
        &mut self,
        br: &mut BitReader,
        hfr_group_count: usize,
        version: u32,
    ) -> Result<(), UnpackError> {
        let mut cs_count = self.coded_count;
        let delta_bits = br.read(3);

        let extra_count = if self.kind == ChannelKind::StereoSecondary
            || hfr_group_count == 0
            || version <= VERSION_200
        {
            0
        } else {
            cs_count += hfr_group_count;
            if cs_count > SAMPLES_PER_SUBFRAME {
                return Err(UnpackError);
            }
            hfr_group_count
        };

        if delta_bits >= 6 {
            for i in 0..cs_count {
                self.scale_factors[i] = br.read(6) as u8;
            }
        } else if delta_bits > 0 {
            let expected_delta = ((1u32 << delta_bits) - 1) as u8;
            let mut value = br.read(6) as u8;

            self.scale_factors[0] = value;
            for i in 1..cs_count {
                let delta = br.read(delta_bits as i32) as u8;

                if delta == expected_delta {
                    value = br.read(6) as u8;
                } else {
                    let test =
                        i32::from(value) + (i32::from(delta) - i32::from(expected_delta >> 1));
                    if !(0..64).contains(&test) {
                        return Err(UnpackError);
                    }
                    value = value
                        .wrapping_sub(expected_delta >> 1)
                        .wrapping_add(delta)
                        & 0x3F;
                }
                self.scale_factors[i] = value;
            }
        } else {
            self.scale_factors = [0; SAMPLES_PER_SUBFRAME];
        }

        for i in 0..extra_count {
            let mirrored = self.scale_factors.get(cs_count - i).copied().unwrap_or(0);
            self.scale_factors[SAMPLES_PER_SUBFRAME - 1 - i] = mirrored;
        }

        Ok(())
    }

    /// Unpack step 2: intensity-stereo indices on secondary channels, HFR
    /// scales on everything else (v ≤ 2.0 carries them here; v3.0 already
    /// read them with the scale factors).
    pub fn unpack_intensity(
        &mut self,
        br: &mut BitReader,
        hfr_group_count: usize,
        version: u32,
    ) -> Result<(), UnpackError> {
        if self.kind != ChannelKind::StereoSecondary {
            if version <= VERSION_200 {
                let start = SAMPLES_PER_SUBFRAME - hfr_group_count;
                for i in 0..hfr_group_count {
                    self.scale_factors[start + i] = br.read(6) as u8;
                }
            }
            return Ok(());
        }

        if version <= VERSION_200 {
            let value = br.peek(4) as u8;

            self.intensity[0] = value;
            if value < 15 {
                br.skip(4);
                for i in 1..SUBFRAMES {
                    self.intensity[i] = br.read(4) as u8;
                }
            }
            return Ok(());
        }

        let value = br.peek(4) as u8;
        if value >= 15 {
            br.skip(4);
            self.intensity = [7; SUBFRAMES];
            return Ok(());
        }

        br.skip(4);
        let delta_bits = br.read(2);

        self.intensity[0] = value;
        if delta_bits == 3 {
            // Fixed intensities
            for i in 1..SUBFRAMES {
                self.intensity[i] = br.read(4) as u8;
            }
        } else {
            // Delta intensities
            let bmax = ((2u32 << delta_bits) - 1) as u8;
            let bits = delta_bits as i32 + 1;
            let mut value = value;

            for i in 1..SUBFRAMES {
                let delta = br.read(bits) as u8;
                if delta == bmax {
                    value = br.read(4) as u8;
                } else {
                    value = value.wrapping_sub(bmax >> 1).wrapping_add(delta);
                    if value > 15 {
                        return Err(UnpackError);
                    }
                }
                self.intensity[i] = value;
            }
        }

        Ok(())
    }

    /// Unpack step 3: per-band quantizer resolution from the ATH curve and
    /// the frame noise level. Bands that quantize below resolution 1 join
    /// the noise list; usable bands stack from the back of the same table.
    pub fn calculate_resolution(
        &mut self,
        packed_noise_level: i32,
        ath: &[u8; SAMPLES_PER_SUBFRAME],
        min_resolution: u32,
        max_resolution: u32,
    ) {
        let cr_count = self.coded_count;
        let mut noise_count = 0;
        let mut valid_count = 0;

        for i in 0..cr_count {
            let mut new_resolution = 0u8;
            let scale_factor = self.scale_factors[i];

            if scale_factor > 0 {
                let noise_level = i32::from(ath[i]) + ((packed_noise_level + i as i32) >> 8);
                let curve_position = noise_level + 1 - ((5 * i32::from(scale_factor)) >> 1);

                new_resolution = if curve_position < 0 {
                    15
                } else if curve_position <= 65 {
                    tables::INVERT_TABLE[curve_position as usize]
                } else {
                    0
                };
                new_resolution = new_resolution.clamp(min_resolution as u8, max_resolution as u8);

                if new_resolution < 1 {
                    self.noises[noise_count] = i as u8;
                    noise_count += 1;
                } else {
                    self.noises[SAMPLES_PER_SUBFRAME - 1 - valid_count] = i as u8;
                    valid_count += 1;
                }
            }
            self.resolution[i] = new_resolution;
        }

        self.noise_count = noise_count;
        self.valid_count = valid_count;
        self.resolution[cr_count..].fill(0);
    }

    /// Unpack step 4: linear gain per band.
    pub fn calculate_gain(&mut self) {
        for i in 0..self.coded_count {
            let scale = tables::SCALING_TABLE[usize::from(self.scale_factors[i])];
            let range = tables::RANGE_TABLE[usize::from(self.resolution[i])];
            self.gain[i] = scale * range;
        }
    }

    /// Unpack step 5: quantized coefficients for one subframe. High
    /// resolutions are sign-magnitude (a zero gives its trailing bit back);
    /// low resolutions use the prefix codebooks.
    pub fn dequantize_coefficients(&mut self, br: &mut BitReader, subframe: usize) {
        let cc_count = self.coded_count;

        for i in 0..cc_count {
            let resolution = self.resolution[i];
            let bits = i32::from(tables::MAX_BIT_TABLE[usize::from(resolution)]);
            let code = br.read(bits);

            let qc: f32;
            if resolution > 7 {
                let signed_code = (1 - ((code & 1) << 1) as i32) * (code >> 1) as i32;
                if signed_code == 0 {
                    br.skip(-1);
                }
                qc = signed_code as f32;
            } else {
                let index = (usize::from(resolution) << 4) + code as usize;
                br.skip(i32::from(tables::READ_BIT_TABLE[index]) - bits);
                qc = tables::READ_VAL_TABLE[index];
            }

            self.spectra[subframe][i] = self.gain[i] * qc;
        }

        self.spectra[subframe][cc_count..].fill(0.0);
    }

    /// Transform step 1: fill silent bands with scaled copies of randomly
    /// chosen valid bands.
    pub fn reconstruct_noise(
        &mut self,
        min_resolution: u32,
        ms_stereo: u32,
        random: &mut u32,
        subframe: usize,
    ) {
        if min_resolution > 0 {
            return;
        }
        if self.valid_count == 0 || self.noise_count == 0 {
            return;
        }
        if !(ms_stereo == 0 || self.kind == ChannelKind::StereoPrimary) {
            return;
        }

        let mut r = *random;

        for i in 0..self.noise_count {
            r = r.wrapping_mul(0x343FD).wrapping_add(0x269EC3);

            let random_index = SAMPLES_PER_SUBFRAME - self.valid_count
                + (((r as usize & 0x7FFF) * self.valid_count) >> 15);

            let noise_index = usize::from(self.noises[i]);
            let valid_index = usize::from(self.noises[random_index]);

            let sc_index = (i32::from(self.scale_factors[noise_index])
                - i32::from(self.scale_factors[valid_index])
                + 62)
                .max(0) as usize;

            self.spectra[subframe][noise_index] =
                tables::SCALE_CONVERSION_TABLE[sc_index] * self.spectra[subframe][valid_index];
        }

        *random = r;
    }

    /// Transform step 2: restore the high bands from scaled copies of the
    /// bands just below the coded range.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct_high_frequency(
        &mut self,
        hfr_group_count: usize,
        bands_per_hfr_group: usize,
        stereo_band_count: usize,
        base_band_count: usize,
        total_band_count: usize,
        version: u32,
        subframe: usize,
    ) {
        if bands_per_hfr_group == 0 {
            return;
        }
        if self.kind == ChannelKind::StereoSecondary {
            return;
        }

        let group_limit = if version <= VERSION_200 {
            hfr_group_count
        } else {
            (hfr_group_count + 1) >> 1
        };

        let start_band = stereo_band_count + base_band_count;
        let mut highband = start_band;
        let mut lowband = start_band as isize - 1;
        let hfr_start = SAMPLES_PER_SUBFRAME - hfr_group_count;

        for group in 0..hfr_group_count {
            let lowband_sub: isize = if group < group_limit { 1 } else { 0 };

            for _ in 0..bands_per_hfr_group {
                if highband >= total_band_count || lowband < 0 {
                    break;
                }

                let sc_index = (i32::from(self.scale_factors[hfr_start + group])
                    - i32::from(self.scale_factors[lowband as usize])
                    + 63)
                    .max(0) as usize;

                self.spectra[subframe][highband] =
                    tables::SCALE_CONVERSION_TABLE[sc_index] * self.spectra[subframe][lowband as usize];

                highband += 1;
                lowband -= lowband_sub;
            }
        }

        if let Some(last) = highband.checked_sub(1) {
            self.spectra[subframe][last] = 0.0;
        }
    }

    /// Transform step 4: 128-point IMDCT with overlap-add into the output
    /// wave for one subframe.
    pub fn imdct(&mut self, subframe: usize) {
        crate::imdct::transform(
            &self.spectra[subframe],
            &mut self.imdct_previous,
            &mut self.wave[subframe],
        );
    }
}

/// Transform step 3a: spread a primary channel's stereo bands across the
/// pair using the secondary channel's intensity index.
pub(crate) fn apply_intensity_stereo(
    primary: &mut ChannelState,
    secondary: &mut ChannelState,
    subframe: usize,
    base_band_count: usize,
    total_band_count: usize,
) {
    if primary.kind != ChannelKind::StereoPrimary {
        return;
    }

    let ratio_l = tables::INTENSITY_RATIO_TABLE[usize::from(secondary.intensity[subframe])];
    let ratio_r = 2.0 - ratio_l;

    for band in base_band_count..total_band_count {
        let coef = primary.spectra[subframe][band];
        primary.spectra[subframe][band] = coef * ratio_l;
        secondary.spectra[subframe][band] = coef * ratio_r;
    }
}

/// Transform step 3b: mid/side decode. Header parsing currently rejects
/// MS-stereo streams; this path exists for forward compatibility.
pub(crate) fn apply_ms_stereo(
    primary: &mut ChannelState,
    secondary: &mut ChannelState,
    ms_stereo: u32,
    subframe: usize,
    base_band_count: usize,
    total_band_count: usize,
) {
    if ms_stereo == 0 {
        return;
    }
    if primary.kind != ChannelKind::StereoPrimary {
        return;
    }

    const RATIO: f32 = 0.70710676908493;

    for band in base_band_count..total_band_count {
        let l = primary.spectra[subframe][band];
        let r = secondary.spectra[subframe][band];
        primary.spectra[subframe][band] = (l + r) * RATIO;
        secondary.spectra[subframe][band] = (l - r) * RATIO;
    }
}
