//! HCA header parsing and frame decoding.

use tracing::debug;

use crate::bitreader::BitReader;
use crate::channel::{apply_intensity_stereo, apply_ms_stereo, ChannelKind, ChannelState};
use crate::{
    ath, cipher, crc, Error, Result, DEFAULT_RANDOM, MAX_CHANNELS, MAX_FRAME_SIZE,
    MAX_SAMPLE_RATE, MIN_CHANNELS, MIN_FRAME_SIZE, MIN_SAMPLE_RATE, SAMPLES_PER_FRAME,
    SAMPLES_PER_SUBFRAME, SIGNATURE_MASK, SUBFRAMES, VERSION_101, VERSION_102, VERSION_103,
    VERSION_200, VERSION_300,
};

/// Internal frame status codes, kept numeric so the key oracle can reason
/// about failure classes the way the reference does.
pub(crate) const RESULT_OK: i32 = 0;
pub(crate) const ERROR_PARAMS: i32 = -1;
pub(crate) const ERROR_CHECKSUM: i32 = -3;
pub(crate) const ERROR_SYNC: i32 = -4;
pub(crate) const ERROR_UNPACK: i32 = -5;
pub(crate) const ERROR_BITREADER: i32 = -6;

/// Probe a buffer for the masked `HCA\0` signature.
///
/// Returns the declared header size on success.
pub fn is_hca(data: &[u8]) -> Option<usize> {
    if data.len() < 8 {
        return None;
    }
    let br = BitReader::new(data);
    if br.peek(32) & SIGNATURE_MASK != 0x4843_4100 {
        return None;
    }
    let header_size = u16::from_be_bytes([data[6], data[7]]);
    if header_size == 0 {
        return None;
    }
    Some(usize::from(header_size))
}

/// Stream facts parsed from a header.
#[derive(Debug, Clone)]
pub struct Info {
    pub version: u32,
    pub header_size: usize,
    pub sample_rate: u32,
    pub channels: usize,
    pub frame_size: usize,
    pub frame_count: u32,
    pub encoder_delay: u32,
    pub encoder_padding: u32,
    pub loop_enabled: bool,
    pub loop_start_frame: u32,
    pub loop_end_frame: u32,
    pub loop_start_delay: u32,
    pub loop_end_padding: u32,
    pub samples_per_frame: usize,
    pub comment: String,
    pub encrypted: bool,
}

/// Low-level HCA decoder state: header configuration plus per-channel
/// scratch. Frame decoding mutates the frame buffer in place (frames
/// decipher under the byte-substitution table before bit parsing).
pub struct Hca {
    valid: bool,

    version: u32,
    header_size: usize,
    channels: usize,
    sample_rate: u32,
    frame_count: u32,
    encoder_delay: u32,
    encoder_padding: u32,
    frame_size: usize,
    min_resolution: u32,
    max_resolution: u32,
    track_count: u32,
    channel_config: u32,
    stereo_type: u32,
    total_band_count: usize,
    base_band_count: usize,
    stereo_band_count: usize,
    bands_per_hfr_group: usize,
    ms_stereo: u32,

    vbr_max_frame_size: u32,
    #[allow(dead_code)]
    vbr_noise_level: u32,
    ath_type: u32,

    loop_start_frame: u32,
    loop_end_frame: u32,
    loop_start_delay: u32,
    loop_end_padding: u32,
    loop_flag: bool,

    ciph_type: u32,
    keycode: u64,
    #[allow(dead_code)]
    rva_volume: f32,
    comment: Vec<u8>,

    hfr_group_count: usize,
    ath_curve: [u8; SAMPLES_PER_SUBFRAME],
    cipher_table: [u8; 256],
    random: u32,
    channel: Vec<ChannelState>,
}

impl Default for Hca {
    fn default() -> Self {
        Self::new()
    }
}

impl Hca {
    pub fn new() -> Self {
        Self {
            valid: false,
            version: 0,
            header_size: 0,
            channels: 0,
            sample_rate: 0,
            frame_count: 0,
            encoder_delay: 0,
            encoder_padding: 0,
            frame_size: 0,
            min_resolution: 0,
            max_resolution: 0,
            track_count: 0,
            channel_config: 0,
            stereo_type: 0,
            total_band_count: 0,
            base_band_count: 0,
            stereo_band_count: 0,
            bands_per_hfr_group: 0,
            ms_stereo: 0,
            vbr_max_frame_size: 0,
            vbr_noise_level: 0,
            ath_type: 0,
            loop_start_frame: 0,
            loop_end_frame: 0,
            loop_start_delay: 0,
            loop_end_padding: 0,
            loop_flag: false,
            ciph_type: 0,
            keycode: 0,
            rva_volume: 1.0,
            comment: Vec::new(),
            hfr_group_count: 0,
            ath_curve: [0; SAMPLES_PER_SUBFRAME],
            cipher_table: [0; 256],
            random: DEFAULT_RANDOM,
            channel: Vec::new(),
        }
    }

    /// Set the effective frame key; rebuilds the cipher table when a header
    /// has already been parsed.
    pub fn set_key(&mut self, keycode: u64) -> Result<()> {
        self.keycode = keycode;
        if self.valid {
            cipher::init(&mut self.cipher_table, self.ciph_type, self.keycode)?;
        }
        Ok(())
    }

    pub fn info(&self) -> Result<Info> {
        if !self.valid {
            return Err(Error::NotInitialized);
        }
        Ok(Info {
            version: self.version,
            header_size: self.header_size,
            sample_rate: self.sample_rate,
            channels: self.channels,
            frame_size: self.frame_size,
            frame_count: self.frame_count,
            encoder_delay: self.encoder_delay,
            encoder_padding: self.encoder_padding,
            loop_enabled: self.loop_flag,
            loop_start_frame: self.loop_start_frame,
            loop_end_frame: self.loop_end_frame,
            loop_start_delay: self.loop_start_delay,
            loop_end_padding: self.loop_end_padding,
            samples_per_frame: SAMPLES_PER_FRAME,
            comment: String::from_utf8_lossy(&self.comment).into_owned(),
            encrypted: self.ciph_type == 56,
        })
    }

    /// Reset decode state between files: RNG seed and IMDCT overlap.
    pub fn decode_reset(&mut self) {
        if !self.valid {
            return;
        }
        self.random = DEFAULT_RANDOM;
        for ch in &mut self.channel {
            ch.imdct_previous = [0.0; SAMPLES_PER_SUBFRAME];
        }
    }

    /// Parse and validate a complete header.
    pub fn decode_header(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 8 {
            return Err(Error::Truncated);
        }

        self.valid = false;

        let mut br = BitReader::new(data);

        if br.peek(32) & SIGNATURE_MASK != 0x4843_4100 {
            return Err(Error::BadMagic);
        }
        br.skip(32);
        self.version = br.read(16);
        self.header_size = br.read(16) as usize;

        match self.version {
            VERSION_101 | VERSION_102 | VERSION_103 | VERSION_200 | VERSION_300 => {}
            other => return Err(Error::UnsupportedVersion(other)),
        }

        if data.len() < self.header_size {
            return Err(Error::Truncated);
        }
        if crc::checksum(&data[..self.header_size]) != 0 {
            return Err(Error::ChecksumMismatch);
        }

        let mut size = data.len() - 0x08;

        // fmt chunk (mandatory)
        if size >= 0x10 && br.peek(32) & SIGNATURE_MASK == 0x666D_7400 {
            br.skip(32);
            self.channels = br.read(8) as usize;
            self.sample_rate = br.read(24);
            self.frame_count = br.read(32);
            self.encoder_delay = br.read(16);
            self.encoder_padding = br.read(16);

            if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&self.channels) {
                return Err(Error::InvalidHeader("channel count"));
            }
            if self.frame_count == 0 {
                return Err(Error::InvalidHeader("frame count"));
            }
            if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
                return Err(Error::InvalidHeader("sample rate"));
            }

            size -= 0x10;
        } else {
            return Err(Error::InvalidHeader("missing fmt chunk"));
        }

        // comp chunk, or legacy dec chunk
        if size >= 0x10 && br.peek(32) & SIGNATURE_MASK == 0x636F_6D70 {
            br.skip(32);
            self.frame_size = br.read(16) as usize;
            self.min_resolution = br.read(8);
            self.max_resolution = br.read(8);
            self.track_count = br.read(8);
            self.channel_config = br.read(8);
            self.total_band_count = br.read(8) as usize;
            self.base_band_count = br.read(8) as usize;
            self.stereo_band_count = br.read(8) as usize;
            self.bands_per_hfr_group = br.read(8) as usize;
            self.ms_stereo = br.read(8);
            let _reserved = br.read(8);

            size -= 0x10;
        } else if size >= 0x0C && br.peek(32) & SIGNATURE_MASK == 0x6465_6300 {
            br.skip(32);
            self.frame_size = br.read(16) as usize;
            self.min_resolution = br.read(8);
            self.max_resolution = br.read(8);
            self.total_band_count = br.read(8) as usize + 1;
            self.base_band_count = br.read(8) as usize + 1;
            self.track_count = br.read(4);
            self.channel_config = br.read(4);
            self.stereo_type = br.read(8);

            if self.stereo_type == 0 {
                self.base_band_count = self.total_band_count;
            }
            self.stereo_band_count = self.total_band_count - self.base_band_count;
            self.bands_per_hfr_group = 0;

            size -= 0x0C;
        } else {
            return Err(Error::InvalidHeader("missing comp/dec chunk"));
        }

        // vbr chunk (optional)
        if size >= 0x08 && br.peek(32) & SIGNATURE_MASK == 0x7662_7200 {
            br.skip(32);
            self.vbr_max_frame_size = br.read(16);
            self.vbr_noise_level = br.read(16);

            if !(self.frame_size == 0
                && self.vbr_max_frame_size > 8
                && self.vbr_max_frame_size <= 0x1FF)
            {
                return Err(Error::InvalidHeader("vbr settings"));
            }

            size -= 0x08;
        } else {
            self.vbr_max_frame_size = 0;
            self.vbr_noise_level = 0;
        }

        // ath chunk (optional)
        if size >= 0x06 && br.peek(32) & SIGNATURE_MASK == 0x6174_6800 {
            br.skip(32);
            self.ath_type = br.read(16);
        } else {
            self.ath_type = if self.version < VERSION_200 { 1 } else { 0 };
        }

        // loop chunk (optional)
        if size >= 0x10 && br.peek(32) & SIGNATURE_MASK == 0x6C6F_6F70 {
            br.skip(32);
            self.loop_start_frame = br.read(32);
            self.loop_end_frame = br.read(32);
            self.loop_start_delay = br.read(16);
            self.loop_end_padding = br.read(16);
            self.loop_flag = true;

            if !(self.loop_start_frame <= self.loop_end_frame
                && self.loop_end_frame < self.frame_count)
            {
                return Err(Error::InvalidHeader("loop points"));
            }

            size -= 0x10;
        } else {
            self.loop_flag = false;
        }

        // ciph chunk (optional)
        if size >= 0x06 && br.peek(32) & SIGNATURE_MASK == 0x6369_7068 {
            br.skip(32);
            self.ciph_type = br.read(16);

            if !(self.ciph_type == 0 || self.ciph_type == 1 || self.ciph_type == 56) {
                return Err(Error::Unsupported("cipher type"));
            }

            size -= 0x06;
        } else {
            self.ciph_type = 0;
        }

        // rva chunk (optional)
        if size >= 0x08 && br.peek(32) & SIGNATURE_MASK == 0x7276_6100 {
            br.skip(32);
            self.rva_volume = f32::from_bits(br.read(32));

            size -= 0x08;
        } else {
            self.rva_volume = 1.0;
        }

        // comm chunk (optional)
        if size >= 0x05 && br.peek(32) & SIGNATURE_MASK == 0x636F_6D6D {
            br.skip(32);
            let comment_len = br.read(8) as usize;

            if comment_len > size {
                return Err(Error::InvalidHeader("comment length"));
            }
            self.comment = (0..comment_len).map(|_| br.read(8) as u8).collect();
        } else {
            self.comment.clear();
        }

        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&self.frame_size) {
            return Err(Error::InvalidHeader("frame size"));
        }

        if self.version <= VERSION_200 {
            if self.min_resolution != 1 || self.max_resolution != 15 {
                return Err(Error::InvalidHeader("resolution for version"));
            }
        } else if self.min_resolution > self.max_resolution || self.max_resolution > 15 {
            return Err(Error::InvalidHeader("resolution range"));
        }

        if self.track_count == 0 {
            self.track_count = 1;
        }
        if self.track_count as usize > self.channels {
            return Err(Error::InvalidHeader("track count exceeds channels"));
        }

        if self.total_band_count > SAMPLES_PER_SUBFRAME
            || self.base_band_count > SAMPLES_PER_SUBFRAME
            || self.stereo_band_count > SAMPLES_PER_SUBFRAME
            || self.base_band_count + self.stereo_band_count > SAMPLES_PER_SUBFRAME
            || self.bands_per_hfr_group > SAMPLES_PER_SUBFRAME
        {
            return Err(Error::InvalidHeader("band configuration"));
        }

        self.hfr_group_count = ceil_div(
            self.total_band_count
                .saturating_sub(self.base_band_count)
                .saturating_sub(self.stereo_band_count),
            self.bands_per_hfr_group,
        );

        ath::init(&mut self.ath_curve, self.ath_type, self.sample_rate)?;
        cipher::init(&mut self.cipher_table, self.ciph_type, self.keycode)?;
        self.init_channels();
        self.random = DEFAULT_RANDOM;

        if self.ms_stereo != 0 {
            return Err(Error::Unsupported("MS stereo"));
        }

        debug!(
            version = format_args!("{:#06x}", self.version),
            channels = self.channels,
            sample_rate = self.sample_rate,
            frame_size = self.frame_size,
            frames = self.frame_count,
            cipher = self.ciph_type,
            "parsed HCA header"
        );

        self.valid = true;
        Ok(())
    }

    /// Assign stereo pair roles per track from the channel layout table.
    fn init_channels(&mut self) {
        let mut kinds = [ChannelKind::Discrete; MAX_CHANNELS];
        let channels_per_track = self.channels / self.track_count as usize;

        if self.stereo_band_count > 0 && channels_per_track > 1 {
            for track in 0..self.track_count as usize {
                let ct = &mut kinds[track * channels_per_track..];

                use ChannelKind::{Discrete, StereoPrimary, StereoSecondary};
                match channels_per_track {
                    2 | 3 => {
                        ct[0] = StereoPrimary;
                        ct[1] = StereoSecondary;
                    }
                    4 => {
                        ct[0] = StereoPrimary;
                        ct[1] = StereoSecondary;
                        if self.channel_config == 0 {
                            ct[2] = StereoPrimary;
                            ct[3] = StereoSecondary;
                        }
                    }
                    5 => {
                        ct[0] = StereoPrimary;
                        ct[1] = StereoSecondary;
                        ct[2] = Discrete;
                        if self.channel_config <= 2 {
                            ct[3] = StereoPrimary;
                            ct[4] = StereoSecondary;
                        }
                    }
                    6 | 7 => {
                        ct[0] = StereoPrimary;
                        ct[1] = StereoSecondary;
                        ct[4] = StereoPrimary;
                        ct[5] = StereoSecondary;
                    }
                    8 => {
                        ct[0] = StereoPrimary;
                        ct[1] = StereoSecondary;
                        ct[4] = StereoPrimary;
                        ct[5] = StereoSecondary;
                        ct[6] = StereoPrimary;
                        ct[7] = StereoSecondary;
                    }
                    _ => {}
                }
            }
        }

        self.channel = (0..self.channels)
            .map(|i| {
                let coded_count = if kinds[i] == ChannelKind::StereoSecondary {
                    self.base_band_count
                } else {
                    self.base_band_count + self.stereo_band_count
                };
                ChannelState::new(kinds[i], coded_count)
            })
            .collect();
    }

    /// Decode one frame. The buffer is deciphered in place; sync and CRC are
    /// validated against the raw bytes first.
    pub fn decode_block(&mut self, data: &mut [u8]) -> Result<()> {
        match self.unpack_frame(data) {
            status if status < 0 => Err(match status {
                ERROR_SYNC => Error::BadSync,
                ERROR_CHECKSUM => Error::ChecksumMismatch,
                ERROR_PARAMS => Error::NotInitialized,
                _ => Error::UnpackFailed,
            }),
            _ => {
                self.transform_frame();
                Ok(())
            }
        }
    }

    /// Unpack a raw frame; returns the final bit position, or a negative
    /// status code.
    fn unpack_frame(&mut self, data: &mut [u8]) -> i32 {
        if !self.valid {
            return ERROR_PARAMS;
        }
        if data.len() < self.frame_size {
            return ERROR_PARAMS;
        }
        let frame_size = self.frame_size;

        if u16::from_be_bytes([data[0], data[1]]) != 0xFFFF {
            return ERROR_SYNC;
        }
        if crc::checksum(&data[..frame_size]) != 0 {
            return ERROR_CHECKSUM;
        }

        cipher::decrypt(&self.cipher_table, &mut data[..frame_size]);

        let mut br = BitReader::new(&data[..frame_size]);
        br.skip(16);

        let acceptable_noise_level = br.read(9) as i32;
        let evaluation_boundary = br.read(7) as i32;
        let packed_noise_level = (acceptable_noise_level << 8) - evaluation_boundary;

        for ch in &mut self.channel {
            if ch
                .unpack_scale_factors(&mut br, self.hfr_group_count, self.version)
                .is_err()
            {
                return ERROR_UNPACK;
            }

            // Intensity unpack failures are swallowed, matching the
            // reference decoder.
            let _ = ch.unpack_intensity(&mut br, self.hfr_group_count, self.version);

            ch.calculate_resolution(
                packed_noise_level,
                &self.ath_curve,
                self.min_resolution,
                self.max_resolution,
            );
            ch.calculate_gain();
        }

        for subframe in 0..SUBFRAMES {
            for ch in &mut self.channel {
                ch.dequantize_coefficients(&mut br, subframe);
            }
        }

        br.position()
    }

    fn transform_frame(&mut self) {
        let mut random = self.random;

        for subframe in 0..SUBFRAMES {
            // Restore missing bands
            for ch in &mut self.channel {
                ch.reconstruct_noise(self.min_resolution, self.ms_stereo, &mut random, subframe);
                ch.reconstruct_high_frequency(
                    self.hfr_group_count,
                    self.bands_per_hfr_group,
                    self.stereo_band_count,
                    self.base_band_count,
                    self.total_band_count,
                    self.version,
                    subframe,
                );
            }

            // Restore joint stereo bands
            if self.stereo_band_count > 0 {
                for ch in 0..self.channels - 1 {
                    let (head, tail) = self.channel.split_at_mut(ch + 1);
                    let primary = &mut head[ch];
                    let secondary = &mut tail[0];

                    apply_intensity_stereo(
                        primary,
                        secondary,
                        subframe,
                        self.base_band_count,
                        self.total_band_count,
                    );
                    apply_ms_stereo(
                        primary,
                        secondary,
                        self.ms_stereo,
                        subframe,
                        self.base_band_count,
                        self.total_band_count,
                    );
                }
            }

            for ch in &mut self.channel {
                ch.imdct(subframe);
            }
        }

        self.random = random;
    }

    /// Score one raw frame for key testing: 0 silent, negative wrong,
    /// positive suspicious-to-fine (lower is better).
    pub fn test_block(&mut self, data: &mut [u8]) -> i32 {
        if is_empty_block(data) {
            return 0;
        }

        let status = self.unpack_frame(data);
        if status < 0 {
            return -1;
        }

        let check = validate_bit_position(data, status, self.frame_size);
        if check != 0 {
            return check;
        }

        self.transform_frame();
        self.evaluate_decode_quality()
    }

    fn evaluate_decode_quality(&self) -> i32 {
        const SCALE: f32 = 32768.0;

        let mut clips = 0;
        let mut blanks = 0;
        let mut channel_blanks = [0i32; MAX_CHANNELS];

        for (ch_index, ch) in self.channel.iter().enumerate() {
            for subframe in &ch.wave {
                for &sample in subframe.iter() {
                    if !(-1.0..=1.0).contains(&sample) {
                        clips += 1;
                    } else {
                        let quantized = (sample * SCALE) as i32;
                        if quantized == 0 || quantized == -1 {
                            blanks += 1;
                            channel_blanks[ch_index] += 1;
                        }
                    }
                }
            }
        }

        calculate_score(clips, blanks, &channel_blanks, self.channels)
    }

    /// Interleave all subframes as floats: `buf[s * channels + ch]`.
    pub fn read_samples_f32(&self, buf: &mut [f32]) {
        let mut index = 0;
        for subframe in 0..SUBFRAMES {
            for sample in 0..SAMPLES_PER_SUBFRAME {
                for ch in &self.channel {
                    buf[index] = ch.wave[subframe][sample];
                    index += 1;
                }
            }
        }
    }

    /// Interleave all subframes as PCM16 with clipping.
    pub fn read_samples_i16(&self, buf: &mut [i16]) {
        const SCALE: f32 = 32768.0;

        let mut index = 0;
        for subframe in 0..SUBFRAMES {
            for sample in 0..SAMPLES_PER_SUBFRAME {
                for ch in &self.channel {
                    let v = (ch.wave[subframe][sample] * SCALE) as i32;
                    buf[index] = v.clamp(-32768, 32767) as i16;
                    index += 1;
                }
            }
        }
    }

}

fn ceil_div(a: usize, b: usize) -> usize {
    if b < 1 {
        return 0;
    }
    a.div_ceil(b)
}

/// A frame whose interior (between sync and CRC) is all zero decodes to
/// silence; the oracle shortcuts it without touching the cipher.
fn is_empty_block(data: &[u8]) -> bool {
    data[0x02..data.len() - 0x02].iter().all(|&b| b == 0)
}

/// Wrong keys tend to leave the bit cursor past the frame, or nonzero bytes
/// after the consumed span.
fn validate_bit_position(data: &[u8], status: i32, frame_size: usize) -> i32 {
    let bits_max = frame_size as i32 * 8;
    if status + 14 > bits_max {
        return ERROR_BITREADER;
    }

    let byte_start = (status as usize).div_ceil(8);
    let end = frame_size - 0x02;
    if byte_start < end && data[byte_start..end].iter().any(|&b| b != 0) {
        return -1;
    }

    RESULT_OK
}

fn calculate_score(mut clips: i32, blanks: i32, channel_blanks: &[i32], channels: usize) -> i32 {
    let frame_samples = SAMPLES_PER_FRAME as i32;

    if clips == 1 {
        clips += 1;
    }
    if clips > 1 {
        return clips;
    }

    if blanks == channels as i32 * frame_samples {
        return 0;
    }

    if channels >= 2 && channel_blanks[0] == frame_samples && channel_blanks[1] != frame_samples {
        return 3;
    }

    1
}
