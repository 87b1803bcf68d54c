//! Streaming decoder over a seekable HCA source, with WAV output.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use crate::decoder::{is_hca, Hca, Info};
use crate::{cipher, Error, Result, SAMPLES_PER_FRAME};

/// Largest header any known stream declares.
const MAX_HEADER_SIZE: usize = 0x1000;

/// Decodes frames sequentially from a reader, honoring the encoder delay.
pub struct HcaDecoder<R> {
    reader: R,
    info: Info,
    hca: Hca,
    frame: Vec<u8>,
    samples: Vec<f32>,
    current_block: u32,
    remaining_delay: usize,
}

impl<R: Read + Seek> HcaDecoder<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut probe = [0u8; 8];
        reader.read_exact(&mut probe)?;

        let header_size = is_hca(&probe).ok_or(Error::BadMagic)?;
        if header_size > MAX_HEADER_SIZE {
            return Err(Error::InvalidHeader("oversized header"));
        }

        let mut header = vec![0u8; header_size];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut header)?;

        let mut hca = Hca::new();
        hca.decode_header(&header)?;
        let info = hca.info()?;

        let mut decoder = Self {
            reader,
            frame: vec![0u8; info.frame_size],
            samples: vec![0.0; info.channels * SAMPLES_PER_FRAME],
            info,
            hca,
            current_block: 0,
            remaining_delay: 0,
        };
        decoder.reset();
        Ok(decoder)
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    /// Set the decryption key, folding in the AWB subkey when present.
    pub fn set_encryption_key(&mut self, keycode: u64, subkey: u64) -> Result<()> {
        self.hca.set_key(cipher::effective_key(keycode, subkey))
    }

    /// Rewind to the first frame.
    pub fn reset(&mut self) {
        self.hca.decode_reset();
        self.current_block = 0;
        self.remaining_delay = self.info.encoder_delay as usize;
    }

    /// Position decoding at the loop start (deriving loop values from a
    /// sample position when the header carries none).
    pub fn seek(&mut self, sample: usize) {
        if self.info.loop_start_frame == 0 && self.info.loop_start_delay == 0 {
            let target = sample + self.info.encoder_delay as usize;
            self.info.loop_start_frame = (target / SAMPLES_PER_FRAME) as u32;
            self.info.loop_start_delay =
                (target - self.info.loop_start_frame as usize * SAMPLES_PER_FRAME) as u32;
        }

        self.current_block = self.info.loop_start_frame;
        self.remaining_delay = self.info.loop_start_delay as usize;
    }

    fn read_frame(&mut self) -> Result<bool> {
        if self.current_block >= self.info.frame_count {
            return Ok(false);
        }

        let offset =
            self.info.header_size as u64 + u64::from(self.current_block) * self.frame.len() as u64;
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(&mut self.frame)?;

        self.current_block += 1;
        Ok(true)
    }

    /// Decode the next frame and return its interleaved samples, with any
    /// leading encoder-delay samples discarded. `None` at end of stream.
    pub fn decode_frame(&mut self) -> Result<Option<&[f32]>> {
        if !self.read_frame()? {
            return Ok(None);
        }

        self.hca.decode_block(&mut self.frame)?;
        self.hca.read_samples_f32(&mut self.samples);

        let discard = self.remaining_delay.min(SAMPLES_PER_FRAME);
        self.remaining_delay -= discard;

        Ok(Some(&self.samples[discard * self.info.channels..]))
    }

    /// Decode the whole stream into one interleaved buffer.
    pub fn decode_all(&mut self) -> Result<Vec<f32>> {
        self.reset();

        let total = self.info.frame_count as usize * SAMPLES_PER_FRAME * self.info.channels;
        let mut all = Vec::with_capacity(total);

        while let Some(samples) = self.decode_frame()? {
            all.extend_from_slice(samples);
        }
        Ok(all)
    }

    /// Decode the whole stream as a 16-bit PCM RIFF/WAVE file.
    pub fn decode_to_wav<W: Write>(&mut self, mut w: W) -> Result<()> {
        self.reset();

        let channels = self.info.channels;
        let total_samples = self.info.frame_count as usize * SAMPLES_PER_FRAME;
        let total_pcm_bytes = (total_samples * channels * 2) as u32;

        w.write_all(b"RIFF")?;
        w.write_u32::<LittleEndian>(36 + total_pcm_bytes)?;
        w.write_all(b"WAVE")?;
        w.write_all(b"fmt ")?;
        w.write_u32::<LittleEndian>(16)?;
        w.write_u16::<LittleEndian>(1)?; // PCM
        w.write_u16::<LittleEndian>(channels as u16)?;
        w.write_u32::<LittleEndian>(self.info.sample_rate)?;
        w.write_u32::<LittleEndian>(self.info.sample_rate * channels as u32 * 2)?;
        w.write_u16::<LittleEndian>(channels as u16 * 2)?; // block align
        w.write_u16::<LittleEndian>(16)?; // bits per sample
        w.write_all(b"data")?;
        w.write_u32::<LittleEndian>(total_pcm_bytes)?;

        let mut pcm = vec![0i16; SAMPLES_PER_FRAME * channels];
        let mut bytes = Vec::with_capacity(pcm.len() * 2);

        while self.read_frame()? {
            self.hca.decode_block(&mut self.frame)?;
            self.hca.read_samples_i16(&mut pcm);

            let discard = self.remaining_delay.min(SAMPLES_PER_FRAME);
            self.remaining_delay -= discard;

            bytes.clear();
            for &sample in &pcm[discard * channels..] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            w.write_all(&bytes)?;
        }

        debug!(samples = total_samples, channels, "decoded HCA to WAV");
        Ok(())
    }

    pub(crate) fn hca_mut(&mut self) -> &mut Hca {
        &mut self.hca
    }

    pub(crate) fn frame_buffers(&mut self) -> (&mut R, &mut Vec<u8>, &mut Hca) {
        (&mut self.reader, &mut self.frame, &mut self.hca)
    }
}
