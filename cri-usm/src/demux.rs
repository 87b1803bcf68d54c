//! Chunk walking and stream splitting.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use cri_utf::{Reader, UtfTable, UTF_MAGIC};
use encoding_rs::SHIFT_JIS;
use tracing::{debug, trace};

use crate::mask::{derive_masks, mask_audio, mask_video, Masks};
use crate::{
    Error, Result, CHUNK_AUDIO, CHUNK_CRID, CHUNK_VIDEO, CONTENTS_END, HEADER_END, METADATA_END,
};

/// Fixed preamble-to-payload distance used by every known producer.
struct Chunk {
    start: u64,
    magic: u32,
    size: u32,
    header_size: u16,
    footer_size: u16,
    /// Low 2 bits of the flags byte; 0 marks stream data
    data_type: u8,
}

impl Chunk {
    fn read<R: Read + Seek>(r: &mut Reader<R>) -> Result<Self> {
        let start = r.position()?;
        let magic = r.read_u32()?;
        let size = r.read_u32()?;
        let header_size = r.read_u16()?;
        let footer_size = r.read_u16()?;
        let _reserved = r.read_bytes(3)?;
        let flags = r.read_u8()?;

        Ok(Self {
            start,
            magic,
            size,
            header_size,
            footer_size,
            data_type: flags & 0b11,
        })
    }

    fn payload_offset(&self) -> u64 {
        self.start + 8 + u64::from(self.header_size)
    }

    fn payload_len(&self) -> Result<usize> {
        (self.size as usize)
            .checked_sub(usize::from(self.header_size) + usize::from(self.footer_size))
            .ok_or(Error::TruncatedChunk(self.start))
    }

    fn next_offset(&self) -> u64 {
        self.start + 8 + u64::from(self.size)
    }

    fn read_payload<R: Read + Seek>(&self, r: &mut Reader<R>) -> Result<Vec<u8>> {
        let len = self.payload_len()?;
        Ok(r.read_bytes_at(len, self.payload_offset())?)
    }
}

/// Split a USM stream into its elementary video (`.m2v`) and audio (`.adx`)
/// streams under `target_dir`.
///
/// The output base name comes from the CRID index (last row's `filename`,
/// Shift-JIS) and falls back to `fallback_name`. When `key` is given, video
/// and audio payload masks are removed. Returns the written paths, video
/// first.
pub fn demux<R: Read + Seek>(
    input: R,
    target_dir: &Path,
    fallback_name: &str,
    key: Option<u64>,
) -> Result<Vec<PathBuf>> {
    let mut r = Reader::new(input);
    let masks: Option<Masks> = key.map(derive_masks);

    // Index chunk: fallback output name
    let crid = Chunk::read(&mut r)?;
    if crid.magic != CHUNK_CRID {
        return Err(Error::BadMagic(crid.magic));
    }
    let index = UtfTable::parse(&crid.read_payload(&mut r)?)?;
    let filename = index
        .rows
        .last()
        .and_then(|row| row.get("filename"))
        .and_then(|value| value.as_str_bytes())
        .map(|raw| SHIFT_JIS.decode(raw).0.into_owned())
        .unwrap_or_else(|| fallback_name.to_string());

    let base = strip_extension(&filename);
    debug!(base, "demuxing USM stream");

    // Header phase: note audio presence, stop after the metadata terminator.
    let mut has_audio = false;
    let mut offset = crid.next_offset();
    loop {
        r.seek_to(offset)?;
        let chunk = match Chunk::read(&mut r) {
            Ok(chunk) => chunk,
            Err(Error::Utf(cri_utf::Error::ShortRead)) => return Err(Error::MissingMetadataEnd),
            Err(e) => return Err(e),
        };
        let payload = chunk.read_payload(&mut r)?;

        if chunk.magic == CHUNK_AUDIO {
            has_audio = true;
        }
        if payload.starts_with(METADATA_END) {
            offset = chunk.next_offset();
            break;
        }
        if payload.starts_with(HEADER_END) || payload.starts_with(&UTF_MAGIC.to_be_bytes()) {
            trace!(magic = chunk.magic, "header-phase chunk");
        }

        offset = chunk.next_offset();
    }

    // Streaming phase
    fs::create_dir_all(target_dir)?;
    let video_path = target_dir.join(format!("{base}.m2v"));
    let mut video = BufWriter::new(File::create(&video_path)?);
    let mut outputs = vec![video_path];

    let mut audio = if has_audio {
        let audio_path = target_dir.join(format!("{base}.adx"));
        let writer = BufWriter::new(File::create(&audio_path)?);
        outputs.push(audio_path);
        Some(writer)
    } else {
        None
    };

    loop {
        r.seek_to(offset)?;
        let chunk = match Chunk::read(&mut r) {
            Ok(chunk) => chunk,
            Err(Error::Utf(cri_utf::Error::ShortRead)) => break,
            Err(e) => return Err(e),
        };
        let mut payload = match chunk.read_payload(&mut r) {
            Ok(payload) => payload,
            Err(Error::Utf(cri_utf::Error::ShortRead)) => break,
            Err(e) => return Err(e),
        };

        if payload.starts_with(CONTENTS_END) {
            break;
        }

        if chunk.data_type == 0 {
            match chunk.magic {
                CHUNK_VIDEO => {
                    if let Some(masks) = &masks {
                        mask_video(&mut payload, &masks.video);
                    }
                    video.write_all(&payload)?;
                }
                CHUNK_AUDIO => {
                    if let Some(writer) = audio.as_mut() {
                        if let Some(masks) = &masks {
                            mask_audio(&mut payload, &masks.audio);
                        }
                        writer.write_all(&payload)?;
                    }
                }
                _ => {}
            }
        }

        offset = chunk.next_offset();
    }

    video.flush()?;
    if let Some(mut writer) = audio {
        writer.flush()?;
    }

    debug!(outputs = outputs.len(), "USM demux finished");
    Ok(outputs)
}

/// Demux an on-disk `.usm`, using its file name as the fallback base name.
pub fn demux_file(usm_path: &Path, target_dir: &Path, key: Option<u64>) -> Result<Vec<PathBuf>> {
    let fallback = usm_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = File::open(usm_path)?;
    demux(file, target_dir, &fallback, key)
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}
