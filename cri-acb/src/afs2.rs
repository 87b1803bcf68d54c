//! AFS2 (AWB) archive reading
//!
//! AFS2 is a flat archive keyed by cue id. Unusually for CRI, the count,
//! alignment and offset tables are little-endian. Payload offsets are stored
//! unaligned; the payload itself starts at the next multiple of the archive
//! alignment.

use std::io::{Read, Seek};

use cri_utf::Reader;
use tracing::trace;

use crate::{Error, Result, AFS2_MAGIC};

/// One payload slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Afs2Entry {
    pub cue_id: u32,
    /// Aligned payload start
    pub offset: u32,
    pub size: u32,
}

/// A parsed AFS2 archive over a seekable source.
#[derive(Debug)]
pub struct Afs2Archive<R> {
    alignment: u32,
    files: Vec<Afs2Entry>,
    reader: Reader<R>,
}

impl<R: Read + Seek> Afs2Archive<R> {
    pub fn parse(inner: R) -> Result<Self> {
        let mut r = Reader::new(inner);

        let magic = r.read_u32()?;
        if magic != AFS2_MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let version = r.read_bytes(4)?;
        let file_count = r.read_u32_le()?;
        let alignment = r.read_u32_le()?;

        let offset_width = version[1];
        let cue_id_width = version[2];
        if offset_width != 2 && offset_width != 4 {
            return Err(Error::UnsupportedOffsetWidth(offset_width));
        }
        if cue_id_width != 2 && cue_id_width != 4 {
            return Err(Error::UnsupportedCueIdWidth(cue_id_width));
        }
        let offset_mask = ((1u64 << (offset_width * 8)) - 1) as u32;

        r.seek_to(0x10)?;

        let mut cue_ids = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            let id = if cue_id_width == 2 {
                u32::from(r.read_u16_le()?)
            } else {
                r.read_u32_le()?
            };
            cue_ids.push(id);
        }

        let mut offsets = Vec::with_capacity(file_count as usize + 1);
        for _ in 0..=file_count {
            let offset = if offset_width == 2 {
                u32::from(r.read_u16_le()?)
            } else {
                r.read_u32_le()?
            };
            offsets.push(offset & offset_mask);
        }

        let files = cue_ids
            .into_iter()
            .enumerate()
            .map(|(i, cue_id)| {
                let aligned = align_up(offsets[i], alignment);
                Afs2Entry {
                    cue_id,
                    offset: aligned,
                    size: offsets[i + 1] - aligned,
                }
            })
            .collect::<Vec<_>>();

        trace!(files = files.len(), alignment, "parsed AFS2 archive");

        Ok(Self {
            alignment,
            files,
            reader: r,
        })
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    pub fn files(&self) -> &[Afs2Entry] {
        &self.files
    }

    /// Read a payload slot.
    pub fn file_data(&mut self, entry: Afs2Entry) -> Result<Vec<u8>> {
        Ok(self
            .reader
            .read_bytes_at(entry.size as usize, u64::from(entry.offset))?)
    }

    /// Read the payload for a cue id.
    ///
    /// When the id is absent but slot 0 carries cue id 0, the first slot is
    /// returned instead (historical CRI quirk: some single-track archives
    /// always key their payload as 0).
    pub fn file_data_for_cue_id(&mut self, cue_id: u32) -> Result<Vec<u8>> {
        if let Some(entry) = self.files.iter().find(|f| f.cue_id == cue_id) {
            let entry = *entry;
            return self.file_data(entry);
        }

        match self.files.first() {
            Some(first) if first.cue_id == 0 => {
                let first = *first;
                self.file_data(first)
            }
            _ => Err(Error::CueNotFound(cue_id)),
        }
    }
}

fn align_up(offset: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return offset;
    }
    offset.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_utils::Afs2Builder;

    #[test]
    fn test_parse_and_invariants() {
        let data = Afs2Builder::new(0x20)
            .file(0, b"first payload")
            .file(1, b"second")
            .file(7, b"third one here")
            .build();
        let total = data.len() as u32;

        let mut archive = Afs2Archive::parse(Cursor::new(data)).unwrap();
        assert_eq!(archive.alignment(), 0x20);
        assert_eq!(archive.files().len(), 3);

        let files: Vec<Afs2Entry> = archive.files().to_vec();
        let mut size_sum = 0;
        for (i, entry) in files.iter().enumerate() {
            assert_eq!(entry.offset % 0x20, 0, "offset not aligned: {entry:?}");
            assert!(entry.offset + entry.size <= total);
            if let Some(next) = files.get(i + 1) {
                assert!(entry.offset + entry.size <= next.offset);
            }
            size_sum += entry.size;
        }
        assert!(size_sum <= total);

        assert_eq!(archive.file_data(files[0]).unwrap(), b"first payload");
        assert_eq!(archive.file_data(files[2]).unwrap(), b"third one here");
    }

    #[test]
    fn test_cue_id_lookup_and_fallback() {
        let data = Afs2Builder::new(4).file(0, b"only").build();
        let mut archive = Afs2Archive::parse(Cursor::new(data)).unwrap();

        assert_eq!(archive.file_data_for_cue_id(0).unwrap(), b"only");
        // Missing id falls back to slot 0 because it carries cue id 0.
        assert_eq!(archive.file_data_for_cue_id(42).unwrap(), b"only");

        let data = Afs2Builder::new(4).file(3, b"keyed").build();
        let mut archive = Afs2Archive::parse(Cursor::new(data)).unwrap();
        assert_eq!(archive.file_data_for_cue_id(3).unwrap(), b"keyed");
        assert!(matches!(
            archive.file_data_for_cue_id(42),
            Err(Error::CueNotFound(42))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let err = Afs2Archive::parse(Cursor::new(b"AFS3\x00\x04\x02\x00".to_vec())).unwrap_err();
        assert!(matches!(err, Error::BadMagic(_)));
    }
}
