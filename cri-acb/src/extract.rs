//! ACB payload extraction to disk

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use cri_utf::UtfTable;
use tracing::{debug, warn};

use crate::track::AcbTables;
use crate::{Afs2Archive, Result, TrackList};

/// Extract every resolvable track of an in-memory ACB into `target_dir`.
///
/// `acb_path` locates sidecar `.awb` archives: a `StreamAwbHash` row naming
/// `foo` resolves to `foo.awb` next to the ACB. Tracks whose payload cannot
/// be found (missing sidecar, missing cue id) are dropped; the rest continue.
///
/// Returns the paths written.
pub fn extract_acb(acb: &[u8], target_dir: &Path, acb_path: &Path) -> Result<Vec<PathBuf>> {
    let header = UtfTable::parse(acb)?;
    let tables = AcbTables::from_header(&header)?;
    let track_list = TrackList::from_tables(&tables)?;

    let header_row = &header.rows[0];

    let mut embedded = match header_row.bytes("AwbFile") {
        Ok(blob) if !blob.is_empty() => Afs2Archive::parse(Cursor::new(blob.to_vec())).ok(),
        _ => None,
    };

    let mut sidecars = Vec::new();
    if let Ok(blob) = header_row.bytes("StreamAwbHash") {
        if !blob.is_empty() {
            if let Ok(hash_table) = UtfTable::parse(blob) {
                for awb_row in &hash_table.rows {
                    let Ok(awb_name) = awb_row.string("Name") else {
                        continue;
                    };
                    let awb_path = acb_path
                        .parent()
                        .unwrap_or(Path::new(""))
                        .join(format!("{awb_name}.awb"));
                    match fs::read(&awb_path) {
                        Ok(data) => match Afs2Archive::parse(Cursor::new(data)) {
                            Ok(archive) => sidecars.push(archive),
                            Err(e) => warn!("Skipping malformed sidecar {awb_path:?}: {e}"),
                        },
                        Err(_) => debug!("Sidecar AWB not present: {awb_path:?}"),
                    }
                }
            }
        }
    }

    fs::create_dir_all(target_dir)?;

    let mut outputs = Vec::new();
    for track in &track_list.tracks {
        let data = if track.is_stream {
            usize::try_from(track.stream_awb_port)
                .ok()
                .and_then(|port| sidecars.get_mut(port))
                .and_then(|awb| awb.file_data_for_cue_id(track.waveform_id as u32).ok())
        } else {
            embedded
                .as_mut()
                .and_then(|awb| awb.file_data_for_cue_id(track.waveform_id as u32).ok())
        };

        let Some(data) = data else {
            debug!(track = %track.name, "no payload for track, skipping");
            continue;
        };

        let output = target_dir.join(format!("{}{}", track.name, track.encoding.extension()));
        if fs::write(&output, data).is_err() {
            continue;
        }
        outputs.push(output);
    }

    debug!(
        extracted = outputs.len(),
        total = track_list.tracks.len(),
        "ACB extraction finished"
    );
    Ok(outputs)
}

/// Extract an on-disk `.acb` into `target_dir`.
pub fn extract_acb_file(acb_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    let data = fs::read(acb_path)?;
    extract_acb(&data, target_dir, acb_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Encoding;
    use test_utils::{Afs2Builder, UtfTableBuilder};

    /// Builds a complete single-sequence ACB: each cue selects exactly one
    /// track through a sequence row, and track i resolves to waveform i.
    struct AcbFixture {
        cue_names: Vec<(&'static str, u16)>,
        waveforms: Vec<WaveformSpec>,
        awb: Option<Vec<u8>>,
        stream_awb_names: Vec<&'static str>,
    }

    struct WaveformSpec {
        streaming: u8,
        awb_id: u16,
        port: u16,
        encode_type: u8,
    }

    impl AcbFixture {
        fn build(&self) -> Vec<u8> {
            let n = self.waveforms.len();
            let indices: Vec<u16> = (0..n as u16).collect();

            let cues = UtfTableBuilder::new("Cue")
                .per_row_u8("ReferenceType", &vec![3; n])
                .per_row_u16("ReferenceIndex", &indices)
                .build();

            let names = UtfTableBuilder::new("CueName")
                .per_row_string(
                    "CueName",
                    &self.cue_names.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
                )
                .per_row_u16(
                    "CueIndex",
                    &self.cue_names.iter().map(|(_, i)| *i).collect::<Vec<_>>(),
                )
                .build();

            let waveforms = UtfTableBuilder::new("Waveform")
                .per_row_u8(
                    "Streaming",
                    &self.waveforms.iter().map(|w| w.streaming).collect::<Vec<_>>(),
                )
                .per_row_u16(
                    "MemoryAwbId",
                    &self.waveforms.iter().map(|w| w.awb_id).collect::<Vec<_>>(),
                )
                .per_row_u16(
                    "StreamAwbId",
                    &self.waveforms.iter().map(|w| w.awb_id).collect::<Vec<_>>(),
                )
                .per_row_u16(
                    "StreamAwbPortNo",
                    &self.waveforms.iter().map(|w| w.port).collect::<Vec<_>>(),
                )
                .per_row_u8(
                    "EncodeType",
                    &self
                        .waveforms
                        .iter()
                        .map(|w| w.encode_type)
                        .collect::<Vec<_>>(),
                )
                .build();

            // Synth i -> waveform i
            let synth_refs: Vec<Vec<u8>> = (0..n as u16)
                .map(|i| {
                    let mut b = 1u16.to_be_bytes().to_vec();
                    b.extend_from_slice(&i.to_be_bytes());
                    b
                })
                .collect();
            let synths = UtfTableBuilder::new("Synth")
                .per_row_bytes("ReferenceItems", &synth_refs)
                .build();

            // Track i -> event i
            let tracks = UtfTableBuilder::new("Track")
                .per_row_u16("EventIndex", &indices)
                .build();

            // Event i: synth command selecting synth i, then terminator
            let commands: Vec<Vec<u8>> = (0..n as u16)
                .map(|i| {
                    let mut c = vec![0x07, 0xD0, 0x04, 0x00, 0x02];
                    c.extend_from_slice(&i.to_be_bytes());
                    c.extend_from_slice(&[0x00, 0x00, 0x00]);
                    c
                })
                .collect();
            let events = UtfTableBuilder::new("TrackEvent")
                .per_row_bytes("Command", &commands)
                .build();

            // Sequence i: one track, index i
            let track_indices: Vec<Vec<u8>> =
                (0..n as u16).map(|i| i.to_be_bytes().to_vec()).collect();
            let sequences = UtfTableBuilder::new("Sequence")
                .per_row_u16("NumTracks", &vec![1; n])
                .per_row_bytes("TrackIndex", &track_indices)
                .build();

            let mut header = UtfTableBuilder::new("Header")
                .per_row_bytes("CueTable", &[cues])
                .per_row_bytes("CueNameTable", &[names])
                .per_row_bytes("WaveformTable", &[waveforms])
                .per_row_bytes("SynthTable", &[synths])
                .per_row_bytes("TrackTable", &[tracks])
                .per_row_bytes("TrackEventTable", &[events])
                .per_row_bytes("SequenceTable", &[sequences]);
            if let Some(awb) = &self.awb {
                header = header.per_row_bytes("AwbFile", &[awb.clone()]);
            }
            if !self.stream_awb_names.is_empty() {
                let hash = UtfTableBuilder::new("StreamAwb")
                    .per_row_string("Name", &self.stream_awb_names)
                    .build();
                header = header.per_row_bytes("StreamAwbHash", &[hash]);
            }
            header.build()
        }
    }

    #[test]
    fn test_embedded_awb_single_track() {
        let payload = b"fake hca payload bytes".to_vec();
        let awb = Afs2Builder::new(0x20).file(0, &payload).build();
        let acb = AcbFixture {
            cue_names: vec![("BGM_TEST", 0)],
            waveforms: vec![WaveformSpec {
                streaming: 0,
                awb_id: 0,
                port: 0,
                encode_type: 2,
            }],
            awb: Some(awb),
            stream_awb_names: vec![],
        }
        .build();

        let dir = tempfile::tempdir().unwrap();
        let outputs = extract_acb(&acb, dir.path(), Path::new("test.acb")).unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0], dir.path().join("BGM_TEST.hca"));
        assert_eq!(fs::read(&outputs[0]).unwrap(), payload);
    }

    #[test]
    fn test_name_collision_gets_waveform_suffix() {
        let awb = Afs2Builder::new(0x20)
            .file(0, b"first")
            .file(1, b"second")
            .build();
        let acb = AcbFixture {
            cue_names: vec![("VOX", 0), ("VOX", 1)],
            waveforms: vec![
                WaveformSpec {
                    streaming: 0,
                    awb_id: 0,
                    port: 0,
                    encode_type: 2,
                },
                WaveformSpec {
                    streaming: 0,
                    awb_id: 1,
                    port: 0,
                    encode_type: 2,
                },
            ],
            awb: Some(awb),
            stream_awb_names: vec![],
        }
        .build();

        let header = UtfTable::parse(&acb).unwrap();
        let list = TrackList::from_acb(&header).unwrap();
        let names: Vec<&str> = list.tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["VOX", "VOX-1"]);

        let dir = tempfile::tempdir().unwrap();
        let outputs = extract_acb(&acb, dir.path(), Path::new("test.acb")).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(dir.path().join("VOX.hca").exists());
        assert!(dir.path().join("VOX-1.hca").exists());
    }

    #[test]
    fn test_stream_track_uses_sidecar_awb() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"streamed audio".to_vec();
        fs::write(
            dir.path().join("side.awb"),
            Afs2Builder::new(0x20).file(0, &payload).build(),
        )
        .unwrap();

        let acb = AcbFixture {
            cue_names: vec![("STREAMED", 0)],
            waveforms: vec![WaveformSpec {
                streaming: 1,
                awb_id: 0,
                port: 0,
                encode_type: 2,
            }],
            awb: None,
            stream_awb_names: vec!["side"],
        }
        .build();

        let acb_path = dir.path().join("test.acb");
        fs::write(&acb_path, &acb).unwrap();

        let out_dir = dir.path().join("out");
        let outputs = extract_acb_file(&acb_path, &out_dir).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(fs::read(&outputs[0]).unwrap(), payload);
    }

    #[test]
    fn test_missing_sidecar_drops_track() {
        let acb = AcbFixture {
            cue_names: vec![("GONE", 0)],
            waveforms: vec![WaveformSpec {
                streaming: 1,
                awb_id: 0,
                port: 0,
                encode_type: 2,
            }],
            awb: None,
            stream_awb_names: vec!["missing"],
        }
        .build();

        let dir = tempfile::tempdir().unwrap();
        let outputs = extract_acb(&acb, dir.path(), &dir.path().join("test.acb")).unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_unknown_cue_name_and_encoding() {
        let awb = Afs2Builder::new(4).file(0, b"data").build();
        let acb = AcbFixture {
            cue_names: vec![],
            waveforms: vec![WaveformSpec {
                streaming: 0,
                awb_id: 0,
                port: 0,
                encode_type: 5,
            }],
            awb: Some(awb),
            stream_awb_names: vec![],
        }
        .build();

        let header = UtfTable::parse(&acb).unwrap();
        let list = TrackList::from_acb(&header).unwrap();
        assert_eq!(list.tracks.len(), 1);
        assert_eq!(list.tracks[0].name, "UNKNOWN-0");
        assert_eq!(list.tracks[0].encoding, Encoding::Other(5));
        assert_eq!(list.tracks[0].encoding.extension(), ".5");
    }
}
