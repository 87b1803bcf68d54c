//! Cue graph traversal
//!
//! An ACB names its audio through a small graph: each cue references either a
//! sequence of tracks or the whole track table; each track points at an event
//! whose command stream selects a synth; the synth references the waveform
//! row that finally names an AWB payload slot.

use std::collections::HashMap;

use cri_utf::{Row, UtfTable};
use tracing::debug;

use crate::{Error, Result};

/// Waveform encode type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Adx,
    Hca,
    Vag,
    Atrac3,
    Bcwav,
    NintendoDsp,
    Other(i64),
}

impl Encoding {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => Encoding::Adx,
            2 => Encoding::Hca,
            7 => Encoding::Vag,
            8 => Encoding::Atrac3,
            9 => Encoding::Bcwav,
            13 => Encoding::NintendoDsp,
            other => Encoding::Other(other),
        }
    }

    /// Output file extension. The VAG/ATRAC3 pair mirrors the historical
    /// extractor mapping.
    pub fn extension(&self) -> String {
        match self {
            Encoding::Adx => ".adx".to_string(),
            Encoding::Hca => ".hca".to_string(),
            Encoding::Vag => ".at3".to_string(),
            Encoding::Atrac3 => ".vag".to_string(),
            Encoding::Bcwav => ".bcwav".to_string(),
            Encoding::NintendoDsp => ".dsp".to_string(),
            Encoding::Other(raw) => format!(".{raw}"),
        }
    }
}

/// One resolved audio track.
#[derive(Debug, Clone)]
pub struct Track {
    pub cue_id: i64,
    /// Unique within the archive
    pub name: String,
    pub waveform_id: i64,
    pub encoding: Encoding,
    pub is_stream: bool,
    /// Sidecar AWB index for stream tracks, -1 otherwise
    pub stream_awb_port: i64,
}

/// All tracks resolved from one ACB.
#[derive(Debug, Clone, Default)]
pub struct TrackList {
    pub tracks: Vec<Track>,
}

/// Child tables pulled out of the ACB header row.
pub(crate) struct AcbTables {
    pub cues: UtfTable,
    pub names: UtfTable,
    pub waveforms: UtfTable,
    pub synths: UtfTable,
    pub tracks: UtfTable,
    pub events: UtfTable,
    pub sequences: Option<UtfTable>,
}

impl AcbTables {
    pub fn from_header(header: &UtfTable) -> Result<Self> {
        let row = header
            .rows
            .first()
            .ok_or_else(|| cri_utf::Error::MissingField("header row".to_string()))?;

        // Older ACBs store the event commands in CommandTable instead.
        let events = match row.bytes("TrackEventTable") {
            Ok(blob) => blob,
            Err(_) => row.bytes("CommandTable")?,
        };

        let sequences = match row.bytes("SequenceTable") {
            Ok(blob) if !blob.is_empty() => UtfTable::parse(blob).ok(),
            _ => None,
        };

        Ok(AcbTables {
            cues: UtfTable::parse(row.bytes("CueTable")?)?,
            names: UtfTable::parse(row.bytes("CueNameTable")?)?,
            waveforms: UtfTable::parse(row.bytes("WaveformTable")?)?,
            synths: UtfTable::parse(row.bytes("SynthTable")?)?,
            tracks: UtfTable::parse(row.bytes("TrackTable")?)?,
            events: UtfTable::parse(events)?,
            sequences,
        })
    }
}

impl TrackList {
    /// Resolve every track named by the ACB header table.
    pub fn from_acb(header: &UtfTable) -> Result<Self> {
        let tables = AcbTables::from_header(header)?;
        Self::from_tables(&tables)
    }

    pub(crate) fn from_tables(tables: &AcbTables) -> Result<Self> {
        let mut name_map = HashMap::new();
        for row in &tables.names.rows {
            let index = row.int("CueIndex")?;
            let name = row.string("CueName")?.to_string();
            name_map.insert(index, name);
        }

        let mut list = TrackList::default();

        for cue_row in &tables.cues.rows {
            let ref_type = cue_row.int("ReferenceType")?;
            if ref_type != 3 && ref_type != 8 {
                return Err(Error::UnsupportedReferenceType(ref_type));
            }

            let ref_index = cue_row.int("ReferenceIndex")?;

            let sequence = tables
                .sequences
                .as_ref()
                .and_then(|seqs| usize::try_from(ref_index).ok().and_then(|i| seqs.rows.get(i)));

            if let Some(sequence) = sequence {
                let num_tracks = sequence.int("NumTracks")?;
                let track_index = sequence.bytes("TrackIndex")?;

                for i in 0..num_tracks as usize {
                    let Some(raw) = track_index.get(i * 2..i * 2 + 2) else {
                        break;
                    };
                    let index = usize::from(u16::from_be_bytes([raw[0], raw[1]]));
                    let Some(track_row) = tables.tracks.rows.get(index) else {
                        continue;
                    };
                    list.collect_event_tracks(tables, track_row, &name_map, ref_index)?;
                }
            } else {
                for track_row in &tables.tracks.rows {
                    list.collect_event_tracks(tables, track_row, &name_map, ref_index)?;
                }
            }
        }

        debug!(tracks = list.tracks.len(), "resolved ACB track list");
        Ok(list)
    }

    fn collect_event_tracks(
        &mut self,
        tables: &AcbTables,
        track_row: &Row,
        name_map: &HashMap<i64, String>,
        ref_index: i64,
    ) -> Result<()> {
        let event_index = track_row.int("EventIndex")?;
        if event_index == 0xFFFF {
            return Ok(());
        }
        let Some(event) = usize::try_from(event_index)
            .ok()
            .and_then(|i| tables.events.rows.get(i))
        else {
            return Ok(());
        };

        let new = tracks_from_event(event, tables, name_map, ref_index, &self.tracks)?;
        self.tracks.extend(new);
        Ok(())
    }
}

/// Walk one event's command stream and emit a track per synth reference.
fn tracks_from_event(
    event: &Row,
    tables: &AcbTables,
    name_map: &HashMap<i64, String>,
    ref_index: i64,
    existing: &[Track],
) -> Result<Vec<Track>> {
    let mut tracks = Vec::new();

    let Ok(command) = event.bytes("Command") else {
        return Ok(tracks);
    };

    let mut k = 0;
    while k + 3 <= command.len() {
        let cmd = u16::from_be_bytes([command[k], command[k + 1]]);
        let len = usize::from(command[k + 2]);
        k += 3;

        let Some(params) = command.get(k..k + len) else {
            break;
        };
        k += len;

        if cmd == 0 {
            break;
        }
        if cmd != 0x07D0 || params.len() < 4 {
            continue;
        }

        // params: u16 marker (must be 2), u16 synth index
        if u16::from_be_bytes([params[0], params[1]]) != 2 {
            continue;
        }
        let synth_index = usize::from(u16::from_be_bytes([params[2], params[3]]));
        let Some(synth_row) = tables.synths.rows.get(synth_index) else {
            continue;
        };

        // ReferenceItems: u16 marker (must be 1), u16 waveform index
        let reference = synth_row.bytes("ReferenceItems").unwrap_or(&[]);
        if reference.len() < 4 {
            continue;
        }
        if u16::from_be_bytes([reference[0], reference[1]]) != 1 {
            continue;
        }
        let waveform_index = usize::from(u16::from_be_bytes([reference[2], reference[3]]));
        let Some(waveform) = tables.waveforms.rows.get(waveform_index) else {
            continue;
        };

        let is_stream = waveform.int("Streaming")? != 0;
        let encoding = Encoding::from_raw(waveform.int("EncodeType")?);
        let waveform_id = if is_stream {
            waveform.int("StreamAwbId")?
        } else {
            waveform.int("MemoryAwbId")?
        };
        let stream_awb_port = if is_stream {
            waveform.int("StreamAwbPortNo")?
        } else {
            -1
        };

        let mut name = name_map
            .get(&ref_index)
            .cloned()
            .unwrap_or_else(|| format!("UNKNOWN-{ref_index}"));
        if existing.iter().any(|t| t.name == name) {
            name = format!("{name}-{waveform_id}");
        }
        if tracks.iter().any(|t: &Track| t.name == name) {
            name = format!("{name}-{waveform_id}");
        }

        tracks.push(Track {
            cue_id: ref_index,
            name,
            waveform_id,
            encoding,
            is_stream,
            stream_awb_port,
        });
    }

    Ok(tracks)
}
