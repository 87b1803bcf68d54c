//! Export façade: turns an extracted bundle directory into final media.
//!
//! Runs in order: USM merge + demux (+ MP4), ACB → HCA → WAV (+ MP3/FLAC),
//! PNG → WebP, then the optional upload sweep. Decoder failures abort only
//! the artifact at hand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::convert;
use crate::updater::Pools;
use crate::upload;
use crate::util::{find_files_by_extension, scan_all_files};
use crate::{Error, RegionConfig, RemoteStorageConfig, Result, ToolsConfig};

/// HCA decode fan-out width inside one ACB export.
const HCA_WORKERS: usize = 16;

/// Metadata file that may legitimately remain when USM export is disabled.
const MOVIE_METADATA: &str = "MovieBundleBuildData.json";

/// Post-process one exported directory.
pub async fn post_process(
    export_dir: &Path,
    config: &RegionConfig,
    tools: &ToolsConfig,
    pools: &Pools,
    storages: &[RemoteStorageConfig],
) -> Result<()> {
    if !export_dir.exists() {
        return Ok(());
    }

    handle_usm_files(export_dir, config, tools, pools).await?;
    handle_acb_files(export_dir, config, tools, pools).await?;
    handle_png_conversion(export_dir, config, tools).await?;

    if config.upload_to_cloud {
        let files = scan_all_files(export_dir)?;
        if files.is_empty() {
            info!(dir = %export_dir.display(), "nothing to upload");
        } else {
            info!(files = files.len(), dir = %export_dir.display(), "uploading exported files");
            upload::upload_to_all_storages(
                &files,
                export_dir,
                storages,
                &pools.upload,
                config.remove_local_after_upload,
            )
            .await?;
        }
    }

    Ok(())
}

async fn handle_usm_files(
    dir: &Path,
    config: &RegionConfig,
    tools: &ToolsConfig,
    pools: &Pools,
) -> Result<()> {
    let usm_files = find_files_by_extension(dir, ".usm")?;
    if usm_files.is_empty() {
        return Ok(());
    }

    if !(config.export_usm_files && config.decode_usm_files) {
        // Dropped format: delete the containers, and the whole directory
        // when nothing but the movie metadata would remain.
        for file in &usm_files {
            tokio::fs::remove_file(file).await?;
        }
        let remaining = scan_all_files(dir)?;
        if remaining
            .iter()
            .all(|p| p.file_name().is_some_and(|n| n == MOVIE_METADATA))
        {
            tokio::fs::remove_dir_all(dir).await?;
        }
        return Ok(());
    }

    let _permit = pools
        .usm
        .acquire()
        .await
        .map_err(|_| Error::Cancelled)?;

    let target = if usm_files.len() == 1 {
        info!(file = %usm_files[0].display(), "exporting single USM file");
        usm_files[0].clone()
    } else {
        info!(count = usm_files.len(), dir = %dir.display(), "merging USM files before export");
        merge_usm_files(dir, &usm_files).await?
    };

    export_usm(
        &target,
        dir,
        config.convert_video_to_mp4,
        config.remove_m2v,
        &tools.ffmpeg_path,
    )
    .await
}

/// Concatenate sibling USM parts into `<dirname>.usm`, deleting the
/// sources.
async fn merge_usm_files(dir: &Path, usm_files: &[PathBuf]) -> Result<PathBuf> {
    let parent_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "merged".to_string());
    let merged_path = dir.join(format!("{parent_name}.usm"));
    let mut merged = tokio::fs::File::create(&merged_path).await?;

    for file in usm_files {
        if *file == merged_path {
            continue;
        }
        let data = tokio::fs::read(file).await?;
        merged.write_all(&data).await?;

        debug!(part = %file.display(), into = %merged_path.display(), "merged USM part");
        if let Err(e) = tokio::fs::remove_file(file).await {
            warn!(file = %file.display(), "could not delete merged USM part: {e}");
        }
    }

    merged.flush().await?;
    Ok(merged_path)
}

async fn export_usm(
    usm: &Path,
    out_dir: &Path,
    convert_to_mp4: bool,
    remove_m2v: bool,
    ffmpeg: &str,
) -> Result<()> {
    let extracted = {
        let usm = usm.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        spawn_decode(move || Ok(cri_usm::demux_file(&usm, &out_dir, None)?)).await?
    };

    if convert_to_mp4 {
        for file in &extracted {
            if file
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("m2v"))
            {
                convert::convert_m2v_to_mp4(file, &file.with_extension("mp4"), remove_m2v, ffmpeg)
                    .await?;
            }
        }
    }

    tokio::fs::remove_file(usm).await?;
    Ok(())
}

async fn handle_acb_files(
    dir: &Path,
    config: &RegionConfig,
    tools: &ToolsConfig,
    pools: &Pools,
) -> Result<()> {
    let acb_files = find_files_by_extension(dir, ".acb")?;
    if acb_files.is_empty() {
        return Ok(());
    }

    if !(config.export_acb_files && config.decode_acb_files) {
        for file in &acb_files {
            tokio::fs::remove_file(file).await?;
        }
        return Ok(());
    }

    let mut set = JoinSet::new();
    for acb in acb_files {
        let semaphore = Arc::clone(&pools.acb);
        let decode_hca = config.decode_hca_files;
        let remove_wav = config.remove_wav;
        let to_mp3 = config.convert_audio_to_mp3;
        let to_flac = config.convert_wav_to_flac;
        let ffmpeg = tools.ffmpeg_path.clone();

        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            info!(file = %acb.display(), "exporting ACB file");
            let out_dir = acb.parent().unwrap_or(Path::new(".")).to_path_buf();
            export_acb(&acb, &out_dir, decode_hca, remove_wav, to_mp3, to_flac, &ffmpeg)
                .await
                .map_err(|e| (acb, e))
        });
    }

    drain_export_tasks(set, "ACB").await
}

/// Extract an ACB into a scratch directory and decode its HCA tracks,
/// fanned out over a bounded worker pool.
async fn export_acb(
    acb: &Path,
    out_dir: &Path,
    decode_hca: bool,
    remove_wav: bool,
    to_mp3: bool,
    to_flac: bool,
    ffmpeg: &str,
) -> Result<()> {
    let parent = acb.parent().unwrap_or(Path::new("."));
    let extract_dir = tempfile::Builder::new()
        .prefix("acb-extract-")
        .tempdir_in(parent)?;

    {
        let acb = acb.to_path_buf();
        let target = extract_dir.path().to_path_buf();
        spawn_decode(move || Ok(cri_acb::extract_acb_file(&acb, &target)?)).await?;
    }

    let mut hca_files = find_files_by_extension(extract_dir.path(), ".hca")?;

    // Long-music bundles ship VR/screen variants of each track; drop them.
    let acb_slash = acb.to_string_lossy().replace('\\', "/").to_lowercase();
    if acb_slash.contains("music/long") {
        hca_files.retain(|file| {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if name.ends_with("_vr.hca") || name.ends_with("_screen.hca") {
                let _ = std::fs::remove_file(file);
                false
            } else {
                true
            }
        });
    }

    if decode_hca && !hca_files.is_empty() {
        let semaphore = Arc::new(Semaphore::new(HCA_WORKERS));
        let mut set = JoinSet::new();

        for hca in hca_files {
            let semaphore = Arc::clone(&semaphore);
            let out_dir = out_dir.to_path_buf();
            let ffmpeg = ffmpeg.to_string();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                export_hca(&hca, &out_dir, to_mp3, to_flac, remove_wav, &ffmpeg)
                    .await
                    .map_err(|e| (hca, e))
            });
        }

        drain_export_tasks(set, "HCA").await?;
    }

    tokio::fs::remove_file(acb).await?;
    Ok(())
}

async fn export_hca(
    hca: &Path,
    out_dir: &Path,
    to_mp3: bool,
    to_flac: bool,
    remove_wav: bool,
    ffmpeg: &str,
) -> Result<()> {
    let base = hca
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let wav = out_dir.join(format!("{base}.wav"));

    {
        let hca = hca.to_path_buf();
        let wav = wav.clone();
        spawn_decode(move || {
            let input = std::fs::File::open(&hca)?;
            let mut decoder = cri_hca::HcaDecoder::new(std::io::BufReader::new(input))?;
            let output = std::fs::File::create(&wav)?;
            let mut writer = std::io::BufWriter::new(output);
            decoder.decode_to_wav(&mut writer)?;
            std::io::Write::flush(&mut writer)?;
            Ok(())
        })
        .await?;
    }

    if to_mp3 {
        convert::convert_wav_to_mp3(&wav, &out_dir.join(format!("{base}.mp3")), remove_wav, ffmpeg)
            .await?;
    } else if to_flac {
        convert::convert_wav_to_flac(
            &wav,
            &out_dir.join(format!("{base}.flac")),
            remove_wav,
            ffmpeg,
        )
        .await?;
    } else if remove_wav && wav.exists() {
        tokio::fs::remove_file(&wav).await?;
    }

    tokio::fs::remove_file(hca).await?;
    Ok(())
}

async fn handle_png_conversion(dir: &Path, config: &RegionConfig, tools: &ToolsConfig) -> Result<()> {
    if !config.convert_photo_to_webp {
        return Ok(());
    }

    for png in find_files_by_extension(dir, ".png")? {
        let webp = png.with_extension("webp");
        info!(from = %png.display(), to = %webp.display(), "converting PNG to WebP");
        convert::convert_png_to_webp(&png, &webp, &tools.cwebp_path).await?;

        if config.remove_png {
            tokio::fs::remove_file(&png).await?;
        }
    }

    Ok(())
}

/// Run a blocking decode closure off the async workers.
async fn spawn_decode<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Config(format!("decode task panicked: {e}")))?
}

/// Await every export task, logging failures; the first error wins.
async fn drain_export_tasks(
    mut set: JoinSet<std::result::Result<(), (PathBuf, Error)>>,
    what: &str,
) -> Result<()> {
    let mut first_error = None;
    let mut error_count = 0;

    while let Some(result) = set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err((path, e))) => {
                error_count += 1;
                error!(file = %path.display(), "{what} export error: {e}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(join_error) => {
                error_count += 1;
                error!("{what} export task panicked: {join_error}");
                if first_error.is_none() {
                    first_error = Some(Error::Config(format!("{what} task panicked: {join_error}")));
                }
            }
        }
    }

    match first_error {
        Some(e) => {
            error!("{error_count} {what} file(s) failed to export");
            Err(e)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{Afs2Builder, UtfTableBuilder};

    fn pools() -> Pools {
        Pools::new(2, 2, 2)
    }

    fn crc16(data: &[u8]) -> u16 {
        let mut sum: u16 = 0;
        for &b in data {
            sum ^= u16::from(b) << 8;
            for _ in 0..8 {
                sum = if sum & 0x8000 != 0 {
                    (sum << 1) ^ 0x8005
                } else {
                    sum << 1
                };
            }
        }
        sum
    }

    /// Minimal silent v2.0 stereo HCA stream: header plus `frames`
    /// all-quiet frames.
    fn silent_hca(frames: u32) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(b"HCA\0");
        h.extend_from_slice(&0x0200u16.to_be_bytes());
        h.extend_from_slice(&42u16.to_be_bytes());
        h.extend_from_slice(b"fmt\0");
        h.push(2);
        h.extend_from_slice(&48000u32.to_be_bytes()[1..4]);
        h.extend_from_slice(&frames.to_be_bytes());
        h.extend_from_slice(&[0, 0, 0, 0]); // delay + padding
        h.extend_from_slice(b"comp");
        h.extend_from_slice(&512u16.to_be_bytes());
        h.extend_from_slice(&[1, 15, 0, 0, 128, 128, 0, 0, 0, 0]);
        let crc = crc16(&h);
        h.extend_from_slice(&crc.to_be_bytes());

        let mut data = h;
        for _ in 0..frames {
            let mut frame = vec![0u8; 510];
            frame[0] = 0xFF;
            frame[1] = 0xFF;
            let crc = crc16(&frame);
            frame.extend_from_slice(&crc.to_be_bytes());
            data.extend(frame);
        }
        data
    }

    /// An ACB whose embedded AWB holds one HCA track named `BGM`.
    fn acb_with_track(hca: &[u8]) -> Vec<u8> {
        let awb = Afs2Builder::new(0x20).file(0, hca).build();

        let cues = UtfTableBuilder::new("Cue")
            .per_row_u8("ReferenceType", &[3])
            .per_row_u16("ReferenceIndex", &[0])
            .build();
        let names = UtfTableBuilder::new("CueName")
            .per_row_string("CueName", &["BGM"])
            .per_row_u16("CueIndex", &[0])
            .build();
        let waveforms = UtfTableBuilder::new("Waveform")
            .per_row_u8("Streaming", &[0])
            .per_row_u16("MemoryAwbId", &[0])
            .per_row_u16("StreamAwbId", &[0])
            .per_row_u16("StreamAwbPortNo", &[0])
            .per_row_u8("EncodeType", &[2])
            .build();
        let synths = UtfTableBuilder::new("Synth")
            .per_row_bytes("ReferenceItems", &[vec![0, 1, 0, 0]])
            .build();
        let tracks = UtfTableBuilder::new("Track")
            .per_row_u16("EventIndex", &[0])
            .build();
        let events = UtfTableBuilder::new("TrackEvent")
            .per_row_bytes(
                "Command",
                &[vec![0x07, 0xD0, 0x04, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00]],
            )
            .build();

        UtfTableBuilder::new("Header")
            .per_row_bytes("CueTable", &[cues])
            .per_row_bytes("CueNameTable", &[names])
            .per_row_bytes("WaveformTable", &[waveforms])
            .per_row_bytes("SynthTable", &[synths])
            .per_row_bytes("TrackTable", &[tracks])
            .per_row_bytes("TrackEventTable", &[events])
            .per_row_bytes("AwbFile", &[awb])
            .build()
    }

    #[tokio::test]
    async fn test_export_acb_decodes_hca_to_wav() {
        let dir = tempfile::tempdir().unwrap();
        let acb_path = dir.path().join("bgm_bundle.acb");
        tokio::fs::write(&acb_path, acb_with_track(&silent_hca(3)))
            .await
            .unwrap();

        export_acb(&acb_path, dir.path(), true, false, false, false, "")
            .await
            .unwrap();

        assert!(!acb_path.exists(), "source ACB must be deleted");
        let wav = tokio::fs::read(dir.path().join("BGM.wav")).await.unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        // 3 frames x 1024 samples x 2 channels x 2 bytes + 44-byte header
        assert_eq!(wav.len(), 44 + 3 * 1024 * 2 * 2);
    }

    #[tokio::test]
    async fn test_disabled_acb_export_drops_files() {
        let dir = tempfile::tempdir().unwrap();
        let acb_path = dir.path().join("voice.acb");
        tokio::fs::write(&acb_path, b"acb bytes").await.unwrap();

        let config = RegionConfig::default();
        handle_acb_files(dir.path(), &config, &ToolsConfig::default(), &pools())
            .await
            .unwrap();
        assert!(!acb_path.exists());
    }

    #[tokio::test]
    async fn test_disabled_usm_export_drops_files_and_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let movie_dir = dir.path().join("movie_0001");
        tokio::fs::create_dir_all(&movie_dir).await.unwrap();
        tokio::fs::write(movie_dir.join("part1.usm"), b"usm").await.unwrap();
        tokio::fs::write(movie_dir.join(MOVIE_METADATA), b"{}").await.unwrap();

        let config = RegionConfig::default();
        handle_usm_files(&movie_dir, &config, &ToolsConfig::default(), &pools())
            .await
            .unwrap();
        assert!(!movie_dir.exists(), "directory with only metadata is removed");
    }

    #[tokio::test]
    async fn test_disabled_usm_export_keeps_dir_with_other_content() {
        let dir = tempfile::tempdir().unwrap();
        let movie_dir = dir.path().join("movie_0002");
        tokio::fs::create_dir_all(&movie_dir).await.unwrap();
        tokio::fs::write(movie_dir.join("part1.usm"), b"usm").await.unwrap();
        tokio::fs::write(movie_dir.join("thumb.png"), b"png").await.unwrap();

        let config = RegionConfig::default();
        handle_usm_files(&movie_dir, &config, &ToolsConfig::default(), &pools())
            .await
            .unwrap();
        assert!(!movie_dir.join("part1.usm").exists());
        assert!(movie_dir.join("thumb.png").exists());
    }

    #[tokio::test]
    async fn test_merge_usm_files_concatenates_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let movie_dir = dir.path().join("pv_001");
        tokio::fs::create_dir_all(&movie_dir).await.unwrap();

        let a = movie_dir.join("a.usm");
        let b = movie_dir.join("b.usm");
        tokio::fs::write(&a, b"AAAA").await.unwrap();
        tokio::fs::write(&b, b"BBBB").await.unwrap();

        let merged = merge_usm_files(&movie_dir, &[a.clone(), b.clone()])
            .await
            .unwrap();
        assert_eq!(merged, movie_dir.join("pv_001.usm"));
        assert_eq!(tokio::fs::read(&merged).await.unwrap(), b"AAAABBBB");
        assert!(!a.exists());
        assert!(!b.exists());
    }
}
