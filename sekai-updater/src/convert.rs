//! Thin drivers for the external transcode tools.
//!
//! ffmpeg and cwebp are opaque command runners: the pipeline only cares
//! about the exit status.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

async fn run_tool(program: &str, args: &[&str]) -> Result<()> {
    debug!(program, ?args, "running external tool");

    let status = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        return Err(Error::SubprocessFailed {
            program: program.to_string(),
            code: status.code(),
        });
    }
    Ok(())
}

pub async fn convert_png_to_webp(png: &Path, webp: &Path, cwebp: &str) -> Result<()> {
    run_tool(
        cwebp,
        &[
            "-q",
            "80",
            &png.to_string_lossy(),
            "-o",
            &webp.to_string_lossy(),
        ],
    )
    .await
}

pub async fn convert_m2v_to_mp4(
    m2v: &Path,
    mp4: &Path,
    delete_original: bool,
    ffmpeg: &str,
) -> Result<()> {
    run_tool(
        ffmpeg,
        &[
            "-i",
            &m2v.to_string_lossy(),
            "-c:v",
            "libx264",
            "-y",
            &mp4.to_string_lossy(),
        ],
    )
    .await?;

    if delete_original {
        tokio::fs::remove_file(m2v).await?;
    }
    Ok(())
}

pub async fn convert_wav_to_mp3(
    wav: &Path,
    mp3: &Path,
    delete_original: bool,
    ffmpeg: &str,
) -> Result<()> {
    run_tool(
        ffmpeg,
        &[
            "-i",
            &wav.to_string_lossy(),
            "-b:a",
            "320k",
            "-y",
            &mp3.to_string_lossy(),
        ],
    )
    .await?;

    if delete_original && wav.exists() {
        tokio::fs::remove_file(wav).await?;
    }
    Ok(())
}

pub async fn convert_wav_to_flac(
    wav: &Path,
    flac: &Path,
    delete_original: bool,
    ffmpeg: &str,
) -> Result<()> {
    run_tool(
        ffmpeg,
        &[
            "-i",
            &wav.to_string_lossy(),
            "-compression_level",
            "12",
            "-y",
            &flac.to_string_lossy(),
        ],
    )
    .await?;

    if delete_original && wav.exists() {
        tokio::fs::remove_file(wav).await?;
    }
    Ok(())
}
