//! Small shared helpers.

use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Utc};

/// CDN cache-buster: `?t=<Asia/Tokyo wall time as YYYYMMDDHHMMSS>`.
/// JST has no daylight saving, so a fixed +09:00 offset is exact.
pub(crate) fn time_arg() -> String {
    let jst = FixedOffset::east_opt(9 * 3600).expect("static UTC+9 offset");
    let now = Utc::now().with_timezone(&jst);
    format!("?t={}", now.format("%Y%m%d%H%M%S"))
}

/// Recursively collect files with the given extension (case-insensitive).
/// A missing directory yields an empty list.
pub(crate) fn find_files_by_extension(dir: &Path, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let want = ext.trim_start_matches('.').to_ascii_lowercase();
    collect_files(dir, &want, &mut files)?;
    Ok(files)
}

fn collect_files(dir: &Path, ext: &str, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, ext, files)?;
        } else if path
            .extension()
            .is_some_and(|e| e.to_string_lossy().to_ascii_lowercase() == ext)
        {
            files.push(path);
        }
    }
    Ok(())
}

/// Recursively collect every file under `dir`.
pub(crate) fn scan_all_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    scan_files(dir, &mut files)?;
    Ok(files)
}

fn scan_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
