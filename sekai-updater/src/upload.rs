//! Remote-storage upload fan-out.
//!
//! Each storage target is an arbitrary program run once per file; the
//! literal argv tokens `src` and `dst` are replaced with the local path and
//! the remote destination.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{Error, RemoteStorageConfig, Result};

pub(crate) fn substitute_args(template: &[String], src: &Path, dst: &Path) -> Vec<String> {
    template
        .iter()
        .map(|arg| match arg.as_str() {
            "src" => src.to_string_lossy().into_owned(),
            "dst" => dst.to_string_lossy().into_owned(),
            other => other.to_string(),
        })
        .collect()
}

async fn upload_one(
    storage: Arc<RemoteStorageConfig>,
    file: PathBuf,
    base_dir: PathBuf,
    remove_local: bool,
) -> Result<()> {
    let relative = file
        .strip_prefix(&base_dir)
        .map_err(|_| Error::Config(format!("{} escapes {}", file.display(), base_dir.display())))?;
    let remote = Path::new(&storage.base).join(relative);
    let args = substitute_args(&storage.args, &file, &remote);

    debug!(
        src = %file.display(),
        dst = %remote.display(),
        program = %storage.program,
        "uploading"
    );

    let status = Command::new(&storage.program)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        error!(src = %file.display(), dst = %remote.display(), "upload failed");
        return Err(Error::SubprocessFailed {
            program: storage.program.clone(),
            code: status.code(),
        });
    }

    info!(src = %file.display(), dst = %remote.display(), "uploaded");
    if remove_local {
        if let Err(e) = tokio::fs::remove_file(&file).await {
            warn!(file = %file.display(), "could not delete after upload: {e}");
            return Err(e.into());
        }
    }
    Ok(())
}

/// Upload `files` (all under `base_dir`) to one storage target, bounded by
/// the shared upload semaphore. The first failure is returned after every
/// transfer has finished.
pub(crate) async fn upload_to_storage(
    files: &[PathBuf],
    base_dir: &Path,
    storage: &RemoteStorageConfig,
    semaphore: &Arc<Semaphore>,
    remove_local: bool,
) -> Result<()> {
    let storage = Arc::new(storage.clone());
    let mut set = JoinSet::new();

    for file in files {
        let storage = Arc::clone(&storage);
        let semaphore = Arc::clone(semaphore);
        let file = file.clone();
        let base_dir = base_dir.to_path_buf();

        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            upload_one(storage, file, base_dir, remove_local).await
        });
    }

    let mut first_error = None;
    while let Some(result) = set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(join_error) => {
                if first_error.is_none() {
                    first_error = Some(Error::Config(format!("upload task panicked: {join_error}")));
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Upload to every configured storage in order.
pub(crate) async fn upload_to_all_storages(
    files: &[PathBuf],
    base_dir: &Path,
    storages: &[RemoteStorageConfig],
    semaphore: &Arc<Semaphore>,
    remove_local: bool,
) -> Result<()> {
    if storages.is_empty() {
        info!("no remote storages configured, skipping upload");
        return Ok(());
    }

    for storage in storages {
        info!(base = %storage.base, kind = %storage.kind, "uploading to remote storage");
        upload_to_storage(files, base_dir, storage, semaphore, remove_local).await?;
    }
    Ok(())
}
