//! Completion ledger: bundle name to last successfully installed hash.
//!
//! Entries are recorded only after a bundle has been deobfuscated and
//! handed to the exporter without error. Successes buffer in memory and the
//! whole map is rewritten atomically every 50 entries; a crash between
//! flushes loses at most the last sub-batch, which is safe because the
//! manifest hash comparison rediscovers the work.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Result;

const BATCH_SIZE: usize = 50;

struct LedgerState {
    installed: HashMap<String, String>,
    pending: Vec<(String, String)>,
}

/// On-disk JSON ledger with batched writes. One instance per region run;
/// the mutex makes it safe to share across download workers.
pub struct Ledger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Load the ledger, treating a missing file as empty.
    pub async fn load(path: &Path) -> Result<Self> {
        let installed = match tokio::fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(entries = installed.len(), path = %path.display(), "loaded ledger");
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(LedgerState {
                installed,
                pending: Vec::new(),
            }),
        })
    }

    /// Whether `bundle` is already installed at `hash`.
    pub async fn is_current(&self, bundle: &str, hash: &str) -> bool {
        let state = self.state.lock().await;
        state.installed.get(bundle).is_some_and(|h| h == hash)
    }

    /// Copy of the installed map, for read-only planning.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.state.lock().await.installed.clone()
    }

    /// Record a completed bundle; triggers a flush at the batch threshold.
    pub async fn record_success(&self, bundle: String, hash: String) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pending.push((bundle, hash));

        if state.pending.len() >= BATCH_SIZE {
            info!(
                pending = state.pending.len(),
                "batch threshold reached, flushing ledger"
            );
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Merge pending entries and rewrite the ledger regardless of batch
    /// size. Runs unconditionally at the end of a run.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut LedgerState) -> Result<()> {
        if state.pending.is_empty() {
            return Ok(());
        }

        let flushed = state.pending.len();
        for (bundle, hash) in state.pending.drain(..) {
            state.installed.insert(bundle, hash);
        }

        let data = serde_json::to_vec(&state.installed)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(
            flushed,
            total = state.installed.len(),
            path = %self.path.display(),
            "ledger flushed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_disk(path: &Path) -> HashMap<String, String> {
        serde_json::from_slice(&tokio::fs::read(path).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(&dir.path().join("ledger.json")).await.unwrap();
        assert!(ledger.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_threshold_triggers_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Ledger::load(&path).await.unwrap();

        for i in 0..49 {
            ledger
                .record_success(format!("bundle{i}"), format!("hash{i}"))
                .await
                .unwrap();
        }
        assert!(!path.exists(), "flushed before the batch threshold");

        ledger
            .record_success("bundle49".to_string(), "hash49".to_string())
            .await
            .unwrap();
        assert_eq!(read_disk(&path).await.len(), 50);
    }

    #[tokio::test]
    async fn test_final_flush_writes_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Ledger::load(&path).await.unwrap();

        ledger
            .record_success("solo".to_string(), "h1".to_string())
            .await
            .unwrap();
        ledger.flush().await.unwrap();

        let disk = read_disk(&path).await;
        assert_eq!(disk["solo"], "h1");
    }

    #[tokio::test]
    async fn test_flush_keeps_disk_a_superset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        tokio::fs::write(&path, br#"{"old":"kept"}"#).await.unwrap();
        let ledger = Ledger::load(&path).await.unwrap();
        assert!(ledger.is_current("old", "kept").await);

        ledger
            .record_success("new".to_string(), "h2".to_string())
            .await
            .unwrap();
        ledger.flush().await.unwrap();

        let disk = read_disk(&path).await;
        let memory = ledger.snapshot().await;
        for (bundle, hash) in &memory {
            assert_eq!(disk.get(bundle), Some(hash));
        }
    }

    #[tokio::test]
    async fn test_latest_hash_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Ledger::load(&path).await.unwrap();

        ledger
            .record_success("b".to_string(), "first".to_string())
            .await
            .unwrap();
        ledger
            .record_success("b".to_string(), "second".to_string())
            .await
            .unwrap();
        ledger.flush().await.unwrap();

        assert_eq!(read_disk(&path).await["b"], "second");
        assert!(ledger.is_current("b", "second").await);
        assert!(!ledger.is_current("b", "first").await);
    }
}
