//! The download orchestrator: one instance drives one update run for one
//! region.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::StatusCode;
use sekai_manifest::{Cryptor, Manifest};
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::plan::{self, PatternSet};
use crate::{
    exporter, extractor, obfuscate, util, Config, DownloadTask, Error, Ledger, RegionConfig,
    RemoteStorageConfig, Result, ServerRegion, ToolsConfig,
};

const MAX_ATTEMPTS: u32 = 4;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bounded worker pools shared across a run. Injected rather than global so
/// their lifecycle is tied to the run, not the process.
#[derive(Clone)]
pub struct Pools {
    pub acb: Arc<Semaphore>,
    pub usm: Arc<Semaphore>,
    pub upload: Arc<Semaphore>,
}

impl Pools {
    pub fn new(concurrent_acb: usize, concurrent_usm: usize, concurrent_uploads: usize) -> Self {
        Self {
            acb: Arc::new(Semaphore::new(concurrent_acb.max(1))),
            usm: Arc::new(Semaphore::new(concurrent_usm.max(1))),
            upload: Arc::new(Semaphore::new(concurrent_uploads.max(1))),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.concurrent_acb,
            config.concurrent_usm,
            config.concurrent_uploads,
        )
    }
}

/// Final counters for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateSummary {
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives manifest fetch, planning, prioritized fan-out download,
/// deobfuscation, extractor hand-off and the batched completion ledger.
pub struct AssetUpdater {
    region: ServerRegion,
    config: RegionConfig,
    tools: ToolsConfig,
    remote_storages: Vec<RemoteStorageConfig>,
    cp_profiles: HashMap<String, String>,
    asset_version: Option<String>,
    asset_hash: Option<String>,
    concurrent_downloads: usize,
    client: reqwest::Client,
    cryptor: Cryptor,
    pools: Pools,
    cookie: RwLock<Option<String>>,
    cancel: watch::Receiver<bool>,
}

impl AssetUpdater {
    pub fn new(
        region: ServerRegion,
        config: &Config,
        asset_version: Option<String>,
        asset_hash: Option<String>,
        pools: Pools,
        cancel: watch::Receiver<bool>,
    ) -> Result<Self> {
        let region_config = config.region(region)?.clone();
        let cryptor = Cryptor::from_hex(&region_config.aes_key_hex, &region_config.aes_iv_hex)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("ProductName/134 CFNetwork/1408.0.4 Darwin/22.5.0"),
        );
        headers.insert(
            "Accept-Language",
            HeaderValue::from_static("zh-CN,zh-Hans;q=0.9"),
        );
        if !region_config.unity_version.is_empty() {
            let value = HeaderValue::from_str(&region_config.unity_version)
                .map_err(|e| Error::Config(format!("invalid unity_version: {e}")))?;
            headers.insert("X-Unity-Version", value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10));
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;

        let cp_profiles = config
            .profiles
            .get(&region)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            region,
            config: region_config,
            tools: config.tools.clone(),
            remote_storages: config.remote_storages.clone(),
            cp_profiles,
            asset_version,
            asset_hash,
            concurrent_downloads: config.concurrent_downloads.max(1),
            client,
            cryptor,
            pools,
            cookie: RwLock::new(None),
            cancel,
        })
    }

    /// Run one complete update.
    ///
    /// Config and ledger failures at startup are fatal; per-bundle failures
    /// are recorded and skipped. A final ledger flush always runs.
    pub async fn run(self: Arc<Self>) -> Result<UpdateSummary> {
        let start = Instant::now();
        info!(region = %self.region, "update run starting");

        let ledger = Arc::new(Ledger::load(&self.config.ledger_path).await?);

        if self.config.required_cookies {
            self.fetch_cookies().await?;
        }

        let manifest = self.fetch_manifest().await?;
        let patterns = PatternSet::compile(&self.config);
        let installed = ledger.snapshot().await;

        let mut tasks = plan::build_download_list(self.region, &patterns, &manifest, &installed);
        if tasks.is_empty() {
            info!("no new assets to download");
            return Ok(UpdateSummary::default());
        }
        plan::prioritize(&mut tasks, &patterns);
        info!(count = tasks.len(), "found new assets to download");

        let planned = tasks.len();
        let (succeeded, failed) = Arc::clone(&self)
            .download_all(tasks, Arc::clone(&ledger))
            .await;

        info!("flushing remaining pending results");
        ledger.flush().await?;

        info!(
            succeeded,
            failed,
            elapsed = ?start.elapsed(),
            "all downloads completed"
        );
        Ok(UpdateSummary {
            planned,
            succeeded,
            failed,
        })
    }

    /// Session-cookie handshake for regions that require it.
    async fn fetch_cookies(&self) -> Result<()> {
        let Some(url) = self.config.cookie_url.as_deref() else {
            return Ok(());
        };

        let mut last_error = None;
        for _ in 0..MAX_ATTEMPTS {
            match self.client.post(url).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    if let Some(cookie) = resp
                        .headers()
                        .get(SET_COOKIE)
                        .and_then(|v| v.to_str().ok())
                    {
                        *self.cookie.write().await = Some(cookie.to_string());
                    }
                    return Ok(());
                }
                Ok(resp) => {
                    last_error = Some(Error::HttpStatus(resp.status().as_u16()));
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    last_error = Some(e.into());
                    sleep(RETRY_DELAY).await;
                }
            }
        }
        Err(last_error.unwrap_or(Error::HttpStatus(0)))
    }

    fn cp_profile_hash(&self) -> &str {
        self.cp_profiles
            .get(&self.config.cp_asset_profile)
            .map(String::as_str)
            .unwrap_or("")
    }

    fn build_cp_manifest_url(&self) -> String {
        self.config
            .asset_info_url_template
            .replace("{env}", &self.config.cp_asset_profile)
            .replace("{hash}", self.cp_profile_hash())
            .replace("{asset_version}", self.asset_version.as_deref().unwrap_or(""))
            .replace("{asset_hash}", self.asset_hash.as_deref().unwrap_or(""))
    }

    fn build_nuverse_manifest_url(&self, remote_asset_version: &str) -> String {
        self.config
            .asset_info_url_template
            .replace("{app_version}", &self.config.nuverse_override_app_version)
            .replace("{asset_version}", remote_asset_version)
    }

    fn build_asset_url(&self, download_path: &str) -> String {
        let url = self
            .config
            .asset_url_template
            .replace("{bundle_path}", download_path);

        if self.region.uses_cp_profile() {
            url.replace("{asset_version}", self.asset_version.as_deref().unwrap_or(""))
                .replace("{asset_hash}", self.asset_hash.as_deref().unwrap_or(""))
                .replace("{env}", &self.config.cp_asset_profile)
                .replace("{hash}", self.cp_profile_hash())
        } else {
            url.replace(
                "{app_version}",
                &self.config.nuverse_override_app_version,
            )
        }
    }

    /// Fetch, decrypt and decode the bundle manifest.
    async fn fetch_manifest(&self) -> Result<Manifest> {
        let url = if self.region.uses_cp_profile() {
            self.build_cp_manifest_url()
        } else {
            // Nuverse regions publish the current asset version separately.
            let version_url = self
                .config
                .nuverse_asset_version_url
                .replace("{app_version}", &self.config.nuverse_override_app_version);
            let resp = self.request(&version_url).await?;
            if resp.status() != StatusCode::OK {
                return Err(Error::HttpStatus(resp.status().as_u16()));
            }
            let remote_version = resp.text().await?;
            self.build_nuverse_manifest_url(&remote_version)
        };

        let url = format!("{url}{}", util::time_arg());
        debug!(%url, "fetching manifest");

        let resp = self.request(&url).await?;
        if resp.status() != StatusCode::OK {
            return Err(Error::HttpStatus(resp.status().as_u16()));
        }
        let body = resp.bytes().await?;
        Ok(self.cryptor.unpack_manifest(&body)?)
    }

    /// GET with up to four attempts. Transport errors and 5xx retry after a
    /// one-second delay; any other status (4xx included) is returned as-is.
    async fn request(&self, url: &str) -> Result<reqwest::Response> {
        let mut last_error: Option<Error> = None;

        for _ in 0..MAX_ATTEMPTS {
            if *self.cancel.borrow() {
                return Err(Error::Cancelled);
            }

            let mut request = self.client.get(url);
            if let Some(cookie) = self.cookie.read().await.as_deref() {
                request = request.header(COOKIE, cookie);
            }

            match request.send().await {
                Ok(resp) if resp.status().as_u16() >= 500 => {
                    warn!(url, status = resp.status().as_u16(), "server error, retrying");
                    last_error = Some(Error::HttpStatus(resp.status().as_u16()));
                    sleep(RETRY_DELAY).await;
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(url, "transport error, retrying: {e}");
                    last_error = Some(e.into());
                    sleep(RETRY_DELAY).await;
                }
            }
        }

        Err(last_error.unwrap_or(Error::HttpStatus(0)))
    }

    /// Download one bundle, strip its obfuscation, stage it to a per-region
    /// temp file and hand it to the extractor + exporter.
    async fn download_and_export(&self, task: &DownloadTask) -> Result<()> {
        let url = format!("{}{}", self.build_asset_url(&task.download_path), util::time_arg());

        let resp = self.request(&url).await?;
        if resp.status() != StatusCode::OK {
            return Err(Error::HttpStatus(resp.status().as_u16()));
        }
        let body = resp.bytes().await?;
        let body = obfuscate::deobfuscate(&body);

        let staged = std::env::temp_dir()
            .join(self.region.as_str())
            .join(&task.bundle_name);
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&staged, &body).await?;

        let result = self.extract_and_export(&staged, task).await;
        let _ = tokio::fs::remove_file(&staged).await;
        result
    }

    async fn extract_and_export(&self, bundle_file: &Path, task: &DownloadTask) -> Result<()> {
        let Some(export_dir) = extractor::extract_bundle(
            &self.tools.asset_studio_cli_path,
            bundle_file,
            &task.bundle_name,
            &self.config.asset_save_dir,
            &task.category,
            &self.config,
        )
        .await?
        else {
            return Ok(());
        };

        exporter::post_process(
            &export_dir,
            &self.config,
            &self.tools,
            &self.pools,
            &self.remote_storages,
        )
        .await
    }

    /// Fan the sorted task list out over the download worker pool.
    ///
    /// Cancellation closes the task channel: the feeder stops, workers
    /// drain, and no ledger entry is written for a cancelled task.
    async fn download_all(
        self: Arc<Self>,
        tasks: Vec<DownloadTask>,
        ledger: Arc<Ledger>,
    ) -> (usize, usize) {
        let total = tasks.len();
        let (tx, rx) = mpsc::channel::<DownloadTask>(total.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut feeder_cancel = self.cancel.clone();
        tokio::spawn(async move {
            for task in tasks {
                if *feeder_cancel.borrow_and_update() {
                    break;
                }
                if tx.send(task).await.is_err() {
                    break;
                }
            }
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.concurrent_downloads {
            let updater = Arc::clone(&self);
            let ledger = Arc::clone(&ledger);
            let rx = Arc::clone(&rx);

            workers.spawn(async move {
                let mut succeeded = 0usize;
                let mut failed = 0usize;

                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else { break };

                    match updater.download_and_export(&task).await {
                        Ok(()) => {
                            info!(worker_id, bundle = %task.bundle_name, "successfully downloaded");
                            succeeded += 1;
                            if let Err(e) = ledger
                                .record_success(task.bundle_name.clone(), task.hash.clone())
                                .await
                            {
                                error!("failed to record ledger entry: {e}");
                            }
                        }
                        Err(e) => {
                            error!(worker_id, bundle = %task.bundle_name, "download failed: {e}");
                            failed += 1;
                        }
                    }
                }

                (succeeded, failed)
            });
        }

        let mut succeeded = 0;
        let mut failed = 0;
        while let Some(result) = workers.join_next().await {
            if let Ok((s, f)) = result {
                succeeded += s;
                failed += f;
            }
        }

        info!(succeeded, failed, total, "download pool drained");
        (succeeded, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut servers = HashMap::new();
        servers.insert(
            ServerRegion::Jp,
            RegionConfig {
                enabled: true,
                asset_info_url_template:
                    "https://assets.example/{env}/{hash}/manifest/{asset_version}".to_string(),
                asset_url_template:
                    "https://assets.example/{env}/{hash}/bundles/{bundle_path}".to_string(),
                cp_asset_profile: "production".to_string(),
                aes_key_hex: "000102030405060708090a0b0c0d0e0f".to_string(),
                aes_iv_hex: "f0e0d0c0b0a090807060504030201000".to_string(),
                ..RegionConfig::default()
            },
        );
        servers.insert(
            ServerRegion::Tw,
            RegionConfig {
                enabled: true,
                asset_info_url_template:
                    "https://nuverse.example/{app_version}/manifest/{asset_version}".to_string(),
                asset_url_template: "https://nuverse.example/{app_version}/{bundle_path}"
                    .to_string(),
                nuverse_asset_version_url: "https://nuverse.example/{app_version}/version"
                    .to_string(),
                nuverse_override_app_version: "3.3.0".to_string(),
                aes_key_hex: "000102030405060708090a0b0c0d0e0f".to_string(),
                aes_iv_hex: "f0e0d0c0b0a090807060504030201000".to_string(),
                ..RegionConfig::default()
            },
        );

        let mut profiles = HashMap::new();
        profiles.insert(
            ServerRegion::Jp,
            [("production".to_string(), "prodhash123".to_string())]
                .into_iter()
                .collect(),
        );

        Config {
            proxy: None,
            concurrent_downloads: 2,
            concurrent_uploads: 2,
            concurrent_acb: 2,
            concurrent_usm: 2,
            tools: ToolsConfig::default(),
            profiles,
            servers,
            remote_storages: vec![],
        }
    }

    fn updater(region: ServerRegion) -> AssetUpdater {
        let (_tx, cancel) = watch::channel(false);
        AssetUpdater::new(
            region,
            &test_config(),
            Some("4.1.0".to_string()),
            Some("deadbeef".to_string()),
            Pools::new(2, 2, 2),
            cancel,
        )
        .unwrap()
    }

    #[test]
    fn test_cp_manifest_url_substitution() {
        let updater = updater(ServerRegion::Jp);
        assert_eq!(
            updater.build_cp_manifest_url(),
            "https://assets.example/production/prodhash123/manifest/4.1.0"
        );
    }

    #[test]
    fn test_cp_asset_url_substitution() {
        let updater = updater(ServerRegion::Jp);
        assert_eq!(
            updater.build_asset_url("bgm_0001"),
            "https://assets.example/production/prodhash123/bundles/bgm_0001"
        );
    }

    #[test]
    fn test_nuverse_urls_use_app_version() {
        let updater = updater(ServerRegion::Tw);
        assert_eq!(
            updater.build_nuverse_manifest_url("77"),
            "https://nuverse.example/3.3.0/manifest/77"
        );
        assert_eq!(
            updater.build_asset_url("cdn/v4/bgm_0001"),
            "https://nuverse.example/3.3.0/cdn/v4/bgm_0001"
        );
    }

    #[test]
    fn test_unknown_region_is_config_error() {
        let (_tx, cancel) = watch::channel(false);
        let result = AssetUpdater::new(
            ServerRegion::Cn,
            &test_config(),
            None,
            None,
            Pools::new(1, 1, 1),
            cancel,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_cancelled_request_short_circuits() {
        let (tx, cancel) = watch::channel(false);
        let updater = AssetUpdater::new(
            ServerRegion::Jp,
            &test_config(),
            None,
            None,
            Pools::new(1, 1, 1),
            cancel,
        )
        .unwrap();

        tx.send(true).unwrap();
        let err = updater.request("https://assets.example/x").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
