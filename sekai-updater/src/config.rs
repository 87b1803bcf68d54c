//! Pipeline configuration shapes.
//!
//! The binary crate owns loading these from disk; everything here is plain
//! serde data so callers can also construct configs programmatically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, ServerRegion};

fn default_concurrency() -> usize {
    4
}

/// Paths to the external tools the exporter drives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: String,
    pub asset_studio_cli_path: String,
    pub cwebp_path: String,
}

/// One remote-storage target: an arbitrary program whose argv carries the
/// literal placeholders `src` and `dst`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub base: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Per-region updater settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub enabled: bool,
    pub export_by_category: bool,

    pub asset_info_url_template: String,
    pub cp_asset_profile: String,
    pub nuverse_asset_version_url: String,
    pub nuverse_override_app_version: String,
    pub asset_url_template: String,

    pub required_cookies: bool,
    pub cookie_url: Option<String>,
    pub aes_key_hex: String,
    pub aes_iv_hex: String,
    pub unity_version: String,

    pub asset_save_dir: PathBuf,
    pub ledger_path: PathBuf,

    pub start_app_patterns: Vec<String>,
    pub on_demand_patterns: Vec<String>,
    pub skip_patterns: Vec<String>,
    pub download_priority_list: Vec<String>,

    pub export_usm_files: bool,
    pub decode_usm_files: bool,
    pub export_acb_files: bool,
    pub decode_acb_files: bool,
    pub decode_hca_files: bool,
    pub convert_photo_to_webp: bool,
    pub remove_png: bool,
    pub convert_video_to_mp4: bool,
    pub remove_m2v: bool,
    pub convert_audio_to_mp3: bool,
    pub convert_wav_to_flac: bool,
    pub remove_wav: bool,
    pub upload_to_cloud: bool,
    pub remove_local_after_upload: bool,
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrent_downloads: usize,
    #[serde(default = "default_concurrency")]
    pub concurrent_uploads: usize,
    #[serde(default = "default_concurrency")]
    pub concurrent_acb: usize,
    #[serde(default = "default_concurrency")]
    pub concurrent_usm: usize,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// CP asset profile name to profile hash, per region
    #[serde(default)]
    pub profiles: HashMap<ServerRegion, HashMap<String, String>>,
    pub servers: HashMap<ServerRegion, RegionConfig>,
    #[serde(default)]
    pub remote_storages: Vec<RemoteStorageConfig>,
}

impl Config {
    /// Parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("cannot parse config: {e}")))
    }

    pub fn region(&self, region: ServerRegion) -> Result<&RegionConfig> {
        self.servers
            .get(&region)
            .ok_or_else(|| Error::Config(format!("no configuration for region {region}")))
    }
}

/// Inbound update request body (`POST /update_asset`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub server: ServerRegion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let text = r#"
            concurrent_downloads = 8

            [tools]
            ffmpeg_path = "/usr/bin/ffmpeg"

            [servers.jp]
            enabled = true
            asset_info_url_template = "https://assets.example/{env}/{hash}/info"
            asset_url_template = "https://assets.example/{env}/{hash}/{bundle_path}"
            cp_asset_profile = "production"
            aes_key_hex = "000102030405060708090a0b0c0d0e0f"
            aes_iv_hex = "f0e0d0c0b0a090807060504030201000"
            ledger_path = "/var/lib/sekai/jp.json"
            start_app_patterns = ["^title"]
            on_demand_patterns = ["^bgm", "^live"]

            [profiles.jp]
            production = "abcdef123456"

            [[remote_storages]]
            type = "rclone"
            base = "remote:assets"
            program = "rclone"
            args = ["copyto", "src", "dst"]
        "#;

        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.concurrent_downloads, 8);
        assert_eq!(config.concurrent_acb, 4); // default

        let jp = config.region(ServerRegion::Jp).unwrap();
        assert!(jp.enabled);
        assert_eq!(jp.cp_asset_profile, "production");
        assert_eq!(jp.on_demand_patterns.len(), 2);
        assert!(!jp.export_usm_files);

        assert_eq!(config.profiles[&ServerRegion::Jp]["production"], "abcdef123456");
        assert_eq!(config.remote_storages[0].kind, "rclone");
        assert!(config.region(ServerRegion::Cn).is_err());
    }

    #[test]
    fn test_update_request_json_shape() {
        let request: UpdateRequest =
            serde_json::from_str(r#"{"server":"jp","assetVersion":"4.1.0"}"#).unwrap();
        assert_eq!(request.server, ServerRegion::Jp);
        assert_eq!(request.asset_version.as_deref(), Some("4.1.0"));
        assert!(request.asset_hash.is_none());
    }
}
