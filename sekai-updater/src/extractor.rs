//! Driver for the external Unity asset-bundle extractor CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use sekai_manifest::Category;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{Error, RegionConfig, Result};

/// Export paths under these prefixes keep their full container paths.
const FULL_GROUP_PREFIXES: [&str; 5] = [
    "event/center",
    "event/thumbnail",
    "gacha/icon",
    "fix_prefab/mc_new",
    "mysekai/character/",
];

fn export_group(export_path: &str) -> &'static str {
    if export_path.is_empty() {
        return "container";
    }
    let normalized = export_path.trim_start_matches('/').to_ascii_lowercase();
    if FULL_GROUP_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
    {
        "containerFull"
    } else {
        "container"
    }
}

fn category_text(category: &Category) -> &str {
    match category {
        Category::StartApp => "startapp",
        Category::OnDemand => "ondemand",
        Category::Other(name) => name,
    }
}

fn strip_path_prefix(export_path: &str, category: &Category, config: &RegionConfig) -> String {
    if config.export_by_category {
        "assets/sekai/assetbundle/resources".to_string()
    } else if export_path.starts_with("mysekai") {
        "assets/sekai/assetbundle/resources/ondemand".to_string()
    } else {
        format!(
            "assets/sekai/assetbundle/resources/{}",
            category_text(category).to_ascii_lowercase()
        )
    }
}

/// Where the extractor drops this bundle's files.
pub(crate) fn export_destination(
    output_dir: &Path,
    export_path: &str,
    category: &Category,
    config: &RegionConfig,
) -> PathBuf {
    if config.export_by_category {
        output_dir
            .join(category_text(category).to_ascii_lowercase())
            .join(export_path)
    } else {
        output_dir.join(export_path)
    }
}

/// Assemble the extractor argument vector.
pub(crate) fn extractor_args(
    bundle_file: &Path,
    export_path: &str,
    output_dir: &Path,
    category: &Category,
    config: &RegionConfig,
) -> Vec<String> {
    let mut args = vec![
        bundle_file.to_string_lossy().into_owned(),
        "-m".to_string(),
        "export".to_string(),
        "-t".to_string(),
        "monoBehaviour,textAsset,tex2d,tex2dArray,audio".to_string(),
        "-g".to_string(),
        export_group(export_path).to_string(),
        "-f".to_string(),
        "assetName".to_string(),
        "-o".to_string(),
        output_dir.to_string_lossy().into_owned(),
        "--strip-path-prefix".to_string(),
        strip_path_prefix(export_path, category, config),
        "-r".to_string(),
        "--filter-blacklist-mode".to_string(),
        "--filter-with-regex".to_string(),
    ];

    // Blacklist container formats we are not exporting.
    let mut excluded = Vec::new();
    if !config.export_usm_files {
        excluded.push("usm");
    }
    if !config.export_acb_files {
        excluded.push("acb");
    }
    if !excluded.is_empty() {
        args.push("--filter-by-name".to_string());
        args.push(format!(r".*\.({})$", excluded.join("|")));
    }

    if !config.unity_version.is_empty() {
        args.push("--unity-version".to_string());
        args.push(config.unity_version.clone());
    }

    args
}

/// Run the extractor over one downloaded bundle. Returns the directory the
/// files landed in, or `None` when no extractor is configured (the bundle is
/// skipped, not failed).
pub(crate) async fn extract_bundle(
    cli_path: &str,
    bundle_file: &Path,
    export_path: &str,
    output_dir: &Path,
    category: &Category,
    config: &RegionConfig,
) -> Result<Option<PathBuf>> {
    if cli_path.is_empty() {
        warn!(
            bundle = %bundle_file.display(),
            "extractor CLI not configured, skipping export"
        );
        return Ok(None);
    }

    let args = extractor_args(bundle_file, export_path, output_dir, category, config);
    let destination = export_destination(output_dir, export_path, category, config);
    info!(bundle = %bundle_file.display(), dest = %destination.display(), "extracting bundle");
    debug!(?args, "extractor invocation");

    let status = Command::new(cli_path)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        return Err(Error::SubprocessFailed {
            program: cli_path.to_string(),
            code: status.code(),
        });
    }

    Ok(Some(destination))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_group_selection() {
        assert_eq!(export_group(""), "container");
        assert_eq!(export_group("music/bgm_0001"), "container");
        assert_eq!(export_group("event/center/ev_001"), "containerFull");
        assert_eq!(export_group("/Gacha/Icon/item"), "containerFull");
        assert_eq!(export_group("mysekai/character/mate"), "containerFull");
    }

    #[test]
    fn test_args_include_blacklist_when_formats_disabled() {
        let config = RegionConfig {
            unity_version: "2022.3.21f1".to_string(),
            ..RegionConfig::default()
        };

        let args = extractor_args(
            Path::new("/tmp/jp/bundle"),
            "music/bgm_0001",
            Path::new("/out"),
            &Category::OnDemand,
            &config,
        );

        let filter_pos = args.iter().position(|a| a == "--filter-by-name").unwrap();
        assert_eq!(args[filter_pos + 1], r".*\.(usm|acb)$");
        assert!(args.contains(&"--unity-version".to_string()));
        assert!(args.contains(&"assets/sekai/assetbundle/resources/ondemand".to_string()));
    }

    #[test]
    fn test_args_without_blacklist() {
        let config = RegionConfig {
            export_usm_files: true,
            export_acb_files: true,
            export_by_category: true,
            ..RegionConfig::default()
        };

        let args = extractor_args(
            Path::new("/tmp/bundle"),
            "live/stage",
            Path::new("/out"),
            &Category::StartApp,
            &config,
        );

        assert!(!args.contains(&"--filter-by-name".to_string()));
        assert!(args.contains(&"assets/sekai/assetbundle/resources".to_string()));
    }

    #[test]
    fn test_export_destination_by_category() {
        let mut config = RegionConfig::default();
        let dest = export_destination(
            Path::new("/out"),
            "music/bgm_0001",
            &Category::OnDemand,
            &config,
        );
        assert_eq!(dest, Path::new("/out/music/bgm_0001"));

        config.export_by_category = true;
        let dest = export_destination(
            Path::new("/out"),
            "music/bgm_0001",
            &Category::OnDemand,
            &config,
        );
        assert_eq!(dest, Path::new("/out/ondemand/music/bgm_0001"));
    }
}
