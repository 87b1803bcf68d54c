//! Download planning: filtering, path rules, prioritization.

use std::collections::HashMap;

use regex::Regex;
use sekai_manifest::{BundleDescriptor, Category, Manifest};
use tracing::{debug, warn};

use crate::{RegionConfig, ServerRegion};

/// One bundle scheduled for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Server path, including the Nuverse prefix when present
    pub download_path: String,
    pub bundle_name: String,
    pub hash: String,
    pub category: Category,
}

/// Compiled allow/skip/priority patterns for one region. Invalid patterns
/// are reported and ignored rather than failing the run.
pub(crate) struct PatternSet {
    skip: Vec<Regex>,
    start_app: Vec<Regex>,
    on_demand: Vec<Regex>,
    priority: Vec<Regex>,
}

fn compile_all(patterns: &[String], what: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("invalid {what} pattern {pattern:?}: {e}");
                None
            }
        })
        .collect()
}

impl PatternSet {
    pub fn compile(config: &RegionConfig) -> Self {
        Self {
            skip: compile_all(&config.skip_patterns, "skip"),
            start_app: compile_all(&config.start_app_patterns, "StartApp"),
            on_demand: compile_all(&config.on_demand_patterns, "OnDemand"),
            priority: compile_all(&config.download_priority_list, "priority"),
        }
    }

    fn should_skip(&self, bundle_name: &str) -> bool {
        self.skip.iter().any(|re| re.is_match(bundle_name))
    }

    /// A bundle downloads only when its category has a matching
    /// allow-pattern; an empty list disables the category.
    fn should_download(&self, bundle_name: &str, category: &Category) -> bool {
        let allow = match category {
            Category::StartApp => &self.start_app,
            Category::OnDemand => &self.on_demand,
            Category::Other(_) => return false,
        };
        allow.iter().any(|re| re.is_match(bundle_name))
    }

    /// Index of the first matching priority pattern; unmatched bundles sort
    /// last.
    fn priority(&self, bundle_name: &str) -> usize {
        self.priority
            .iter()
            .position(|re| re.is_match(bundle_name))
            .unwrap_or(usize::MAX)
    }
}

/// CP regions download bundles by bare name; Nuverse regions prefix the
/// descriptor's download path when it provides one.
fn download_path(region: ServerRegion, bundle_name: &str, descriptor: &BundleDescriptor) -> String {
    if region.uses_cp_profile() {
        return bundle_name.to_string();
    }
    match &descriptor.download_path {
        Some(prefix) => format!("{prefix}/{bundle_name}"),
        None => bundle_name.to_string(),
    }
}

/// Select the bundles worth downloading for this run.
pub(crate) fn build_download_list(
    region: ServerRegion,
    patterns: &PatternSet,
    manifest: &Manifest,
    installed: &HashMap<String, String>,
) -> Vec<DownloadTask> {
    let mut tasks = Vec::new();

    for (bundle_name, descriptor) in &manifest.bundles {
        if patterns.should_skip(bundle_name) {
            continue;
        }
        if !patterns.should_download(bundle_name, &descriptor.category) {
            continue;
        }
        if installed.get(bundle_name) == Some(&descriptor.hash) {
            continue;
        }

        tasks.push(DownloadTask {
            download_path: download_path(region, bundle_name, descriptor),
            bundle_name: bundle_name.clone(),
            hash: descriptor.hash.clone(),
            category: descriptor.category.clone(),
        });
    }

    debug!(
        planned = tasks.len(),
        total = manifest.bundles.len(),
        "built download list"
    );
    tasks
}

/// Sort by `(priority asc, bundle name asc)` so progress is deterministic.
pub(crate) fn prioritize(tasks: &mut [DownloadTask], patterns: &PatternSet) {
    tasks.sort_by(|a, b| {
        patterns
            .priority(&a.bundle_name)
            .cmp(&patterns.priority(&b.bundle_name))
            .then_with(|| a.bundle_name.cmp(&b.bundle_name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, hash: &str, category: Category, prefix: Option<&str>) -> BundleDescriptor {
        BundleDescriptor {
            bundle_name: name.to_string(),
            cache_file_name: String::new(),
            cache_directory_name: String::new(),
            hash: hash.to_string(),
            category,
            crc: 0,
            file_size: 0,
            dependencies: vec![],
            paths: None,
            is_builtin: false,
            is_relocate: None,
            md5_hash: None,
            download_path: prefix.map(str::to_string),
        }
    }

    fn manifest(bundles: Vec<BundleDescriptor>) -> Manifest {
        Manifest {
            version: None,
            os: None,
            bundles: bundles
                .into_iter()
                .map(|d| (d.bundle_name.clone(), d))
                .collect(),
        }
    }

    fn region_config() -> RegionConfig {
        RegionConfig {
            skip_patterns: vec!["^android$".to_string()],
            start_app_patterns: vec!["^title".to_string()],
            on_demand_patterns: vec!["^bgm".to_string(), "^live".to_string()],
            download_priority_list: vec!["^live".to_string(), "^bgm".to_string()],
            ..RegionConfig::default()
        }
    }

    #[test]
    fn test_plan_filters_and_paths() {
        let patterns = PatternSet::compile(&region_config());
        let manifest = manifest(vec![
            descriptor("title_main", "h1", Category::StartApp, None),
            descriptor("bgm_0001", "h2", Category::OnDemand, Some("cdn/v4")),
            descriptor("android", "h3", Category::OnDemand, None),
            descriptor("event_bg", "h4", Category::OnDemand, None),
            descriptor("card_art", "h5", Category::StartApp, None),
        ]);

        let tasks = build_download_list(ServerRegion::Tw, &patterns, &manifest, &HashMap::new());
        let mut names: Vec<&str> = tasks.iter().map(|t| t.bundle_name.as_str()).collect();
        names.sort_unstable();
        // "android" skipped; "event_bg"/"card_art" match no allow-pattern
        assert_eq!(names, ["bgm_0001", "title_main"]);

        let bgm = tasks.iter().find(|t| t.bundle_name == "bgm_0001").unwrap();
        assert_eq!(bgm.download_path, "cdn/v4/bgm_0001");

        // CP regions ignore the descriptor prefix
        let tasks = build_download_list(ServerRegion::Jp, &patterns, &manifest, &HashMap::new());
        let bgm = tasks.iter().find(|t| t.bundle_name == "bgm_0001").unwrap();
        assert_eq!(bgm.download_path, "bgm_0001");
    }

    #[test]
    fn test_plan_is_idempotent_when_ledger_covers_manifest() {
        let patterns = PatternSet::compile(&region_config());
        let manifest = manifest(vec![
            descriptor("title_main", "h1", Category::StartApp, None),
            descriptor("bgm_0001", "h2", Category::OnDemand, None),
        ]);

        let installed: HashMap<String, String> = [
            ("title_main".to_string(), "h1".to_string()),
            ("bgm_0001".to_string(), "h2".to_string()),
        ]
        .into_iter()
        .collect();

        let tasks = build_download_list(ServerRegion::Jp, &patterns, &manifest, &installed);
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_changed_hash_is_rescheduled() {
        let patterns = PatternSet::compile(&region_config());
        let manifest = manifest(vec![descriptor("bgm_0001", "new", Category::OnDemand, None)]);

        let installed: HashMap<String, String> =
            [("bgm_0001".to_string(), "old".to_string())].into_iter().collect();

        let tasks = build_download_list(ServerRegion::Jp, &patterns, &manifest, &installed);
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_prioritize_is_stable_and_deterministic() {
        let patterns = PatternSet::compile(&region_config());
        let manifest = manifest(vec![
            descriptor("bgm_0002", "h", Category::OnDemand, None),
            descriptor("live_0001", "h", Category::OnDemand, None),
            descriptor("bgm_0001", "h", Category::OnDemand, None),
            descriptor("title_zzz", "h", Category::StartApp, None),
        ]);

        let mut tasks = build_download_list(ServerRegion::Jp, &patterns, &manifest, &HashMap::new());
        prioritize(&mut tasks, &patterns);

        let names: Vec<&str> = tasks.iter().map(|t| t.bundle_name.as_str()).collect();
        // live (priority 0), then bgm (priority 1) by name, then unmatched
        assert_eq!(names, ["live_0001", "bgm_0001", "bgm_0002", "title_zzz"]);

        let mut again = tasks.clone();
        prioritize(&mut again, &patterns);
        assert_eq!(tasks, again);
    }

    #[test]
    fn test_unknown_category_never_downloads() {
        let patterns = PatternSet::compile(&region_config());
        let manifest = manifest(vec![descriptor(
            "bgm_0001",
            "h",
            Category::Other("Preload".to_string()),
            None,
        )]);

        let tasks = build_download_list(ServerRegion::Jp, &patterns, &manifest, &HashMap::new());
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_invalid_patterns_are_ignored() {
        let config = RegionConfig {
            on_demand_patterns: vec!["([unclosed".to_string(), "^bgm".to_string()],
            ..RegionConfig::default()
        };
        let patterns = PatternSet::compile(&config);
        let manifest = manifest(vec![descriptor("bgm_0001", "h", Category::OnDemand, None)]);

        let tasks = build_download_list(ServerRegion::Jp, &patterns, &manifest, &HashMap::new());
        assert_eq!(tasks.len(), 1);
    }
}
