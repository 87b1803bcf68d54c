//! Typed manifest shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a bundle is scheduled by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    StartApp,
    OnDemand,
    /// Forward compatibility: unknown categories are kept verbatim.
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetOs {
    #[serde(rename = "ios")]
    Ios,
    #[serde(rename = "android")]
    Android,
}

/// One bundle entry. `hash` is the content identifier: two descriptors with
/// the same name and hash denote identical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDescriptor {
    pub bundle_name: String,
    pub cache_file_name: String,
    pub cache_directory_name: String,
    pub hash: String,
    pub category: Category,
    pub crc: i64,
    pub file_size: i64,
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    pub is_builtin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_relocate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<String>,
}

/// A decoded asset-bundle manifest; owned by the orchestrator for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<TargetOs>,
    pub bundles: HashMap<String, BundleDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cryptor;

    pub(crate) fn descriptor(name: &str, hash: &str, category: Category) -> BundleDescriptor {
        BundleDescriptor {
            bundle_name: name.to_string(),
            cache_file_name: format!("{hash}.bundle"),
            cache_directory_name: "cache".to_string(),
            hash: hash.to_string(),
            category,
            crc: 12345,
            file_size: 678,
            dependencies: vec![],
            paths: None,
            is_builtin: false,
            is_relocate: None,
            md5_hash: None,
            download_path: None,
        }
    }

    #[test]
    fn test_manifest_roundtrip_through_cryptor() {
        let cryptor = Cryptor::from_hex(
            "000102030405060708090a0b0c0d0e0f",
            "f0e0d0c0b0a090807060504030201000",
        )
        .unwrap();

        let mut bundles = HashMap::new();
        bundles.insert(
            "bgm_0001".to_string(),
            descriptor("bgm_0001", "abc123", Category::OnDemand),
        );
        bundles.insert(
            "title_screen".to_string(),
            descriptor("title_screen", "def456", Category::StartApp),
        );
        let manifest = Manifest {
            version: Some("4.1.0".to_string()),
            os: Some(TargetOs::Android),
            bundles,
        };

        let wrapped = cryptor.pack(&manifest).unwrap();
        let decoded = cryptor.unpack_manifest(&wrapped).unwrap();

        assert_eq!(decoded.version.as_deref(), Some("4.1.0"));
        assert_eq!(decoded.os, Some(TargetOs::Android));
        assert_eq!(decoded.bundles.len(), 2);
        assert_eq!(decoded.bundles["bgm_0001"].hash, "abc123");
        assert_eq!(decoded.bundles["bgm_0001"].category, Category::OnDemand);
        assert_eq!(
            decoded.bundles["title_screen"].category,
            Category::StartApp
        );
    }

    #[test]
    fn test_unknown_category_is_preserved() {
        let raw = rmp_serde::to_vec_named(&Category::Other("Preload".to_string())).unwrap();
        let decoded: Category = rmp_serde::from_slice(&raw).unwrap();
        assert_eq!(decoded, Category::Other("Preload".to_string()));
    }

    #[test]
    fn test_optional_fields_absent() {
        let desc = descriptor("x", "h", Category::StartApp);
        let raw = rmp_serde::to_vec_named(&desc).unwrap();
        let decoded: BundleDescriptor = rmp_serde::from_slice(&raw).unwrap();
        assert!(decoded.download_path.is_none());
        assert!(decoded.md5_hash.is_none());
    }
}
