//! Server regions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Game server region. JP and EN are served through CP asset profiles;
/// TW/KR/CN go through Nuverse distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRegion {
    Jp,
    En,
    Tw,
    Kr,
    Cn,
}

impl ServerRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRegion::Jp => "jp",
            ServerRegion::En => "en",
            ServerRegion::Tw => "tw",
            ServerRegion::Kr => "kr",
            ServerRegion::Cn => "cn",
        }
    }

    /// CP-profile regions resolve manifests through `{env}`/`{hash}`
    /// placeholders and download bundles by bare name.
    pub fn uses_cp_profile(&self) -> bool {
        matches!(self, ServerRegion::Jp | ServerRegion::En)
    }
}

impl fmt::Display for ServerRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerRegion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jp" => Ok(ServerRegion::Jp),
            "en" => Ok(ServerRegion::En),
            "tw" => Ok(ServerRegion::Tw),
            "kr" => Ok(ServerRegion::Kr),
            "cn" => Ok(ServerRegion::Cn),
            other => Err(Error::UnknownRegion(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for name in ["jp", "en", "tw", "kr", "cn"] {
            let region: ServerRegion = name.parse().unwrap();
            assert_eq!(region.to_string(), name);
        }
        assert!("xx".parse::<ServerRegion>().is_err());
    }

    #[test]
    fn test_cp_profile_split() {
        assert!(ServerRegion::Jp.uses_cp_profile());
        assert!(ServerRegion::En.uses_cp_profile());
        assert!(!ServerRegion::Tw.uses_cp_profile());
        assert!(!ServerRegion::Kr.uses_cp_profile());
        assert!(!ServerRegion::Cn.uses_cp_profile());
    }
}
