use std::fmt;

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// The logical engine binaries this crate knows how to fetch.
///
/// The set is closed: adding an engine is a source change, not configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    QueryEngine,
    MigrationEngine,
    IntrospectionEngine,
    Formatter,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::QueryEngine,
        EngineKind::MigrationEngine,
        EngineKind::IntrospectionEngine,
        EngineKind::Formatter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::QueryEngine => "query-engine",
            EngineKind::MigrationEngine => "migration-engine",
            EngineKind::IntrospectionEngine => "introspection-engine",
            EngineKind::Formatter => "formatter",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The file name an engine is installed under for a given platform,
/// e.g. `query-engine-darwin-arm64` or `formatter-windows.exe`.
pub fn binary_name(kind: EngineKind, platform: &Platform) -> String {
    let ext = if platform.is_windows() { ".exe" } else { "" };
    format!("{}-{}{}", kind.as_str(), platform, ext)
}

/// The remote URL of the gzip-compressed artifact for (engine, platform, version).
///
/// Layout: `<base>/<version>/<platform>/<engine-name>[.exe].gz`. A 404 for a
/// combination the store never built is a normal outcome, not a transport bug.
pub fn download_url(base_url: &str, kind: EngineKind, platform: &Platform, version: &str) -> String {
    let ext = if platform.is_windows() { ".exe" } else { "" };
    format!(
        "{}/{}/{}/{}{}.gz",
        base_url.trim_end_matches('/'),
        version,
        platform,
        kind.as_str(),
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_name_plain_on_unix() {
        let p = Platform::new("darwin").unwrap();
        assert_eq!(binary_name(EngineKind::QueryEngine, &p), "query-engine-darwin");
    }

    #[test]
    fn binary_name_exe_on_windows() {
        let p = Platform::new("windows").unwrap();
        assert_eq!(
            binary_name(EngineKind::Formatter, &p),
            "formatter-windows.exe"
        );
    }

    #[test]
    fn download_url_layout() {
        let p = Platform::new("debian-openssl-1.1.x").unwrap();
        let url = download_url(
            "https://binaries.example.com/all_commits/",
            EngineKind::MigrationEngine,
            &p,
            "22b822189f46ef0dc5c5b503368d1bee01213980",
        );
        assert_eq!(
            url,
            "https://binaries.example.com/all_commits/22b822189f46ef0dc5c5b503368d1bee01213980/debian-openssl-1.1.x/migration-engine.gz"
        );
    }

    #[test]
    fn names_total_over_known_cross_product() {
        for kind in EngineKind::ALL {
            for id in crate::platform::KNOWN_PLATFORMS {
                let p = Platform::new(id).unwrap();
                assert!(!binary_name(kind, &p).is_empty());
                assert!(download_url("http://b", kind, &p, "v").ends_with(".gz"));
            }
        }
    }
}
