use std::fmt;

use crate::error::{FetchError, Result};

/// Platform ids with published artifact builds.
///
/// The id encodes OS, libc/arch and, where relevant, the linked TLS library
/// revision. It is opaque to the rest of the crate: a lookup key and a path
/// component, nothing more.
pub const KNOWN_PLATFORMS: &[&str] = &[
    "darwin",
    "darwin-arm64",
    "windows",
    "debian-openssl-1.0.x",
    "debian-openssl-1.1.x",
    "rhel-openssl-1.0.x",
    "rhel-openssl-1.1.x",
    "linux-arm64-openssl-1.0.x",
    "linux-arm64-openssl-1.1.x",
    "linux-musl",
];

/// A platform target identifier.
///
/// `Platform::new` only accepts ids from [`KNOWN_PLATFORMS`]; use
/// [`Platform::new_unchecked`] when a custom binary override takes
/// responsibility for an id the artifact store does not know.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform(String);

impl Platform {
    pub fn new(id: &str) -> Result<Self> {
        if KNOWN_PLATFORMS.contains(&id) {
            Ok(Self(id.to_owned()))
        } else {
            Err(FetchError::UnknownPlatform(id.to_owned()))
        }
    }

    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an artifact build exists for this id.
    pub fn is_known(&self) -> bool {
        KNOWN_PLATFORMS.contains(&self.0.as_str())
    }

    pub fn is_windows(&self) -> bool {
        self.0 == "windows"
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The platform id of the host running this process.
///
/// Linux maps to the glibc/openssl-1.1.x builds; distro-level libc and TLS
/// sniffing is the job of the calling environment, which can always pass an
/// explicit platform list instead.
pub fn host_platform() -> Platform {
    let id = match (std::env::consts::OS, std::env::consts::ARCH) {
        ("macos", "aarch64") => "darwin-arm64",
        ("macos", _) => "darwin",
        ("windows", _) => "windows",
        ("linux", "aarch64") => "linux-arm64-openssl-1.1.x",
        _ => "debian-openssl-1.1.x",
    };
    Platform::new_unchecked(id)
}

/// Expand an optional explicit target list into the set of platforms to fetch.
///
/// An explicit list is used verbatim; ids unknown to the artifact store are
/// passed through so the orchestrator can match them against custom binary
/// overrides before rejecting them. `None` resolves to the host platform.
/// Deterministic and free of I/O.
pub fn resolve(explicit: Option<&[String]>) -> Vec<Platform> {
    match explicit {
        Some(ids) => ids.iter().map(Platform::new_unchecked).collect(),
        None => vec![host_platform()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_platform_constructs() {
        let p = Platform::new("darwin").unwrap();
        assert_eq!(p.as_str(), "darwin");
        assert!(p.is_known());
        assert!(!p.is_windows());
    }

    #[test]
    fn unknown_platform_rejected() {
        let err = Platform::new("marvin").unwrap_err();
        assert!(matches!(err, FetchError::UnknownPlatform(ref id) if id == "marvin"));
    }

    #[test]
    fn resolve_explicit_is_verbatim() {
        let ids = vec!["darwin".to_owned(), "marvin".to_owned()];
        let platforms = resolve(Some(&ids[..]));
        assert_eq!(platforms.len(), 2);
        assert!(platforms[0].is_known());
        assert!(!platforms[1].is_known());
    }

    #[test]
    fn resolve_default_is_host() {
        let platforms = resolve(None);
        assert_eq!(platforms, vec![host_platform()]);
    }
}
