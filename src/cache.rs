use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::EngineKind;
use crate::error::Result;
use crate::platform::Platform;

/// Sidecar metadata written next to every cache entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheMeta {
    /// The version the artifact was fetched for.
    pub version: String,
    /// Unix timestamp (seconds) of the promotion into the cache.
    pub fetched_at: u64,
}

/// Content-addressed local store of verified engine binaries.
///
/// Layout: `<root>/<version>/<platform>/<engine-name>[.exe]`, with a
/// `<engine-name>.meta.json` sidecar per entry. An entry visible at its
/// canonical path is always a fully written, execution-verified artifact:
/// writers stage into a temp file in the same directory and promote with an
/// atomic rename, and corruption detected later is handled by eviction, never
/// by flagging.
pub struct IntegrityCache {
    root: PathBuf,
}

impl IntegrityCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all entries for (version, platform).
    pub fn entry_dir(&self, platform: &Platform, version: &str) -> PathBuf {
        self.root.join(version).join(platform.as_str())
    }

    /// Canonical path of the entry for (engine, platform, version).
    pub fn entry_path(&self, kind: EngineKind, platform: &Platform, version: &str) -> PathBuf {
        let ext = if platform.is_windows() { ".exe" } else { "" };
        self.entry_dir(platform, version)
            .join(format!("{}{}", kind.as_str(), ext))
    }

    fn meta_path(&self, kind: EngineKind, platform: &Platform, version: &str) -> PathBuf {
        self.entry_dir(platform, version)
            .join(format!("{}.meta.json", kind.as_str()))
    }

    /// Fast-path lookup: the entry file exists and its sidecar records the
    /// requested version. The caller must still probe the file before trusting
    /// it for execution; the bytes may have been corrupted out-of-band.
    pub fn lookup(&self, kind: EngineKind, platform: &Platform, version: &str) -> Option<PathBuf> {
        let path = self.entry_path(kind, platform, version);
        if !path.is_file() {
            return None;
        }
        let meta = fs::read_to_string(self.meta_path(kind, platform, version)).ok()?;
        let meta: CacheMeta = serde_json::from_str(&meta).ok()?;
        if meta.version != version {
            warn!(
                entry = %path.display(),
                recorded = %meta.version,
                requested = version,
                "cache entry version mismatch, treating as absent"
            );
            return None;
        }
        Some(path)
    }

    /// Promote a verified artifact into the cache.
    ///
    /// `src` must be a fully downloaded, probe-verified file living on the
    /// same filesystem as the cache (the orchestrator stages it inside
    /// [`IntegrityCache::entry_dir`]). Promotion is a rename, so a reader of
    /// the canonical path can never observe a partial write.
    pub fn store(
        &self,
        kind: EngineKind,
        platform: &Platform,
        version: &str,
        src: &Path,
    ) -> Result<PathBuf> {
        let dest = self.entry_path(kind, platform, version);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        set_executable(src)?;
        fs::rename(src, &dest)?;

        let meta = CacheMeta {
            version: version.to_owned(),
            fetched_at: unix_now(),
        };
        fs::write(
            self.meta_path(kind, platform, version),
            serde_json::to_string(&meta).expect("cache metadata serializes"),
        )?;

        debug!(entry = %dest.display(), version, "promoted artifact into cache");
        Ok(dest)
    }

    /// Delete the entry and its sidecar. Idempotent if already absent.
    pub fn evict(&self, kind: EngineKind, platform: &Platform, version: &str) -> Result<()> {
        for path in [
            self.entry_path(kind, platform, version),
            self.meta_path(kind, platform, version),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(entry = %path.display(), "evicted cache entry"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Delete cache entries older than `max_age`, returning how many artifact
    /// files were removed. Age comes from the sidecar's `fetched_at`, falling
    /// back to file mtime for entries without one. Empty version/platform
    /// directories are pruned afterwards.
    pub fn sweep(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        if !self.root.is_dir() {
            return Ok(removed);
        }
        let cutoff = unix_now().saturating_sub(max_age.as_secs());

        for version_dir in read_dirs(&self.root)? {
            for platform_dir in read_dirs(&version_dir)? {
                for file in read_files(&platform_dir)? {
                    if file.extension().is_some_and(|e| e == "json" || e == "tmp") {
                        continue;
                    }
                    if entry_age_secs(&file) <= cutoff {
                        fs::remove_file(&file)?;
                        let _ = fs::remove_file(file.with_file_name(format!(
                            "{}.meta.json",
                            file.file_stem().unwrap_or_default().to_string_lossy()
                        )));
                        removed += 1;
                        debug!(entry = %file.display(), "swept stale cache entry");
                    }
                }
                let _ = fs::remove_dir(&platform_dir);
            }
            let _ = fs::remove_dir(&version_dir);
        }
        Ok(removed)
    }
}

/// Unix timestamp at which the entry was cached, from its sidecar if present,
/// else its mtime.
fn entry_age_secs(file: &Path) -> u64 {
    let sidecar = file.with_file_name(format!(
        "{}.meta.json",
        file.file_stem().unwrap_or_default().to_string_lossy()
    ));
    if let Ok(raw) = fs::read_to_string(&sidecar) {
        if let Ok(meta) = serde_json::from_str::<CacheMeta>(&raw) {
            return meta.fetched_at;
        }
    }
    fs::metadata(file)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    Ok(out)
}

fn read_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            out.push(path);
        }
    }
    Ok(out)
}

#[cfg(unix)]
pub(crate) fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub(crate) fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
