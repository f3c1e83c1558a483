use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use reqwest::Client;
use tracing::{debug, warn};

use crate::cache::{set_executable, IntegrityCache};
use crate::download::{self, ProgressFn};
use crate::engine::{binary_name, download_url, EngineKind};
use crate::error::{FetchError, Result};
use crate::lock::{DownloadLock, LOCK_FILE_NAME};
use crate::platform::{self, Platform};
use crate::probe::{self, DEFAULT_PROBE_TIMEOUT};

/// The pinned engines build fetched when no version is given.
pub const DEFAULT_ENGINES_VERSION: &str = "22b822189f46ef0dc5c5b503368d1bee01213980";

/// Default artifact store endpoint. Overridable per invocation for mirrors.
pub const DEFAULT_BASE_URL: &str = "https://binaries.engine-store.dev/all_commits";

const DEFAULT_CONCURRENCY: usize = 4;

/// How many times a failed download/verify cycle is re-attempted per item.
/// Carried as an explicit counter so the state machine terminates decidably.
const DOWNLOAD_RETRIES: u32 = 1;

/// Configuration for one [`download`] invocation.
///
/// Everything is explicit here: no global or environment state is consulted.
#[derive(Clone)]
pub struct FetchOptions {
    engines: HashMap<EngineKind, Vec<PathBuf>>,
    version: Option<String>,
    platforms: Option<Vec<String>>,
    custom_binaries: HashMap<EngineKind, PathBuf>,
    fail_silent: bool,
    base_url: String,
    cache_dir: PathBuf,
    concurrency: usize,
    overall_timeout: Option<Duration>,
    probe_timeout: Duration,
    progress: Option<ProgressFn>,
}

impl FetchOptions {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            engines: HashMap::new(),
            version: None,
            platforms: None,
            custom_binaries: HashMap::new(),
            fail_silent: false,
            base_url: DEFAULT_BASE_URL.to_owned(),
            cache_dir: cache_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            overall_timeout: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            progress: None,
        }
    }

    /// Request `kind` to be placed in `dest` (builder). May be called multiple
    /// times per engine to fan one artifact out to several directories.
    pub fn engine(mut self, kind: EngineKind, dest: impl Into<PathBuf>) -> Self {
        self.engines.entry(kind).or_default().push(dest.into());
        self
    }

    /// Pin the engines version to fetch (builder). Defaults to
    /// [`DEFAULT_ENGINES_VERSION`].
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Explicit platform target list (builder). Defaults to the host platform.
    pub fn platforms(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.platforms = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Use a caller-supplied binary for `kind` instead of fetching (builder).
    /// The path is probed and used verbatim; it is never auto-healed.
    pub fn custom_binary(mut self, kind: EngineKind, path: impl Into<PathBuf>) -> Self {
        self.custom_binaries.insert(kind, path.into());
        self
    }

    /// Record per-item failures in the result instead of failing the call,
    /// as long as at least one item succeeds (builder).
    pub fn fail_silent(mut self, yes: bool) -> Self {
        self.fail_silent = yes;
        self
    }

    /// Point at a different artifact store, e.g. an internal mirror (builder).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bound on concurrently processed (engine, platform) items (builder).
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Overall wall-clock bound for the whole invocation (builder). On expiry
    /// in-flight downloads are aborted and their temp files discarded.
    pub fn overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = Some(timeout);
        self
    }

    /// Bound on a single version probe (builder).
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Progress callback for downloads (builder). See
    /// [`crate::progress::default_progress_fn`] for a terminal bar.
    pub fn progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// One failed (engine, platform) item.
#[derive(Debug)]
pub struct ItemFailure {
    pub engine: EngineKind,
    pub platform: Platform,
    pub error: FetchError,
}

/// Outcome of a [`download`] call: the usable artifact path per succeeded
/// (engine, platform) item, plus every recorded per-item failure. Populated
/// for the successes even when siblings failed.
#[derive(Debug, Default)]
pub struct DownloadResult {
    pub paths: HashMap<EngineKind, HashMap<String, PathBuf>>,
    pub failures: Vec<ItemFailure>,
}

impl DownloadResult {
    pub fn path(&self, kind: EngineKind, platform_id: &str) -> Option<&Path> {
        self.paths.get(&kind)?.get(platform_id).map(PathBuf::as_path)
    }
}

struct Ctx {
    client: Client,
    cache: IntegrityCache,
    custom_binaries: HashMap<EngineKind, PathBuf>,
    base_url: String,
    probe_timeout: Duration,
    progress: Option<ProgressFn>,
    /// Set when another invocation holds a fresh advisory lock; cache hits are
    /// still served, downloads are skipped.
    skip_downloads: bool,
}

struct WorkItem {
    engine: EngineKind,
    platform: Platform,
    version: String,
    dests: Vec<PathBuf>,
}

/// Fetch every requested (engine, platform) combination.
///
/// Per item: a custom binary override is probed and used verbatim; otherwise
/// the cache is consulted and re-verified, corrupt entries are evicted and
/// re-downloaded, and fresh downloads are verified before being promoted into
/// the cache and copied to the destination directories. Items run concurrently
/// and fail independently; see [`FetchOptions::fail_silent`] for how failures
/// escalate.
pub async fn download(options: FetchOptions) -> Result<DownloadResult> {
    match options.overall_timeout {
        Some(t) => tokio::time::timeout(t, run(options))
            .await
            .map_err(|_| FetchError::Timeout)?,
        None => run(options).await,
    }
}

async fn run(options: FetchOptions) -> Result<DownloadResult> {
    let version = options
        .version
        .clone()
        .unwrap_or_else(|| DEFAULT_ENGINES_VERSION.to_owned());
    let platforms = platform::resolve(options.platforms.as_deref());

    fs::create_dir_all(&options.cache_dir)?;
    // Held for the whole invocation; released on drop on every exit path,
    // including cancellation by the overall timeout.
    let lock = DownloadLock::acquire(&options.cache_dir)?;
    let skip_downloads = lock.is_none();
    if skip_downloads {
        debug!("another invocation is downloading; serving cache hits only");
    }

    let mut items = Vec::new();
    for (&engine, dests) in &options.engines {
        for p in &platforms {
            items.push(WorkItem {
                engine,
                platform: p.clone(),
                version: version.clone(),
                dests: dests.clone(),
            });
        }
    }
    debug!(items = items.len(), version = %version, "expanded engine download work set");

    let ctx = Arc::new(Ctx {
        client: download::build_client()?,
        cache: IntegrityCache::new(&options.cache_dir),
        custom_binaries: options.custom_binaries.clone(),
        base_url: options.base_url.clone(),
        probe_timeout: options.probe_timeout,
        progress: options.progress.clone(),
        skip_downloads,
    });

    let outcomes = stream::iter(items.into_iter().map(|item| {
        let ctx = Arc::clone(&ctx);
        async move { process_item(&ctx, item).await }
    }))
    .buffer_unordered(options.concurrency)
    .collect::<Vec<_>>()
    .await;
    drop(lock);

    let mut result = DownloadResult::default();
    for outcome in outcomes {
        match outcome {
            Ok((engine, platform_id, path)) => {
                result
                    .paths
                    .entry(engine)
                    .or_default()
                    .insert(platform_id, path);
            }
            Err(failure) => {
                warn!(
                    engine = %failure.engine,
                    platform = %failure.platform,
                    error = %failure.error,
                    "engine download item failed"
                );
                result.failures.push(failure);
            }
        }
    }

    if !result.failures.is_empty() {
        let succeeded: usize = result.paths.values().map(HashMap::len).sum();
        if !options.fail_silent || succeeded == 0 {
            return Err(result.failures.remove(0).error);
        }
    }
    Ok(result)
}

type ItemOutcome = std::result::Result<(EngineKind, String, PathBuf), ItemFailure>;

async fn process_item(ctx: &Ctx, item: WorkItem) -> ItemOutcome {
    let WorkItem {
        engine,
        platform,
        version,
        dests,
    } = item;

    // Custom binary override: probed, used verbatim, fatal if unusable.
    if let Some(custom) = ctx.custom_binaries.get(&engine) {
        return match probe::probe(custom, ctx.probe_timeout).await {
            Ok(_) => {
                if let Err(error) = copy_to_destinations(custom, engine, &platform, &dests) {
                    return Err(ItemFailure {
                        engine,
                        platform,
                        error,
                    });
                }
                debug!(%engine, %platform, path = %custom.display(), "using custom binary");
                Ok((engine, platform.as_str().to_owned(), custom.clone()))
            }
            Err(e) => Err(ItemFailure {
                engine,
                platform,
                error: FetchError::CustomBinaryInvalid {
                    engine,
                    path: custom.clone(),
                    reason: e.to_string(),
                },
            }),
        };
    }

    // No artifact build and no override: reject before any network I/O.
    if !platform.is_known() {
        return Err(ItemFailure {
            engine,
            error: FetchError::UnknownPlatform(platform.as_str().to_owned()),
            platform,
        });
    }

    // Cache hit still has to prove itself; the bytes may have rotted on disk.
    if let Some(cached) = ctx.cache.lookup(engine, &platform, &version) {
        if probe::check_version_command(&cached, &version, ctx.probe_timeout).await {
            return match copy_to_destinations(&cached, engine, &platform, &dests) {
                Ok(dest) => Ok((engine, platform.as_str().to_owned(), dest)),
                Err(error) => Err(ItemFailure {
                    engine,
                    platform,
                    error,
                }),
            };
        }
        warn!(%engine, %platform, "cached engine failed verification, evicting");
        if let Err(e) = ctx.cache.evict(engine, &platform, &version) {
            return Err(ItemFailure {
                engine,
                platform,
                error: e,
            });
        }
    }

    if ctx.skip_downloads {
        return Err(ItemFailure {
            engine,
            platform,
            error: FetchError::LockHeld {
                path: ctx.cache.root().join(LOCK_FILE_NAME),
            },
        });
    }

    download_and_heal(ctx, engine, platform, version, dests).await
}

/// DOWNLOAD → VERIFY → promote, with one bounded retry on transport or
/// verification failure. The second failure escalates to
/// `DownloadVerificationFailed` for this item only.
async fn download_and_heal(
    ctx: &Ctx,
    engine: EngineKind,
    platform: Platform,
    version: String,
    dests: Vec<PathBuf>,
) -> ItemOutcome {
    let url = download_url(&ctx.base_url, engine, &platform, &version);
    let mut retries_left = DOWNLOAD_RETRIES;

    loop {
        match download_once(ctx, engine, &platform, &version, &url).await {
            Ok(stored) => {
                return match copy_to_destinations(&stored, engine, &platform, &dests) {
                    Ok(dest) => Ok((engine, platform.as_str().to_owned(), dest)),
                    Err(error) => Err(ItemFailure {
                        engine,
                        platform,
                        error,
                    }),
                };
            }
            Err(e) if e.is_retryable() && retries_left > 0 => {
                retries_left -= 1;
                warn!(%engine, %platform, error = %e, "download attempt failed, retrying");
            }
            Err(e) if e.is_retryable() => {
                return Err(ItemFailure {
                    engine,
                    error: FetchError::DownloadVerificationFailed {
                        engine,
                        platform: platform.as_str().to_owned(),
                        reason: e.to_string(),
                    },
                    platform,
                });
            }
            Err(e) => {
                return Err(ItemFailure {
                    engine,
                    platform,
                    error: e,
                })
            }
        }
    }
}

/// One download/verify/promote attempt. The temp file lives in the cache
/// entry's own directory so promotion is a same-filesystem rename, and is
/// discarded on every failure path.
async fn download_once(
    ctx: &Ctx,
    engine: EngineKind,
    platform: &Platform,
    version: &str,
    url: &str,
) -> Result<PathBuf> {
    let entry_dir = ctx.cache.entry_dir(platform, version);
    fs::create_dir_all(&entry_dir)?;

    let tmp = tempfile::Builder::new()
        .suffix(".tmp")
        .tempfile_in(&entry_dir)?
        .into_temp_path();

    download::fetch_to_file(&ctx.client, url, &tmp, ctx.progress.as_ref()).await?;
    set_executable(&tmp)?;

    let reported = probe::probe(&tmp, ctx.probe_timeout).await?;
    if reported != version {
        return Err(FetchError::probe(
            &*tmp,
            format!("reports version {reported}, expected {version}"),
        ));
    }

    ctx.cache.store(engine, platform, version, &tmp)
}

/// Copy the resolved artifact into every destination directory, preserving the
/// executable bit. Returns the path in the first destination.
fn copy_to_destinations(
    src: &Path,
    engine: EngineKind,
    platform: &Platform,
    dests: &[PathBuf],
) -> Result<PathBuf> {
    let mut first = None;
    for dir in dests {
        fs::create_dir_all(dir)?;
        let target = dir.join(binary_name(engine, platform));
        fs::copy(src, &target)?;
        set_executable(&target)?;
        first.get_or_insert(target);
    }
    Ok(first.unwrap_or_else(|| src.to_path_buf()))
}
