//! # fetch-engine
//!
//! Fetches versioned, platform-specific native engine binaries from a remote
//! artifact store, places them at caller-specified locations, and keeps a
//! verified local cache so repeat invocations are near-instant. Corrupt cache
//! entries are detected by probing the binary's self-reported version and are
//! evicted and re-downloaded automatically; custom caller-supplied binaries
//! are never touched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fetch_engine::{download, EngineKind, FetchOptions};
//!
//! #[tokio::main]
//! async fn main() -> fetch_engine::Result<()> {
//!     let result = download(
//!         FetchOptions::new("./engine-cache")
//!             .engine(EngineKind::QueryEngine, "./engines")
//!             .engine(EngineKind::Formatter, "./engines")
//!             .fail_silent(true),
//!     )
//!     .await?;
//!
//!     for (engine, platforms) in &result.paths {
//!         for (platform, path) in platforms {
//!             println!("{engine} for {platform}: {}", path.display());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod download;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod lock;
pub mod platform;
pub mod probe;
pub mod progress;

pub use cache::IntegrityCache;
pub use download::ProgressFn;
pub use engine::{binary_name, download_url, EngineKind};
pub use error::{FetchError, Result};
pub use fetch::{
    download, DownloadResult, FetchOptions, ItemFailure, DEFAULT_BASE_URL, DEFAULT_ENGINES_VERSION,
};
pub use lock::DownloadLock;
pub use platform::{host_platform, Platform, KNOWN_PLATFORMS};
pub use probe::{check_version_command, probe};
pub use progress::default_progress_fn;
