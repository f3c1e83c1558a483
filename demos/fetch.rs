use std::time::Duration;

use fetch_engine::{default_progress_fn, download, EngineKind, FetchOptions, IntegrityCache};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetch_engine=debug".into()),
        )
        .init();

    let cache_dir = "./engine-cache";

    // Fetch all engines for the host platform into ./engines.
    let result = download(
        FetchOptions::new(cache_dir)
            .engine(EngineKind::QueryEngine, "./engines")
            .engine(EngineKind::MigrationEngine, "./engines")
            .engine(EngineKind::IntrospectionEngine, "./engines")
            .engine(EngineKind::Formatter, "./engines")
            .fail_silent(true)
            .overall_timeout(Duration::from_secs(600))
            .progress(default_progress_fn()),
    )
    .await;

    match result {
        Ok(result) => {
            for (engine, platforms) in &result.paths {
                for (platform, path) in platforms {
                    println!("{engine} for {platform}: {}", path.display());
                }
            }
            for failure in &result.failures {
                eprintln!(
                    "skipped {} for {}: {}",
                    failure.engine, failure.platform, failure.error
                );
            }
        }
        Err(e) => eprintln!("error fetching engines: {e}"),
    }

    // Drop cache entries that haven't been refreshed in 30 days.
    let cache = IntegrityCache::new(cache_dir);
    match cache.sweep(Duration::from_secs(30 * 24 * 3600)) {
        Ok(removed) => println!("swept {removed} stale cache entries"),
        Err(e) => eprintln!("error sweeping cache: {e}"),
    }
}
