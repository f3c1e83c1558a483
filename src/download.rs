use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzDecoder;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::debug;

use crate::error::{FetchError, Result};

/// Callback type for reporting download progress.
/// Arguments: source URL, bytes downloaded, total bytes, MiB/s, is_complete
pub type ProgressFn = Arc<dyn Fn(&str, u64, u64, f64, bool) + Send + Sync>;

/// Build the HTTP client shared by all downloads of one invocation.
///
/// Only the connect phase gets a timeout: artifact bodies run to hundreds of
/// megabytes and take however long they take. The overall-operation timeout in
/// the orchestrator is the bound on total time.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("fetch-engine/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::transport("client setup", e))
}

/// Stream the gzip-compressed artifact at `url` into `dest`, decompressing as
/// bytes arrive. The artifact is never buffered whole in memory.
///
/// Non-2xx statuses (404 for never-built combinations included), network
/// errors and decompression errors all surface as
/// [`FetchError::TransportFailed`]; the orchestrator's single-retry policy
/// decides what happens next.
pub async fn fetch_to_file(
    client: &Client,
    url: &str,
    dest: &Path,
    progress: Option<&ProgressFn>,
) -> Result<()> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::transport(url, e))?;

    if !resp.status().is_success() {
        return Err(FetchError::transport(
            url,
            format!("status {}", resp.status()),
        ));
    }

    let total = resp.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let file = std::fs::File::create(dest)?;
    let mut decoder = GzDecoder::new(file);
    let mut stream = resp.bytes_stream();
    let start = std::time::Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::transport(url, e))?;
        downloaded += chunk.len() as u64;

        decoder
            .write_all(&chunk)
            .map_err(|e| FetchError::transport(url, format!("decompression failed: {e}")))?;

        if let Some(progress) = progress {
            progress(url, downloaded, total, mib_per_sec(downloaded, start), false);
        }
    }

    decoder
        .finish()
        .and_then(|mut f| f.flush().map(|()| f))
        .map_err(|e| FetchError::transport(url, format!("decompression failed: {e}")))?;

    if let Some(progress) = progress {
        progress(url, downloaded, total, mib_per_sec(downloaded, start), true);
    }

    debug!(url, bytes = downloaded, "downloaded artifact");
    Ok(())
}

fn mib_per_sec(downloaded: u64, start: std::time::Instant) -> f64 {
    let elapsed = start.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        (downloaded as f64) / (1024.0 * 1024.0) / elapsed
    } else {
        0.0
    }
}
