use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::error::{FetchError, Result};

/// Default bound on how long a version probe may run.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Matches the version token an engine reports: a commit hash or a semver tag.
fn version_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:[0-9a-f]{7,40}|v?\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.-]+)*)\b")
            .expect("version token regex is valid")
    })
}

/// Execute `<path> --version` and extract the self-reported version token.
///
/// Every way this can go wrong (missing file, not executable, non-zero exit,
/// unparseable output, timeout) normalizes to [`FetchError::ProbeFailed`]; the
/// caller cannot tell a wrong version from a corrupt binary, and treats both
/// the same.
pub async fn probe(path: &Path, timeout: Duration) -> Result<String> {
    let output = tokio::time::timeout(timeout, Command::new(path).arg("--version").output())
        .await
        .map_err(|_| FetchError::probe(path, format!("timed out after {timeout:?}")))?
        .map_err(|e| FetchError::probe(path, e))?;

    if !output.status.success() {
        return Err(FetchError::probe(
            path,
            format!("exited with {}", output.status),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let token = version_token_re()
        .find(stdout.trim())
        .ok_or_else(|| FetchError::probe(path, format!("no version token in {stdout:?}")))?;

    debug!(path = %path.display(), version = token.as_str(), "probed engine version");
    Ok(token.as_str().to_owned())
}

/// Probe `path` and report whether it reports the expected version.
/// Swallows probe failures into `false`.
pub async fn check_version_command(path: &Path, expected: &str, timeout: Duration) -> bool {
    match probe(path, timeout).await {
        Ok(version) => version == expected,
        Err(_) => false,
    }
}
