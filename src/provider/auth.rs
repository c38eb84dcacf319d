//! Access-token plumbing shared by the REST adapters.
//!
//! Tokens are cached in-process and refreshed shortly before they expire. The GCE adapter
//! falls back to shelling out to `gcloud` when the metadata server is unreachable.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::process::Command;

use super::error::{ProviderError, ProviderResult};

const CMD_TIMEOUT: Duration = Duration::from_secs(60);
const CMD_RETRIES: usize = 3;
const CMD_RETRY_BACKOFF: Duration = Duration::from_millis(750);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Bearer token cache with an early-refresh margin.
#[derive(Debug, Default)]
pub struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token unless it expires within the refresh margin.
    pub fn get(&self) -> Option<String> {
        let guard = self.inner.lock();
        guard
            .as_ref()
            .filter(|t| t.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN)
            .map(|t| t.value.clone())
    }

    pub fn store(&self, value: String, ttl: Duration) {
        *self.inner.lock() = Some(CachedToken {
            value,
            expires_at: Instant::now() + ttl,
        });
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }
}

/// Runs `program args...` and returns trimmed stdout, retrying failed exits.
pub async fn run_command_with_retries(
    program: &Path,
    args: &[&str],
    label: &str,
) -> ProviderResult<String> {
    let mut attempt = 0usize;
    loop {
        attempt += 1;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| ProviderError::Command {
            label: label.to_string(),
            message: format!("failed to spawn: {e}"),
        })?;

        let output = match tokio::time::timeout(CMD_TIMEOUT, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| ProviderError::Command {
                label: label.to_string(),
                message: format!("failed waiting for exit: {e}"),
            })?,
            Err(_) => {
                return Err(ProviderError::Command {
                    label: label.to_string(),
                    message: format!("timed out after {:?}", CMD_TIMEOUT),
                });
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let err = ProviderError::Command {
            label: label.to_string(),
            message: stderr,
        };

        if attempt >= CMD_RETRIES {
            return Err(err);
        }

        tracing::debug!(label, attempt, "command failed, retrying");
        tokio::time::sleep(CMD_RETRY_BACKOFF).await;
    }
}
