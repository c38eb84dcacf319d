//! Auto-restart loop for instances that lose power before their expiration.
//!
//! Bounded: a fixed number of attempts with a fixed delay in between. Every attempt reuses
//! the expiration captured when power was lost, so retries never extend the online time.


use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::{DEFAULT_RESTART_DELAY_MS, DEFAULT_RESTART_MAX_ATTEMPTS};
use crate::instance::{InstanceError, ManagedInstance};
use crate::monitor::OperationCallbacks;
use crate::notify::{Notice, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RESTART_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The instance is running again after `attempts` tries.
    Recovered { attempts: u32 },
    /// Every attempt failed; the instance stays off.
    Abandoned { attempts: u32 },
    /// Stopped early: readonly policy, expiration reached, or the instance was retired.
    Aborted { attempts: u32 },
    /// Another restart loop already owns this instance.
    Skipped,
}

/// Releases the instance's restart slot when the loop ends, however it ends.
struct RestartSlot<'a>(&'a ManagedInstance);

impl Drop for RestartSlot<'_> {
    fn drop(&mut self) {
        self.0.end_restart();
    }
}

/// Tries to bring `instance` back up until `expires_at`.
pub async fn auto_restart(
    instance: Arc<ManagedInstance>,
    expires_at: DateTime<Utc>,
    policy: RestartPolicy,
    notifier: Arc<dyn Notifier>,
) -> RestartOutcome {
    if !instance.try_begin_restart() {
        tracing::debug!(instance = %instance.id(), "restart already in progress");
        return RestartOutcome::Skipped;
    }
    let _slot = RestartSlot(&instance);

    tracing::warn!(instance = %instance.id(), %expires_at, "instance lost power before expiry, restarting");
    notifier
        .notify(Notice::RestartAttempted {
            instance: instance.label(),
        })
        .await;

    let mut attempts = 0;
    while attempts < policy.max_attempts {
        if instance.is_retired() || expires_at <= Utc::now() {
            return RestartOutcome::Aborted { attempts };
        }
        attempts += 1;

        let error = match instance
            .start(false, Some(expires_at), OperationCallbacks::none())
            .await
        {
            Ok(handle) => match handle.outcome().await {
                Ok(()) => {
                    tracing::info!(instance = %instance.id(), attempts, "instance restarted");
                    return RestartOutcome::Recovered { attempts };
                }
                Err(e) => e.to_string(),
            },
            Err(InstanceError::AlreadyRunning { .. }) => {
                return RestartOutcome::Recovered { attempts };
            }
            Err(e @ InstanceError::ReadOnlyViolation { .. }) => {
                tracing::warn!(instance = %instance.id(), error = %e, "restart not permitted");
                return RestartOutcome::Aborted { attempts };
            }
            Err(e) => e.to_string(),
        };

        tracing::error!(
            instance = %instance.id(),
            attempt = attempts,
            max_attempts = policy.max_attempts,
            error = %error,
            "restart attempt failed"
        );

        if attempts < policy.max_attempts {
            tokio::select! {
                _ = instance.lifecycle_token().cancelled() => {
                    return RestartOutcome::Aborted { attempts };
                }
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    tracing::error!(instance = %instance.id(), attempts, "giving up on restart");
    notifier
        .notify(Notice::RestartAbandoned {
            instance: instance.label(),
            attempts,
        })
        .await;
    RestartOutcome::Abandoned { attempts }
}
