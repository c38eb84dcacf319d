use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::ManagedInstance;
use crate::provider::PowerAction;

/// Bounded background status refresh started alongside a start/stop call.
///
/// Ends when the instance reaches the action's target state, when the timeout elapses, or
/// when cancelled (by its operation monitor or the instance's lifecycle token).
pub(crate) struct StatusPoll {
    token: CancellationToken,
}

impl StatusPoll {
    pub(crate) fn spawn(instance: Arc<ManagedInstance>, action: PowerAction) -> Self {
        let token = instance.lifecycle.child_token();
        let cancel = token.clone();
        let interval = instance.settings.poll_interval;
        let timeout = instance.settings.poll_timeout;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval_at(started + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let refreshed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    r = instance.refresh_status() => r,
                };
                match refreshed {
                    Ok(()) if instance.has_reached(action) => {
                        tracing::debug!(instance = %instance.id(), %action, "status poll reached target");
                        break;
                    }
                    Ok(()) => {}
                    Err(e) => {
                        tracing::warn!(instance = %instance.id(), error = %e, "unable to refresh status");
                    }
                }

                if started.elapsed() >= timeout {
                    tracing::debug!(instance = %instance.id(), %action, "status poll timed out");
                    break;
                }
            }
        });

        Self { token }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}
