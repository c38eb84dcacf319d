//! Operation monitor: awaits a provider long-running operation in the background.
//!
//! Whatever the outcome, the instance's status poll is cancelled exactly once and a final
//! status refresh runs so observers see the settled state. Start failures also clear the
//! instance's expiration.

pub mod error;
pub mod types;


use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::constants::TOPIC_INSTANCE_ERROR;
use crate::instance::ManagedInstance;
use crate::instance::poll::StatusPoll;
use crate::provider::{PowerAction, ProviderFault};

pub use error::OperationError;
pub use types::{
    FailureCategory, FailurePayload, OperationCallbacks, OperationFailure, OperationHandle,
    OperationOutcome,
};

const QUOTA_REASON: &str = "QUOTA_EXCEEDED";
const QUOTA_HINTS: [&str; 3] = ["quota", "cpus", "does not have enough"];

/// Quota heuristics over a provider fault.
pub fn classify_failure(fault: &ProviderFault) -> FailureCategory {
    let message = fault.message.to_lowercase();
    if fault.code.to_uppercase() == QUOTA_REASON || QUOTA_HINTS.iter().any(|h| message.contains(h))
    {
        FailureCategory::CpuQuota
    } else {
        FailureCategory::General
    }
}

pub(crate) struct OperationMonitor {
    instance: Arc<ManagedInstance>,
    action: PowerAction,
    operation_id: String,
    poll: StatusPoll,
    cancel: CancellationToken,
}

impl OperationMonitor {
    pub(crate) fn new(
        instance: Arc<ManagedInstance>,
        action: PowerAction,
        operation_id: String,
        poll: StatusPoll,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            instance,
            action,
            operation_id,
            poll,
            cancel,
        }
    }

    /// Runs the monitor on its own task and hands back the caller's handle.
    pub(crate) fn spawn(self, callbacks: OperationCallbacks) -> OperationHandle {
        let (tx, rx) = oneshot::channel();
        let handle = OperationHandle::new(self.operation_id.clone(), self.action, rx);

        tokio::spawn(async move {
            let id = self.instance.id().to_string();
            let action = self.action;
            let outcome = self.run().await;
            match &outcome {
                Ok(()) => tracing::info!(instance = %id, %action, "operation completed"),
                Err(OperationError::Cancelled { .. }) => {
                    tracing::debug!(instance = %id, %action, "operation monitor cancelled")
                }
                Err(e) => tracing::error!(instance = %id, %action, error = %e, "operation failed"),
            }
            callbacks.resolve(&outcome);
            // the handle may have been dropped
            let _ = tx.send(outcome);
        });

        handle
    }

    async fn run(self) -> OperationOutcome {
        let adapter = Arc::clone(self.instance.adapter());
        let waited = tokio::select! {
            r = adapter.wait_operation(self.instance.zone(), &self.operation_id) => Some(r),
            _ = self.cancel.cancelled() => None,
        };

        let outcome = match waited {
            None => Err(OperationError::Cancelled {
                operation_id: self.operation_id.clone(),
            }),
            Some(Err(source)) => Err(OperationError::Wait {
                operation_id: self.operation_id.clone(),
                source,
            }),
            Some(Ok(result)) => match result.error {
                None => Ok(()),
                Some(fault) => {
                    let failure = OperationFailure {
                        action: self.action,
                        category: classify_failure(&fault),
                        code: fault.code,
                        message: fault.message,
                        operation_id: self.operation_id.clone(),
                    };
                    if self.action == PowerAction::Start {
                        self.instance.clear_expiration();
                    }
                    self.broadcast_failure(&failure);
                    Err(OperationError::Failed(failure))
                }
            },
        };

        self.poll.cancel();
        if !self.cancel.is_cancelled()
            && let Err(e) = self.instance.refresh_status().await
        {
            tracing::warn!(instance = %self.instance.id(), error = %e, "final status refresh failed");
        }

        outcome
    }

    fn broadcast_failure(&self, failure: &OperationFailure) {
        let payload = FailurePayload {
            id: self.instance.id().to_string(),
            provider: self.instance.provider(),
            zone: self.instance.zone().to_string(),
            action: failure.action,
            reason_category: failure.category,
            message: failure.message.clone(),
            operation_id: failure.operation_id.clone(),
            timestamp: Utc::now(),
        };
        self.instance.hub().broadcast(TOPIC_INSTANCE_ERROR, &payload);
    }
}
