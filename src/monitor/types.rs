use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use super::error::OperationError;
use crate::provider::{PowerAction, Provider};

/// Coarse cause of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    /// The project/subscription ran out of CPU quota.
    CpuQuota,
    General,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::CpuQuota => write!(f, "CPU_QUOTA"),
            FailureCategory::General => write!(f, "GENERAL"),
        }
    }
}

/// Classified provider-side failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub action: PowerAction,
    pub category: FailureCategory,
    pub code: String,
    pub message: String,
    pub operation_id: String,
}

/// Published on the instance error topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePayload {
    pub id: String,
    pub provider: Provider,
    pub zone: String,
    pub action: PowerAction,
    pub reason_category: FailureCategory,
    pub message: String,
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
}

pub type OperationOutcome = Result<(), OperationError>;

type SuccessCallback = Box<dyn FnOnce() + Send>;
type FailureCallback = Box<dyn FnOnce(&OperationError) + Send>;

/// Optional hooks run by the monitor once the operation settles.
#[derive(Default)]
pub struct OperationCallbacks {
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl OperationCallbacks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnOnce(&OperationError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub(crate) fn resolve(self, outcome: &OperationOutcome) {
        match outcome {
            Ok(()) => {
                if let Some(f) = self.on_success {
                    f();
                }
            }
            Err(e) => {
                if let Some(f) = self.on_failure {
                    f(e);
                }
            }
        }
    }
}

impl fmt::Debug for OperationCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Returned by start/stop once the provider accepted the request.
#[derive(Debug)]
pub struct OperationHandle {
    operation_id: String,
    action: PowerAction,
    outcome: oneshot::Receiver<OperationOutcome>,
}

impl OperationHandle {
    pub(crate) fn new(
        operation_id: String,
        action: PowerAction,
        outcome: oneshot::Receiver<OperationOutcome>,
    ) -> Self {
        Self {
            operation_id,
            action,
            outcome,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn action(&self) -> PowerAction {
        self.action
    }

    /// Waits for the monitor to finish. Dropping the handle does not cancel the monitor.
    pub async fn outcome(self) -> OperationOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(OperationError::Cancelled {
                operation_id: self.operation_id,
            }),
        }
    }
}
