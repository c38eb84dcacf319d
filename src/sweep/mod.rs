//! Expiration sweep: auto-stops expired instances and sends the one-shot closing-soon
//! notice to whoever opened the current online window.


use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::clock;
use crate::instance::ManagedInstance;
use crate::monitor::OperationCallbacks;
use crate::notify::{Notice, Notifier};
use crate::opener::{Opener, opener_key};
use crate::store::KeyValueStore;

/// What one sweep did, by instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stopped: Vec<String>,
    pub warned: Vec<String>,
}

pub struct ExpirationSweep {
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    warning_window: Duration,
}

impl ExpirationSweep {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        warning_window: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            warning_window,
        }
    }

    /// Inspects every powered-on instance once. Failures are logged, never returned.
    pub async fn run(&self, instances: &[Arc<ManagedInstance>]) -> SweepReport {
        let mut report = SweepReport::default();

        for instance in instances.iter().filter(|i| i.is_power_on()) {
            if instance.expires_at().is_some_and(|at| at < Utc::now()) {
                self.close(instance, &mut report).await;
            }

            // a successful stop above cleared the expiration
            let Some(expires_at) = instance.expires_at() else {
                continue;
            };
            if expires_at - clock::delta(self.warning_window) < Utc::now() {
                self.warn_opener(instance, expires_at, &mut report).await;
            }
        }

        if !report.stopped.is_empty() || !report.warned.is_empty() {
            tracing::info!(
                stopped = report.stopped.len(),
                warned = report.warned.len(),
                "expiration sweep finished"
            );
        }
        report
    }

    async fn close(&self, instance: &Arc<ManagedInstance>, report: &mut SweepReport) {
        match instance.stop(true, OperationCallbacks::none()).await {
            Ok(handle) => {
                tracing::info!(
                    instance = %instance.id(),
                    operation = %handle.operation_id(),
                    "stopping expired instance"
                );
                report.stopped.push(instance.id().to_string());
                self.notifier
                    .notify(Notice::AutoClosed {
                        instance: instance.label(),
                    })
                    .await;
            }
            Err(e) => {
                tracing::error!(instance = %instance.id(), error = %e, "failed to stop expired instance");
            }
        }
    }

    async fn warn_opener(
        &self,
        instance: &Arc<ManagedInstance>,
        expires_at: chrono::DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let key = opener_key(instance.id());
        let record = match self.store.get(&key).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(instance = %instance.id(), error = %e, "failed to read opener record");
                return;
            }
        };

        match Opener::parse(&record) {
            Some(opener) => {
                self.notifier
                    .notify(Notice::ClosingSoon {
                        instance: instance.label(),
                        recipient: opener,
                        expires_at,
                    })
                    .await;
                report.warned.push(instance.id().to_string());
            }
            None => {
                tracing::warn!(instance = %instance.id(), record = %record, "malformed opener record");
            }
        }

        if let Err(e) = self.store.del(&key).await {
            tracing::warn!(instance = %instance.id(), error = %e, "failed to delete opener record");
        }
    }
}
