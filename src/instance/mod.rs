//! Managed instance: one VM's runtime state, power state machine and event source.
//!
//! Status is only ever observed from the provider; `is_power_on` is recomputed from it on
//! every refresh. Start/stop return as soon as the provider accepts the request and leave
//! completion to a background [`crate::monitor`] task.

pub mod error;
pub(crate) mod poll;
pub mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock;
use crate::constants::INSTANCE_EVENT_CAPACITY;
use crate::hub::BroadcastHub;
use crate::monitor::{OperationCallbacks, OperationHandle, OperationMonitor};
use crate::notify::InstanceLabel;
use crate::provider::{PowerAction, Provider, ProviderAdapter, ProviderInstance};

pub use error::{InstanceError, InstanceResult};
use poll::StatusPoll;
pub use types::{
    ConnectionProfile, InstanceEvent, InstanceProfile, InstanceSettings, InstanceSnapshot,
    ReadonlyMode,
};

/// Collaborators shared by every instance of one provider.
#[derive(Clone)]
pub struct InstanceContext {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub hub: Arc<BroadcastHub>,
    pub settings: InstanceSettings,
    /// Process-wide shutdown; each instance derives its lifecycle token from it.
    pub shutdown: CancellationToken,
}

#[derive(Debug)]
struct InstanceState {
    status: String,
    is_power_on: bool,
    expires_at: Option<DateTime<Utc>>,
}

pub struct ManagedInstance {
    id: String,
    zone: String,
    provider: Provider,
    profile: InstanceProfile,
    adapter: Arc<dyn ProviderAdapter>,
    hub: Arc<BroadcastHub>,
    settings: InstanceSettings,
    state: Mutex<InstanceState>,
    /// Serializes provider fetch + state write + event emission.
    refresh_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<InstanceEvent>,
    lifecycle: CancellationToken,
    shutdown: CancellationToken,
    restart_in_progress: AtomicBool,
}

impl std::fmt::Debug for ManagedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedInstance")
            .field("id", &self.id)
            .field("zone", &self.zone)
            .field("provider", &self.provider)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl ManagedInstance {
    /// Builds an instance from a provider listing row and its catalog profile.
    ///
    /// `expires_at` starts unset; the registry seeds it for instances found running.
    pub fn new(
        ctx: &InstanceContext,
        observed: &ProviderInstance,
        profile: InstanceProfile,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(INSTANCE_EVENT_CAPACITY);
        Arc::new(Self {
            id: observed.id.clone(),
            zone: observed.zone.clone(),
            provider: ctx.adapter.provider(),
            profile,
            adapter: Arc::clone(&ctx.adapter),
            hub: Arc::clone(&ctx.hub),
            settings: ctx.settings,
            state: Mutex::new(InstanceState {
                status: observed.status.clone(),
                is_power_on: ctx.adapter.is_power_on(&observed.status),
                expires_at: None,
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
            events,
            lifecycle: ctx.shutdown.child_token(),
            shutdown: ctx.shutdown.clone(),
            restart_in_progress: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn profile(&self) -> &InstanceProfile {
        &self.profile
    }

    pub fn readonly_mode(&self) -> ReadonlyMode {
        self.profile.readonly
    }

    pub fn status(&self) -> String {
        self.state.lock().status.clone()
    }

    pub fn is_power_on(&self) -> bool {
        self.state.lock().is_power_on
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expires_at
    }

    /// Overwrites the expiration without any window check.
    pub fn set_expires_at(&self, expires_at: Option<DateTime<Utc>>) {
        self.state.lock().expires_at = expires_at;
    }

    pub(crate) fn clear_expiration(&self) {
        self.set_expires_at(None);
    }

    /// Sets `expires_at` only if it is currently unset. Returns whether it was set.
    pub(crate) fn seed_expiration(&self, expires_at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if state.expires_at.is_some() {
            return false;
        }
        state.expires_at = Some(expires_at);
        true
    }

    /// New receiver for this instance's events.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    /// Cancelled when the instance leaves the registry or the controller shuts down.
    pub fn lifecycle_token(&self) -> &CancellationToken {
        &self.lifecycle
    }

    /// Stops the listener task and status polls; in-flight monitors keep running.
    pub(crate) fn retire(&self) {
        self.lifecycle.cancel();
    }

    pub fn is_retired(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub(crate) fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Claims the auto-restart slot. Returns `false` if a restart loop is already running.
    pub(crate) fn try_begin_restart(&self) -> bool {
        !self.restart_in_progress.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_restart(&self) {
        self.restart_in_progress.store(false, Ordering::Release);
    }

    /// Whether the current status is the settled target of `action`.
    pub(crate) fn has_reached(&self, action: PowerAction) -> bool {
        let state = self.state.lock();
        match action {
            PowerAction::Start => state.is_power_on,
            PowerAction::Stop => self.adapter.is_powered_off(&state.status),
        }
    }

    /// Fetches the provider status, updates state and emits events for changed values.
    ///
    /// An expired expiration is dropped once the instance is seen powered off.
    pub async fn refresh_status(&self) -> InstanceResult<()> {
        let _guard = self.refresh_lock.lock().await;
        let status = self.adapter.get_status(&self.id, &self.zone).await?;
        let is_power_on = self.adapter.is_power_on(&status);

        let mut events = Vec::with_capacity(2);
        {
            let mut state = self.state.lock();
            if state.status != status {
                let old = std::mem::replace(&mut state.status, status.clone());
                events.push(InstanceEvent::StatusChanged { old, new: status });
            }
            if state.is_power_on != is_power_on {
                events.push(InstanceEvent::PowerChanged {
                    old: state.is_power_on,
                    new: is_power_on,
                });
                state.is_power_on = is_power_on;
            }
            if !is_power_on && state.expires_at.is_some_and(|at| at < Utc::now()) {
                state.expires_at = None;
            }
        }

        for event in events {
            tracing::debug!(instance = %self.id, ?event, "instance state changed");
            // no receivers is fine
            let _ = self.events.send(event);
        }
        Ok(())
    }

    /// Requests a start. Returns once the provider accepted it.
    ///
    /// `expires_at: None` keeps the current expiration. A synchronous provider failure
    /// rolls the expiration back to unset.
    pub async fn start(
        self: &Arc<Self>,
        bypass_readonly: bool,
        expires_at: Option<DateTime<Utc>>,
        callbacks: OperationCallbacks,
    ) -> InstanceResult<OperationHandle> {
        if self.is_power_on() {
            return Err(InstanceError::AlreadyRunning {
                id: self.id.clone(),
            });
        }
        self.check_readonly(PowerAction::Start, bypass_readonly)?;

        if expires_at.is_some() {
            self.set_expires_at(expires_at);
        }
        self.begin(PowerAction::Start, callbacks).await
    }

    /// Requests a stop. The expiration is cleared before the provider call.
    pub async fn stop(
        self: &Arc<Self>,
        bypass_readonly: bool,
        callbacks: OperationCallbacks,
    ) -> InstanceResult<OperationHandle> {
        let status = self.status();
        if self.adapter.is_powered_off(&status) {
            return Err(InstanceError::AlreadyStopped {
                id: self.id.clone(),
                status,
            });
        }
        self.check_readonly(PowerAction::Stop, bypass_readonly)?;

        self.clear_expiration();
        self.begin(PowerAction::Stop, callbacks).await
    }

    /// Moves the expiration to `new_expires_at` once the current one is within the
    /// warning window (or unset).
    pub fn extend_expiration(&self, new_expires_at: DateTime<Utc>) -> InstanceResult<()> {
        let mut state = self.state.lock();
        if let Some(current) = state.expires_at
            && current - Utc::now() > clock::delta(self.settings.warning_window)
        {
            return Err(InstanceError::TooEarlyToExtend {
                id: self.id.clone(),
                expires_at: current,
            });
        }
        state.expires_at = Some(new_expires_at);
        Ok(())
    }

    pub fn to_snapshot(&self) -> InstanceSnapshot {
        let state = self.state.lock();
        InstanceSnapshot {
            id: self.id.clone(),
            name: self.profile.name.clone(),
            status: state.status.clone(),
            zone: self.zone.clone(),
            url: self.profile.url.clone(),
            country: self.profile.country.clone(),
            profiles: self.profile.profiles.clone(),
            provider: self.provider,
            is_power_on: state.is_power_on,
            readonly_mode: self.profile.readonly,
            expires_at: state.expires_at,
        }
    }

    pub fn label(&self) -> InstanceLabel {
        InstanceLabel {
            id: self.id.clone(),
            name: self.profile.name.clone(),
            country: self.profile.country.clone(),
        }
    }

    fn check_readonly(&self, action: PowerAction, bypass: bool) -> InstanceResult<()> {
        if bypass || self.profile.readonly.allows(action) {
            return Ok(());
        }
        Err(InstanceError::ReadOnlyViolation {
            id: self.id.clone(),
            mode: self.profile.readonly,
            action,
        })
    }

    async fn begin(
        self: &Arc<Self>,
        action: PowerAction,
        callbacks: OperationCallbacks,
    ) -> InstanceResult<OperationHandle> {
        if let Err(e) = self.refresh_status().await {
            tracing::warn!(instance = %self.id, error = %e, "pre-operation refresh failed");
        }

        let key = Uuid::new_v4().to_string();
        let poll = StatusPoll::spawn(Arc::clone(self), action);

        let requested = match action {
            PowerAction::Start => self.adapter.start_instance(&self.id, &self.zone, &key).await,
            PowerAction::Stop => self.adapter.stop_instance(&self.id, &self.zone, &key).await,
        };
        let operation = match requested {
            Ok(op) => op,
            Err(e) => {
                poll.cancel();
                if action == PowerAction::Start {
                    self.clear_expiration();
                }
                tracing::error!(instance = %self.id, %action, error = %e, "provider rejected request");
                return Err(e.into());
            }
        };

        tracing::info!(
            instance = %self.id,
            %action,
            operation = %operation.id,
            idempotency_key = %key,
            "operation accepted"
        );
        let monitor = OperationMonitor::new(
            Arc::clone(self),
            action,
            operation.id,
            poll,
            self.shutdown.clone(),
        );
        Ok(monitor.spawn(callbacks))
    }
}
