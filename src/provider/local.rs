//! In-memory simulated provider.
//!
//! Start/stop operations are recorded as pending and complete when awaited via
//! `wait_operation`, flipping the instance to the provider's running/stopped status.
//! Failures can be injected per call for tests and local development.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::ProviderAdapter;
use super::error::{ProviderError, ProviderResult};
use super::types::{
    OperationRef, OperationResult, PowerAction, Provider, ProviderFault, ProviderInstance,
};

#[derive(Debug, Clone)]
struct LocalInstance {
    zone: String,
    status: String,
}

#[derive(Debug, Clone)]
struct PendingOperation {
    instance_id: String,
    action: PowerAction,
}

#[derive(Debug, Default)]
struct LocalState {
    instances: BTreeMap<String, LocalInstance>,
    pending: HashMap<String, PendingOperation>,
    operation_faults: VecDeque<ProviderFault>,
    failing_starts: u32,
    failing_stops: u32,
    failing_lists: u32,
    failing_status: u32,
    start_calls: u32,
    stop_calls: u32,
    status_calls: u32,
    idempotency_keys: Vec<String>,
}

/// Simulated provider keeping all state in memory.
pub struct LocalProvider {
    provider: Provider,
    operation_delay: Duration,
    state: Mutex<LocalState>,
}

impl LocalProvider {
    /// Creates an empty provider speaking `provider`'s status vocabulary.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            operation_delay: Duration::ZERO,
            state: Mutex::new(LocalState::default()),
        }
    }

    /// Delays every `wait_operation` call, mimicking a slow long-running operation.
    pub fn with_operation_delay(mut self, delay: Duration) -> Self {
        self.operation_delay = delay;
        self
    }

    /// Builder variant of [`LocalProvider::insert_instance`].
    pub fn with_instance(self, id: &str, zone: &str, status: &str) -> Self {
        self.insert_instance(id, zone, status);
        self
    }

    pub fn insert_instance(&self, id: &str, zone: &str, status: &str) {
        self.state.lock().instances.insert(
            id.to_string(),
            LocalInstance {
                zone: zone.to_string(),
                status: status.to_string(),
            },
        );
    }

    pub fn remove_instance(&self, id: &str) {
        self.state.lock().instances.remove(id);
    }

    /// Overrides the status reported for `id`.
    pub fn set_status(&self, id: &str, status: &str) {
        if let Some(instance) = self.state.lock().instances.get_mut(id) {
            instance.status = status.to_string();
        }
    }

    pub fn status_of(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .instances
            .get(id)
            .map(|i| i.status.clone())
    }

    /// The next awaited operation finishes with `fault` instead of applying its transition.
    pub fn inject_operation_fault(&self, fault: ProviderFault) {
        self.state.lock().operation_faults.push_back(fault);
    }

    /// The next `n` start calls are rejected synchronously.
    pub fn fail_next_starts(&self, n: u32) {
        self.state.lock().failing_starts = n;
    }

    /// The next `n` stop calls are rejected synchronously.
    pub fn fail_next_stops(&self, n: u32) {
        self.state.lock().failing_stops = n;
    }

    /// The next `n` listing calls fail.
    pub fn fail_next_lists(&self, n: u32) {
        self.state.lock().failing_lists = n;
    }

    /// The next `n` status calls fail.
    pub fn fail_next_status(&self, n: u32) {
        self.state.lock().failing_status = n;
    }

    pub fn start_calls(&self) -> u32 {
        self.state.lock().start_calls
    }

    pub fn stop_calls(&self) -> u32 {
        self.state.lock().stop_calls
    }

    pub fn status_calls(&self) -> u32 {
        self.state.lock().status_calls
    }

    /// Idempotency keys received by start/stop, in call order.
    pub fn idempotency_keys(&self) -> Vec<String> {
        self.state.lock().idempotency_keys.clone()
    }

    pub fn pending_operations(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn begin(
        &self,
        action: PowerAction,
        id: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let failing = match action {
            PowerAction::Start => {
                state.start_calls += 1;
                &mut state.failing_starts
            }
            PowerAction::Stop => {
                state.stop_calls += 1;
                &mut state.failing_stops
            }
        };
        if *failing > 0 {
            *failing -= 1;
            return Err(ProviderError::Simulated(format!(
                "{action} rejected for {id}"
            )));
        }
        if !state.instances.contains_key(id) {
            return Err(ProviderError::InstanceNotFound { id: id.to_string() });
        }

        state.idempotency_keys.push(idempotency_key.to_string());
        let op_id = format!("local-op-{}", Uuid::new_v4());
        state.pending.insert(
            op_id.clone(),
            PendingOperation {
                instance_id: id.to_string(),
                action,
            },
        );
        Ok(OperationRef { id: op_id })
    }
}

#[async_trait]
impl ProviderAdapter for LocalProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        let mut state = self.state.lock();
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(ProviderError::Simulated("listing unavailable".to_string()));
        }
        Ok(state
            .instances
            .iter()
            .map(|(id, i)| ProviderInstance::new(id.clone(), i.zone.clone(), i.status.clone()))
            .collect())
    }

    async fn get_status(&self, id: &str, _zone: &str) -> ProviderResult<String> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        if state.failing_status > 0 {
            state.failing_status -= 1;
            return Err(ProviderError::Simulated(format!("status of {id} unavailable")));
        }
        state
            .instances
            .get(id)
            .map(|i| i.status.clone())
            .ok_or_else(|| ProviderError::InstanceNotFound { id: id.to_string() })
    }

    async fn start_instance(
        &self,
        id: &str,
        _zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        self.begin(PowerAction::Start, id, idempotency_key)
    }

    async fn stop_instance(
        &self,
        id: &str,
        _zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef> {
        self.begin(PowerAction::Stop, id, idempotency_key)
    }

    async fn wait_operation(&self, _zone: &str, operation_id: &str) -> ProviderResult<OperationResult> {
        if !self.operation_delay.is_zero() {
            tokio::time::sleep(self.operation_delay).await;
        }

        let mut state = self.state.lock();
        let op = state
            .pending
            .remove(operation_id)
            .ok_or_else(|| ProviderError::Simulated(format!("unknown operation {operation_id}")))?;

        if let Some(fault) = state.operation_faults.pop_front() {
            return Ok(OperationResult::failed(fault));
        }

        let target = match op.action {
            PowerAction::Start => self.provider.running_status(),
            PowerAction::Stop => self.provider.stopped_status(),
        };
        if let Some(instance) = state.instances.get_mut(&op.instance_id) {
            instance.status = target.to_string();
        }
        Ok(OperationResult::success())
    }
}
