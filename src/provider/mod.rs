//! Cloud provider gateway: one thin adapter per provider.
//!
//! The controller only ever talks to providers through [`ProviderAdapter`]. Power state is
//! derived from the raw status string via the adapter's predicates, never stored separately
//! by the provider.

pub mod auth;
pub mod azure;
pub mod error;
pub mod factory;
pub mod gce;
pub mod local;
pub mod types;


use async_trait::async_trait;

pub use azure::{AzureConfig, AzureProvider};
pub use error::{ProviderError, ProviderResult};
pub use factory::build_providers;
pub use gce::{GceConfig, GceProvider};
pub use local::LocalProvider;
pub use types::{
    OperationRef, OperationResult, PowerAction, Provider, ProviderFault, ProviderInstance,
};

#[async_trait]
/// Operations the fleet controller needs from a cloud provider.
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Power predicate over a raw status.
    fn is_power_on(&self, status: &str) -> bool {
        self.provider().is_power_on(status)
    }

    /// Returns `true` when `status` is a settled powered-off state.
    fn is_powered_off(&self, status: &str) -> bool {
        self.provider().is_powered_off(status)
    }

    /// Lists every instance the adapter manages.
    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>>;

    /// Fetches the raw status of one instance.
    async fn get_status(&self, id: &str, zone: &str) -> ProviderResult<String>;

    /// Requests a start and returns the long-running operation handle.
    async fn start_instance(
        &self,
        id: &str,
        zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef>;

    /// Requests a stop and returns the long-running operation handle.
    async fn stop_instance(
        &self,
        id: &str,
        zone: &str,
        idempotency_key: &str,
    ) -> ProviderResult<OperationRef>;

    /// Blocks until the operation finishes (or the provider's own wait deadline passes).
    async fn wait_operation(&self, zone: &str, operation_id: &str) -> ProviderResult<OperationResult>;
}
