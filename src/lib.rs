//! Fleet controller for on-demand VPN gateway instances (used by `fleetd` and integration tests).
//!
//! # Public API Surface
//!
//! ## Entry Point
//! - [`FleetController`] - start/stop/extend requests, status, periodic sync, shutdown
//! - [`Config`], [`ConfigError`] - environment configuration
//! - [`FleetCatalog`] - static per-instance metadata
//!
//! ## Fleet State
//! - [`FleetRegistry`] - live instance map and reconciliation cycle
//! - [`ManagedInstance`] - one cloud VM and its expiration clock
//! - [`OperationHandle`] - completion of an accepted start/stop
//!
//! ## Boundaries
//! - [`ProviderAdapter`] - cloud API (GCE, Azure, local simulation)
//! - [`KeyValueStore`] - opener records (Redis or in-memory)
//! - [`Notifier`] - human-facing notices
//! - [`BroadcastHub`] - push channel to connected clients
//!
//! ## Test/Mock Support
//! `notify::RecordingNotifier` is available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod clock;
pub mod config;
pub mod constants;
pub mod controller;
pub mod hub;
pub mod instance;
pub mod monitor;
pub mod notify;
pub mod opener;
pub mod provider;
pub mod registry;
pub mod restart;
pub mod store;
pub mod sweep;

pub use config::{CloudProviderType, Config, ConfigError, FleetCatalog};
pub use controller::{ControllerDeps, ControllerError, FleetController, FleetStatus};
pub use hub::{BroadcastHub, DeliveryError, Envelope};
pub use instance::{
    ConnectionProfile, InstanceError, InstanceProfile, InstanceSnapshot, ManagedInstance,
    ReadonlyMode,
};
pub use monitor::{FailureCategory, OperationError, OperationHandle};
pub use notify::{Notice, Notifier, TracingNotifier};
pub use opener::Opener;
pub use provider::{LocalProvider, PowerAction, Provider, ProviderAdapter, ProviderError};
pub use registry::{FleetRegistry, ReconcileReport, RegistryError, RegistrySettings};
pub use restart::{RestartOutcome, RestartPolicy};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError};
pub use sweep::{ExpirationSweep, SweepReport};
