//! Controller facade: what the HTTP layer calls, plus the periodic sync loop and shutdown.

pub mod error;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::config::{Config, FleetCatalog};
use crate::hub::BroadcastHub;
use crate::instance::{InstanceSnapshot, ManagedInstance};
use crate::monitor::{OperationCallbacks, OperationHandle};
use crate::notify::{Notice, Notifier, TracingNotifier};
use crate::opener::{Opener, opener_key};
use crate::provider::{ProviderAdapter, build_providers};
use crate::registry::{
    FleetRegistry, ReconcileReport, RegistryDeps, RegistryError, RegistrySettings,
};
use crate::store::{KeyValueStore, MemoryStore, RedisStore};

pub use error::{ControllerError, ControllerResult};

/// Response body of the fleet status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatus {
    pub instances: Vec<InstanceSnapshot>,
    pub last_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
}

/// Externally provided collaborators.
pub struct ControllerDeps {
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub catalog: FleetCatalog,
    pub store: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct FleetController {
    registry: Arc<FleetRegistry>,
    hub: Arc<BroadcastHub>,
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
    sync_running: Arc<AtomicBool>,
}

impl FleetController {
    pub fn new(deps: ControllerDeps, settings: RegistrySettings) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let shutdown = CancellationToken::new();
        let registry = FleetRegistry::new(
            RegistryDeps {
                adapters: deps.adapters,
                catalog: deps.catalog,
                hub: Arc::clone(&hub),
                notifier: Arc::clone(&deps.notifier),
                store: Arc::clone(&deps.store),
                shutdown: shutdown.clone(),
            },
            settings,
        );

        Self {
            registry: Arc::new(registry),
            hub,
            store: deps.store,
            notifier: deps.notifier,
            shutdown,
            sync_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Loads the catalog, builds the configured providers and connects the store.
    pub async fn from_config(config: &Config) -> ControllerResult<Self> {
        let catalog = FleetCatalog::load(&config.catalog_path)?;
        let adapters = build_providers(config, &catalog)?;

        let store: Arc<dyn KeyValueStore> = match &config.redis_url {
            Some(url) => {
                tracing::info!("using redis for opener records");
                Arc::new(RedisStore::connect(url).await?)
            }
            None => {
                tracing::warn!("FLEET_REDIS_URL not set, opener records are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::new(
            ControllerDeps {
                adapters,
                catalog,
                store,
                notifier: Arc::new(TracingNotifier),
            },
            config.into(),
        ))
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn instance(&self, id: &str) -> ControllerResult<Arc<ManagedInstance>> {
        self.registry
            .get(id)
            .ok_or_else(|| ControllerError::NotFound { id: id.to_string() })
    }

    /// User-initiated start on the standard online window.
    ///
    /// The opener is recorded for the closing-soon notice and told once the start is
    /// confirmed.
    pub async fn start_instance(
        &self,
        id: &str,
        opener: Opener,
    ) -> ControllerResult<OperationHandle> {
        let instance = self.instance(id)?;
        let window = self.registry.settings().online_window;
        let expires_at = clock::after(Utc::now(), window);

        let notifier = Arc::clone(&self.notifier);
        let notice = Notice::StartConfirmed {
            instance: instance.label(),
            recipient: opener.clone(),
            expires_at,
        };
        let callbacks = OperationCallbacks::none().on_success(move || {
            tokio::spawn(async move { notifier.notify(notice).await });
        });

        let handle = instance.start(false, Some(expires_at), callbacks).await?;
        tracing::info!(instance = %id, opener = %opener.email, "start requested");

        if let Err(e) = self
            .store
            .set(&opener_key(id), &opener.to_record(), Some(window))
            .await
        {
            tracing::warn!(instance = %id, error = %e, "failed to record opener");
        }
        Ok(handle)
    }

    /// User-initiated stop (readonly policy applies).
    pub async fn stop_instance(
        &self,
        id: &str,
        opener: Opener,
    ) -> ControllerResult<OperationHandle> {
        let instance = self.instance(id)?;
        let handle = instance.stop(false, OperationCallbacks::none()).await?;
        tracing::info!(instance = %id, by = %opener.email, "stop requested");

        if let Err(e) = self.store.del(&opener_key(id)).await {
            tracing::warn!(instance = %id, error = %e, "failed to delete opener record");
        }
        self.notifier
            .notify(Notice::ManualStop {
                instance: instance.label(),
                by: opener,
            })
            .await;
        Ok(handle)
    }

    /// Pushes the expiration one online window further. Returns the new expiration.
    pub async fn extend_instance(
        &self,
        id: &str,
        opener: Opener,
    ) -> ControllerResult<DateTime<Utc>> {
        let instance = self.instance(id)?;
        let current = instance
            .expires_at()
            .ok_or_else(|| ControllerError::NotOnline { id: id.to_string() })?;
        let expires_at = clock::after(current, self.registry.settings().online_window);
        instance.extend_expiration(expires_at)?;
        tracing::info!(instance = %id, opener = %opener.email, %expires_at, "expiration extended");

        if let Some(ttl) = clock::remaining(Utc::now(), expires_at)
            && let Err(e) = self
                .store
                .set(&opener_key(id), &opener.to_record(), Some(ttl))
                .await
        {
            tracing::warn!(instance = %id, error = %e, "failed to record opener");
        }

        self.notifier
            .notify(Notice::Extended {
                instance: instance.label(),
                recipient: opener,
                expires_at,
            })
            .await;
        Ok(expires_at)
    }

    pub fn status(&self) -> FleetStatus {
        FleetStatus {
            instances: self
                .registry
                .instances()
                .iter()
                .map(|i| i.to_snapshot())
                .collect(),
            last_update: self.registry.last_update(),
            next_update: self.registry.next_update(),
        }
    }

    /// Runs one reconciliation cycle now.
    pub async fn sync_now(&self) -> Result<ReconcileReport, RegistryError> {
        self.registry.reconcile().await
    }

    /// Starts the periodic sync loop (first cycle runs immediately). No-op if already running.
    pub fn spawn(&self) -> JoinHandle<()> {
        if self.sync_running.swap(true, Ordering::AcqRel) {
            return tokio::spawn(async {});
        }

        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let sync_running = Arc::clone(&self.sync_running);
        let period = registry.settings().sync_interval;

        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                // a failed cycle is logged by the registry and retried next tick
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = registry.reconcile() => {}
                }
            }
            tracing::info!("fleet sync loop stopped");
            sync_running.store(false, Ordering::Release);
        })
    }

    /// Cancels background work and disconnects every hub client.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.retire_all();
        self.hub.close_all();
        tracing::info!("fleet controller shut down");
    }
}
