//! Fleet registry: the id-keyed set of managed instances and the reconciliation cycle.
//!
//! Each cycle lists every provider, keeps existing instance objects (so their listeners and
//! in-flight monitors stay valid), builds new ones from the catalog, retires instances no
//! longer listed, swaps the whole map in one step and finally runs the expiration sweep.

pub mod error;
mod listeners;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::config::{Config, FleetCatalog};
use crate::hub::BroadcastHub;
use crate::instance::{InstanceContext, InstanceSettings, ManagedInstance};
use crate::notify::Notifier;
use crate::provider::ProviderAdapter;
use crate::restart::RestartPolicy;
use crate::store::KeyValueStore;
use crate::sweep::{ExpirationSweep, SweepReport};

pub use error::RegistryError;
use listeners::ListenerSet;

pub type InstanceMap = BTreeMap<String, Arc<ManagedInstance>>;

/// Timing knobs of the registry and everything it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    pub instance: InstanceSettings,
    pub sync_interval: Duration,
    pub online_window: Duration,
    pub restart: RestartPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Config::default().into()
    }
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            instance: config.instance_settings(),
            sync_interval: config.sync_interval,
            online_window: config.online_window,
            restart: RestartPolicy {
                max_attempts: config.restart_max_attempts,
                delay: config.restart_delay,
            },
        }
    }
}

impl From<Config> for RegistrySettings {
    fn from(config: Config) -> Self {
        (&config).into()
    }
}

/// Outcome of one reconciliation cycle, by instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub sweep: SweepReport,
}

#[derive(Debug, Default, Clone, Copy)]
struct SyncTimes {
    last_update: Option<DateTime<Utc>>,
    next_update: Option<DateTime<Utc>>,
}

/// Shared collaborators the registry is built from.
pub struct RegistryDeps {
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub catalog: FleetCatalog,
    pub hub: Arc<BroadcastHub>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn KeyValueStore>,
    pub shutdown: CancellationToken,
}

pub struct FleetRegistry {
    contexts: Vec<InstanceContext>,
    catalog: FleetCatalog,
    listeners: Arc<ListenerSet>,
    sweep: ExpirationSweep,
    settings: RegistrySettings,
    instances: RwLock<Arc<InstanceMap>>,
    times: Mutex<SyncTimes>,
    /// Cycles never overlap.
    cycle_lock: tokio::sync::Mutex<()>,
}

impl FleetRegistry {
    pub fn new(deps: RegistryDeps, settings: RegistrySettings) -> Self {
        let contexts = deps
            .adapters
            .into_iter()
            .map(|adapter| InstanceContext {
                adapter,
                hub: Arc::clone(&deps.hub),
                settings: settings.instance,
                shutdown: deps.shutdown.clone(),
            })
            .collect();

        Self {
            contexts,
            catalog: deps.catalog,
            listeners: Arc::new(ListenerSet::new(
                Arc::clone(&deps.hub),
                Arc::clone(&deps.notifier),
                settings.online_window,
                settings.restart,
            )),
            sweep: ExpirationSweep::new(
                deps.store,
                deps.notifier,
                settings.instance.warning_window,
            ),
            settings,
            instances: RwLock::new(Arc::new(InstanceMap::new())),
            times: Mutex::new(SyncTimes::default()),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Current instance map. Cheap; the map is replaced, never mutated.
    pub fn snapshot(&self) -> Arc<InstanceMap> {
        Arc::clone(&self.instances.read())
    }

    pub fn get(&self, id: &str) -> Option<Arc<ManagedInstance>> {
        self.instances.read().get(id).cloned()
    }

    pub fn instances(&self) -> Vec<Arc<ManagedInstance>> {
        self.instances.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.times.lock().last_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.times.lock().next_update
    }

    /// Runs one full cycle. A failed provider listing leaves the registry untouched.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RegistryError> {
        let _cycle = self.cycle_lock.lock().await;

        let listings = join_all(
            self.contexts
                .iter()
                .map(|ctx| async move { (ctx, ctx.adapter.list_instances().await) }),
        )
        .await;

        let mut observed = Vec::with_capacity(listings.len());
        for (ctx, listing) in listings {
            match listing {
                Ok(rows) => observed.push((ctx, rows)),
                Err(source) => {
                    let provider = ctx.adapter.provider();
                    tracing::error!(%provider, error = %source, "fleet listing failed, skipping cycle");
                    return Err(RegistryError::FleetList { provider, source });
                }
            }
        }

        let previous = self.snapshot();
        let mut next = InstanceMap::new();
        let mut report = ReconcileReport::default();

        for (ctx, rows) in observed {
            for row in rows {
                if next.contains_key(&row.id) {
                    tracing::warn!(instance = %row.id, zone = %row.zone, "duplicate instance id in listing");
                    continue;
                }

                if let Some(existing) = previous.get(&row.id) {
                    if let Err(e) = existing.refresh_status().await {
                        tracing::warn!(instance = %row.id, error = %e, "refresh failed, keeping last known state");
                    }
                    report.kept.push(row.id.clone());
                    next.insert(row.id, Arc::clone(existing));
                    continue;
                }

                let instance = ManagedInstance::new(ctx, &row, self.catalog.profile_for(&row.id));
                if instance.is_power_on() {
                    instance.set_expires_at(Some(clock::after(
                        Utc::now(),
                        self.settings.online_window,
                    )));
                }
                self.listeners.attach(&instance);
                tracing::info!(
                    instance = %row.id,
                    zone = %row.zone,
                    status = %row.status,
                    provider = %instance.provider(),
                    "discovered instance"
                );
                report.added.push(row.id.clone());
                next.insert(row.id, instance);
            }
        }

        for (id, instance) in previous.iter() {
            if !next.contains_key(id) {
                instance.retire();
                tracing::info!(instance = %id, "instance no longer listed, retired");
                report.removed.push(id.clone());
            }
        }

        let current: Vec<Arc<ManagedInstance>> = next.values().cloned().collect();
        *self.instances.write() = Arc::new(next);

        let now = Utc::now();
        {
            let mut times = self.times.lock();
            times.last_update = Some(now);
            times.next_update = Some(clock::after(now, self.settings.sync_interval));
        }
        tracing::info!(
            added = report.added.len(),
            kept = report.kept.len(),
            removed = report.removed.len(),
            "fleet reconciled"
        );

        report.sweep = self.sweep.run(&current).await;
        Ok(report)
    }

    /// Retires every instance; used on shutdown.
    pub fn retire_all(&self) {
        for instance in self.instances.read().values() {
            instance.retire();
        }
    }
}
