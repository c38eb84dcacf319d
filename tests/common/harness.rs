//! Test harness for spawning a fleet controller against the local provider.

use std::sync::Arc;
use std::time::Duration;

use fleet::config::CatalogEntry;
use fleet::hub::Envelope;
use fleet::instance::InstanceSettings;
use fleet::notify::RecordingNotifier;
use fleet::{
    ControllerDeps, FleetCatalog, FleetController, InstanceProfile, LocalProvider, MemoryStore,
    Provider, ProviderAdapter, ReadonlyMode, RegistrySettings, RestartPolicy,
};
use tokio::sync::mpsc;

pub struct TestFleetConfig {
    pub instances: Vec<(&'static str, &'static str)>,
    pub readonly: ReadonlyMode,
    pub operation_delay: Duration,
}

impl Default for TestFleetConfig {
    fn default() -> Self {
        Self {
            instances: vec![("1", "TERMINATED")],
            readonly: ReadonlyMode::Disable,
            operation_delay: Duration::ZERO,
        }
    }
}

pub struct TestFleet {
    pub local: Arc<LocalProvider>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub controller: FleetController,
    pub events: mpsc::Receiver<Arc<Envelope>>,
}

impl TestFleet {
    /// Drains every envelope received so far.
    pub fn drain(&mut self) -> Vec<Arc<Envelope>> {
        let mut out = Vec::new();
        while let Ok(env) = self.events.try_recv() {
            out.push(env);
        }
        out
    }
}

impl Drop for TestFleet {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

pub fn fast_settings() -> RegistrySettings {
    RegistrySettings {
        instance: InstanceSettings {
            poll_interval: Duration::from_millis(10),
            poll_timeout: Duration::from_secs(2),
            warning_window: Duration::from_secs(3600),
        },
        sync_interval: Duration::from_secs(900),
        online_window: Duration::from_secs(4 * 3600),
        restart: RestartPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(10),
        },
    }
}

/// Builds a controller over a local GCE-flavoured provider and runs the first sync.
pub async fn spawn_test_fleet(config: TestFleetConfig) -> TestFleet {
    let local = LocalProvider::new(Provider::Google).with_operation_delay(config.operation_delay);
    for (id, status) in &config.instances {
        local.insert_instance(id, "asia-northeast1-b", status);
    }
    let local = Arc::new(local);

    let catalog = FleetCatalog::from_entries(vec![CatalogEntry::new(
        "1",
        InstanceProfile {
            name: "Tokyo".to_string(),
            country: Some("JP".to_string()),
            url: Some("vpn-jp.example.com".to_string()),
            readonly: config.readonly,
            ..InstanceProfile::default()
        },
    )])
    .expect("catalog should be valid");

    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let controller = FleetController::new(
        ControllerDeps {
            adapters: vec![local.clone() as Arc<dyn ProviderAdapter>],
            catalog,
            store: store.clone(),
            notifier: notifier.clone(),
        },
        fast_settings(),
    );
    let (_, events) = controller.hub().connect(256);
    controller.sync_now().await.expect("first sync should succeed");

    TestFleet {
        local,
        store,
        notifier,
        controller,
        events,
    }
}

pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
