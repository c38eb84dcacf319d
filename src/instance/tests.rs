use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::hub::BroadcastHub;
use crate::monitor::OperationCallbacks;
use crate::provider::{LocalProvider, Provider, ProviderError, ProviderInstance};

fn fast_settings() -> InstanceSettings {
    InstanceSettings {
        poll_interval: Duration::from_millis(10),
        poll_timeout: Duration::from_secs(2),
        warning_window: Duration::from_secs(3600),
    }
}

fn setup_with(
    status: &str,
    readonly: ReadonlyMode,
) -> (Arc<LocalProvider>, Arc<ManagedInstance>) {
    let local = Arc::new(LocalProvider::new(Provider::Google).with_instance("1", "zone-a", status));
    let ctx = InstanceContext {
        adapter: local.clone(),
        hub: Arc::new(BroadcastHub::new()),
        settings: fast_settings(),
        shutdown: CancellationToken::new(),
    };
    let profile = InstanceProfile {
        name: "Tokyo".to_string(),
        country: Some("JP".to_string()),
        readonly,
        ..InstanceProfile::default()
    };
    let instance = ManagedInstance::new(&ctx, &ProviderInstance::new("1", "zone-a", status), profile);
    (local, instance)
}

fn setup(status: &str) -> (Arc<LocalProvider>, Arc<ManagedInstance>) {
    setup_with(status, ReadonlyMode::Disable)
}

#[tokio::test]
async fn test_new_derives_power_from_status() {
    let (_, running) = setup("RUNNING");
    assert!(running.is_power_on());
    assert!(running.expires_at().is_none());

    let (_, stopped) = setup("TERMINATED");
    assert!(!stopped.is_power_on());
    assert_eq!(stopped.provider(), Provider::Google);
}

#[tokio::test]
async fn test_refresh_emits_only_on_change() {
    let (local, instance) = setup("TERMINATED");
    let mut events = instance.subscribe();

    local.set_status("1", "RUNNING");
    instance.refresh_status().await.unwrap();
    assert!(instance.is_power_on());
    assert_eq!(instance.status(), "RUNNING");

    assert_eq!(
        events.try_recv().unwrap(),
        InstanceEvent::StatusChanged {
            old: "TERMINATED".to_string(),
            new: "RUNNING".to_string()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        InstanceEvent::PowerChanged {
            old: false,
            new: true
        }
    );

    instance.refresh_status().await.unwrap();
    instance.refresh_status().await.unwrap();
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_refresh_status_change_without_power_change() {
    let (local, instance) = setup("RUNNING");
    let mut events = instance.subscribe();

    local.set_status("1", "STOPPING");
    instance.refresh_status().await.unwrap();
    local.set_status("1", "TERMINATED");
    instance.refresh_status().await.unwrap();

    assert!(matches!(
        events.try_recv().unwrap(),
        InstanceEvent::StatusChanged { .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        InstanceEvent::PowerChanged {
            old: true,
            new: false
        }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        InstanceEvent::StatusChanged { .. }
    ));
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_refresh_clears_passed_expiry_only_when_off() {
    let (local, instance) = setup("RUNNING");
    let past = Utc::now() - TimeDelta::seconds(5);

    instance.set_expires_at(Some(past));
    instance.refresh_status().await.unwrap();
    assert_eq!(instance.expires_at(), Some(past), "still running");

    local.set_status("1", "TERMINATED");
    instance.refresh_status().await.unwrap();
    assert!(instance.expires_at().is_none());

    let future = Utc::now() + TimeDelta::minutes(30);
    instance.set_expires_at(Some(future));
    instance.refresh_status().await.unwrap();
    assert_eq!(instance.expires_at(), Some(future));
}

#[tokio::test]
async fn test_refresh_propagates_provider_error() {
    let (local, instance) = setup("RUNNING");
    local.fail_next_status(1);
    assert!(matches!(
        instance.refresh_status().await,
        Err(InstanceError::Provider(ProviderError::Simulated(_)))
    ));
    assert_eq!(instance.status(), "RUNNING");
}

#[tokio::test]
async fn test_start_when_running_makes_no_provider_call() {
    let (local, instance) = setup("RUNNING");

    let err = instance
        .start(true, Some(Utc::now()), OperationCallbacks::none())
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceError::AlreadyRunning { .. }));
    assert_eq!(local.start_calls(), 0);
    assert_eq!(local.status_calls(), 0);
    assert!(instance.expires_at().is_none());
}

#[tokio::test]
async fn test_start_respects_readonly() {
    for mode in [ReadonlyMode::StopOnly, ReadonlyMode::ReadOnly] {
        let (local, instance) = setup_with("TERMINATED", mode);
        let err = instance
            .start(false, None, OperationCallbacks::none())
            .await
            .unwrap_err();
        assert!(matches!(err, InstanceError::ReadOnlyViolation { .. }));
        assert_eq!(local.start_calls(), 0);
    }

    let (local, instance) = setup_with("TERMINATED", ReadonlyMode::ReadOnly);
    let handle = instance
        .start(true, None, OperationCallbacks::none())
        .await
        .unwrap();
    handle.outcome().await.unwrap();
    assert_eq!(local.start_calls(), 1);
}

#[tokio::test]
async fn test_stop_start_only_without_bypass() {
    let (local, instance) = setup_with("RUNNING", ReadonlyMode::StartOnly);
    let err = instance
        .stop(false, OperationCallbacks::none())
        .await
        .unwrap_err();
    match err {
        InstanceError::ReadOnlyViolation { mode, action, .. } => {
            assert_eq!(mode, ReadonlyMode::StartOnly);
            assert_eq!(action, PowerAction::Stop);
        }
        other => panic!("expected ReadOnlyViolation, got {other:?}"),
    }
    assert_eq!(local.stop_calls(), 0);
}

#[tokio::test]
async fn test_stop_when_powered_off() {
    let (local, instance) = setup("TERMINATED");
    let err = instance
        .stop(true, OperationCallbacks::none())
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceError::AlreadyStopped { .. }));
    assert_eq!(local.stop_calls(), 0);
}

#[tokio::test]
async fn test_start_runs_to_completion() {
    let (local, instance) = setup("TERMINATED");
    let expires = Utc::now() + TimeDelta::hours(4);
    let succeeded = Arc::new(AtomicBool::new(false));
    let flag = succeeded.clone();

    let handle = instance
        .start(
            false,
            Some(expires),
            OperationCallbacks::none().on_success(move || flag.store(true, Ordering::SeqCst)),
        )
        .await
        .unwrap();
    assert_eq!(handle.action(), PowerAction::Start);
    assert!(handle.operation_id().starts_with("local-op-"));
    assert_eq!(instance.expires_at(), Some(expires));

    handle.outcome().await.unwrap();
    assert!(succeeded.load(Ordering::SeqCst));
    assert!(instance.is_power_on());
    assert_eq!(instance.expires_at(), Some(expires));

    let keys = local.idempotency_keys();
    assert_eq!(keys.len(), 1);
    assert!(uuid::Uuid::parse_str(&keys[0]).is_ok());
}

#[tokio::test]
async fn test_each_call_gets_fresh_idempotency_key() {
    let (local, instance) = setup("TERMINATED");
    instance
        .start(false, None, OperationCallbacks::none())
        .await
        .unwrap()
        .outcome()
        .await
        .unwrap();
    instance
        .stop(false, OperationCallbacks::none())
        .await
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let keys = local.idempotency_keys();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}

#[tokio::test]
async fn test_start_without_expiry_keeps_current() {
    let (_, instance) = setup("TERMINATED");
    let current = Utc::now() + TimeDelta::minutes(90);
    instance.set_expires_at(Some(current));

    let handle = instance
        .start(false, None, OperationCallbacks::none())
        .await
        .unwrap();
    assert_eq!(instance.expires_at(), Some(current));
    handle.outcome().await.unwrap();
}

#[tokio::test]
async fn test_start_rejected_rolls_back_expiry() {
    let (local, instance) = setup("TERMINATED");
    local.fail_next_starts(1);

    let err = instance
        .start(false, Some(Utc::now() + TimeDelta::hours(4)), OperationCallbacks::none())
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceError::Provider(_)));
    assert!(instance.expires_at().is_none());
    assert_eq!(local.pending_operations(), 0);
}

#[tokio::test]
async fn test_stop_clears_expiry_before_confirmation() {
    let (_, instance) = setup("RUNNING");
    instance.set_expires_at(Some(Utc::now() + TimeDelta::hours(1)));

    let handle = instance
        .stop(false, OperationCallbacks::none())
        .await
        .unwrap();
    assert!(instance.expires_at().is_none());

    handle.outcome().await.unwrap();
    assert!(!instance.is_power_on());
    assert_eq!(instance.status(), "TERMINATED");
}

#[tokio::test]
async fn test_extend_expiration_window() {
    let (_, instance) = setup("RUNNING");
    let target = Utc::now() + TimeDelta::hours(5);

    instance.set_expires_at(Some(Utc::now() + TimeDelta::minutes(61)));
    assert!(matches!(
        instance.extend_expiration(target),
        Err(InstanceError::TooEarlyToExtend { .. })
    ));

    instance.set_expires_at(Some(Utc::now() + TimeDelta::minutes(59)));
    instance.extend_expiration(target).unwrap();
    assert_eq!(instance.expires_at(), Some(target));

    instance.set_expires_at(None);
    instance.extend_expiration(target).unwrap();
    assert_eq!(instance.expires_at(), Some(target));
}

#[tokio::test]
async fn test_snapshot_field_names() {
    let (_, instance) = setup("RUNNING");
    let value = serde_json::to_value(instance.to_snapshot()).unwrap();

    assert_eq!(value["id"], "1");
    assert_eq!(value["name"], "Tokyo");
    assert_eq!(value["country"], "JP");
    assert_eq!(value["provider"], "google");
    assert_eq!(value["isPowerOn"], true);
    assert_eq!(value["readonlyMode"], "disable");
    assert!(value["expiresAt"].is_null());
    assert!(value["profiles"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_slot_is_exclusive() {
    let (_, instance) = setup("RUNNING");
    assert!(instance.try_begin_restart());
    assert!(!instance.try_begin_restart());
    instance.end_restart();
    assert!(instance.try_begin_restart());
}

#[test]
fn test_readonly_mode_rules() {
    assert!(ReadonlyMode::Disable.allows(PowerAction::Start));
    assert!(ReadonlyMode::Disable.allows(PowerAction::Stop));
    assert!(ReadonlyMode::StartOnly.allows(PowerAction::Start));
    assert!(!ReadonlyMode::StartOnly.allows(PowerAction::Stop));
    assert!(!ReadonlyMode::StopOnly.allows(PowerAction::Start));
    assert!(ReadonlyMode::StopOnly.allows(PowerAction::Stop));
    assert!(!ReadonlyMode::ReadOnly.allows(PowerAction::Start));
    assert!(!ReadonlyMode::ReadOnly.allows(PowerAction::Stop));
    assert_eq!(
        serde_json::to_string(&ReadonlyMode::StartOnly).unwrap(),
        "\"startOnly\""
    );
}

#[tokio::test(start_paused = true)]
async fn test_status_poll_gives_up_after_timeout() {
    let (local, instance) = setup("TERMINATED");
    let _poll = super::poll::StatusPoll::spawn(Arc::clone(&instance), PowerAction::Start);

    // target never reached; only the timeout can end the poll
    tokio::time::sleep(Duration::from_secs(5)).await;
    let calls = local.status_calls();
    assert!(calls > 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(local.status_calls(), calls);
}

#[tokio::test]
async fn test_status_poll_stops_when_cancelled() {
    let (local, instance) = setup("TERMINATED");
    let poll = super::poll::StatusPoll::spawn(Arc::clone(&instance), PowerAction::Start);

    tokio::time::sleep(Duration::from_millis(50)).await;
    poll.cancel();
    let calls = local.status_calls();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(local.status_calls(), calls);
}
