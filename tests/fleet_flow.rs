//! End-to-end controller flows against the local provider.

mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use fleet::constants::{TOPIC_INSTANCE, TOPIC_INSTANCE_ERROR};
use fleet::provider::ProviderFault;
use fleet::store::KeyValueStore;
use fleet::{ControllerError, InstanceError, Notice, Opener, ReadonlyMode};

use common::harness::{TestFleetConfig, eventually, spawn_test_fleet};

fn alice() -> Opener {
    Opener::new("alice@example.com", "Alice")
}

#[tokio::test]
async fn test_start_extend_warn_stop() {
    let mut fleet = spawn_test_fleet(TestFleetConfig::default()).await;

    let handle = fleet
        .controller
        .start_instance("1", alice())
        .await
        .expect("start should be accepted");
    handle.outcome().await.expect("start should succeed");

    let vm = fleet.controller.instance("1").unwrap();
    assert!(eventually(|| vm.is_power_on()).await);
    assert!(eventually(|| fleet.notifier.count("start_confirmed") == 1).await);

    let early = fleet.controller.extend_instance("1", alice()).await;
    assert!(matches!(
        early,
        Err(ControllerError::Instance(InstanceError::TooEarlyToExtend { .. }))
    ));

    vm.set_expires_at(Some(Utc::now() + TimeDelta::minutes(30)));
    let extended = fleet
        .controller
        .extend_instance("1", alice())
        .await
        .expect("extension inside the warning window");
    assert!(extended > Utc::now() + TimeDelta::hours(4));

    // Closing soon: the sweep tells the opener once and forgets them.
    vm.set_expires_at(Some(Utc::now() + TimeDelta::minutes(20)));
    let report = fleet.controller.sync_now().await.unwrap();
    assert_eq!(report.sweep.warned, vec!["1".to_string()]);
    assert!(report.sweep.stopped.is_empty());
    assert!(fleet.store.get("opener:1").await.unwrap().is_none());

    let warning = fleet
        .notifier
        .notices()
        .into_iter()
        .find(|n| matches!(n, Notice::ClosingSoon { .. }))
        .expect("closing-soon notice");
    assert_eq!(warning.recipient(), Some(&alice()));

    let report = fleet.controller.sync_now().await.unwrap();
    assert!(report.sweep.warned.is_empty());

    let handle = fleet.controller.stop_instance("1", alice()).await.unwrap();
    handle.outcome().await.expect("stop should succeed");
    assert!(eventually(|| !vm.is_power_on()).await);
    assert!(vm.expires_at().is_none());
    assert_eq!(fleet.notifier.count("manual_stop"), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshots: Vec<_> = fleet
        .drain()
        .into_iter()
        .filter(|env| env.topic == TOPIC_INSTANCE)
        .collect();
    assert!(snapshots.iter().any(|env| env.payload["isPowerOn"] == true));
    assert_eq!(
        snapshots.last().unwrap().payload["isPowerOn"],
        false,
        "last snapshot should show the instance off"
    );
}

#[tokio::test]
async fn test_expired_instance_is_closed_by_sync() {
    let fleet = spawn_test_fleet(TestFleetConfig {
        instances: vec![("1", "RUNNING")],
        ..TestFleetConfig::default()
    })
    .await;
    let vm = fleet.controller.instance("1").unwrap();
    vm.set_expires_at(Some(Utc::now() - TimeDelta::minutes(1)));

    let report = fleet.controller.sync_now().await.unwrap();

    assert_eq!(report.sweep.stopped, vec!["1".to_string()]);
    assert_eq!(fleet.notifier.count("auto_closed"), 1);
    assert!(eventually(|| fleet.local.status_of("1").as_deref() == Some("TERMINATED")).await);
    assert!(eventually(|| !vm.is_power_on()).await);
    // no restart for a deliberate close
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fleet.local.start_calls(), 0);
}

#[tokio::test]
async fn test_readonly_instance_is_still_auto_closed() {
    let fleet = spawn_test_fleet(TestFleetConfig {
        instances: vec![("1", "RUNNING")],
        readonly: ReadonlyMode::ReadOnly,
        ..TestFleetConfig::default()
    })
    .await;
    let vm = fleet.controller.instance("1").unwrap();

    let manual = fleet.controller.stop_instance("1", alice()).await;
    assert!(matches!(
        manual,
        Err(ControllerError::Instance(InstanceError::ReadOnlyViolation { .. }))
    ));

    vm.set_expires_at(Some(Utc::now() - TimeDelta::seconds(1)));
    let report = fleet.controller.sync_now().await.unwrap();
    assert_eq!(report.sweep.stopped, vec!["1".to_string()]);
    assert!(eventually(|| fleet.local.status_of("1").as_deref() == Some("TERMINATED")).await);
}

#[tokio::test]
async fn test_quota_failure_is_published() {
    let mut fleet = spawn_test_fleet(TestFleetConfig::default()).await;
    fleet.local.inject_operation_fault(ProviderFault::new(
        "QUOTA_EXCEEDED",
        "Quota 'CPUS' exceeded. Limit: 8.0 in region asia-northeast1.",
    ));

    let handle = fleet.controller.start_instance("1", alice()).await.unwrap();
    let err = handle.outcome().await.unwrap_err();
    assert_eq!(
        err.failure().map(|f| f.category),
        Some(fleet::FailureCategory::CpuQuota)
    );

    let vm = fleet.controller.instance("1").unwrap();
    assert!(vm.expires_at().is_none());
    assert!(!vm.is_power_on());
    assert_eq!(fleet.notifier.count("start_confirmed"), 0);

    let errors: Vec<_> = fleet
        .drain()
        .into_iter()
        .filter(|env| env.topic == TOPIC_INSTANCE_ERROR)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["reasonCategory"], "CPU_QUOTA");
    assert_eq!(errors[0].payload["action"], "START");
    assert_eq!(errors[0].payload["id"], "1");
}

#[tokio::test]
async fn test_unexpected_power_loss_restarts() {
    let fleet = spawn_test_fleet(TestFleetConfig {
        instances: vec![("1", "RUNNING")],
        ..TestFleetConfig::default()
    })
    .await;
    let vm = fleet.controller.instance("1").unwrap();
    let expires = vm.expires_at().expect("running instance gets a clock");

    fleet.local.set_status("1", "TERMINATED");
    fleet.controller.sync_now().await.unwrap();

    assert!(eventually(|| fleet.local.status_of("1").as_deref() == Some("RUNNING")).await);
    assert!(eventually(|| vm.is_power_on()).await);
    assert_eq!(fleet.notifier.count("restart_attempted"), 1);
    assert_eq!(fleet.notifier.count("restart_abandoned"), 0);
    assert_eq!(vm.expires_at(), Some(expires));
}

#[tokio::test]
async fn test_restart_gives_up_after_five_attempts() {
    let fleet = spawn_test_fleet(TestFleetConfig {
        instances: vec![("1", "RUNNING")],
        ..TestFleetConfig::default()
    })
    .await;

    fleet.local.fail_next_starts(100);
    fleet.local.set_status("1", "TERMINATED");
    fleet.controller.sync_now().await.unwrap();

    assert!(eventually(|| fleet.notifier.count("restart_abandoned") == 1).await);
    assert_eq!(fleet.local.start_calls(), 5);
}
