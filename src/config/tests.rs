use super::*;
use crate::instance::{ConnectionProfile, ReadonlyMode};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, _) in vars {
        unsafe { env::remove_var(key) };
    }

    result
}

fn clear_fleet_env() {
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    unsafe {
        for key in [
            "FLEET_CATALOG_PATH",
            "FLEET_PROVIDERS",
            "FLEET_SYNC_INTERVAL_SECS",
            "FLEET_ONLINE_WINDOW_SECS",
            "FLEET_WARNING_WINDOW_SECS",
            "FLEET_STATUS_POLL_INTERVAL_MS",
            "FLEET_STATUS_POLL_TIMEOUT_SECS",
            "FLEET_RESTART_MAX_ATTEMPTS",
            "FLEET_RESTART_DELAY_MS",
            "FLEET_REDIS_URL",
            "FLEET_GCP_PROJECT",
            "FLEET_GCP_ZONES",
            "AZURE_TENANT_ID",
            "AZURE_CLIENT_ID",
            "AZURE_CLIENT_SECRET",
            "AZURE_SUBSCRIPTION_ID",
            "FLEET_AZURE_RESOURCE_GROUP",
        ] {
            env::remove_var(key);
        }
    }
}

fn write_catalog(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.catalog_path, PathBuf::from("config/vm_data.json"));
    assert_eq!(config.providers, vec![CloudProviderType::Gcp]);
    assert_eq!(config.sync_interval, Duration::from_secs(900));
    assert_eq!(config.online_window, Duration::from_secs(4 * 3600));
    assert_eq!(config.warning_window, Duration::from_secs(3600));
    assert_eq!(config.status_poll_timeout, Duration::from_secs(120));
    assert_eq!(config.restart_max_attempts, 5);
    assert_eq!(config.azure_resource_group, "VM");
    assert!(config.redis_url.is_none());
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_fleet_env();
    let config = Config::from_env().unwrap();
    assert_eq!(config.providers, vec![CloudProviderType::Gcp]);
    assert_eq!(config.sync_interval, Duration::from_secs(900));
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_fleet_env();
    let config = with_env_vars(
        &[
            ("FLEET_PROVIDERS", "gcp, azure,gcp"),
            ("FLEET_SYNC_INTERVAL_SECS", "60"),
            ("FLEET_ONLINE_WINDOW_SECS", "7200"),
            ("FLEET_STATUS_POLL_INTERVAL_MS", "250"),
            ("FLEET_REDIS_URL", "redis://127.0.0.1:6379"),
            ("FLEET_GCP_PROJECT", "vpn-project"),
            ("FLEET_GCP_ZONES", "asia-east1-b, us-west1-a"),
        ],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(
        config.providers,
        vec![CloudProviderType::Gcp, CloudProviderType::Azure]
    );
    assert_eq!(config.sync_interval, Duration::from_secs(60));
    assert_eq!(config.online_window, Duration::from_secs(7200));
    assert_eq!(config.status_poll_interval, Duration::from_millis(250));
    assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));

    let gce = config.gce_config().unwrap();
    assert_eq!(gce.project, "vpn-project");
    assert_eq!(gce.zones, vec!["asia-east1-b", "us-west1-a"]);
}

#[test]
#[serial]
fn test_invalid_numbers_fall_back() {
    clear_fleet_env();
    let config = with_env_vars(
        &[
            ("FLEET_SYNC_INTERVAL_SECS", "soon"),
            ("FLEET_RESTART_MAX_ATTEMPTS", "-1"),
        ],
        Config::from_env,
    )
    .unwrap();
    assert_eq!(config.sync_interval, Duration::from_secs(900));
    assert_eq!(config.restart_max_attempts, 5);
}

#[test]
#[serial]
fn test_unknown_provider_is_error() {
    clear_fleet_env();
    let result = with_env_vars(&[("FLEET_PROVIDERS", "gcp,aws")], Config::from_env);
    match result {
        Err(ConfigError::UnknownProvider { value }) => assert_eq!(value, "aws"),
        other => panic!("expected UnknownProvider, got {other:?}"),
    }

    let result = with_env_vars(&[("FLEET_PROVIDERS", " , ")], Config::from_env);
    assert!(matches!(result, Err(ConfigError::NoProviders)));
}

#[test]
fn test_cloud_provider_from_str() {
    assert_eq!("GCP".parse::<CloudProviderType>(), Ok(CloudProviderType::Gcp));
    assert_eq!("google".parse::<CloudProviderType>(), Ok(CloudProviderType::Gcp));
    assert_eq!("Azure".parse::<CloudProviderType>(), Ok(CloudProviderType::Azure));
    assert_eq!("local".parse::<CloudProviderType>(), Ok(CloudProviderType::Local));
    assert!("aws".parse::<CloudProviderType>().is_err());
}

#[test]
fn test_gce_config_requires_project_and_zones() {
    let mut config = Config::default();
    assert!(matches!(
        config.gce_config(),
        Err(ConfigError::MissingEnvVar {
            name: "FLEET_GCP_PROJECT"
        })
    ));

    config.gcp_project = Some("p".to_string());
    assert!(matches!(
        config.gce_config(),
        Err(ConfigError::MissingEnvVar {
            name: "FLEET_GCP_ZONES"
        })
    ));
}

#[test]
fn test_azure_config_requires_credentials() {
    let mut config = Config {
        azure_tenant_id: Some("tenant".to_string()),
        azure_client_id: Some("client".to_string()),
        azure_client_secret: Some("secret".to_string()),
        ..Config::default()
    };
    assert!(matches!(
        config.azure_config(),
        Err(ConfigError::MissingEnvVar {
            name: "AZURE_SUBSCRIPTION_ID"
        })
    ));

    config.azure_subscription_id = Some("sub".to_string());
    let azure = config.azure_config().unwrap();
    assert_eq!(azure.resource_group, "VM");
    assert_eq!(azure.subscription_id, "sub");
}

#[test]
fn test_validate_catalog_path() {
    let config = Config {
        catalog_path: PathBuf::from("/definitely/not/here.json"),
        ..Config::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::PathNotFound { .. })
    ));

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        catalog_path: dir.path().to_path_buf(),
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::NotAFile { .. })));
}

#[test]
fn test_validate_windows() {
    let file = write_catalog("[]");
    let base = Config {
        catalog_path: file.path().to_path_buf(),
        ..Config::default()
    };
    assert!(base.validate().is_ok());

    let config = Config {
        warning_window: Duration::from_secs(5 * 3600),
        ..base.clone()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::WindowOrder { .. })
    ));

    let config = Config {
        sync_interval: Duration::ZERO,
        ..base
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroDuration { .. })
    ));
}

#[test]
fn test_catalog_load() {
    let file = write_catalog(
        r#"[
            {
                "id": "4611686018427387904",
                "name": "Tokyo",
                "country": "JP",
                "url": "vpn-jp.example.com",
                "readonly": "startOnly",
                "profiles": [
                    {"type": "OpenVPN", "name": "udp", "filename": "jp.ovpn"},
                    {"type": "SS", "name": "ss", "url": "ss://jp", "method": "chacha20-ietf-poly1305"},
                    {"type": "sing-box", "name": "sb"}
                ]
            },
            {"id": "vpn-uk"}
        ]"#,
    );

    let catalog = FleetCatalog::load(file.path()).unwrap();
    assert_eq!(catalog.len(), 2);

    let tokyo = catalog.get("4611686018427387904").unwrap();
    assert_eq!(tokyo.profile.name, "Tokyo");
    assert_eq!(tokyo.profile.readonly, ReadonlyMode::StartOnly);
    assert_eq!(tokyo.profile.profiles.len(), 3);
    assert!(matches!(
        tokyo.profile.profiles[1],
        ConnectionProfile::Shadowsocks { .. }
    ));

    let uk = catalog.profile_for("vpn-uk");
    assert_eq!(uk.name, "N/A");
    assert_eq!(uk.readonly, ReadonlyMode::Disable);

    let unknown = catalog.profile_for("missing");
    assert_eq!(unknown.name, "N/A");
    assert!(unknown.country.is_none());
    assert!(unknown.profiles.is_empty());
}

#[test]
fn test_catalog_rejects_duplicates() {
    let file = write_catalog(r#"[{"id": "1"}, {"id": "2"}, {"id": "1"}]"#);
    match FleetCatalog::load(file.path()) {
        Err(ConfigError::DuplicateInstance { id }) => assert_eq!(id, "1"),
        other => panic!("expected DuplicateInstance, got {other:?}"),
    }
}

#[test]
fn test_catalog_rejects_incomplete_profiles() {
    // missing field is a parse error
    let file = write_catalog(r#"[{"id": "1", "profiles": [{"type": "OpenVPN", "name": "a"}]}]"#);
    assert!(matches!(
        FleetCatalog::load(file.path()),
        Err(ConfigError::CatalogParse { .. })
    ));

    // blank field is a validation error
    let file = write_catalog(
        r#"[{"id": "1", "profiles": [{"type": "https", "name": "web", "url": " "}]}]"#,
    );
    match FleetCatalog::load(file.path()) {
        Err(ConfigError::InvalidProfile { id, profile, field }) => {
            assert_eq!(id, "1");
            assert_eq!(profile, "web");
            assert_eq!(field, "url");
        }
        other => panic!("expected InvalidProfile, got {other:?}"),
    }

    let file = write_catalog(r#"[{"id": "1", "readonly": "sometimes"}]"#);
    assert!(matches!(
        FleetCatalog::load(file.path()),
        Err(ConfigError::CatalogParse { .. })
    ));
}

#[test]
fn test_catalog_rejects_empty_id() {
    let result = FleetCatalog::from_entries(vec![CatalogEntry::new(" ", Default::default())]);
    assert!(matches!(result, Err(ConfigError::EmptyId { index: 0 })));
}
