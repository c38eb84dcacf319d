//! Environment-backed configuration.
//!
//! Most settings have defaults. Override with `FLEET_*` environment variables; Azure
//! credentials use the conventional `AZURE_*` names.

pub mod catalog;
pub mod error;

#[cfg(test)]
mod tests;

pub use catalog::{CatalogEntry, FleetCatalog};
pub use error::ConfigError;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ONLINE_WINDOW_SECS, DEFAULT_RESTART_DELAY_MS, DEFAULT_RESTART_MAX_ATTEMPTS,
    DEFAULT_STATUS_POLL_INTERVAL_MS, DEFAULT_STATUS_POLL_TIMEOUT_SECS, DEFAULT_SYNC_INTERVAL_SECS,
    DEFAULT_WARNING_WINDOW_SECS,
};
use crate::instance::InstanceSettings;
use crate::provider::{AzureConfig, GceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Cloud provider selection.
pub enum CloudProviderType {
    #[default]
    /// Google Compute Engine.
    Gcp,
    /// Azure virtual machines.
    Azure,
    /// In-memory simulation.
    Local,
}

impl std::str::FromStr for CloudProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gcp" | "google" => Ok(Self::Gcp),
            "azure" => Ok(Self::Azure),
            "local" => Ok(Self::Local),
            _ => Err(format!("Unknown cloud provider: {}", s)),
        }
    }
}

/// Controller configuration loaded from environment variables.
///
/// Use [`Config::from_env`] to read overrides on top of defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Static fleet catalog. Default: `config/vm_data.json`.
    pub catalog_path: PathBuf,

    /// Enabled providers. Default: `[Gcp]`.
    pub providers: Vec<CloudProviderType>,

    /// Interval between reconciliation cycles. Default: 15 minutes.
    pub sync_interval: Duration,

    /// Auto-shutdown clock for a started instance. Default: 4 hours.
    pub online_window: Duration,

    /// Extension / closing-soon window before expiry. Default: 60 minutes.
    pub warning_window: Duration,

    pub status_poll_interval: Duration,

    /// Upper bound of the status poll. Default: 120 seconds.
    pub status_poll_timeout: Duration,

    pub restart_max_attempts: u32,

    pub restart_delay: Duration,

    /// Redis for opener records; in-memory store when unset.
    pub redis_url: Option<String>,

    pub gcp_project: Option<String>,

    pub gcp_zones: Vec<String>,

    pub azure_tenant_id: Option<String>,
    pub azure_client_id: Option<String>,
    pub azure_client_secret: Option<String>,
    pub azure_subscription_id: Option<String>,

    /// Resource group holding the Azure VMs. Default: `VM`.
    pub azure_resource_group: String,
}

/// Default catalog path used when `FLEET_CATALOG_PATH` is not set.
pub const DEFAULT_CATALOG_PATH: &str = "config/vm_data.json";

/// Default Azure resource group.
pub const DEFAULT_AZURE_RESOURCE_GROUP: &str = "VM";

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            providers: vec![CloudProviderType::default()],
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            online_window: Duration::from_secs(DEFAULT_ONLINE_WINDOW_SECS),
            warning_window: Duration::from_secs(DEFAULT_WARNING_WINDOW_SECS),
            status_poll_interval: Duration::from_millis(DEFAULT_STATUS_POLL_INTERVAL_MS),
            status_poll_timeout: Duration::from_secs(DEFAULT_STATUS_POLL_TIMEOUT_SECS),
            restart_max_attempts: DEFAULT_RESTART_MAX_ATTEMPTS,
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            redis_url: None,
            gcp_project: None,
            gcp_zones: Vec::new(),
            azure_tenant_id: None,
            azure_client_id: None,
            azure_client_secret: None,
            azure_subscription_id: None,
            azure_resource_group: DEFAULT_AZURE_RESOURCE_GROUP.to_string(),
        }
    }
}

impl Config {
    const ENV_CATALOG_PATH: &'static str = "FLEET_CATALOG_PATH";
    const ENV_PROVIDERS: &'static str = "FLEET_PROVIDERS";
    const ENV_SYNC_INTERVAL_SECS: &'static str = "FLEET_SYNC_INTERVAL_SECS";
    const ENV_ONLINE_WINDOW_SECS: &'static str = "FLEET_ONLINE_WINDOW_SECS";
    const ENV_WARNING_WINDOW_SECS: &'static str = "FLEET_WARNING_WINDOW_SECS";
    const ENV_STATUS_POLL_INTERVAL_MS: &'static str = "FLEET_STATUS_POLL_INTERVAL_MS";
    const ENV_STATUS_POLL_TIMEOUT_SECS: &'static str = "FLEET_STATUS_POLL_TIMEOUT_SECS";
    const ENV_RESTART_MAX_ATTEMPTS: &'static str = "FLEET_RESTART_MAX_ATTEMPTS";
    const ENV_RESTART_DELAY_MS: &'static str = "FLEET_RESTART_DELAY_MS";
    const ENV_REDIS_URL: &'static str = "FLEET_REDIS_URL";
    const ENV_GCP_PROJECT: &'static str = "FLEET_GCP_PROJECT";
    const ENV_GCP_ZONES: &'static str = "FLEET_GCP_ZONES";
    const ENV_AZURE_TENANT_ID: &'static str = "AZURE_TENANT_ID";
    const ENV_AZURE_CLIENT_ID: &'static str = "AZURE_CLIENT_ID";
    const ENV_AZURE_CLIENT_SECRET: &'static str = "AZURE_CLIENT_SECRET";
    const ENV_AZURE_SUBSCRIPTION_ID: &'static str = "AZURE_SUBSCRIPTION_ID";
    const ENV_AZURE_RESOURCE_GROUP: &'static str = "FLEET_AZURE_RESOURCE_GROUP";

    /// Loads configuration from environment variables (falling back to defaults).
    ///
    /// Unparseable numbers fall back to their default; an unknown provider is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let catalog_path = Self::parse_path_from_env(Self::ENV_CATALOG_PATH, defaults.catalog_path);
        let providers = Self::parse_providers_from_env(defaults.providers)?;
        let sync_interval =
            Self::parse_secs_from_env(Self::ENV_SYNC_INTERVAL_SECS, defaults.sync_interval);
        let online_window =
            Self::parse_secs_from_env(Self::ENV_ONLINE_WINDOW_SECS, defaults.online_window);
        let warning_window =
            Self::parse_secs_from_env(Self::ENV_WARNING_WINDOW_SECS, defaults.warning_window);
        let status_poll_interval = Self::parse_u64_from_env(Self::ENV_STATUS_POLL_INTERVAL_MS)
            .map(Duration::from_millis)
            .unwrap_or(defaults.status_poll_interval);
        let status_poll_timeout = Self::parse_secs_from_env(
            Self::ENV_STATUS_POLL_TIMEOUT_SECS,
            defaults.status_poll_timeout,
        );
        let restart_max_attempts = env::var(Self::ENV_RESTART_MAX_ATTEMPTS)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.restart_max_attempts);
        let restart_delay = Self::parse_u64_from_env(Self::ENV_RESTART_DELAY_MS)
            .map(Duration::from_millis)
            .unwrap_or(defaults.restart_delay);

        Ok(Self {
            catalog_path,
            providers,
            sync_interval,
            online_window,
            warning_window,
            status_poll_interval,
            status_poll_timeout,
            restart_max_attempts,
            restart_delay,
            redis_url: Self::parse_optional_string_from_env(Self::ENV_REDIS_URL),
            gcp_project: Self::parse_optional_string_from_env(Self::ENV_GCP_PROJECT),
            gcp_zones: Self::parse_list_from_env(Self::ENV_GCP_ZONES),
            azure_tenant_id: Self::parse_optional_string_from_env(Self::ENV_AZURE_TENANT_ID),
            azure_client_id: Self::parse_optional_string_from_env(Self::ENV_AZURE_CLIENT_ID),
            azure_client_secret: Self::parse_optional_string_from_env(
                Self::ENV_AZURE_CLIENT_SECRET,
            ),
            azure_subscription_id: Self::parse_optional_string_from_env(
                Self::ENV_AZURE_SUBSCRIPTION_ID,
            ),
            azure_resource_group: Self::parse_optional_string_from_env(
                Self::ENV_AZURE_RESOURCE_GROUP,
            )
            .unwrap_or(defaults.azure_resource_group),
        })
    }

    /// Validates paths and timer invariants (does not load the catalog).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.catalog_path.exists() {
            return Err(ConfigError::PathNotFound {
                path: self.catalog_path.clone(),
            });
        }
        if !self.catalog_path.is_file() {
            return Err(ConfigError::NotAFile {
                path: self.catalog_path.clone(),
            });
        }

        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        for (name, value) in [
            (Self::ENV_SYNC_INTERVAL_SECS, self.sync_interval),
            (Self::ENV_ONLINE_WINDOW_SECS, self.online_window),
            (Self::ENV_STATUS_POLL_INTERVAL_MS, self.status_poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { name });
            }
        }

        if self.warning_window >= self.online_window {
            return Err(ConfigError::WindowOrder {
                warning_secs: self.warning_window.as_secs(),
                online_secs: self.online_window.as_secs(),
            });
        }

        Ok(())
    }

    /// Timing knobs handed to every managed instance.
    pub fn instance_settings(&self) -> InstanceSettings {
        InstanceSettings {
            poll_interval: self.status_poll_interval,
            poll_timeout: self.status_poll_timeout,
            warning_window: self.warning_window,
        }
    }

    /// GCE adapter settings; requires a project and at least one zone.
    pub fn gce_config(&self) -> Result<GceConfig, ConfigError> {
        let project = self.gcp_project.clone().ok_or(ConfigError::MissingEnvVar {
            name: Self::ENV_GCP_PROJECT,
        })?;
        if self.gcp_zones.is_empty() {
            return Err(ConfigError::MissingEnvVar {
                name: Self::ENV_GCP_ZONES,
            });
        }
        Ok(GceConfig {
            project,
            zones: self.gcp_zones.clone(),
        })
    }

    /// Azure adapter settings; all service-principal values are required.
    pub fn azure_config(&self) -> Result<AzureConfig, ConfigError> {
        fn required(
            value: &Option<String>,
            name: &'static str,
        ) -> Result<String, ConfigError> {
            value.clone().ok_or(ConfigError::MissingEnvVar { name })
        }

        Ok(AzureConfig {
            tenant_id: required(&self.azure_tenant_id, Self::ENV_AZURE_TENANT_ID)?,
            client_id: required(&self.azure_client_id, Self::ENV_AZURE_CLIENT_ID)?,
            client_secret: required(&self.azure_client_secret, Self::ENV_AZURE_CLIENT_SECRET)?,
            subscription_id: required(
                &self.azure_subscription_id,
                Self::ENV_AZURE_SUBSCRIPTION_ID,
            )?,
            resource_group: self.azure_resource_group.clone(),
        })
    }

    fn parse_providers_from_env(
        default: Vec<CloudProviderType>,
    ) -> Result<Vec<CloudProviderType>, ConfigError> {
        let Ok(value) = env::var(Self::ENV_PROVIDERS) else {
            return Ok(default);
        };

        let mut providers = Vec::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let kind: CloudProviderType =
                part.parse().map_err(|_| ConfigError::UnknownProvider {
                    value: part.to_string(),
                })?;
            if !providers.contains(&kind) {
                providers.push(kind);
            }
        }

        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(providers)
    }

    fn parse_path_from_env(var_name: &str, default: PathBuf) -> PathBuf {
        env::var(var_name).map(PathBuf::from).unwrap_or(default)
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_list_from_env(var_name: &str) -> Vec<String> {
        env::var(var_name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_u64_from_env(var_name: &str) -> Option<u64> {
        env::var(var_name).ok().and_then(|v| v.trim().parse().ok())
    }

    fn parse_secs_from_env(var_name: &str, default: Duration) -> Duration {
        Self::parse_u64_from_env(var_name)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}
