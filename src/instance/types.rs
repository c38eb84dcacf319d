use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_STATUS_POLL_INTERVAL_MS, DEFAULT_STATUS_POLL_TIMEOUT_SECS,
    DEFAULT_WARNING_WINDOW_SECS, UNKNOWN_INSTANCE_NAME,
};
use crate::provider::{PowerAction, Provider};

/// Which power transitions may be requested without an explicit bypass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadonlyMode {
    /// Only starting is allowed.
    StartOnly,
    /// Only stopping is allowed.
    StopOnly,
    /// Neither start nor stop.
    ReadOnly,
    /// Unrestricted.
    #[default]
    Disable,
}

impl ReadonlyMode {
    pub fn allows(self, action: PowerAction) -> bool {
        match action {
            PowerAction::Start => !matches!(self, Self::StopOnly | Self::ReadOnly),
            PowerAction::Stop => !matches!(self, Self::StartOnly | Self::ReadOnly),
        }
    }
}

impl fmt::Display for ReadonlyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StartOnly => "startOnly",
            Self::StopOnly => "stopOnly",
            Self::ReadOnly => "readOnly",
            Self::Disable => "disable",
        };
        f.write_str(s)
    }
}

/// Client connection profile attached to an instance. Opaque to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConnectionProfile {
    #[serde(rename = "OpenVPN")]
    OpenVpn { name: String, filename: String },
    #[serde(rename = "SoftEther")]
    SoftEther { name: String, filename: String },
    #[serde(rename = "SS")]
    Shadowsocks {
        name: String,
        url: String,
        method: String,
    },
    #[serde(rename = "https")]
    Https { name: String, url: String },
    #[serde(rename = "sing-box")]
    SingBox { name: String },
}

impl ConnectionProfile {
    pub fn name(&self) -> &str {
        match self {
            Self::OpenVpn { name, .. }
            | Self::SoftEther { name, .. }
            | Self::Shadowsocks { name, .. }
            | Self::Https { name, .. }
            | Self::SingBox { name } => name,
        }
    }

    /// Returns the first required field that is present but blank.
    pub fn blank_field(&self) -> Option<&'static str> {
        let required: Vec<(&'static str, &str)> = match self {
            Self::OpenVpn { name, filename } | Self::SoftEther { name, filename } => {
                vec![("name", name.as_str()), ("filename", filename.as_str())]
            }
            Self::Shadowsocks { name, url, method } => vec![
                ("name", name.as_str()),
                ("url", url.as_str()),
                ("method", method.as_str()),
            ],
            Self::Https { name, url } => vec![("name", name.as_str()), ("url", url.as_str())],
            Self::SingBox { name } => vec![("name", name.as_str())],
        };
        required
            .into_iter()
            .find(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| field)
    }
}

fn unknown_name() -> String {
    UNKNOWN_INSTANCE_NAME.to_string()
}

/// Static per-instance configuration from the fleet catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProfile {
    #[serde(default = "unknown_name")]
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub readonly: ReadonlyMode,
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
}

impl Default for InstanceProfile {
    fn default() -> Self {
        Self {
            name: unknown_name(),
            country: None,
            url: None,
            readonly: ReadonlyMode::default(),
            profiles: Vec::new(),
        }
    }
}

/// State change raised by [`super::ManagedInstance::refresh_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    StatusChanged { old: String, new: String },
    PowerChanged { old: bool, new: bool },
}

/// Public field set published on the instance topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: String,
    pub name: String,
    pub status: String,
    pub zone: String,
    pub url: Option<String>,
    pub country: Option<String>,
    pub profiles: Vec<ConnectionProfile>,
    pub provider: Provider,
    pub is_power_on: bool,
    pub readonly_mode: ReadonlyMode,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Timing knobs shared by every instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSettings {
    /// Period of the status poll spawned with each start/stop.
    pub poll_interval: Duration,
    /// Upper bound of that poll.
    pub poll_timeout: Duration,
    /// Extension is refused while more than this much time remains.
    pub warning_window: Duration,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_STATUS_POLL_INTERVAL_MS),
            poll_timeout: Duration::from_secs(DEFAULT_STATUS_POLL_TIMEOUT_SECS),
            warning_window: Duration::from_secs(DEFAULT_WARNING_WINDOW_SECS),
        }
    }
}
