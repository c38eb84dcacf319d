use std::fmt;

use serde::{Deserialize, Serialize};

/// Cloud provider hosting a managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Compute Engine.
    Google,
    /// Azure virtual machines.
    Azure,
}

impl Provider {
    /// Raw status reported once an instance is fully up.
    pub fn running_status(self) -> &'static str {
        match self {
            Provider::Google => "RUNNING",
            Provider::Azure => "running",
        }
    }

    /// Raw status a stop operation settles on.
    pub fn stopped_status(self) -> &'static str {
        match self {
            Provider::Google => "TERMINATED",
            Provider::Azure => "deallocated",
        }
    }

    /// Power predicate over the provider's raw status.
    pub fn is_power_on(self, status: &str) -> bool {
        status == self.running_status()
    }

    /// Returns `true` for statuses where a stop request is pointless.
    ///
    /// Transitional states (`STOPPING`, `deallocating`, ...) are not included.
    pub fn is_powered_off(self, status: &str) -> bool {
        match self {
            Provider::Google => matches!(status, "TERMINATED" | "STOPPED"),
            Provider::Azure => matches!(status, "deallocated" | "stopped"),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Google => write!(f, "google"),
            Provider::Azure => write!(f, "azure"),
        }
    }
}

/// Power transition requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerAction {
    Start,
    Stop,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Start => write!(f, "START"),
            PowerAction::Stop => write!(f, "STOP"),
        }
    }
}

/// One row of a provider listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInstance {
    pub id: String,
    pub zone: String,
    pub status: String,
}

impl ProviderInstance {
    pub fn new(id: impl Into<String>, zone: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            zone: zone.into(),
            status: status.into(),
        }
    }
}

/// Handle of a long-running provider operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRef {
    pub id: String,
}

/// Error payload attached to a finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFault {
    pub code: String,
    pub message: String,
}

impl ProviderFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of waiting on an operation. `error: None` means success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    pub error: Option<ProviderFault>,
}

impl OperationResult {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn failed(fault: ProviderFault) -> Self {
        Self { error: Some(fault) }
    }
}
