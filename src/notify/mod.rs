//! Notification boundary.
//!
//! Delivery (chat webhooks, email) is external; the controller hands typed [`Notice`]s to a
//! [`Notifier`] and never waits on delivery outcome.


use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::opener::Opener;

/// Human-facing identity of an instance used in notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLabel {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
}

impl fmt::Display for InstanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => write!(f, "{}({})", country, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Something worth telling a human about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// An instance was observed powering on.
    InstanceOnline {
        instance: InstanceLabel,
        expires_at: Option<DateTime<Utc>>,
    },
    /// A user-requested start was confirmed by the provider.
    StartConfirmed {
        instance: InstanceLabel,
        recipient: Opener,
        expires_at: DateTime<Utc>,
    },
    ManualStop {
        instance: InstanceLabel,
        by: Opener,
    },
    Extended {
        instance: InstanceLabel,
        recipient: Opener,
        expires_at: DateTime<Utc>,
    },
    /// The sweep stopped an expired instance.
    AutoClosed { instance: InstanceLabel },
    ClosingSoon {
        instance: InstanceLabel,
        recipient: Opener,
        expires_at: DateTime<Utc>,
    },
    RestartAttempted { instance: InstanceLabel },
    RestartAbandoned {
        instance: InstanceLabel,
        attempts: u32,
    },
}

impl Notice {
    /// Stable kind name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::InstanceOnline { .. } => "instance_online",
            Notice::StartConfirmed { .. } => "start_confirmed",
            Notice::ManualStop { .. } => "manual_stop",
            Notice::Extended { .. } => "extended",
            Notice::AutoClosed { .. } => "auto_closed",
            Notice::ClosingSoon { .. } => "closing_soon",
            Notice::RestartAttempted { .. } => "restart_attempted",
            Notice::RestartAbandoned { .. } => "restart_abandoned",
        }
    }

    pub fn instance(&self) -> &InstanceLabel {
        match self {
            Notice::InstanceOnline { instance, .. }
            | Notice::StartConfirmed { instance, .. }
            | Notice::ManualStop { instance, .. }
            | Notice::Extended { instance, .. }
            | Notice::AutoClosed { instance }
            | Notice::ClosingSoon { instance, .. }
            | Notice::RestartAttempted { instance }
            | Notice::RestartAbandoned { instance, .. } => instance,
        }
    }

    /// One-line message text.
    pub fn message(&self) -> String {
        match self {
            Notice::InstanceOnline { instance, .. } => format!("{instance} is online"),
            Notice::StartConfirmed {
                instance,
                expires_at,
                ..
            } => format!("{instance} started, closes at {expires_at}"),
            Notice::ManualStop { instance, by } => format!("{instance} stopped by {by}"),
            Notice::Extended {
                instance,
                expires_at,
                ..
            } => format!("{instance} extended until {expires_at}"),
            Notice::AutoClosed { instance } => format!("{instance} closed on expiry"),
            Notice::ClosingSoon {
                instance,
                expires_at,
                ..
            } => format!("{instance} closes at {expires_at}"),
            Notice::RestartAttempted { instance } => {
                format!("{instance} went down unexpectedly, restarting")
            }
            Notice::RestartAbandoned { instance, attempts } => {
                format!("{instance} could not be restarted after {attempts} attempts")
            }
        }
    }

    /// Email recipient, for notices addressed to a single user.
    pub fn recipient(&self) -> Option<&Opener> {
        match self {
            Notice::StartConfirmed { recipient, .. }
            | Notice::Extended { recipient, .. }
            | Notice::ClosingSoon { recipient, .. } => Some(recipient),
            _ => None,
        }
    }
}

#[async_trait]
/// Sink for notices. Implementations must not fail the caller.
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice);
}

/// Writes every notice to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notice: Notice) {
        let recipient = notice.recipient().map(|r| r.email.as_str()).unwrap_or("-");
        tracing::info!(
            kind = notice.kind(),
            instance = %notice.instance().id,
            recipient,
            "{}",
            notice.message()
        );
    }
}

#[cfg(any(test, feature = "mock"))]
/// Keeps every notice in memory for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: parking_lot::Mutex<Vec<Notice>>,
}

#[cfg(any(test, feature = "mock"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    /// Number of recorded notices with the given [`Notice::kind`].
    pub fn count(&self, kind: &str) -> usize {
        self.notices.lock().iter().filter(|n| n.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.notices.lock().clear();
    }
}

#[cfg(any(test, feature = "mock"))]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}
