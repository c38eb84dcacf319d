//! Cross-cutting, shared constants.
//!
//! Durations are stored as seconds so that config parsing and defaults stay in one unit.
//! Runtime code should go through [`crate::config::Config`] instead of reading these directly.

/// Standard auto-shutdown clock applied to a freshly started instance (4 hours).
pub const DEFAULT_ONLINE_WINDOW_SECS: u64 = 4 * 60 * 60;

/// Window before expiry in which extension is allowed and the closing-soon notice fires.
pub const DEFAULT_WARNING_WINDOW_SECS: u64 = 60 * 60;

/// Interval between full reconciliation cycles (15 minutes).
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 15 * 60;

/// Upper bound for the status poll spawned alongside each start/stop.
pub const DEFAULT_STATUS_POLL_TIMEOUT_SECS: u64 = 120;

/// Period of the status poll.
pub const DEFAULT_STATUS_POLL_INTERVAL_MS: u64 = 1_000;

/// Auto-restart attempts before giving up.
pub const DEFAULT_RESTART_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between auto-restart attempts.
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;

/// Capacity of each instance's event channel.
pub const INSTANCE_EVENT_CAPACITY: usize = 64;

/// Hub topic carrying instance snapshots.
pub const TOPIC_INSTANCE: &str = "/fleet/instance";

/// Hub topic carrying operation failures.
pub const TOPIC_INSTANCE_ERROR: &str = "/fleet/instance/error";

/// Key prefix of opener records in the key-value store.
pub const OPENER_KEY_PREFIX: &str = "opener:";

/// Display name used when the catalog has no entry for an instance.
pub const UNKNOWN_INSTANCE_NAME: &str = "N/A";

/// Zone reported by the local simulated provider.
pub const LOCAL_ZONE: &str = "local";
