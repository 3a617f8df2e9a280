//! Plugin identity, lifecycle state and listener delivery modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FrameworkError;

// ─── Identifiers ──────────────────────────────────────────────────────────────

/// Numeric plugin identifier, unique for the lifetime of a framework.
///
/// Id `0` is reserved for the system plugin (the framework itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(pub u64);

impl PluginId {
    /// The system plugin.
    pub const SYSTEM: Self = Self(0);

    /// Returns `true` for the system plugin.
    pub fn is_system(self) -> bool {
        self == Self::SYSTEM
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric service identifier.  Assigned in registration order, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── PluginState ──────────────────────────────────────────────────────────────

/// Lifecycle state of an installed plugin.
///
/// ```text
/// install ──► Installed ──► Resolved ──► Starting ──► Active
///                              ▲                         │
///                              └──────── Stopping ◄──────┘
/// uninstall (from any state) ──► Uninstalled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Installed but not yet resolved.
    Installed,
    /// Resolved and ready to start; also the state after a stop.
    Resolved,
    /// The activator's `start` is running.
    Starting,
    /// Started; the plugin holds a valid context.
    Active,
    /// The activator's `stop` is running.
    Stopping,
    /// Removed from the framework.  Terminal.
    Uninstalled,
}

impl PluginState {
    /// Returns the state name in lowercase.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Resolved => "resolved",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Uninstalled => "uninstalled",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── DeliveryMode ─────────────────────────────────────────────────────────────

/// How plugin and framework events reach a listener.
///
/// `Direct` and `BlockingQueued` both deliver synchronously on the thread
/// that fired the event.  `Queued` hands the event to a per-listener FIFO
/// drained by a background task.  `Auto` exists so configuration can say
/// "use the default"; the connect calls reject it and callers must resolve
/// it to a concrete mode first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Synchronous delivery on the firing thread.
    #[default]
    Direct,
    /// Asynchronous, per-listener FIFO delivery.
    Queued,
    /// Synchronous delivery; the firing thread waits for the listener.
    BlockingQueued,
    /// Unresolved placeholder; not accepted by connect calls.
    Auto,
}

impl DeliveryMode {
    /// Returns `true` for the modes delivered on the firing thread.
    pub fn is_synchronous(self) -> bool {
        matches!(self, Self::Direct | Self::BlockingQueued)
    }

    /// Returns the mode name as used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Queued => "queued",
            Self::BlockingQueued => "blocking-queued",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = FrameworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "queued" => Ok(Self::Queued),
            "blocking-queued" | "blocking_queued" => Ok(Self::BlockingQueued),
            "auto" => Ok(Self::Auto),
            other => Err(FrameworkError::invalid_argument(format!(
                "unknown delivery mode '{other}'"
            ))),
        }
    }
}
