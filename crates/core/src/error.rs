// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by the router, the plugin host, and the bus store.
//!
//! Each variant carries enough context to be mapped to both an
//! [`ErrorCode`](crate::envelope::ErrorCode) for plugin-facing replies and an
//! HTTP-ish status for the run protocol's external collaborators, per the
//! error handling design: not-found, not-running, timeout, invalid args,
//! permission denied, conflict, communication, internal.

use thiserror::Error;

use crate::ids::PluginId;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("plugin '{0}' not found")]
    PluginNotFound(PluginId),

    #[error("entry '{entry_id}' not found on plugin '{plugin_id}'")]
    EntryNotFound { plugin_id: PluginId, entry_id: String },

    #[error("plugin '{0}' is not running")]
    NotRunning(PluginId),

    #[error("dispatch exceeded deadline of {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("plugin id '{0}' already registered")]
    Conflict(PluginId),

    #[error("communication error: {0}")]
    Communication(String),

    #[error("bus '{bus}' topic '{topic}' exceeds limits: {reason}")]
    CapacityExceeded { bus: String, topic: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same call, unmodified, could plausibly succeed.
    pub fn retriable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Communication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_communication_errors_are_retriable() {
        assert!(CoreError::Timeout(std::time::Duration::from_secs(1)).retriable());
        assert!(CoreError::Communication("queue closed".into()).retriable());
    }

    #[test]
    fn not_found_is_not_retriable() {
        assert!(!CoreError::PluginNotFound(PluginId::from_string("plg-x")).retriable());
    }
}
