//! Stream session states

use serde::{Deserialize, Serialize};

/// Lifecycle state of one camera's stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Camera confirmed unreachable; terminal until external action
    Offline,
    /// Teardown in progress
    Stopping,
    /// Administratively disabled; never auto-reconnects
    Disabled,
    /// Idle, ready to start
    Stopped,
    /// Connection attempt in progress
    Connecting,
    /// Media flowing
    Connected,
    /// Remux fabric announced the path; not yet started
    Initializing,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Stopping => "stopping",
            Self::Disabled => "disabled",
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Initializing => "initializing",
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != Self::Disabled
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(StreamState::Stopped.to_string(), "stopped");
        assert_eq!(StreamState::Connecting.to_string(), "connecting");
        assert_eq!(StreamState::Connected.to_string(), "connected");
        assert_eq!(StreamState::Stopping.to_string(), "stopping");
        assert_eq!(StreamState::Disabled.to_string(), "disabled");
        assert_eq!(StreamState::Offline.to_string(), "offline");
        assert_eq!(StreamState::Initializing.to_string(), "initializing");
    }

    #[test]
    fn only_disabled_is_not_enabled() {
        assert!(!StreamState::Disabled.is_enabled());
        assert!(StreamState::Stopped.is_enabled());
        assert!(StreamState::Connected.is_enabled());
    }
}
