//! Feature-specific logging macros and utilities
//!
//! Each component logs under its own target so a node operator can raise or
//! lower verbosity per feature without touching the rest.

use serde::{Deserialize, Serialize};

/// Feature categories for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFeature {
    Permissions,
    Repo,
    Inbox,
    Network,
    Orchestrator,
    Http,
    Node,
}

impl LogFeature {
    /// Get the target string for this feature
    pub fn target(&self) -> &'static str {
        match self {
            LogFeature::Permissions => "pear::permissions",
            LogFeature::Repo => "pear::repo",
            LogFeature::Inbox => "pear::inbox",
            LogFeature::Network => "pear::network",
            LogFeature::Orchestrator => "pear::orchestrator",
            LogFeature::Http => "pear::http",
            LogFeature::Node => "pear::node",
        }
    }
}

// Permission store logging macros
#[macro_export]
macro_rules! log_permissions_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pear::permissions", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_permissions_info {
    ($($arg:tt)*) => {
        log::info!(target: "pear::permissions", $($arg)*)
    };
}

// Repository logging macros
#[macro_export]
macro_rules! log_repo_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pear::repo", $($arg)*)
    };
}

// Inbox logging macros
#[macro_export]
macro_rules! log_inbox_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pear::inbox", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_inbox_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pear::inbox", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_inbox_error {
    ($($arg:tt)*) => {
        log::error!(target: "pear::inbox", $($arg)*)
    };
}

// Network-specific logging macros
#[macro_export]
macro_rules! log_network_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pear::network", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_network_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pear::network", $($arg)*)
    };
}

// Orchestrator logging macros
#[macro_export]
macro_rules! log_orchestrator_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pear::orchestrator", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_orchestrator_info {
    ($($arg:tt)*) => {
        log::info!(target: "pear::orchestrator", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_orchestrator_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pear::orchestrator", $($arg)*)
    };
}

// HTTP server logging macros
#[macro_export]
macro_rules! log_http_info {
    ($($arg:tt)*) => {
        log::info!(target: "pear::http", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_http_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pear::http", $($arg)*)
    };
}

// Node lifecycle logging macros
#[macro_export]
macro_rules! log_node_info {
    ($($arg:tt)*) => {
        log::info!(target: "pear::node", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_node_error {
    ($($arg:tt)*) => {
        log::error!(target: "pear::node", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_feature_names_its_target() {
        let feature: LogFeature = serde_json::from_str("\"node\"").unwrap();
        assert_eq!(feature, LogFeature::Node);
        assert_eq!(feature.target(), "pear::node");
    }
}
