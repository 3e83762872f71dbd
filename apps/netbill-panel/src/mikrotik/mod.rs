//! MikroTik RouterOS API client.

pub mod client;
pub mod protocol;

use thiserror::Error;

pub use client::{ActiveSession, MikrotikConnector, RouterApi, RouterConnector, RouterTarget, SecretSpec};

/// Upper layers only ever see `Unreachable` or `Device`; "not found" is a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("router {router} unreachable: {message}")]
    Unreachable { router: String, message: String },
    #[error("router {router} error: {message}")]
    Device { router: String, message: String },
}

const UNREACHABLE_MARKERS: [&str; 5] = [
    "connection timeout",
    "unable to reach",
    "connection refused",
    "no route to host",
    "network is unreachable",
];

const NOT_FOUND_MARKERS: [&str; 2] = ["not found", "no such item"];

impl RouterError {
    pub fn classify(router: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_ascii_lowercase();
        if UNREACHABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
            RouterError::Unreachable { router: router.to_string(), message }
        } else {
            RouterError::Device { router: router.to_string(), message }
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, RouterError::Unreachable { .. })
    }
}

pub fn is_not_found(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachability_markers_classify_as_unreachable() {
        for msg in [
            "dial tcp 10.0.0.1:8728: connection refused",
            "Connection timeout after 10s",
            "No route to host (os error 113)",
            "Network is unreachable",
            "unable to reach router",
        ] {
            assert!(RouterError::classify("core", msg).is_unreachable(), "{msg}");
        }
    }

    #[test]
    fn other_device_errors_are_router_errors() {
        let err = RouterError::classify("core", "failure: already have such name");
        assert_eq!(
            err,
            RouterError::Device { router: "core".into(), message: "failure: already have such name".into() }
        );
    }

    #[test]
    fn missing_secret_is_recognised() {
        assert!(is_not_found("secret not found"));
        assert!(is_not_found("no such item"));
        assert!(!is_not_found("invalid user name or password"));
    }
}
