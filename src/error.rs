//! # Harness Error Types
//!
//! Structured error handling for the harness lifecycle using thiserror.
//! Every stage of setup maps to its own variant so the process driver can log
//! the failing step with its cause attached.

use thiserror::Error;

use crate::lifecycle::HarnessState;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to create container: {image}: {message}")]
    Create { image: String, message: String },

    #[error("Failed to start container: {message}")]
    Start { message: String },

    #[error("Failed to get container host: {message}")]
    Host { message: String },

    #[error("Failed to map port {port}: {message}")]
    PortMapping { port: String, message: String },

    #[error("Readiness check '{predicate}' did not pass within {timeout_ms}ms")]
    Readiness {
        predicate: String,
        timeout_ms: u64,
    },

    #[error("Failed to open connection: {message}")]
    Connect { message: String },

    #[error("Failed to ping database: {message}")]
    Ping { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Cleanup failed for test '{test}': {message}")]
    Cleanup { test: String, message: String },

    #[error("Failed to terminate container: {message}")]
    Terminate { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    #[error("Invalid port specification '{spec}': {reason}")]
    InvalidPortSpec { spec: String, reason: String },

    #[error("Invalid data source: {reason}")]
    InvalidDataSource { reason: String },

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: HarnessState, to: HarnessState },

    #[error("Harness already provisioned a database instance")]
    AlreadyProvisioned,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl HarnessError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error happened while provisioning the container, as
    /// opposed to connecting to the database inside it.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            Self::Create { .. }
                | Self::Start { .. }
                | Self::Host { .. }
                | Self::PortMapping { .. }
                | Self::Readiness { .. }
        )
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Ping { .. })
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let start = HarnessError::Start {
            message: "no such image".to_string(),
        };
        assert!(start.is_provisioning());
        assert!(!start.is_connectivity());

        let ping = HarnessError::Ping {
            message: "connection reset".to_string(),
        };
        assert!(ping.is_connectivity());
        assert!(!ping.is_provisioning());

        assert!(!HarnessError::AlreadyProvisioned.is_provisioning());
    }

    #[test]
    fn test_error_display() {
        let err = HarnessError::Readiness {
            predicate: "listening port 5432/tcp".to_string(),
            timeout_ms: 60_000,
        };
        assert_eq!(
            err.to_string(),
            "Readiness check 'listening port 5432/tcp' did not pass within 60000ms"
        );

        let err = HarnessError::InvalidTransition {
            from: HarnessState::Terminated,
            to: HarnessState::Ready,
        };
        assert_eq!(
            err.to_string(),
            "Invalid lifecycle transition: terminated -> ready"
        );
    }
}
