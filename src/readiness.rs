//! # Readiness Predicates
//!
//! Conditions that must hold before the harness opens a connection. Log
//! predicates are evaluated by the container runtime while the container
//! starts; listening-port predicates are polled from the host against the
//! mapped port.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::config::{PortSpec, Protocol};
use crate::error::{HarnessError, HarnessResult};

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessPredicate {
    /// The exposed port accepts TCP connections on the host side.
    ListeningPort { port: PortSpec },
    /// The container printed a line containing `message`.
    LogMessage { stream: LogStream, message: String },
}

impl ReadinessPredicate {
    pub fn stderr_message(message: impl Into<String>) -> Self {
        Self::LogMessage {
            stream: LogStream::Stderr,
            message: message.into(),
        }
    }

    pub fn stdout_message(message: impl Into<String>) -> Self {
        Self::LogMessage {
            stream: LogStream::Stdout,
            message: message.into(),
        }
    }

    pub fn is_host_side(&self) -> bool {
        matches!(self, Self::ListeningPort { .. })
    }
}

impl fmt::Display for ReadinessPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListeningPort { port } => write!(f, "listening port {port}"),
            Self::LogMessage { stream, message } => {
                let stream = match stream {
                    LogStream::Stdout => "stdout",
                    LogStream::Stderr => "stderr",
                };
                write!(f, "{stream} message \"{message}\"")
            }
        }
    }
}

/// Poll `host:port` until a TCP connection succeeds or `budget` elapses.
pub async fn wait_for_listening_port(
    spec: PortSpec,
    host: &str,
    mapped_port: u16,
    budget: Duration,
) -> HarnessResult<()> {
    if spec.protocol == Protocol::Udp {
        debug!(port = %spec, "udp ports cannot be probed; skipping readiness poll");
        return Ok(());
    }

    let started = Instant::now();
    let probe = async {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match TcpStream::connect((host, mapped_port)).await {
                Ok(_) => return attempts,
                Err(e) => {
                    trace!(host, port = mapped_port, attempts, error = %e, "port not accepting connections yet");
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    };

    match timeout(budget, probe).await {
        Ok(attempts) => {
            debug!(
                host,
                port = mapped_port,
                attempts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "port is accepting connections"
            );
            Ok(())
        }
        Err(_) => Err(HarnessError::Readiness {
            predicate: ReadinessPredicate::ListeningPort { port: spec }.to_string(),
            timeout_ms: budget.as_millis() as u64,
        }),
    }
}
