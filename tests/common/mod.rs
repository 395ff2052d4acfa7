//! Shared fakes for harness integration tests.
//!
//! `FakeProvisioner` and `FakeClient` stand in for Docker and Postgres and
//! count every call so tests can assert on the lifecycle contract.

#![allow(dead_code)] // Each test binary uses a different subset

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ephemeral_pg_harness::{
    ConnectionHandle, ContainerProvisioner, DataSource, DatabaseClient, HarnessConfig,
    HarnessError, HarnessResult, PortSpec, RunningInstance,
};

pub const FAKE_HOST: &str = "localhost";
pub const FAKE_MAPPED_PORT: u16 = 49153;

/// Which step the fakes should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub create: bool,
    pub start: bool,
    pub host: bool,
    pub port: bool,
    pub terminate: bool,
    pub open: bool,
    pub ping: bool,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub provisioned: AtomicUsize,
    pub started: AtomicUsize,
    pub terminated: AtomicUsize,
    pub opened: AtomicUsize,
    pub pings: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FakeProvisioner {
    pub failures: Failures,
    pub calls: Arc<Calls>,
    pub mapped_port: u16,
}

impl FakeProvisioner {
    pub fn new(failures: Failures, calls: Arc<Calls>) -> Self {
        Self {
            failures,
            calls,
            mapped_port: FAKE_MAPPED_PORT,
        }
    }

    pub fn with_mapped_port(mut self, port: u16) -> Self {
        self.mapped_port = port;
        self
    }
}

#[async_trait]
impl ContainerProvisioner for FakeProvisioner {
    async fn provision(&self, config: &HarnessConfig) -> HarnessResult<Box<dyn RunningInstance>> {
        if self.failures.create {
            return Err(HarnessError::Create {
                image: config.image.to_string(),
                message: "pull access denied".to_string(),
            });
        }
        self.calls.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInstance {
            failures: self.failures,
            calls: Arc::clone(&self.calls),
            mapped_port: self.mapped_port,
            running: false,
        }))
    }
}

pub struct FakeInstance {
    failures: Failures,
    calls: Arc<Calls>,
    mapped_port: u16,
    running: bool,
}

#[async_trait]
impl RunningInstance for FakeInstance {
    async fn start(&mut self) -> HarnessResult<()> {
        self.calls.started.fetch_add(1, Ordering::SeqCst);
        if self.failures.start {
            return Err(HarnessError::Start {
                message: "container exited with code 1".to_string(),
            });
        }
        self.running = true;
        Ok(())
    }

    async fn host(&self) -> HarnessResult<String> {
        if self.failures.host {
            return Err(HarnessError::Host {
                message: "docker host unreachable".to_string(),
            });
        }
        Ok(FAKE_HOST.to_string())
    }

    async fn mapped_port(&self, port: PortSpec) -> HarnessResult<u16> {
        if self.failures.port {
            return Err(HarnessError::PortMapping {
                port: port.to_string(),
                message: "port not exposed".to_string(),
            });
        }
        Ok(self.mapped_port)
    }

    async fn terminate(&mut self) -> HarnessResult<()> {
        self.calls.terminated.fetch_add(1, Ordering::SeqCst);
        self.running = false;
        if self.failures.terminate {
            return Err(HarnessError::Terminate {
                message: "container already removed".to_string(),
            });
        }
        Ok(())
    }

    fn id(&self) -> Option<String> {
        self.running.then(|| "fake-container".to_string())
    }
}

#[derive(Clone)]
pub struct FakeClient {
    pub failures: Failures,
    pub calls: Arc<Calls>,
    pub data_sources: Arc<Mutex<Vec<String>>>,
}

impl FakeClient {
    pub fn new(failures: Failures, calls: Arc<Calls>) -> Self {
        Self {
            failures,
            calls,
            data_sources: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl DatabaseClient for FakeClient {
    type Handle = FakeHandle;

    async fn open(&self, data_source: &DataSource) -> HarnessResult<FakeHandle> {
        self.data_sources.lock().push(data_source.to_string());
        if self.failures.open {
            return Err(HarnessError::Connect {
                message: "connection refused".to_string(),
            });
        }
        self.calls.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeHandle {
            fail_ping: self.failures.ping,
            calls: Arc::clone(&self.calls),
            closed: AtomicBool::new(false),
            resets: AtomicUsize::new(0),
        })
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    fail_ping: bool,
    calls: Arc<Calls>,
    closed: AtomicBool,
    pub resets: AtomicUsize,
}

impl FakeHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandle for FakeHandle {
    async fn ping(&self) -> HarnessResult<()> {
        self.calls.pings.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping || self.is_closed() {
            return Err(HarnessError::Ping {
                message: "server closed the connection".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) {
        self.calls.closed.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Default config without host-side polling, so fakes need no open port.
pub fn fake_config() -> HarnessConfig {
    HarnessConfig::default().with_readiness(Vec::new())
}
