//! # Harness Lifecycle Controller
//!
//! Brackets a test process: [`Harness::setup`] provisions the container,
//! waits for readiness, opens and pings the connection and runs the
//! migration hook; the returned [`Teardown`] terminates the container.
//!
//! Setup never exits the process. Every failure comes back as an error and
//! the caller (usually [`crate::runner::run_main`]) decides what to do.

use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::container::{ContainerProvisioner, RunningInstance};
use crate::data_source::DataSource;
use crate::database::{ConnectionHandle, DatabaseClient};
use crate::error::{HarnessError, HarnessResult};
use crate::hooks::{Migration, NoMigrations};
use crate::lifecycle::{HarnessState, LifecycleTracker};
use crate::readiness::{self, ReadinessPredicate, POLL_INTERVAL};

pub struct Harness<P, C: DatabaseClient> {
    config: HarnessConfig,
    provisioner: P,
    client: C,
    migration: Arc<dyn Migration<C::Handle>>,
    lifecycle: LifecycleTracker,
}

impl<P, C> Harness<P, C>
where
    P: ContainerProvisioner,
    C: DatabaseClient,
{
    pub fn new(config: HarnessConfig, provisioner: P, client: C) -> Self {
        Self {
            config,
            provisioner,
            client,
            migration: Arc::new(NoMigrations),
            lifecycle: LifecycleTracker::new(),
        }
    }

    pub fn with_migration(mut self, migration: impl Migration<C::Handle> + 'static) -> Self {
        self.migration = Arc::new(migration);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        &self.lifecycle
    }

    pub fn state(&self) -> HarnessState {
        self.lifecycle.current()
    }

    /// Provision the database and return a live handle plus its teardown.
    ///
    /// A harness provisions at most one instance; calling this again fails
    /// with [`HarnessError::AlreadyProvisioned`].
    pub async fn setup(&mut self) -> HarnessResult<(Arc<C::Handle>, Teardown)> {
        if self.lifecycle.current() != HarnessState::Uninitialized {
            return Err(HarnessError::AlreadyProvisioned);
        }
        self.lifecycle.transition(HarnessState::Provisioning)?;

        info!(
            image = %self.config.image,
            exposed_port = %self.config.exposed_port,
            "provisioning database container"
        );

        let mut instance = match self.provisioner.provision(&self.config).await {
            Ok(instance) => instance,
            Err(e) => {
                error!(image = %self.config.image, error = %e, "failed to create container");
                let mut teardown = Teardown::new(None, self.lifecycle.clone());
                teardown.run().await;
                return Err(e);
            }
        };

        let result = self.bring_up(instance.as_mut()).await;
        let mut teardown = Teardown::new(Some(instance), self.lifecycle.clone());

        let result = match result {
            Ok(handle) => match self.lifecycle.transition(HarnessState::Ready) {
                Ok(()) => Ok(handle),
                Err(e) => {
                    handle.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(handle) => {
                info!(image = %self.config.image, "database ready");
                Ok((Arc::new(handle), teardown))
            }
            Err(e) => {
                error!(image = %self.config.image, error = %e, "harness setup failed");
                teardown.run().await;
                Err(e)
            }
        }
    }

    async fn bring_up(&self, instance: &mut dyn RunningInstance) -> HarnessResult<C::Handle> {
        let started = Instant::now();
        let budget = self.config.startup_timeout();

        instance.start().await?;

        let host = instance.host().await?;
        let port = instance.mapped_port(self.config.exposed_port).await?;
        debug!(host = %host, port, "container address discovered");

        for predicate in self.config.readiness.iter() {
            if let ReadinessPredicate::ListeningPort { port: spec } = predicate {
                let mapped = if *spec == self.config.exposed_port {
                    port
                } else {
                    instance.mapped_port(*spec).await?
                };
                let remaining = budget.saturating_sub(started.elapsed()).max(POLL_INTERVAL);
                readiness::wait_for_listening_port(*spec, &host, mapped, remaining).await?;
            }
        }

        let data_source = DataSource::from_parts(host, port, &self.config.credentials);
        info!(data_source = %data_source.redacted(), "connecting to database");

        let handle = timeout(self.config.connect_timeout(), self.client.open(&data_source))
            .await
            .map_err(|_| HarnessError::Connect {
                message: format!(
                    "timed out after {}s",
                    self.config.connect_timeout().as_secs()
                ),
            })??;

        if let Err(e) = handle.ping().await {
            handle.close().await;
            return Err(e);
        }

        if let Err(e) = self.migration.migrate(&handle).await {
            handle.close().await;
            return Err(e);
        }
        debug!("migration hook completed");

        Ok(handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// One termination request was issued and succeeded.
    Terminated,
    /// Nothing to terminate: never provisioned, or already torn down.
    NoInstance,
    /// The termination request failed; logged, not fatal.
    Failed(String),
}

/// Terminates the running instance. Safe to call more than once; only the
/// first call issues a termination request.
pub struct Teardown {
    instance: Option<Box<dyn RunningInstance>>,
    lifecycle: LifecycleTracker,
}

impl Teardown {
    fn new(instance: Option<Box<dyn RunningInstance>>, lifecycle: LifecycleTracker) -> Self {
        Self {
            instance,
            lifecycle,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.instance.is_some()
    }

    pub async fn run(&mut self) -> TeardownOutcome {
        if !self.lifecycle.current().is_terminal() {
            self.advance(HarnessState::Terminating);
        }

        let Some(mut instance) = self.instance.take() else {
            debug!("no running instance to terminate");
            if !self.lifecycle.current().is_terminal() {
                self.advance(HarnessState::Terminated);
            }
            return TeardownOutcome::NoInstance;
        };

        let id = instance.id();
        let outcome = match instance.terminate().await {
            Ok(()) => {
                info!(container_id = ?id, "database container terminated");
                TeardownOutcome::Terminated
            }
            Err(e) => {
                warn!(container_id = ?id, error = %e, "failed to terminate database container");
                TeardownOutcome::Failed(e.to_string())
            }
        };

        self.advance(HarnessState::Terminated);
        outcome
    }

    fn advance(&self, next: HarnessState) {
        if let Err(e) = self.lifecycle.transition(next) {
            debug!(error = %e, "teardown state transition skipped");
        }
    }
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown")
            .field("container_id", &self.instance.as_ref().and_then(|i| i.id()))
            .field("pending", &self.is_pending())
            .field("state", &self.lifecycle.current())
            .finish()
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(instance) = &self.instance {
            warn!(
                container_id = ?instance.id(),
                "teardown dropped without running; container removal left to the runtime"
            );
        }
    }
}
