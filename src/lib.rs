#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Ephemeral Postgres Harness
//!
//! Integration-test scaffolding around a disposable PostgreSQL container.
//!
//! ## Overview
//!
//! A test process provisions exactly one database container, waits until it
//! is ready, opens a connection, pings it, runs the migration hook and then
//! runs its test cases one after another against that shared connection.
//! Each test can ask for a fixture, which registers a cleanup hook that runs
//! after the test body whatever its outcome. When the suite is done the
//! container is terminated and the process exits with the suite's result.
//!
//! ```text
//! Uninitialized -> Provisioning -> Ready -> Running -> Terminating -> Terminated
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Harness configuration (image, env, ports, credentials)
//! - [`container`] - Container provisioning through testcontainers
//! - [`readiness`] - Readiness predicates and the listening-port poll
//! - [`data_source`] - Connection descriptor built from host, port and credentials
//! - [`database`] - Connection handle over SQLx
//! - [`hooks`] - Migration and cleanup hooks
//! - [`harness`] - Setup and teardown
//! - [`fixture`] - Per-test context and fixture builder
//! - [`runner`] - Sequential test runner and process driver
//! - [`error`] - Structured error handling
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ephemeral_pg_harness::{
//!     Harness, HarnessConfig, NoCleanup, PgClient, PgHandle, Storage, TestFilter, TestSuite,
//!     TestcontainersProvisioner,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::load()?;
//! let client = PgClient::new(config.connect_timeout());
//! let harness = Harness::new(config, TestcontainersProvisioner::new(), client);
//!
//! let suite = TestSuite::<PgHandle>::new().case("storage_do_something", |ctx, fixtures| async move {
//!     let storage = fixtures.build(&ctx, Storage::new);
//!     storage.do_something().await?;
//!     Ok::<(), anyhow::Error>(())
//! });
//!
//! let outcome = ephemeral_pg_harness::run_main(
//!     harness,
//!     suite,
//!     Arc::new(NoCleanup),
//!     TestFilter::from_env_args(),
//! )
//! .await;
//! std::process::exit(if outcome.is_success() { 0 } else { 1 });
//! # }
//! ```

pub mod config;
pub mod container;
pub mod data_source;
pub mod database;
pub mod error;
pub mod fixture;
pub mod harness;
pub mod hooks;
pub mod lifecycle;
pub mod logging;
pub mod readiness;
pub mod runner;
pub mod storage;

pub use config::{Credentials, HarnessConfig, ImageRef, PortSpec, Protocol, SslMode};
pub use container::{ContainerProvisioner, RunningInstance, TestcontainersProvisioner};
pub use data_source::DataSource;
pub use database::{ConnectionHandle, DatabaseClient, PgClient, PgHandle};
pub use error::{HarnessError, HarnessResult};
pub use fixture::{FixtureBuilder, TestContext};
pub use harness::{Harness, Teardown, TeardownOutcome};
pub use hooks::{
    Cleanup, CleanupFn, MigrateFn, Migration, NoCleanup, NoMigrations, SqlxMigrations,
    TruncateTables,
};
pub use lifecycle::{HarnessState, LifecycleTracker};
pub use readiness::{LogStream, ReadinessPredicate};
pub use runner::{run_main, RunOutcome, SuiteReport, TestFilter, TestOutcome, TestSuite};
pub use storage::Storage;
