//! # Database Client
//!
//! [`DatabaseClient`] opens a [`ConnectionHandle`] from a [`DataSource`].
//! The sqlx implementation keeps exactly one session open; the handle is
//! shared by reference with every test case.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Connection, PgPool};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SslMode;
use crate::data_source::DataSource;
use crate::error::{HarnessError, HarnessResult};

#[async_trait]
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Liveness check; a handle is only handed out after this succeeds.
    async fn ping(&self) -> HarnessResult<()>;

    async fn close(&self) {}
}

#[async_trait]
pub trait DatabaseClient: Send + Sync {
    type Handle: ConnectionHandle;

    async fn open(&self, data_source: &DataSource) -> HarnessResult<Self::Handle>;
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
        }
    }
}

pub fn connect_options(data_source: &DataSource) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&data_source.host)
        .port(data_source.port)
        .username(&data_source.user)
        .password(&data_source.password)
        .ssl_mode(data_source.sslmode.into());

    match &data_source.dbname {
        Some(dbname) => options.database(dbname),
        None => options,
    }
}

#[derive(Debug, Clone)]
pub struct PgClient {
    connect_timeout: Duration,
}

impl Default for PgClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl PgClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl DatabaseClient for PgClient {
    type Handle = PgHandle;

    async fn open(&self, data_source: &DataSource) -> HarnessResult<PgHandle> {
        debug!(data_source = %data_source.redacted(), "opening connection");

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(self.connect_timeout)
            .connect_with(connect_options(data_source))
            .await
            .map_err(|e| HarnessError::Connect {
                message: e.to_string(),
            })?;

        info!(host = %data_source.host, port = data_source.port, "connection opened");
        Ok(PgHandle { pool })
    }
}

/// A single live Postgres session.
#[derive(Debug, Clone)]
pub struct PgHandle {
    pool: PgPool,
}

impl PgHandle {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn execute(&self, sql: &str) -> HarnessResult<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ConnectionHandle for PgHandle {
    async fn ping(&self) -> HarnessResult<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| HarnessError::Ping {
            message: e.to_string(),
        })?;
        conn.ping().await.map_err(|e| HarnessError::Ping {
            message: e.to_string(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("connection closed");
    }
}
