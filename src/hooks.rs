//! # Migration and Cleanup Hooks
//!
//! Schema setup runs once after the connection is confirmed live; cleanup runs
//! after every test case that asked for a fixture.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::database::PgHandle;
use crate::error::{HarnessError, HarnessResult};

#[async_trait]
pub trait Migration<H>: Send + Sync {
    async fn migrate(&self, handle: &H) -> HarnessResult<()>;
}

#[async_trait]
pub trait Cleanup<H>: Send + Sync {
    async fn cleanup(&self, handle: &H) -> HarnessResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoMigrations;

#[async_trait]
impl<H: Sync> Migration<H> for NoMigrations {
    async fn migrate(&self, _handle: &H) -> HarnessResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCleanup;

#[async_trait]
impl<H: Sync> Cleanup<H> for NoCleanup {
    async fn cleanup(&self, _handle: &H) -> HarnessResult<()> {
        Ok(())
    }
}

/// Migration from a closure.
pub struct MigrateFn<F>(F);

impl<F> MigrateFn<F> {
    pub fn new<H>(f: F) -> Self
    where
        F: for<'a> Fn(&'a H) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync,
    {
        Self(f)
    }
}

#[async_trait]
impl<H, F> Migration<H> for MigrateFn<F>
where
    H: Sync,
    F: for<'a> Fn(&'a H) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync,
{
    async fn migrate(&self, handle: &H) -> HarnessResult<()> {
        (self.0)(handle).await
    }
}

/// Cleanup from a closure.
pub struct CleanupFn<F>(F);

impl<F> CleanupFn<F> {
    pub fn new<H>(f: F) -> Self
    where
        F: for<'a> Fn(&'a H) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync,
    {
        Self(f)
    }
}

#[async_trait]
impl<H, F> Cleanup<H> for CleanupFn<F>
where
    H: Sync,
    F: for<'a> Fn(&'a H) -> BoxFuture<'a, HarnessResult<()>> + Send + Sync,
{
    async fn cleanup(&self, handle: &H) -> HarnessResult<()> {
        (self.0)(handle).await
    }
}

/// Applies the sqlx migrations found in a directory.
#[derive(Debug, Clone)]
pub struct SqlxMigrations {
    dir: PathBuf,
}

impl SqlxMigrations {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Migration<PgHandle> for SqlxMigrations {
    async fn migrate(&self, handle: &PgHandle) -> HarnessResult<()> {
        let migrator = sqlx::migrate::Migrator::new(self.dir.as_path())
            .await
            .map_err(|e| HarnessError::Migration {
                message: format!("{}: {e}", self.dir.display()),
            })?;

        migrator
            .run(handle.pool())
            .await
            .map_err(|e| HarnessError::Migration {
                message: e.to_string(),
            })?;

        info!(
            dir = %self.dir.display(),
            migrations = migrator.iter().count(),
            "migrations applied"
        );
        Ok(())
    }
}

/// Empties the given tables between tests.
#[derive(Debug, Clone)]
pub struct TruncateTables {
    tables: Vec<String>,
}

impl TruncateTables {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn statement(&self) -> Option<String> {
        if self.tables.is_empty() {
            return None;
        }
        let tables = self
            .tables
            .iter()
            .map(|table| quote_qualified(table))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("TRUNCATE TABLE {tables} RESTART IDENTITY CASCADE"))
    }
}

fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `schema.table` becomes `"schema"."table"`.
fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

#[async_trait]
impl Cleanup<PgHandle> for TruncateTables {
    async fn cleanup(&self, handle: &PgHandle) -> HarnessResult<()> {
        let Some(statement) = self.statement() else {
            return Ok(());
        };
        handle.execute(&statement).await?;
        debug!(tables = ?self.tables, "tables truncated");
        Ok(())
    }
}
