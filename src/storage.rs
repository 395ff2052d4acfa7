//! Example domain object wired through [`crate::fixture::FixtureBuilder`].
//!
//! Stands in for whatever repository or service a project puts under test.

use std::sync::Arc;

use crate::database::PgHandle;
use crate::error::HarnessResult;

#[derive(Debug, Clone)]
pub struct Storage {
    db: Arc<PgHandle>,
}

impl Storage {
    pub fn new(db: Arc<PgHandle>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &PgHandle {
        &self.db
    }

    /// Round-trips a constant through the server and returns it.
    pub async fn do_something(&self) -> HarnessResult<i32> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(self.db.pool()).await?;
        Ok(one)
    }
}
