//! Lease + vacancy record storage for channel vacancy outreach.
//!
//! Both stores come in two flavours behind a trait: Postgres (`sqlx`) for
//! deployments and an in-memory map for tests and database-less runs.

mod lease;
mod records;

use std::time::Duration;

use anyhow::Context;
use outreach_core::LeaseKey;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

pub use lease::{LeaseStore, MemoryLeaseStore, PgLeaseStore};
pub use records::{MemoryVacancyStore, PgVacancyStore, VacancyPage, VacancyQuery, VacancyStore};

pub const CRATE_NAME: &str = "outreach-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vacancy already recorded for post {0}")]
    Duplicate(LeaseKey),
    #[error("vacancy {0} not found")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("connecting to postgres")
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("running migrations")
}
