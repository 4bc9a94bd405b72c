use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{AppConfig, JobStoreKind};
use crate::models::job::{ErrorCode, JobRecord};

pub mod file_store;
pub mod memory;
pub mod queries;

pub use file_store::FileJobStore;
pub use memory::MemoryJobStore;
pub use queries::PgJobStore;

/// Persistence of job records.
///
/// `save` replaces the whole record atomically: a concurrent `load` sees
/// either the previous record or the new one, never a partial candidate list.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, job_id: Uuid) -> Result<JobRecord, StoreError>;

    async fn save(&self, job_id: Uuid, record: &JobRecord) -> Result<(), StoreError>;

    /// Most recently saved job, if any.
    async fn latest(&self) -> Result<Option<(Uuid, JobRecord)>, StoreError>;

    /// Check the backend is reachable (for health checks).
    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job record is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::StorageError
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Build the job store selected by the configuration.
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn JobStore>, StoreError> {
    match config.job_store {
        JobStoreKind::File => {
            tracing::info!(dir = %config.jobs_dir, "Using file job store");
            Ok(Arc::new(FileJobStore::new(&config.jobs_dir)))
        }
        JobStoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| StoreError::Config("DATABASE_URL is required for the postgres job store".into()))?;

            tracing::info!("Connecting to PostgreSQL job store");
            let pool = init_pool(url).await?;

            tracing::info!("Running database migrations");
            run_migrations(&pool).await?;

            Ok(Arc::new(PgJobStore::new(pool)))
        }
    }
}
