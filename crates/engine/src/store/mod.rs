mod ai_log;
mod catalogue;
mod discovered_apis;
mod import_runs;
mod page_registry;

pub use ai_log::AiLogWriter;
pub use catalogue::{CatalogueStore, OfferCandidate, ProductCandidate, UpsertOutcome};
pub use discovered_apis::DiscoveredApiStore;
pub use import_runs::ImportRunStore;
pub use page_registry::PageRegistry;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// PostgreSQL client shared by the Catalogue Store (C7), Page Registry (C8)
/// and ImportRun/AIInferenceLog persistence. Connection pooling and
/// migrations live here; row-level operations live in the sibling modules.
pub struct StoreClient {
    pool: PgPool,
}

impl StoreClient {
    /// Connect to PostgreSQL and return a client with a connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let client = Self { pool };
        client.health_check().await?;
        tracing::info!("PostgreSQL connection established");

        Ok(client)
    }

    /// Verify the connection is alive.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        tracing::info!("Running PostgreSQL migrations");

        sqlx::migrate!("src/store/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::info!("PostgreSQL migrations complete");
        Ok(())
    }

    /// Ensure a config-defined OEM has a matching row — config owns the
    /// identity, this just makes the foreign keys resolvable (§3 Ownership).
    pub async fn ensure_oem(&self, id: &str, name: &str, base_url: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO oems (id, name, base_url) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, base_url = EXCLUDED.base_url",
        )
        .bind(id)
        .bind(name)
        .bind(base_url)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("PostgreSQL connection error: {0}")]
    Connection(String),

    #[error("PostgreSQL query error: {0}")]
    Query(String),

    #[error("PostgreSQL migration error: {0}")]
    Migration(String),

    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for oemwatch_common::OemWatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(m) => oemwatch_common::OemWatchError::StoreConflict(m),
            StoreError::NotFound(m) => oemwatch_common::OemWatchError::NotFound(m),
            other => oemwatch_common::OemWatchError::Database(other.to_string()),
        }
    }
}
