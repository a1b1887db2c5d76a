//! Read-only metadata lookups for servable resources.

use crate::models::{ResourceKind, ResourceMetadata};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::PgPool;

/// Keyed, read-only access to resource metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// One lookup selecting only what delivery needs. `Ok(None)` means the id
    /// has no record under `kind`.
    async fn find_resource_by_id(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<Option<ResourceMetadata>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// PostgreSQL-backed metadata store.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn lookup_query(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Export => {
                "SELECT mime_type, filename AS display_filename, film_id AS owning_parent_id \
                 FROM exports WHERE id = $1"
            }
            ResourceKind::Thumbnail => {
                "SELECT mime_type, NULL::TEXT AS display_filename, film_id AS owning_parent_id \
                 FROM thumbnails WHERE id = $1"
            }
        }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn find_resource_by_id(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<Option<ResourceMetadata>, AppError> {
        sqlx::query_as::<_, ResourceMetadata>(Self::lookup_query(kind))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}
