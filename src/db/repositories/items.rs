use crate::db::models::{DetectionItem, DetectionItemDb};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Durable keyed storage for detection items.
///
/// The feed core only relies on this surface; anything answering it can back
/// the timeline.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Fetch a single item by id
    async fn get(&self, id: &Uuid) -> Result<Option<DetectionItem>>;

    /// Insert or fully replace an item
    async fn put(&self, item: &DetectionItem) -> Result<()>;

    /// Remove an item; returns whether it existed
    async fn delete(&self, id: &Uuid) -> Result<bool>;

    /// Return items newest-first by start timestamp
    async fn list_recent(&self, limit: i64) -> Result<Vec<DetectionItem>>;

    /// Drop the oldest items beyond `keep`, returning how many were removed
    async fn prune(&self, keep: i64) -> Result<u64>;
}

/// Items repository backed by PostgreSQL
#[derive(Clone)]
pub struct ItemsRepository {
    pool: Arc<PgPool>,
}

impl ItemsRepository {
    /// Create a new items repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemStore for ItemsRepository {
    async fn get(&self, id: &Uuid) -> Result<Option<DetectionItem>> {
        let row = sqlx::query_as::<_, DetectionItemDb>(
            r#"
            SELECT id, start_ts, end_ts, duration_s, label, source_entity_id, camera_name,
                   snapshot_ref, recording_status, recording_media_ref, recording_resolved_at,
                   recording_attempt_count, merge_count, created_at
            FROM detection_items
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to get item by ID: {}", e)))?;

        row.map(|r| DetectionItem::try_from(r).map_err(|e| Error::Store(e).into()))
            .transpose()
    }

    async fn put(&self, item: &DetectionItem) -> Result<()> {
        let row = DetectionItemDb::from(item);

        sqlx::query(
            r#"
            INSERT INTO detection_items (
                id, start_ts, end_ts, duration_s, label, source_entity_id, camera_name,
                snapshot_ref, recording_status, recording_media_ref, recording_resolved_at,
                recording_attempt_count, merge_count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                start_ts = EXCLUDED.start_ts,
                end_ts = EXCLUDED.end_ts,
                duration_s = EXCLUDED.duration_s,
                snapshot_ref = EXCLUDED.snapshot_ref,
                recording_status = EXCLUDED.recording_status,
                recording_media_ref = EXCLUDED.recording_media_ref,
                recording_resolved_at = EXCLUDED.recording_resolved_at,
                recording_attempt_count = EXCLUDED.recording_attempt_count,
                merge_count = EXCLUDED.merge_count
            "#,
        )
        .bind(row.id)
        .bind(row.start_ts)
        .bind(row.end_ts)
        .bind(row.duration_s)
        .bind(&row.label)
        .bind(&row.source_entity_id)
        .bind(&row.camera_name)
        .bind(&row.snapshot_ref)
        .bind(&row.recording_status)
        .bind(&row.recording_media_ref)
        .bind(row.recording_resolved_at)
        .bind(row.recording_attempt_count)
        .bind(row.merge_count)
        .bind(row.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to upsert item: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM detection_items
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to delete item: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<DetectionItem>> {
        let rows = sqlx::query_as::<_, DetectionItemDb>(
            r#"
            SELECT id, start_ts, end_ts, duration_s, label, source_entity_id, camera_name,
                   snapshot_ref, recording_status, recording_media_ref, recording_resolved_at,
                   recording_attempt_count, merge_count, created_at
            FROM detection_items
            ORDER BY start_ts DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to list items: {}", e)))?;

        rows.into_iter()
            .map(|r| DetectionItem::try_from(r).map_err(|e| Error::Store(e).into()))
            .collect()
    }

    async fn prune(&self, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM detection_items
            WHERE id NOT IN (
                SELECT id FROM detection_items
                ORDER BY start_ts DESC
                LIMIT $1
            )
            "#,
        )
        .bind(keep)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Store(format!("Failed to prune items: {}", e)))?;

        Ok(result.rows_affected())
    }
}
