use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

const CREATE_DETECTION_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS detection_items (
    id UUID PRIMARY KEY,
    start_ts TIMESTAMPTZ NOT NULL,
    end_ts TIMESTAMPTZ,
    duration_s BIGINT,
    label TEXT NOT NULL,
    source_entity_id TEXT NOT NULL,
    camera_name TEXT NOT NULL,
    snapshot_ref TEXT,
    recording_status TEXT NOT NULL DEFAULT 'pending',
    recording_media_ref TEXT,
    recording_resolved_at TIMESTAMPTZ,
    recording_attempt_count INT NOT NULL DEFAULT 0,
    merge_count INT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_ITEMS_RECENCY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS detection_items_start_ts_idx
    ON detection_items (start_ts DESC)
"#;

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running detection-feed migrations");

    pool.execute(CREATE_DETECTION_ITEMS).await?;
    pool.execute(CREATE_ITEMS_RECENCY_INDEX).await?;

    Ok(())
}
