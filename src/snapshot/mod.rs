use crate::db::models::DetectionItem;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::path::PathBuf;

/// Captures a still for a freshly opened item and returns a stable reference
/// to it, or None when no capture is possible for the sensor's camera.
#[async_trait]
pub trait SnapshotTrigger: Send + Sync {
    async fn capture(
        &self,
        item: &DetectionItem,
        snapshot_camera: Option<&str>,
    ) -> Result<Option<String>>;
}

/// Writes a placeholder still under the media root.
///
/// Stands in where no live capture path is wired up, and backs synthetic
/// detections; the file layout matches what a real capture implementation
/// would produce, so references stay stable either way.
pub struct PlaceholderSnapshotWriter {
    media_root: PathBuf,
}

impl PlaceholderSnapshotWriter {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
        }
    }

    fn relative_path(item: &DetectionItem) -> String {
        let camera_slug = slugify(&item.camera_name);
        let day_folder = item.start_ts.format("%Y-%m-%d");
        let filename = format!("{}_{}.svg", item.start_ts.format("%H%M%S"), item.label);
        format!("detection-feed/{}/{}/{}", camera_slug, day_folder, filename)
    }
}

#[async_trait]
impl SnapshotTrigger for PlaceholderSnapshotWriter {
    async fn capture(
        &self,
        item: &DetectionItem,
        _snapshot_camera: Option<&str>,
    ) -> Result<Option<String>> {
        let relative = Self::relative_path(item);
        let absolute = self.media_root.join(&relative);

        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Snapshot(format!("{}: {}", parent.display(), e)))?;
        }

        let svg = placeholder_svg(&item.camera_name, item.label.as_str(), item.start_ts);
        tokio::fs::write(&absolute, svg)
            .await
            .map_err(|e| Error::Snapshot(format!("{}: {}", absolute.display(), e)))?;

        info!("Wrote snapshot placeholder {}", absolute.display());
        Ok(Some(format!("/media/{}", relative)))
    }
}

fn placeholder_svg(camera_name: &str, label: &str, start_ts: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        concat!(
            "<svg xmlns='http://www.w3.org/2000/svg' width='640' height='360'>",
            "<rect width='100%' height='100%' fill='#1d3557'/>",
            "<text x='24' y='72' font-size='34' fill='white'>{} detection</text>",
            "<text x='24' y='126' font-size='24' fill='#f1faee'>{}</text>",
            "<text x='24' y='170' font-size='18' fill='#f1faee'>{}</text>",
            "</svg>"
        ),
        label,
        camera_name,
        start_ts.to_rfc3339()
    )
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = slug.trim_end_matches('_').to_string();
    if trimmed.is_empty() {
        "camera".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DetectionLabel, RecordingInfo};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn item() -> DetectionItem {
        DetectionItem {
            id: Uuid::new_v4(),
            start_ts: Utc.with_ymd_and_hms(2025, 6, 14, 14, 23, 5).unwrap(),
            end_ts: None,
            duration_s: None,
            label: DetectionLabel::Person,
            source_entity_id: "binary_sensor.front_door_person".to_string(),
            camera_name: "Front Door".to_string(),
            snapshot_ref: None,
            recording: RecordingInfo::pending(),
            merge_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn slugify_flattens_display_names() {
        assert_eq!(slugify("Front Door"), "front_door");
        assert_eq!(slugify("Cam #2 (East)"), "cam_2_east");
        assert_eq!(slugify("???"), "camera");
    }

    #[tokio::test]
    async fn writes_placeholder_and_returns_media_ref() {
        let dir = std::env::temp_dir().join(format!("snapshot-test-{}", Uuid::new_v4()));
        let writer = PlaceholderSnapshotWriter::new(&dir);

        let item = item();
        let snapshot_ref = writer.capture(&item, None).await.unwrap().unwrap();
        assert_eq!(
            snapshot_ref,
            "/media/detection-feed/front_door/2025-06-14/142305_person.svg"
        );
        assert!(dir
            .join("detection-feed/front_door/2025-06-14/142305_person.svg")
            .is_file());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
