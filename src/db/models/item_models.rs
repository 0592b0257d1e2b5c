use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Detection labels produced by camera AI sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionLabel {
    Person,
    Pet,
    Vehicle,
    Motion,
    Visitor,
}

/// Legacy label names kept readable across older persisted items
const LABEL_ALIASES: &[(&str, DetectionLabel)] = &[("animal", DetectionLabel::Pet)];

impl DetectionLabel {
    /// Parse a raw label, applying the legacy alias table
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "person" => Some(Self::Person),
            "pet" => Some(Self::Pet),
            "vehicle" => Some(Self::Vehicle),
            "motion" => Some(Self::Motion),
            "visitor" => Some(Self::Visitor),
            other => LABEL_ALIASES
                .iter()
                .find(|(alias, _)| *alias == other)
                .map(|(_, label)| *label),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Pet => "pet",
            Self::Vehicle => "vehicle",
            Self::Motion => "motion",
            Self::Visitor => "visitor",
        }
    }

    /// Display name of the catalog folder holding clips for this label
    pub fn catalog_folder(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Pet => "Animal",
            Self::Vehicle => "Vehicle",
            Self::Motion => "Motion",
            Self::Visitor => "Visitor",
        }
    }
}

impl std::fmt::Display for DetectionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recording linkage state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Pending,
    Linked,
    NotFound,
    DownloadFailed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Linked => "linked",
            Self::NotFound => "not_found",
            Self::DownloadFailed => "download_failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "linked" => Some(Self::Linked),
            "not_found" => Some(Self::NotFound),
            "download_failed" => Some(Self::DownloadFailed),
            _ => None,
        }
    }

    /// Terminal states are never left except through an explicit reset
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Recording linkage sub-record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub status: RecordingStatus,
    /// Catalog reference to the linked clip, present iff linked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempt_count: u32,
}

impl RecordingInfo {
    pub fn pending() -> Self {
        Self {
            status: RecordingStatus::Pending,
            media_ref: None,
            resolved_at: None,
            attempt_count: 0,
        }
    }
}

/// One discrete detection on the timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionItem {
    pub id: Uuid,
    pub start_ts: DateTime<Utc>,
    /// Null while the detection is still open
    pub end_ts: Option<DateTime<Utc>>,
    /// Derived from start/end once closed; spans merged pulses including gaps
    pub duration_s: Option<i64>,
    pub label: DetectionLabel,
    pub source_entity_id: String,
    pub camera_name: String,
    pub snapshot_ref: Option<String>,
    pub recording: RecordingInfo,
    /// Number of times this item was reopened by the merge window
    pub merge_count: u32,
    pub created_at: DateTime<Utc>,
}

impl DetectionItem {
    pub fn is_open(&self) -> bool {
        self.end_ts.is_none()
    }
}

/// Database row shape for detection items
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DetectionItemDb {
    pub id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub duration_s: Option<i64>,
    pub label: String,
    pub source_entity_id: String,
    pub camera_name: String,
    pub snapshot_ref: Option<String>,
    pub recording_status: String,
    pub recording_media_ref: Option<String>,
    pub recording_resolved_at: Option<DateTime<Utc>>,
    pub recording_attempt_count: i32,
    pub merge_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<&DetectionItem> for DetectionItemDb {
    fn from(item: &DetectionItem) -> Self {
        Self {
            id: item.id,
            start_ts: item.start_ts,
            end_ts: item.end_ts,
            duration_s: item.duration_s,
            label: item.label.as_str().to_string(),
            source_entity_id: item.source_entity_id.clone(),
            camera_name: item.camera_name.clone(),
            snapshot_ref: item.snapshot_ref.clone(),
            recording_status: item.recording.status.as_str().to_string(),
            recording_media_ref: item.recording.media_ref.clone(),
            recording_resolved_at: item.recording.resolved_at,
            recording_attempt_count: item.recording.attempt_count as i32,
            merge_count: item.merge_count as i32,
            created_at: item.created_at,
        }
    }
}

impl TryFrom<DetectionItemDb> for DetectionItem {
    type Error = String;

    fn try_from(row: DetectionItemDb) -> Result<Self, Self::Error> {
        let label = DetectionLabel::parse(&row.label)
            .ok_or_else(|| format!("Unknown label in row {}: {}", row.id, row.label))?;
        let status = RecordingStatus::parse(&row.recording_status).ok_or_else(|| {
            format!(
                "Unknown recording status in row {}: {}",
                row.id, row.recording_status
            )
        })?;

        Ok(Self {
            id: row.id,
            start_ts: row.start_ts,
            end_ts: row.end_ts,
            duration_s: row.duration_s,
            label,
            source_entity_id: row.source_entity_id,
            camera_name: row.camera_name,
            snapshot_ref: row.snapshot_ref,
            recording: RecordingInfo {
                status,
                media_ref: row.recording_media_ref,
                resolved_at: row.recording_resolved_at,
                attempt_count: row.recording_attempt_count.max(0) as u32,
            },
            merge_count: row.merge_count.max(0) as u32,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_legacy_aliases() {
        assert_eq!(DetectionLabel::parse("animal"), Some(DetectionLabel::Pet));
        assert_eq!(DetectionLabel::parse("Person"), Some(DetectionLabel::Person));
        assert_eq!(DetectionLabel::parse("package"), None);
    }

    #[test]
    fn pet_clips_live_in_the_animal_folder() {
        assert_eq!(DetectionLabel::Pet.catalog_folder(), "Animal");
    }

    #[test]
    fn recording_status_round_trips() {
        for status in [
            RecordingStatus::Pending,
            RecordingStatus::Linked,
            RecordingStatus::NotFound,
            RecordingStatus::DownloadFailed,
        ] {
            assert_eq!(RecordingStatus::parse(status.as_str()), Some(status));
        }
    }
}
