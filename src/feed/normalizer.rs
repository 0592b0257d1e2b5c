use crate::db::models::DetectionLabel;
use crate::registry::{SensorBinding, SensorRegistry};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Raw sensor transition as delivered by the host event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransition {
    pub entity_id: String,
    pub old_state: Option<String>,
    pub new_state: Option<String>,
    pub time_fired: DateTime<Utc>,
}

/// Direction of a normalized detection edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

/// A transition the merge engine can consume
#[derive(Debug, Clone)]
pub struct NormalizedEdge {
    pub entity_id: String,
    pub camera_name: String,
    pub label: DetectionLabel,
    pub edge: Edge,
    pub time_fired: DateTime<Utc>,
    pub snapshot_camera: Option<String>,
}

/// Classify a state change; anything that is not an off-to-on or on-to-off
/// flank is a no-op transition
pub fn edge_of(old_state: Option<&str>, new_state: Option<&str>) -> Option<Edge> {
    let was_on = old_state == Some("on");
    let is_on = new_state == Some("on");
    match (was_on, is_on) {
        (false, true) => Some(Edge::Start),
        (true, false) => Some(Edge::End),
        _ => None,
    }
}

/// Turns raw sensor transitions into normalized detection edges.
///
/// Registry lookups are memoized per sensor; sensors without a mapping and
/// labels outside the enabled set are dropped here, never surfaced as errors.
pub struct EventNormalizer {
    registry: Arc<dyn SensorRegistry>,
    enabled_labels: HashSet<DetectionLabel>,
    bindings: Mutex<HashMap<String, Option<SensorBinding>>>,
}

impl EventNormalizer {
    pub fn new(registry: Arc<dyn SensorRegistry>, enabled_labels: &[String]) -> Self {
        let enabled = enabled_labels
            .iter()
            .filter_map(|raw| {
                let label = DetectionLabel::parse(raw);
                if label.is_none() {
                    warn!("Ignoring unknown enabled label {}", raw);
                }
                label
            })
            .collect();

        Self {
            registry,
            enabled_labels: enabled,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub async fn normalize(&self, raw: &RawTransition) -> Option<NormalizedEdge> {
        if !raw.entity_id.starts_with("binary_sensor.") {
            return None;
        }

        let edge = edge_of(raw.old_state.as_deref(), raw.new_state.as_deref())?;

        let binding = self.resolve_binding(&raw.entity_id).await?;
        if !self.enabled_labels.contains(&binding.label) {
            debug!(
                "Dropping {} event for {}: label disabled",
                binding.label, raw.entity_id
            );
            return None;
        }

        Some(NormalizedEdge {
            entity_id: raw.entity_id.clone(),
            camera_name: binding.camera_name,
            label: binding.label,
            edge,
            time_fired: raw.time_fired,
            snapshot_camera: binding.snapshot_camera,
        })
    }

    async fn resolve_binding(&self, entity_id: &str) -> Option<SensorBinding> {
        let mut cache = self.bindings.lock().await;
        if let Some(cached) = cache.get(entity_id) {
            if cached.is_none() {
                debug!("Dropping event for unmapped sensor {}", entity_id);
            }
            return cached.clone();
        }
        drop(cache);

        let resolved = match self.registry.lookup(entity_id).await {
            Ok(binding) => binding,
            Err(e) => {
                warn!("Registry lookup failed for {}: {}", entity_id, e);
                return None;
            }
        };

        if resolved.is_none() {
            warn!("No camera mapping for sensor {}; dropping its events", entity_id);
        }

        self.bindings
            .lock()
            .await
            .insert(entity_id.to_string(), resolved.clone());
        resolved
    }
}
