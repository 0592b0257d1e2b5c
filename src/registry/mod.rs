use crate::config::SensorMappingConfig;
use crate::db::models::DetectionLabel;
use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;

/// What a sensor entity resolves to
#[derive(Debug, Clone, PartialEq)]
pub struct SensorBinding {
    pub camera_name: String,
    pub label: DetectionLabel,
    /// Camera entity used for snapshot capture, if one is known
    pub snapshot_camera: Option<String>,
}

/// Maps a sensor entity id to its camera and detection label.
///
/// Implemented against whatever entity/device registry the host platform
/// provides; the feed only needs this lookup.
#[async_trait]
pub trait SensorRegistry: Send + Sync {
    async fn lookup(&self, entity_id: &str) -> Result<Option<SensorBinding>>;
}

/// Entity id suffixes that identify a detection sensor, including the
/// localized names some camera firmwares expose
const SUFFIX_TO_LABEL: &[(&str, DetectionLabel)] = &[
    ("_person", DetectionLabel::Person),
    ("_animal", DetectionLabel::Pet),
    ("_pet", DetectionLabel::Pet),
    ("_vehicle", DetectionLabel::Vehicle),
    ("_motion", DetectionLabel::Motion),
    ("_visitor", DetectionLabel::Visitor),
    ("_persoon", DetectionLabel::Person),
    ("_dier", DetectionLabel::Pet),
    ("_voertuig", DetectionLabel::Vehicle),
    ("_beweging", DetectionLabel::Motion),
    ("_bezoeker", DetectionLabel::Visitor),
];

/// Registry backed by explicit config mappings, with suffix inference as a
/// fallback for sensors that were never configured
pub struct StaticSensorRegistry {
    mappings: HashMap<String, SensorBinding>,
}

impl StaticSensorRegistry {
    pub fn new(sensors: &[SensorMappingConfig]) -> Self {
        let mut mappings = HashMap::new();
        for sensor in sensors {
            let Some(label) = DetectionLabel::parse(&sensor.label) else {
                warn!(
                    "Ignoring sensor mapping {} with unknown label {}",
                    sensor.entity_id, sensor.label
                );
                continue;
            };
            mappings.insert(
                sensor.entity_id.clone(),
                SensorBinding {
                    camera_name: sensor.camera_name.clone(),
                    label,
                    snapshot_camera: sensor.snapshot_camera.clone(),
                },
            );
        }
        Self { mappings }
    }
}

#[async_trait]
impl SensorRegistry for StaticSensorRegistry {
    async fn lookup(&self, entity_id: &str) -> Result<Option<SensorBinding>> {
        if let Some(binding) = self.mappings.get(entity_id) {
            return Ok(Some(binding.clone()));
        }
        Ok(infer_binding(entity_id))
    }
}

/// Derive a binding from the entity id alone: label from the suffix table,
/// camera name from the remaining object id
fn infer_binding(entity_id: &str) -> Option<SensorBinding> {
    let object_id = entity_id.strip_prefix("binary_sensor.")?;
    let lowered = object_id.to_ascii_lowercase();

    for (suffix, label) in SUFFIX_TO_LABEL {
        if lowered.ends_with(suffix) {
            let stem = &object_id[..object_id.len() - suffix.len()];
            return Some(SensorBinding {
                camera_name: title_case(stem),
                label: *label,
                snapshot_camera: None,
            });
        }
    }
    None
}

fn title_case(object_id: &str) -> String {
    object_id
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(entity_id: &str, camera: &str, label: &str) -> SensorMappingConfig {
        SensorMappingConfig {
            entity_id: entity_id.to_string(),
            camera_name: camera.to_string(),
            label: label.to_string(),
            snapshot_camera: None,
        }
    }

    #[tokio::test]
    async fn explicit_mapping_wins_over_inference() {
        let registry = StaticSensorRegistry::new(&[mapping(
            "binary_sensor.driveway_person",
            "Front Drive",
            "person",
        )]);

        let binding = registry
            .lookup("binary_sensor.driveway_person")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(binding.camera_name, "Front Drive");
        assert_eq!(binding.label, DetectionLabel::Person);
    }

    #[tokio::test]
    async fn suffix_inference_builds_camera_name() {
        let registry = StaticSensorRegistry::new(&[]);

        let binding = registry
            .lookup("binary_sensor.back_garden_animal")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(binding.camera_name, "Back Garden");
        assert_eq!(binding.label, DetectionLabel::Pet);
    }

    #[tokio::test]
    async fn localized_suffixes_resolve() {
        let registry = StaticSensorRegistry::new(&[]);

        let binding = registry
            .lookup("binary_sensor.oprit_voertuig")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(binding.label, DetectionLabel::Vehicle);
        assert_eq!(binding.camera_name, "Oprit");
    }

    #[tokio::test]
    async fn unrelated_entities_do_not_resolve() {
        let registry = StaticSensorRegistry::new(&[]);

        assert!(registry
            .lookup("binary_sensor.front_door_contact")
            .await
            .unwrap()
            .is_none());
        assert!(registry
            .lookup("sensor.garage_person")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mapping_with_unknown_label_is_ignored() {
        let registry =
            StaticSensorRegistry::new(&[mapping("binary_sensor.porch_package", "Porch", "package")]);

        assert!(registry
            .lookup("binary_sensor.porch_package")
            .await
            .unwrap()
            .is_none());
    }
}
