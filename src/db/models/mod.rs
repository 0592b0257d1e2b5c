pub mod item_models;

pub use item_models::{
    DetectionItem, DetectionItemDb, DetectionLabel, RecordingInfo, RecordingStatus,
};
