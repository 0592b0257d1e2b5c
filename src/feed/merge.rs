use crate::db::models::{DetectionItem, DetectionLabel};
use crate::feed::normalizer::Edge;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Merge-engine key; one state machine exists per camera and label
pub type FeedKey = (String, DetectionLabel);

/// Per-key state: either an item is open, or the key remembers its most
/// recently closed item as the merge anchor
#[derive(Debug, Clone, PartialEq)]
enum KeyState {
    Open(Uuid),
    Closed(Option<(Uuid, DateTime<Utc>)>),
}

/// What an incoming edge means for the keyed item timeline
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Open an item: reopen the given closed item, or create a fresh one
    Open { reopen: Option<Uuid> },
    /// Close the currently open item
    Close { item_id: Uuid },
    /// Start signal while already open; dropped as an anomaly
    DuplicateStart { item_id: Uuid },
    /// End signal with nothing open; dropped as an anomaly
    OrphanEnd,
}

/// Burst-merge state machine arena.
///
/// Pulsing sensors produce rapid on/off flanks; a start edge arriving within
/// the merge window of the previous end reopens that item instead of starting
/// a new one, so one physical event stays one timeline entry.
///
/// `evaluate` is a pure read; callers persist the outcome first and report it
/// back through the `note_*` methods, so a failed store write leaves the
/// machine untouched.
pub struct MergeEngine {
    merge_window: Duration,
    states: HashMap<FeedKey, KeyState>,
}

impl MergeEngine {
    pub fn new(merge_window_s: i64) -> Self {
        Self {
            merge_window: Duration::seconds(merge_window_s),
            states: HashMap::new(),
        }
    }

    /// Decide what an edge does to the key's timeline
    pub fn evaluate(&self, key: &FeedKey, edge: Edge, fired_at: DateTime<Utc>) -> Transition {
        let state = self
            .states
            .get(key)
            .cloned()
            .unwrap_or(KeyState::Closed(None));

        match (edge, state) {
            (Edge::Start, KeyState::Closed(anchor)) => {
                let reopen = anchor.and_then(|(item_id, end_ts)| {
                    if fired_at - end_ts <= self.merge_window {
                        Some(item_id)
                    } else {
                        None
                    }
                });
                Transition::Open { reopen }
            }
            (Edge::Start, KeyState::Open(item_id)) => Transition::DuplicateStart { item_id },
            (Edge::End, KeyState::Open(item_id)) => Transition::Close { item_id },
            (Edge::End, KeyState::Closed(_)) => Transition::OrphanEnd,
        }
    }

    /// Record that an item is now open for the key
    pub fn note_opened(&mut self, key: &FeedKey, item_id: Uuid) {
        self.states.insert(key.clone(), KeyState::Open(item_id));
    }

    /// Record that the key's open item closed at `end_ts`
    pub fn note_closed(&mut self, key: &FeedKey, item_id: Uuid, end_ts: DateTime<Utc>) {
        self.states
            .insert(key.clone(), KeyState::Closed(Some((item_id, end_ts))));
    }

    /// Forget any reference to a deleted item
    pub fn note_removed(&mut self, key: &FeedKey, item_id: Uuid) {
        match self.states.get(key) {
            Some(KeyState::Open(id)) if *id == item_id => {
                self.states.insert(key.clone(), KeyState::Closed(None));
            }
            Some(KeyState::Closed(Some((id, _)))) if *id == item_id => {
                self.states.insert(key.clone(), KeyState::Closed(None));
            }
            _ => {}
        }
    }

    /// Id of the key's open item, if any
    pub fn open_item(&self, key: &FeedKey) -> Option<Uuid> {
        match self.states.get(key) {
            Some(KeyState::Open(item_id)) => Some(*item_id),
            _ => None,
        }
    }

    /// Reset all key state
    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Reconstruct key state from persisted items, newest-first
    pub fn rebuild(&mut self, items: &[DetectionItem]) {
        self.states.clear();
        for item in items {
            let key = (item.camera_name.clone(), item.label);
            match item.end_ts {
                None => {
                    self.states.insert(key, KeyState::Open(item.id));
                }
                Some(end_ts) => {
                    self.states
                        .entry(key)
                        .or_insert(KeyState::Closed(Some((item.id, end_ts))));
                }
            }
        }
    }
}
