use crate::config::FeedConfig;
use crate::db::models::{DetectionItem, DetectionLabel, RecordingInfo};
use crate::db::repositories::ItemStore;
use crate::error::Error;
use crate::snapshot::SnapshotTrigger;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod matcher;
pub mod merge;
pub mod normalizer;
pub mod resolver;

pub use matcher::{ClipMatcher, SearchWindow};
pub use merge::{MergeEngine, Transition};
pub use normalizer::{Edge, EventNormalizer, NormalizedEdge, RawTransition};
pub use resolver::RecordingResolver;

/// Historical sensor transitions, used to rebuild the timeline after losing
/// the item store
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn transitions_since(&self, since: DateTime<Utc>) -> Result<Vec<RawTransition>>;
}

/// Filters for listing timeline items
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub labels: Option<HashSet<DetectionLabel>>,
    pub since_hours: Option<u64>,
    pub limit: Option<usize>,
}

/// Owns the detection timeline: normalizes incoming transitions, runs the
/// burst-merge state machine, and hands closed items to the resolver.
///
/// Merge transitions are serialized behind one lock, and key state is only
/// updated after the corresponding store write succeeded.
pub struct FeedManager {
    config: FeedConfig,
    store: Arc<dyn ItemStore>,
    normalizer: EventNormalizer,
    engine: Mutex<MergeEngine>,
    resolver: Arc<RecordingResolver>,
    snapshots: Arc<dyn SnapshotTrigger>,
    history: Option<Arc<dyn HistorySource>>,
}

impl FeedManager {
    pub fn new(
        config: FeedConfig,
        store: Arc<dyn ItemStore>,
        normalizer: EventNormalizer,
        resolver: Arc<RecordingResolver>,
        snapshots: Arc<dyn SnapshotTrigger>,
        history: Option<Arc<dyn HistorySource>>,
    ) -> Self {
        let engine = Mutex::new(MergeEngine::new(config.merge_window_s));
        Self {
            config,
            store,
            normalizer,
            engine,
            resolver,
            snapshots,
            history,
        }
    }

    /// Load persisted items, rebuild merge state, and resume resolution for
    /// items that closed with their recording still pending
    pub async fn start(&self) -> Result<()> {
        let items = self.store.list_recent(self.config.max_items).await?;
        self.engine.lock().await.rebuild(&items);

        let mut resumed = 0;
        for item in &items {
            if !item.is_open() && !item.recording.status.is_terminal() {
                self.resolver.schedule(item.id).await;
                resumed += 1;
            }
        }

        info!(
            "Feed manager started with {} items ({} pending resolutions resumed)",
            items.len(),
            resumed
        );
        Ok(())
    }

    /// Cancel background work; pending items pick resolution back up on the
    /// next start
    pub async fn stop(&self) {
        self.resolver.cancel_all().await;
    }

    /// Feed one raw sensor transition through the pipeline
    pub async fn handle_transition(&self, raw: &RawTransition) -> Result<()> {
        let Some(edge) = self.normalizer.normalize(raw).await else {
            return Ok(());
        };
        self.apply_edge(edge, false).await
    }

    async fn apply_edge(&self, edge: NormalizedEdge, replay: bool) -> Result<()> {
        let key = (edge.camera_name.clone(), edge.label);
        let mut engine = self.engine.lock().await;

        match engine.evaluate(&key, edge.edge, edge.time_fired) {
            Transition::Open {
                reopen: Some(item_id),
            } => match self.store.get(&item_id).await? {
                Some(mut item) => {
                    self.resolver.cancel(&item_id).await;
                    item.end_ts = None;
                    item.duration_s = None;
                    item.recording = RecordingInfo::pending();
                    item.merge_count += 1;
                    self.store.put(&item).await?;
                    engine.note_opened(&key, item_id);
                    info!(
                        "Reopened item {} for {} {} (merge #{})",
                        item_id, edge.camera_name, edge.label, item.merge_count
                    );
                    if item.snapshot_ref.is_none() && !replay {
                        self.spawn_snapshot(item_id, edge.snapshot_camera.clone());
                    }
                }
                // The merge anchor was pruned from the store; fall back to a
                // fresh item.
                None => {
                    engine.note_removed(&key, item_id);
                    self.open_new_item(&mut engine, &key, &edge, replay).await?;
                }
            },
            Transition::Open { reopen: None } => {
                self.open_new_item(&mut engine, &key, &edge, replay).await?;
            }
            Transition::Close { item_id } => {
                let Some(mut item) = self.store.get(&item_id).await? else {
                    warn!("Open item {} missing from store; dropping end edge", item_id);
                    engine.note_removed(&key, item_id);
                    return Ok(());
                };
                item.end_ts = Some(edge.time_fired);
                item.duration_s = Some((edge.time_fired - item.start_ts).num_seconds().max(0));
                self.store.put(&item).await?;
                engine.note_closed(&key, item_id, edge.time_fired);
                info!(
                    "Closed item {} for {} {} after {}s",
                    item_id,
                    edge.camera_name,
                    edge.label,
                    item.duration_s.unwrap_or(0)
                );
                self.resolver.schedule(item_id).await;
            }
            Transition::DuplicateStart { item_id } => {
                warn!(
                    "Duplicate start for {} {} while item {} is open; ignoring",
                    edge.camera_name, edge.label, item_id
                );
            }
            Transition::OrphanEnd => {
                warn!(
                    "End edge for {} {} with no open item; ignoring",
                    edge.camera_name, edge.label
                );
            }
        }

        Ok(())
    }

    async fn open_new_item(
        &self,
        engine: &mut MergeEngine,
        key: &merge::FeedKey,
        edge: &NormalizedEdge,
        replay: bool,
    ) -> Result<()> {
        let item = DetectionItem {
            id: Uuid::new_v4(),
            start_ts: edge.time_fired,
            end_ts: None,
            duration_s: None,
            label: edge.label,
            source_entity_id: edge.entity_id.clone(),
            camera_name: edge.camera_name.clone(),
            snapshot_ref: None,
            recording: RecordingInfo::pending(),
            merge_count: 0,
            created_at: Utc::now(),
        };

        self.store.put(&item).await?;
        engine.note_opened(key, item.id);
        self.store.prune(self.config.max_items).await?;
        info!(
            "Opened item {} for {} {}",
            item.id, edge.camera_name, edge.label
        );

        if !replay {
            self.spawn_snapshot(item.id, edge.snapshot_camera.clone());
        }
        Ok(())
    }

    /// Capture a snapshot for a newly opened item after the configured delay.
    /// The task re-reads the item before and after capturing, so deletions
    /// and races lose nothing.
    fn spawn_snapshot(&self, item_id: Uuid, snapshot_camera: Option<String>) {
        let store = Arc::clone(&self.store);
        let trigger = Arc::clone(&self.snapshots);
        let delay = std::time::Duration::from_secs_f64(self.config.snapshot_delay_s);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let item = match store.get(&item_id).await {
                Ok(Some(item)) if item.snapshot_ref.is_none() => item,
                Ok(_) => return,
                Err(e) => {
                    warn!("Snapshot pre-read for {} failed: {}", item_id, e);
                    return;
                }
            };

            let snapshot_ref = match trigger.capture(&item, snapshot_camera.as_deref()).await {
                Ok(Some(snapshot_ref)) => snapshot_ref,
                Ok(None) => return,
                Err(e) => {
                    warn!("Snapshot capture for {} failed: {}", item_id, e);
                    return;
                }
            };

            match store.get(&item_id).await {
                Ok(Some(mut current)) if current.snapshot_ref.is_none() => {
                    current.snapshot_ref = Some(snapshot_ref);
                    if let Err(e) = store.put(&current).await {
                        warn!("Failed to persist snapshot for {}: {}", item_id, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Snapshot write-back for {} failed: {}", item_id, e),
            }
        });
    }

    /// Return timeline items newest-first, filtered by label set, age, and
    /// count
    pub async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<DetectionItem>> {
        let limit = filter
            .limit
            .unwrap_or(self.config.list_limit)
            .min(self.config.list_limit);
        let since_hours = filter.since_hours.unwrap_or(self.config.default_since_hours);
        let cutoff = Utc::now() - Duration::hours(since_hours as i64);

        let items = self.store.list_recent(self.config.max_items).await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                filter
                    .labels
                    .as_ref()
                    .map_or(true, |labels| labels.contains(&item.label))
            })
            .filter(|item| item.start_ts >= cutoff)
            .take(limit)
            .collect())
    }

    pub async fn get_item(&self, id: &Uuid) -> Result<DetectionItem> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Unknown item id: {}", id)).into())
    }

    /// Manual resolution attempt for an item, outside the schedule
    pub async fn resolve_recording(&self, id: Uuid, final_attempt: bool) -> Result<RecordingInfo> {
        self.resolver.resolve_now(id, final_attempt).await
    }

    /// Reset an item's recording state and re-enter the resolution pipeline
    /// from the start
    pub async fn reset_recording(&self, id: Uuid) -> Result<RecordingInfo> {
        let mut item = self.get_item(&id).await?;
        if item.is_open() {
            return Ok(item.recording);
        }

        self.resolver.cancel(&id).await;
        item.recording = RecordingInfo::pending();
        self.store.put(&item).await?;
        self.resolver.schedule(id).await;
        info!("Reset recording state for item {}", id);
        Ok(item.recording)
    }

    /// Delete an item and cancel any resolution work still scheduled for it
    pub async fn delete_item(&self, id: Uuid) -> Result<bool> {
        self.resolver.cancel(&id).await;

        let Some(item) = self.store.get(&id).await? else {
            return Ok(false);
        };
        let existed = self.store.delete(&id).await?;
        self.engine
            .lock()
            .await
            .note_removed(&(item.camera_name.clone(), item.label), id);
        info!("Deleted item {}", id);
        Ok(existed)
    }

    /// Materialize a closed synthetic detection, bypassing edge detection.
    /// Used for testing and demos; the item still enters the resolution
    /// pipeline like a live one.
    pub async fn create_mock_detection(
        &self,
        source_entity_id: &str,
        camera_name: &str,
        label_raw: &str,
        duration_s: i64,
        with_snapshot: bool,
    ) -> Result<DetectionItem> {
        let label = DetectionLabel::parse(label_raw)
            .ok_or_else(|| Error::Api(format!("Unknown label: {}", label_raw)))?;

        let ended = Utc::now();
        let duration = duration_s.max(1);
        let mut item = DetectionItem {
            id: Uuid::new_v4(),
            start_ts: ended - Duration::seconds(duration),
            end_ts: Some(ended),
            duration_s: Some(duration),
            label,
            source_entity_id: source_entity_id.to_string(),
            camera_name: camera_name.to_string(),
            snapshot_ref: None,
            recording: RecordingInfo::pending(),
            merge_count: 0,
            created_at: ended,
        };

        if with_snapshot {
            item.snapshot_ref = self.snapshots.capture(&item, None).await?;
        }

        self.store.put(&item).await?;
        self.store.prune(self.config.max_items).await?;
        self.engine
            .lock()
            .await
            .note_closed(&(item.camera_name.clone(), item.label), item.id, ended);
        self.resolver.schedule(item.id).await;

        info!(
            "Created mock detection {} for {} {}",
            item.id, camera_name, label
        );
        Ok(item)
    }

    /// Drop all items and re-derive the timeline from the historical
    /// transition log, replaying it through the live pipeline. Snapshots are
    /// not recaptured; closed items re-enter recording resolution.
    pub async fn rebuild_from_history(&self, lookback_hours: Option<u64>) -> Result<usize> {
        let source = self
            .history
            .as_ref()
            .ok_or_else(|| Error::Config("No history source configured".to_string()))?;

        let since =
            Utc::now() - Duration::hours(lookback_hours.unwrap_or(self.config.default_since_hours) as i64);
        let mut transitions = source.transitions_since(since).await?;
        transitions.sort_by_key(|t| t.time_fired);
        info!("Rebuilding feed from {} historical transitions", transitions.len());

        // Wipe the current timeline; the replay below recreates it.
        let existing = self.store.list_recent(self.config.max_items).await?;
        for item in existing {
            self.resolver.cancel(&item.id).await;
            self.store.delete(&item.id).await?;
        }
        self.engine.lock().await.clear();

        for raw in &transitions {
            if let Some(edge) = self.normalizer.normalize(raw).await {
                self.apply_edge(edge, true).await?;
            }
        }

        let rebuilt = self.store.list_recent(self.config.max_items).await?;
        info!("Rebuild complete: {} items", rebuilt.len());
        Ok(rebuilt.len())
    }
}
