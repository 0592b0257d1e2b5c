use crate::catalog::{CatalogBrowser, CatalogError};
use crate::config::FeedConfig;
use crate::db::models::{RecordingInfo, RecordingStatus};
use crate::db::repositories::ItemStore;
use crate::error::Error;
use crate::feed::matcher::{ClipMatcher, SearchWindow};
use anyhow::Result;
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a single resolution attempt concluded
enum AttemptOutcome {
    Linked(String),
    NoMatch,
    MediaUnreadable(String),
    Transient,
}

/// Schedules and runs recording-resolution attempts for closed items.
///
/// Each closed item gets a cancellable background task walking the retry
/// schedule; deleting or resetting the item cancels the task through its
/// token. A per-item guard keeps scheduled and manual attempts from running
/// concurrently against the same item.
pub struct RecordingResolver {
    store: Arc<dyn ItemStore>,
    matcher: ClipMatcher,
    browser: Arc<dyn CatalogBrowser>,
    settle_delay_s: u64,
    retry_backoff_s: Vec<u64>,
    lookback_s: i64,
    lookahead_s: i64,
    tasks: Mutex<HashMap<Uuid, CancellationToken>>,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl RecordingResolver {
    pub fn new(
        store: Arc<dyn ItemStore>,
        matcher: ClipMatcher,
        browser: Arc<dyn CatalogBrowser>,
        config: &FeedConfig,
    ) -> Self {
        Self {
            store,
            matcher,
            browser,
            settle_delay_s: config.settle_delay_s,
            retry_backoff_s: config.retry_backoff_s.clone(),
            lookback_s: config.lookback_s,
            lookahead_s: config.lookahead_s,
            tasks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Start the retry schedule for a freshly closed item, replacing any
    /// schedule already running for it
    pub async fn schedule(self: &Arc<Self>, item_id: Uuid) {
        let token = {
            let mut tasks = self.tasks.lock().await;
            if let Some(old) = tasks.remove(&item_id) {
                old.cancel();
            }
            let token = CancellationToken::new();
            tasks.insert(item_id, token.clone());
            token
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_schedule(item_id, token).await;
        });
    }

    /// Cancel any scheduled attempts for an item
    pub async fn cancel(&self, item_id: &Uuid) {
        if let Some(token) = self.tasks.lock().await.remove(item_id) {
            token.cancel();
        }
    }

    /// Cancel every outstanding schedule; used on shutdown
    pub async fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, token) in tasks.drain() {
            token.cancel();
        }
    }

    /// Run one attempt immediately, outside the schedule.
    ///
    /// With `final_attempt` set, a miss becomes terminal instead of leaving
    /// the scheduled retries to run out.
    pub async fn resolve_now(&self, item_id: Uuid, final_attempt: bool) -> Result<RecordingInfo> {
        let item = self
            .store
            .get(&item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Unknown item id: {}", item_id)))?;

        if item.recording.status.is_terminal() {
            return Ok(item.recording);
        }

        self.attempt(item_id, final_attempt).await
    }

    async fn run_schedule(self: Arc<Self>, item_id: Uuid, token: CancellationToken) {
        let delays: Vec<u64> = std::iter::once(self.settle_delay_s)
            .chain(self.retry_backoff_s.iter().copied())
            .collect();
        let attempts = delays.len();

        for (index, delay_s) in delays.into_iter().enumerate() {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Resolution schedule for {} cancelled", item_id);
                    return;
                }
                _ = sleep(std::time::Duration::from_secs(delay_s)) => {}
            }

            let is_final = index + 1 == attempts;
            match self.attempt(item_id, is_final).await {
                Ok(recording) if recording.status.is_terminal() => break,
                Ok(_) => {}
                Err(e) => {
                    if let Some(Error::NotFound(_)) = e.downcast_ref::<Error>() {
                        debug!("Item {} vanished; stopping resolution", item_id);
                        break;
                    }
                    warn!("Resolution attempt for {} failed: {}", item_id, e);
                }
            }
        }

        // Drop our task entry unless a newer schedule already replaced it.
        if !token.is_cancelled() {
            self.cancel(&item_id).await;
        }
    }

    /// One guarded attempt against the catalog
    async fn attempt(&self, item_id: Uuid, final_attempt: bool) -> Result<RecordingInfo> {
        let already_running = !self.in_flight.lock().await.insert(item_id);
        if already_running {
            debug!("Attempt for {} already running; skipping", item_id);
            return self
                .store
                .get(&item_id)
                .await?
                .map(|item| item.recording)
                .ok_or_else(|| Error::NotFound(format!("Unknown item id: {}", item_id)).into());
        }

        let result = self.attempt_inner(item_id, final_attempt).await;
        self.in_flight.lock().await.remove(&item_id);
        result
    }

    async fn attempt_inner(&self, item_id: Uuid, final_attempt: bool) -> Result<RecordingInfo> {
        let item = self
            .store
            .get(&item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Unknown item id: {}", item_id)))?;

        if item.recording.status.is_terminal() {
            return Ok(item.recording);
        }
        // A reopened item resolves again once it closes.
        let Some(end_ts) = item.end_ts else {
            return Ok(item.recording);
        };

        let window = SearchWindow {
            start: item.start_ts - Duration::seconds(self.lookback_s),
            end: end_ts + Duration::seconds(self.lookahead_s),
        };

        let outcome = match self
            .matcher
            .find_match(&item.camera_name, item.label, &window)
            .await
        {
            Ok(Some(media_ref)) => match self.browser.validate_media(&media_ref).await {
                Ok(()) => AttemptOutcome::Linked(media_ref),
                Err(CatalogError::MediaUnreadable(reason)) => {
                    AttemptOutcome::MediaUnreadable(reason)
                }
                Err(err) => {
                    warn!("Media validation for {} failed: {}", item_id, err);
                    AttemptOutcome::Transient
                }
            },
            Ok(None) => AttemptOutcome::NoMatch,
            Err(err) => {
                warn!("Catalog browse for {} failed: {}", item_id, err);
                AttemptOutcome::Transient
            }
        };

        // The browse suspended us; re-read the item before writing so a
        // concurrent delete or reopen wins.
        let Some(mut current) = self.store.get(&item_id).await? else {
            return Err(Error::NotFound(format!("Unknown item id: {}", item_id)).into());
        };
        if current.recording.status.is_terminal() || current.is_open() {
            return Ok(current.recording);
        }

        current.recording.attempt_count += 1;
        match outcome {
            AttemptOutcome::Linked(media_ref) => {
                info!(
                    "Linked item {} to recording {} after {} attempts",
                    item_id, media_ref, current.recording.attempt_count
                );
                current.recording.status = RecordingStatus::Linked;
                current.recording.media_ref = Some(media_ref);
                current.recording.resolved_at = Some(Utc::now());
            }
            AttemptOutcome::MediaUnreadable(reason) => {
                warn!("Recording for item {} is unreadable: {}", item_id, reason);
                current.recording.status = RecordingStatus::DownloadFailed;
                current.recording.resolved_at = Some(Utc::now());
            }
            AttemptOutcome::NoMatch | AttemptOutcome::Transient => {
                if final_attempt {
                    info!(
                        "No recording found for item {} after {} attempts",
                        item_id, current.recording.attempt_count
                    );
                    current.recording.status = RecordingStatus::NotFound;
                    current.recording.resolved_at = Some(Utc::now());
                }
            }
        }

        self.store.put(&current).await?;

        if current.recording.status.is_terminal() {
            self.cancel(&item_id).await;
        }
        Ok(current.recording)
    }
}
