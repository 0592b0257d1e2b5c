use crate::catalog::{clip_bounds_from_title, CatalogBrowser, CatalogError};
use crate::config::CatalogConfig;
use crate::db::models::DetectionLabel;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::debug;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Time range searched for a matching clip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ClipCandidate {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    media_ref: String,
}

/// Finds the catalog clip best covering a search window.
///
/// Browsing is limited to the low-resolution tier; clips are scored purely on
/// the textual metadata in their names, the media itself is never fetched.
pub struct ClipMatcher {
    browser: Arc<dyn CatalogBrowser>,
    config: CatalogConfig,
    /// Largest accepted start distance when no candidate overlaps the window
    max_slack_s: i64,
}

impl ClipMatcher {
    pub fn new(browser: Arc<dyn CatalogBrowser>, config: CatalogConfig, max_slack_s: i64) -> Self {
        Self {
            browser,
            config,
            max_slack_s,
        }
    }

    /// Browse the catalog days covered by the window and pick the best clip.
    ///
    /// Returns `Ok(None)` when nothing plausible exists; `Unavailable` only
    /// when no day folder could be browsed at all.
    pub async fn find_match(
        &self,
        camera_name: &str,
        label: DetectionLabel,
        window: &SearchWindow,
    ) -> Result<Option<String>, CatalogError> {
        let mut candidates = Vec::new();
        let mut browsed_any = false;
        let mut last_unavailable = None;

        for day in self.day_candidates(window) {
            let path = self.catalog_path(camera_name, label, day);
            let entries = match self.browser.list_children(&path).await {
                Ok(entries) => {
                    browsed_any = true;
                    entries
                }
                Err(CatalogError::NotFound(_)) => {
                    browsed_any = true;
                    continue;
                }
                Err(err) => {
                    debug!("Browse failed for {}: {}", path, err);
                    last_unavailable = Some(err);
                    continue;
                }
            };

            for entry in entries {
                let Some((clip_start, clip_end)) = clip_bounds_from_title(
                    day,
                    &entry.title,
                    self.config.time_offset_s,
                    self.config.default_clip_duration_s,
                ) else {
                    continue;
                };
                candidates.push(ClipCandidate {
                    start: clip_start,
                    end: clip_end,
                    media_ref: entry.media_ref,
                });
            }
        }

        if !browsed_any {
            if let Some(err) = last_unavailable {
                return Err(err);
            }
        }

        Ok(best_candidate(window, self.max_slack_s, candidates))
    }

    /// Days whose folders may hold the clip, in the catalog's local clock
    fn day_candidates(&self, window: &SearchWindow) -> BTreeSet<NaiveDate> {
        let offset = Duration::seconds(self.config.time_offset_s);
        [window.start, window.end]
            .iter()
            .map(|ts| (*ts + offset).date_naive())
            .collect()
    }

    fn catalog_path(&self, camera_name: &str, label: DetectionLabel, day: NaiveDate) -> String {
        use chrono::Datelike;
        format!(
            "{}/{}/{}/{}/{}/{}",
            camera_name,
            self.config.resolution_tier,
            day.year(),
            day.month(),
            day.day(),
            label.catalog_folder()
        )
    }
}

fn overlap_seconds(window: &SearchWindow, candidate: &ClipCandidate) -> i64 {
    let start = window.start.max(candidate.start);
    let end = window.end.min(candidate.end);
    (end - start).num_seconds().max(0)
}

/// Pick the candidate with the largest window overlap; with no overlap
/// anywhere, fall back to the nearest start within the slack bound
fn best_candidate(
    window: &SearchWindow,
    max_slack_s: i64,
    candidates: Vec<ClipCandidate>,
) -> Option<String> {
    let best = candidates.into_iter().max_by(|a, b| {
        let score_a = (overlap_seconds(window, a), -start_distance(window, a));
        let score_b = (overlap_seconds(window, b), -start_distance(window, b));
        score_a
            .cmp(&score_b)
            .then_with(|| a.media_ref.cmp(&b.media_ref))
    })?;

    if overlap_seconds(window, &best) <= 0 && start_distance(window, &best) > max_slack_s {
        return None;
    }
    Some(best.media_ref)
}

fn start_distance(window: &SearchWindow, candidate: &ClipCandidate) -> i64 {
    (candidate.start - window.start).num_seconds().abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 14, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn window(start_s: i64, end_s: i64) -> SearchWindow {
        SearchWindow {
            start: at(start_s),
            end: at(end_s),
        }
    }

    fn candidate(start_s: i64, end_s: i64, media_ref: &str) -> ClipCandidate {
        ClipCandidate {
            start: at(start_s),
            end: at(end_s),
            media_ref: media_ref.to_string(),
        }
    }

    #[test]
    fn full_overlap_beats_partial_regardless_of_order() {
        let w = window(0, 60);
        let full = candidate(10, 40, "full");
        let partial = candidate(-20, 10, "partial");

        assert_eq!(
            best_candidate(&w, 40, vec![partial.clone(), full.clone()]),
            Some("full".to_string())
        );
        assert_eq!(
            best_candidate(&w, 40, vec![full, partial]),
            Some("full".to_string())
        );
    }

    #[test]
    fn larger_overlap_wins() {
        let w = window(0, 60);
        assert_eq!(
            best_candidate(
                &w,
                40,
                vec![candidate(0, 10, "short"), candidate(0, 50, "long")]
            ),
            Some("long".to_string())
        );
    }

    #[test]
    fn no_overlap_falls_back_to_nearest_start_within_slack() {
        let w = window(0, 30);
        assert_eq!(
            best_candidate(
                &w,
                40,
                vec![candidate(65, 95, "far"), candidate(35, 60, "near")]
            ),
            Some("near".to_string())
        );
    }

    #[test]
    fn fallback_outside_slack_is_rejected() {
        let w = window(0, 30);
        assert_eq!(best_candidate(&w, 40, vec![candidate(100, 130, "late")]), None);
        assert_eq!(best_candidate(&w, 40, vec![]), None);
    }

    struct MockBrowser {
        listings: HashMap<String, Vec<CatalogEntry>>,
        browsed: Mutex<Vec<String>>,
    }

    impl MockBrowser {
        fn new(listings: HashMap<String, Vec<CatalogEntry>>) -> Self {
            Self {
                listings,
                browsed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CatalogBrowser for MockBrowser {
        async fn list_children(&self, path: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
            self.browsed.lock().await.push(path.to_string());
            self.listings
                .get(path)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(path.to_string()))
        }

        async fn validate_media(&self, _media_ref: &str) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    fn entry(title: &str) -> CatalogEntry {
        CatalogEntry {
            media_ref: format!("ref:{}", title),
            title: title.to_string(),
        }
    }

    #[tokio::test]
    async fn browses_only_the_low_resolution_tier_path() {
        let path = "Front Door/Low resolution/2025/6/14/Person";
        let mut listings = HashMap::new();
        listings.insert(path.to_string(), vec![entry("12:00:05 0:00:20 Person")]);
        let browser = Arc::new(MockBrowser::new(listings));

        let matcher = ClipMatcher::new(browser.clone(), CatalogConfig::default(), 40);
        let found = matcher
            .find_match("Front Door", DetectionLabel::Person, &window(0, 30))
            .await
            .unwrap();

        assert_eq!(found, Some("ref:12:00:05 0:00:20 Person".to_string()));
        assert_eq!(browser.browsed.lock().await.as_slice(), [path.to_string()]);
    }

    #[tokio::test]
    async fn windows_crossing_midnight_browse_both_days() {
        let browser = Arc::new(MockBrowser::new(HashMap::new()));
        let matcher = ClipMatcher::new(browser.clone(), CatalogConfig::default(), 40);

        let late = Utc.with_ymd_and_hms(2025, 6, 14, 23, 59, 50).unwrap();
        let w = SearchWindow {
            start: late,
            end: late + Duration::seconds(30),
        };
        let found = matcher
            .find_match("Front Door", DetectionLabel::Person, &w)
            .await
            .unwrap();

        assert_eq!(found, None);
        let browsed = browser.browsed.lock().await;
        assert_eq!(
            browsed.as_slice(),
            [
                "Front Door/Low resolution/2025/6/14/Person".to_string(),
                "Front Door/Low resolution/2025/6/15/Person".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unparseable_titles_are_skipped() {
        let path = "Front Door/Low resolution/2025/6/14/Person";
        let mut listings = HashMap::new();
        listings.insert(
            path.to_string(),
            vec![entry("thumbnail"), entry("12:00:05 0:00:20 Person")],
        );
        let matcher = ClipMatcher::new(
            Arc::new(MockBrowser::new(listings)),
            CatalogConfig::default(),
            40,
        );

        let found = matcher
            .find_match("Front Door", DetectionLabel::Person, &window(0, 30))
            .await
            .unwrap();
        assert_eq!(found, Some("ref:12:00:05 0:00:20 Person".to_string()));
    }

    #[tokio::test]
    async fn pet_detections_browse_the_animal_folder() {
        let browser = Arc::new(MockBrowser::new(HashMap::new()));
        let matcher = ClipMatcher::new(browser.clone(), CatalogConfig::default(), 40);

        matcher
            .find_match("Yard", DetectionLabel::Pet, &window(0, 30))
            .await
            .unwrap();

        assert_eq!(
            browser.browsed.lock().await.as_slice(),
            ["Yard/Low resolution/2025/6/14/Animal".to_string()]
        );
    }
}
