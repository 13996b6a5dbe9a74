//! Time-windowed observation cache.
//!
//! Entries are keyed by (field_id, feed_type, observation_date). A window
//! whose dates are all fresh is served without touching the upstream, which
//! is what makes re-running a task for the same field and dates idempotent.
//! Dates the upstream published nothing for are cached as empty entries, so
//! sparse feeds (16-day vegetation composites) do not trigger a refetch per
//! missing day. On a transient upstream failure the cache degrades
//! gracefully by serving whatever stale entries exist.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use metrics::counter;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::FetchError;
use crate::models::{FeedType, Observation};

/// How long a cached entry stays fresh, per feed class.
#[derive(Debug, Clone, Copy)]
pub struct CacheWindows {
    pub weather: Duration,
    pub vegetation: Duration,
    pub fire: Duration,
}

impl Default for CacheWindows {
    fn default() -> Self {
        Self {
            weather: Duration::hours(24),
            vegetation: Duration::days(7),
            fire: Duration::hours(3),
        }
    }
}

impl CacheWindows {
    pub fn for_feed(&self, feed_type: FeedType) -> Duration {
        match feed_type {
            FeedType::Weather => self.weather,
            FeedType::VegetationIndex => self.vegetation,
            FeedType::Fire => self.fire,
        }
    }
}

type CacheKey = (Uuid, FeedType, NaiveDate);

#[derive(Debug, Clone)]
struct CacheEntry {
    observations: Vec<Observation>,
    fetched_at: DateTime<Utc>,
}

pub struct ObservationCache {
    windows: CacheWindows,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl ObservationCache {
    pub fn new(windows: CacheWindows) -> Self {
        Self {
            windows,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the observations for every date in `[start, end]`, invoking
    /// `fetch` only when at least one date is missing or expired, or when
    /// `force` is set. A successful fetch overwrites every date of the
    /// window, including dates that came back empty.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        field_id: Uuid,
        feed_type: FeedType,
        start: NaiveDate,
        end: NaiveDate,
        force: bool,
        fetch: F,
    ) -> Result<Vec<Observation>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Observation>, FetchError>>,
    {
        let validity = self.windows.for_feed(feed_type);
        let now = Utc::now();
        let mut dates = Vec::new();
        let mut date = start;
        while date <= end {
            dates.push(date);
            date = date + Duration::days(1);
        }

        if !force {
            let entries = self.entries.read().await;
            let all_fresh = dates.iter().all(|d| {
                entries
                    .get(&(field_id, feed_type, *d))
                    .is_some_and(|e| now - e.fetched_at < validity)
            });
            if all_fresh {
                counter!("fieldwatch_cache_hits_total", "feed" => feed_type.as_str()).increment(1);
                return Ok(collect_window(&entries, field_id, feed_type, &dates));
            }
        }

        counter!("fieldwatch_cache_misses_total", "feed" => feed_type.as_str()).increment(1);
        match fetch().await {
            Ok(fetched) => {
                let mut grouped: HashMap<NaiveDate, Vec<Observation>> = HashMap::new();
                for obs in fetched {
                    grouped.entry(obs.observation_date).or_default().push(obs);
                }
                let mut entries = self.entries.write().await;
                let mut result = Vec::new();
                for d in &dates {
                    let observations = grouped.remove(d).unwrap_or_default();
                    entries.insert(
                        (field_id, feed_type, *d),
                        CacheEntry {
                            observations: observations.clone(),
                            fetched_at: now,
                        },
                    );
                    result.extend(observations);
                }
                Ok(result)
            }
            Err(err) if err.is_transient() => {
                let entries = self.entries.read().await;
                let any_cached = dates
                    .iter()
                    .any(|d| entries.contains_key(&(field_id, feed_type, *d)));
                if any_cached {
                    warn!(
                        %field_id,
                        feed = %feed_type,
                        %start,
                        %end,
                        error = %err,
                        "transient fetch failure, serving stale cache entries"
                    );
                    counter!("fieldwatch_cache_stale_served_total", "feed" => feed_type.as_str())
                        .increment(1);
                    Ok(collect_window(&entries, field_id, feed_type, &dates))
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }
}

fn collect_window(
    entries: &HashMap<CacheKey, CacheEntry>,
    field_id: Uuid,
    feed_type: FeedType,
    dates: &[NaiveDate],
) -> Vec<Observation> {
    dates
        .iter()
        .filter_map(|d| entries.get(&(field_id, feed_type, *d)))
        .flat_map(|e| e.observations.clone())
        .collect()
}
