//! Task execution: per-field pipelines, batch runs and the background
//! scheduler.
//!
//! A batch processes fields in parallel under a semaphore. Every field is
//! isolated: its failure is classified and recorded while siblings continue.
//! Transient failures are retried with exponential backoff; fields that were
//! never started before the batch deadline are reported as `not_attempted`.

mod retry;
mod scheduler;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::alerts::{AlertCondition, AlertEngine};
use crate::cache::ObservationCache;
use crate::error::{FetchError, FieldRunError, StorageError};
use crate::feeds::{FeedQuery, FeedRegistry};
use crate::models::{
    AlertKind, AlertSeverity, CropType, FeedType, FieldRecord, FireRiskLevel, HealthOutcome,
    HealthStatus, Observation,
};
use crate::scoring::{
    StressKind, ToleranceBand, assess_weather_stress, compute_fire_risk, compute_health,
};
use crate::storage::SharedStorage;

pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, TaskCadences};

const WEATHER_LOOKBACK_DAYS: i64 = 3;
const VEGETATION_LOOKBACK_DAYS: i64 = 30;
const FIRE_FETCH_DAYS: i64 = 2;
const FIRE_HISTORY_DAYS: i64 = 3;

const FIRE_DEDUP_KEY: &str = "fire_hotspots_near_boundary";
const HEALTH_POOR_DEDUP_KEY: &str = "health_below_60";
const HEALTH_CRITICAL_DEDUP_KEY: &str = "health_below_40";

/// The recurring task classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    WeatherRefresh,
    FireCheck,
    HealthRefresh,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::WeatherRefresh => "weather",
            TaskKind::FireCheck => "fire-check",
            TaskKind::HealthRefresh => "ndvi",
        }
    }

    pub const ALL: [TaskKind; 3] = [
        TaskKind::WeatherRefresh,
        TaskKind::FireCheck,
        TaskKind::HealthRefresh,
    ];
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weather" => Ok(TaskKind::WeatherRefresh),
            "fire-check" => Ok(TaskKind::FireCheck),
            "ndvi" => Ok(TaskKind::HealthRefresh),
            other => Err(format!("unknown task: {other}")),
        }
    }
}

/// Everything one field run needs. Shared immutably across the batch.
pub struct Pipeline {
    storage: SharedStorage,
    feeds: FeedRegistry,
    cache: Arc<ObservationCache>,
    alerts: Arc<AlertEngine>,
    tolerance_bands: HashMap<CropType, ToleranceBand>,
    fire_buffer_km: f64,
}

impl Pipeline {
    pub fn new(
        storage: SharedStorage,
        feeds: FeedRegistry,
        cache: Arc<ObservationCache>,
        alerts: Arc<AlertEngine>,
        tolerance_bands: HashMap<CropType, ToleranceBand>,
        fire_buffer_km: f64,
    ) -> Self {
        Self {
            storage,
            feeds,
            cache,
            alerts,
            tolerance_bands,
            fire_buffer_km,
        }
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// One attempt at one task for one field. Retrying is the caller's job.
    #[instrument(skip(self, field), fields(field_id = %field.id, task = %task))]
    pub async fn run_field(
        &self,
        field: &FieldRecord,
        task: TaskKind,
        force: bool,
    ) -> Result<(), FieldRunError> {
        match task {
            TaskKind::WeatherRefresh => self.refresh_weather(field, force).await,
            TaskKind::FireCheck => self.check_fire(field, force).await,
            TaskKind::HealthRefresh => self.refresh_health(field, force).await,
        }
    }

    /// Pulls the window's observations through the cache and persists
    /// whatever came back.
    async fn cached_window(
        &self,
        field: &FieldRecord,
        feed_type: FeedType,
        start: NaiveDate,
        end: NaiveDate,
        force: bool,
    ) -> Result<Vec<Observation>, FieldRunError> {
        let geometry = field.boundary.as_ref().ok_or(FieldRunError::NoBoundary)?;
        let client = self.feeds.get(feed_type).ok_or_else(|| {
            FieldRunError::Permanent(format!("no {feed_type} feed configured"))
        })?;

        let query = FeedQuery {
            field_id: field.id,
            geometry: geometry.clone(),
            start_date: start,
            end_date: end,
        };
        let fetched = match self
            .cache
            .get_or_fetch(field.id, feed_type, start, end, force, || {
                client.fetch(&query)
            })
            .await
        {
            Ok(observations) => observations,
            Err(FetchError::NotFound) => Vec::new(),
            Err(FetchError::Transient(message)) => {
                return Err(FieldRunError::Transient {
                    attempts: 1,
                    message,
                });
            }
            Err(FetchError::Permanent(message)) => {
                return Err(FieldRunError::Permanent(message));
            }
        };
        for obs in &fetched {
            self.storage
                .upsert_observation(obs)
                .await
                .map_err(storage_to_run_error)?;
        }
        Ok(fetched)
    }

    async fn refresh_weather(&self, field: &FieldRecord, force: bool) -> Result<(), FieldRunError> {
        let today = Utc::now().date_naive();
        let start = today - Duration::days(WEATHER_LOOKBACK_DAYS - 1);
        let weather = self
            .cached_window(field, FeedType::Weather, start, today, force)
            .await?;

        let band = self.band_for(field.crop_type);
        let stresses = assess_weather_stress(&weather, &band);
        for kind in [StressKind::Heat, StressKind::Frost, StressKind::HeavyRain] {
            let severe = stresses.iter().find(|s| s.kind == kind && s.severe);
            match severe {
                Some(stress) => {
                    self.alerts
                        .raise(AlertCondition {
                            field_id: field.id,
                            kind: AlertKind::Weather,
                            severity: AlertSeverity::Medium,
                            dedup_key: kind.dedup_key().to_string(),
                            title: format!("{} on {}", kind.title(), field.name),
                        })
                        .await
                        .map_err(storage_to_run_error)?;
                    warn!(
                        field_id = %field.id,
                        condition = kind.dedup_key(),
                        worst = stress.worst_value,
                        "severe weather stress detected"
                    );
                }
                None => {
                    self.alerts
                        .observe_clear(field.id, AlertKind::Weather, kind.dedup_key())
                        .await
                        .map_err(storage_to_run_error)?;
                }
            }
        }

        self.score_health(field, &weather, today).await
    }

    async fn refresh_health(&self, field: &FieldRecord, force: bool) -> Result<(), FieldRunError> {
        let today = Utc::now().date_naive();
        let veg_start = today - Duration::days(VEGETATION_LOOKBACK_DAYS);
        self.cached_window(field, FeedType::VegetationIndex, veg_start, today, force)
            .await?;

        let weather_start = today - Duration::days(WEATHER_LOOKBACK_DAYS - 1);
        let weather = self
            .storage
            .observations(field.id, FeedType::Weather, weather_start, today)
            .await
            .map_err(storage_to_run_error)?;
        self.score_health(field, &weather, today).await
    }

    /// Recomputes the health score from stored observations and walks the
    /// crop-health alert tiers.
    async fn score_health(
        &self,
        field: &FieldRecord,
        weather: &[Observation],
        as_of: NaiveDate,
    ) -> Result<(), FieldRunError> {
        let veg_start = as_of - Duration::days(VEGETATION_LOOKBACK_DAYS);
        let vegetation = self
            .storage
            .observations(field.id, FeedType::VegetationIndex, veg_start, as_of)
            .await
            .map_err(storage_to_run_error)?;

        let outcome = compute_health(
            &vegetation,
            weather,
            field.crop_type,
            &self.tolerance_bands,
            as_of,
        );
        let score = match &outcome {
            HealthOutcome::Scored(score) => score,
            HealthOutcome::InsufficientData => {
                info!(field_id = %field.id, "insufficient data for health score");
                counter!("fieldwatch_health_scores_total", "outcome" => "insufficient_data")
                    .increment(1);
                return Ok(());
            }
        };
        self.storage
            .upsert_health_score(score)
            .await
            .map_err(storage_to_run_error)?;
        counter!("fieldwatch_health_scores_total", "outcome" => "scored").increment(1);

        // The two health tiers are exclusive conditions: critical supersedes
        // poor rather than stacking a second alert on top of it.
        let (raise, clear) = match score.status {
            HealthStatus::Critical => (
                Some((HEALTH_CRITICAL_DEDUP_KEY, AlertSeverity::High)),
                vec![HEALTH_POOR_DEDUP_KEY],
            ),
            HealthStatus::Poor => (
                Some((HEALTH_POOR_DEDUP_KEY, AlertSeverity::Medium)),
                vec![HEALTH_CRITICAL_DEDUP_KEY],
            ),
            _ => (None, vec![HEALTH_POOR_DEDUP_KEY, HEALTH_CRITICAL_DEDUP_KEY]),
        };
        if let Some((dedup_key, severity)) = raise {
            self.alerts
                .raise(AlertCondition {
                    field_id: field.id,
                    kind: AlertKind::CropHealth,
                    severity,
                    dedup_key: dedup_key.to_string(),
                    title: format!("Crop health {} on {}", score.status, field.name),
                })
                .await
                .map_err(storage_to_run_error)?;
        }
        for dedup_key in clear {
            self.alerts
                .observe_clear(field.id, AlertKind::CropHealth, dedup_key)
                .await
                .map_err(storage_to_run_error)?;
        }
        Ok(())
    }

    async fn check_fire(&self, field: &FieldRecord, force: bool) -> Result<(), FieldRunError> {
        let today = Utc::now().date_naive();
        let fetch_start = today - Duration::days(FIRE_FETCH_DAYS - 1);
        self.cached_window(field, FeedType::Fire, fetch_start, today, force)
            .await?;

        let geometry = field.boundary.as_ref().ok_or(FieldRunError::NoBoundary)?;
        let history_start = today - Duration::days(FIRE_HISTORY_DAYS);
        let history = self
            .storage
            .observations(field.id, FeedType::Fire, history_start, today)
            .await
            .map_err(storage_to_run_error)?;

        let risk = compute_fire_risk(&history, field.id, geometry, self.fire_buffer_km, today);
        self.storage
            .upsert_fire_risk(&risk)
            .await
            .map_err(storage_to_run_error)?;

        let severity = match risk.risk_level {
            FireRiskLevel::Moderate => Some(AlertSeverity::Medium),
            FireRiskLevel::High => Some(AlertSeverity::High),
            FireRiskLevel::Extreme => Some(AlertSeverity::Critical),
            FireRiskLevel::None | FireRiskLevel::Low => None,
        };
        match severity {
            Some(severity) => {
                self.alerts
                    .raise(AlertCondition {
                        field_id: field.id,
                        kind: AlertKind::Fire,
                        severity,
                        dedup_key: FIRE_DEDUP_KEY.to_string(),
                        title: format!(
                            "{} fire hotspots within {:.1} km of {}",
                            risk.hotspot_count, self.fire_buffer_km, field.name
                        ),
                    })
                    .await
                    .map_err(storage_to_run_error)?;
            }
            None => {
                self.alerts
                    .observe_clear(field.id, AlertKind::Fire, FIRE_DEDUP_KEY)
                    .await
                    .map_err(storage_to_run_error)?;
            }
        }
        Ok(())
    }

    fn band_for(&self, crop_type: CropType) -> ToleranceBand {
        self.tolerance_bands
            .get(&crop_type)
            .or_else(|| self.tolerance_bands.get(&CropType::Other))
            .copied()
            .unwrap_or(ToleranceBand {
                temp_min_c: 5.0,
                temp_max_c: 33.0,
                max_daily_rain_mm: 50.0,
            })
    }
}

fn storage_to_run_error(err: StorageError) -> FieldRunError {
    FieldRunError::Permanent(err.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldFailure {
    pub field_id: Uuid,
    pub class: String,
    pub message: String,
}

/// Outcome of one batch. Every input field lands in exactly one bucket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<FieldFailure>,
    pub not_attempted: Vec<Uuid>,
}

pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    retry: RetryPolicy,
    concurrency: usize,
    batch_deadline: StdDuration,
}

impl BatchRunner {
    pub fn new(
        pipeline: Arc<Pipeline>,
        retry: RetryPolicy,
        concurrency: usize,
        batch_deadline: StdDuration,
    ) -> Self {
        Self {
            pipeline,
            retry,
            concurrency: concurrency.max(1),
            batch_deadline,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    #[instrument(skip(self, fields), fields(task = %task, field_count = fields.len()))]
    pub async fn run_batch(
        &self,
        fields: Vec<FieldRecord>,
        task: TaskKind,
        force: bool,
    ) -> BatchResult {
        let started = std::time::Instant::now();
        let deadline = tokio::time::Instant::now() + self.batch_deadline;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        let mut task_fields: HashMap<tokio::task::Id, Uuid> = HashMap::new();
        let mut result = BatchResult::default();

        let mut fields = fields.into_iter();
        while let Some(field) = fields.next() {
            let permit =
                match tokio::time::timeout_at(deadline, semaphore.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    // Deadline hit (or the semaphore closed): everything not
                    // yet started is reported, never dropped.
                    _ => {
                        result.not_attempted.push(field.id);
                        result.not_attempted.extend(fields.map(|f| f.id));
                        break;
                    }
                };
            let pipeline = self.pipeline.clone();
            let retry = self.retry;
            let field_id = field.id;
            let handle = join_set.spawn(async move {
                let _permit = permit;
                let outcome = run_with_retry(&pipeline, &field, task, force, &retry).await;
                (field_id, outcome)
            });
            task_fields.insert(handle.id(), field_id);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((_, (field_id, Ok(())))) => result.succeeded.push(field_id),
                Ok((_, (field_id, Err(err)))) => {
                    warn!(%field_id, class = err.class(), error = %err, "field run failed");
                    result.failed.push(FieldFailure {
                        field_id,
                        class: err.class().to_string(),
                        message: err.to_string(),
                    });
                }
                // A panicked task still lands its field in a bucket.
                Err(join_err) => {
                    error!(error = %join_err, "field task panicked");
                    if let Some(field_id) = task_fields.get(&join_err.id()).copied() {
                        result.failed.push(FieldFailure {
                            field_id,
                            class: "panic".to_string(),
                            message: join_err.to_string(),
                        });
                    }
                }
            }
        }

        counter!("fieldwatch_batch_fields_total", "task" => task.as_str(), "outcome" => "succeeded")
            .increment(result.succeeded.len() as u64);
        counter!("fieldwatch_batch_fields_total", "task" => task.as_str(), "outcome" => "failed")
            .increment(result.failed.len() as u64);
        counter!("fieldwatch_batch_fields_total", "task" => task.as_str(), "outcome" => "not_attempted")
            .increment(result.not_attempted.len() as u64);
        histogram!("fieldwatch_batch_duration_seconds", "task" => task.as_str())
            .record(started.elapsed().as_secs_f64());
        info!(
            task = %task,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            not_attempted = result.not_attempted.len(),
            "batch finished"
        );
        result
    }
}

async fn run_with_retry(
    pipeline: &Pipeline,
    field: &FieldRecord,
    task: TaskKind,
    force: bool,
    policy: &RetryPolicy,
) -> Result<(), FieldRunError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match pipeline.run_field(field, task, force).await {
            Ok(()) => return Ok(()),
            Err(FieldRunError::Transient { message, .. }) => {
                if attempts >= policy.max_attempts {
                    return Err(FieldRunError::Transient { attempts, message });
                }
                let delay = policy.backoff(attempts);
                histogram!("fieldwatch_retry_backoff_seconds").record(delay.as_secs_f64());
                warn!(
                    field_id = %field.id,
                    task = %task,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
