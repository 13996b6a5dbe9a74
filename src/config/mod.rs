//! Typed application configuration.
//!
//! Values come from `FIELDWATCH_*` environment variables layered over `.env`
//! files (dotenvy). Every knob has a default, so a bare environment yields a
//! runnable config pointed at the public feed endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::json;
use thiserror::Error;
use url::Url;

use crate::alerts::DebouncePolicy;
use crate::cache::CacheWindows;
use crate::models::CropType;
use crate::runner::{RetryPolicy, TaskCadences};
use crate::scoring::{ToleranceBand, default_tolerance_bands};

const ENV_PREFIX: &str = "FIELDWATCH_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub log_json: bool,

    pub weather_base_url: Url,
    pub vegetation_base_url: Url,
    pub fire_base_url: Url,
    pub modis_product: String,
    pub firms_source: String,
    pub firms_api_key: String,
    pub min_hotspot_confidence: f64,
    pub fire_buffer_km: f64,

    pub weather_cache_hours: i64,
    pub vegetation_cache_days: i64,
    pub fire_cache_hours: i64,

    pub retry_max_attempts: u32,
    pub retry_base_seconds: f64,
    pub retry_max_seconds: f64,
    pub retry_jitter_factor: f64,

    pub concurrency_limit: usize,
    pub batch_deadline_seconds: u64,
    pub request_timeout_seconds: u64,

    pub scheduler_tick_seconds: u64,
    pub weather_cadence_hours: u64,
    pub fire_cadence_hours: u64,
    pub health_cadence_hours: u64,

    pub weather_clear_cycles: u32,
    pub health_clear_cycles: u32,
    pub fire_clear_hours: i64,

    pub alert_webhook_url: Option<Url>,
    pub alert_webhook_attempts: u32,

    /// JSON object mapping crop type to tolerance band, merged over the
    /// built-in defaults.
    pub tolerance_band_overrides: HashMap<CropType, ToleranceBand>,
}

fn parsed<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Loads `.env` (if present) and builds the config from the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        let tolerance_band_overrides = match get("TOLERANCE_BANDS") {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    key: format!("{ENV_PREFIX}TOLERANCE_BANDS"),
                    message: e.to_string(),
                })?
            }
            None => HashMap::new(),
        };
        let alert_webhook_url = match get("ALERT_WEBHOOK_URL") {
            Some(raw) => Some(raw.parse().map_err(|e: url::ParseError| ConfigError::Invalid {
                key: format!("{ENV_PREFIX}ALERT_WEBHOOK_URL"),
                message: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            bind_addr: parsed(
                "BIND_ADDR",
                get("BIND_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json: parsed("LOG_JSON", get("LOG_JSON"), true)?,

            weather_base_url: parsed_url(
                "WEATHER_BASE_URL",
                get("WEATHER_BASE_URL"),
                "https://power.larc.nasa.gov/",
            )?,
            vegetation_base_url: parsed_url(
                "VEGETATION_BASE_URL",
                get("VEGETATION_BASE_URL"),
                "https://modis.ornl.gov/rst/api/v1/",
            )?,
            fire_base_url: parsed_url(
                "FIRE_BASE_URL",
                get("FIRE_BASE_URL"),
                "https://firms.modaps.eosdis.nasa.gov/",
            )?,
            modis_product: get("MODIS_PRODUCT").unwrap_or_else(|| "MOD13Q1".to_string()),
            firms_source: get("FIRMS_SOURCE").unwrap_or_else(|| "VIIRS_SNPP_NRT".to_string()),
            firms_api_key: get("FIRMS_API_KEY").unwrap_or_default(),
            min_hotspot_confidence: parsed(
                "MIN_HOTSPOT_CONFIDENCE",
                get("MIN_HOTSPOT_CONFIDENCE"),
                50.0,
            )?,
            fire_buffer_km: parsed("FIRE_BUFFER_KM", get("FIRE_BUFFER_KM"), 5.0)?,

            weather_cache_hours: parsed("WEATHER_CACHE_HOURS", get("WEATHER_CACHE_HOURS"), 24)?,
            vegetation_cache_days: parsed(
                "VEGETATION_CACHE_DAYS",
                get("VEGETATION_CACHE_DAYS"),
                7,
            )?,
            fire_cache_hours: parsed("FIRE_CACHE_HOURS", get("FIRE_CACHE_HOURS"), 3)?,

            retry_max_attempts: parsed("RETRY_MAX_ATTEMPTS", get("RETRY_MAX_ATTEMPTS"), 3)?,
            retry_base_seconds: parsed("RETRY_BASE_SECONDS", get("RETRY_BASE_SECONDS"), 1.0)?,
            retry_max_seconds: parsed("RETRY_MAX_SECONDS", get("RETRY_MAX_SECONDS"), 60.0)?,
            retry_jitter_factor: parsed("RETRY_JITTER_FACTOR", get("RETRY_JITTER_FACTOR"), 0.2)?,

            concurrency_limit: parsed("CONCURRENCY_LIMIT", get("CONCURRENCY_LIMIT"), 8)?,
            batch_deadline_seconds: parsed(
                "BATCH_DEADLINE_SECONDS",
                get("BATCH_DEADLINE_SECONDS"),
                600,
            )?,
            request_timeout_seconds: parsed(
                "REQUEST_TIMEOUT_SECONDS",
                get("REQUEST_TIMEOUT_SECONDS"),
                30,
            )?,

            scheduler_tick_seconds: parsed(
                "SCHEDULER_TICK_SECONDS",
                get("SCHEDULER_TICK_SECONDS"),
                60,
            )?,
            weather_cadence_hours: parsed(
                "WEATHER_CADENCE_HOURS",
                get("WEATHER_CADENCE_HOURS"),
                24,
            )?,
            fire_cadence_hours: parsed("FIRE_CADENCE_HOURS", get("FIRE_CADENCE_HOURS"), 24)?,
            health_cadence_hours: parsed(
                "HEALTH_CADENCE_HOURS",
                get("HEALTH_CADENCE_HOURS"),
                168,
            )?,

            weather_clear_cycles: parsed(
                "WEATHER_CLEAR_CYCLES",
                get("WEATHER_CLEAR_CYCLES"),
                1,
            )?,
            health_clear_cycles: parsed("HEALTH_CLEAR_CYCLES", get("HEALTH_CLEAR_CYCLES"), 2)?,
            fire_clear_hours: parsed("FIRE_CLEAR_HOURS", get("FIRE_CLEAR_HOURS"), 24)?,

            alert_webhook_url,
            alert_webhook_attempts: parsed(
                "ALERT_WEBHOOK_ATTEMPTS",
                get("ALERT_WEBHOOK_ATTEMPTS"),
                3,
            )?,

            tolerance_band_overrides,
        })
    }

    pub fn cache_windows(&self) -> CacheWindows {
        CacheWindows {
            weather: Duration::hours(self.weather_cache_hours),
            vegetation: Duration::days(self.vegetation_cache_days),
            fire: Duration::hours(self.fire_cache_hours),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_seconds: self.retry_base_seconds,
            max_seconds: self.retry_max_seconds,
            jitter_factor: self.retry_jitter_factor,
        }
    }

    pub fn debounce_policy(&self) -> DebouncePolicy {
        DebouncePolicy {
            weather_clear_cycles: self.weather_clear_cycles,
            health_clear_cycles: self.health_clear_cycles,
            fire_clear_after: Duration::hours(self.fire_clear_hours),
        }
    }

    pub fn task_cadences(&self) -> TaskCadences {
        TaskCadences {
            weather: StdDuration::from_secs(self.weather_cadence_hours * 3600),
            fire: StdDuration::from_secs(self.fire_cadence_hours * 3600),
            health: StdDuration::from_secs(self.health_cadence_hours * 3600),
        }
    }

    pub fn batch_deadline(&self) -> StdDuration {
        StdDuration::from_secs(self.batch_deadline_seconds)
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_seconds)
    }

    pub fn scheduler_tick(&self) -> StdDuration {
        StdDuration::from_secs(self.scheduler_tick_seconds)
    }

    /// Built-in bands with any configured overrides applied on top.
    pub fn tolerance_bands(&self) -> HashMap<CropType, ToleranceBand> {
        let mut bands = default_tolerance_bands();
        for (crop, band) in &self.tolerance_band_overrides {
            bands.insert(*crop, *band);
        }
        bands
    }

    /// Loggable dump; the feed API key never appears in it.
    pub fn redacted_json(&self) -> serde_json::Value {
        json!({
            "bind_addr": self.bind_addr.to_string(),
            "log_level": self.log_level,
            "weather_base_url": self.weather_base_url.as_str(),
            "vegetation_base_url": self.vegetation_base_url.as_str(),
            "fire_base_url": self.fire_base_url.as_str(),
            "modis_product": self.modis_product,
            "firms_source": self.firms_source,
            "firms_api_key": if self.firms_api_key.is_empty() { "(unset)" } else { "***" },
            "min_hotspot_confidence": self.min_hotspot_confidence,
            "fire_buffer_km": self.fire_buffer_km,
            "concurrency_limit": self.concurrency_limit,
            "batch_deadline_seconds": self.batch_deadline_seconds,
            "request_timeout_seconds": self.request_timeout_seconds,
            "scheduler_tick_seconds": self.scheduler_tick_seconds,
            "alert_webhook_url": self.alert_webhook_url.as_ref().map(Url::as_str),
        })
    }
}

fn parsed_url(key: &str, raw: Option<String>, default: &str) -> Result<Url, ConfigError> {
    let raw = raw.unwrap_or_else(|| default.to_string());
    raw.parse().map_err(|e: url::ParseError| ConfigError::Invalid {
        key: format!("{ENV_PREFIX}{key}"),
        message: e.to_string(),
    })
}
