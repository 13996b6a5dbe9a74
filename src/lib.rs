//! Fieldwatch: per-field Earth-observation ingestion, scoring and alerting.
//!
//! The pipeline pulls daily weather, satellite vegetation-index samples and
//! active-fire detections for every registered field, derives a crop health
//! score and a fire-risk level, and manages threshold alerts through a
//! create/reaffirm/resolve lifecycle. Recurring runs come from the
//! background scheduler; the axum surface triggers the same tasks on demand.

pub mod alerts;
pub mod cache;
pub mod config;
pub mod error;
pub mod feeds;
pub mod geo;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod runner;
pub mod scoring;
pub mod server;
pub mod storage;

use std::sync::Arc;

use crate::alerts::{AlertEngine, AlertSink, NullSink, WebhookNotifier};
use crate::cache::ObservationCache;
use crate::config::AppConfig;
use crate::feeds::{FeedRegistry, FirmsFireFeed, ModisVegetationFeed, PowerWeatherFeed};
use crate::runner::{BatchRunner, Pipeline};
use crate::storage::SharedStorage;

/// Wires feeds, cache, alert engine and runner from configuration.
pub fn build_runner(config: &AppConfig, storage: SharedStorage) -> anyhow::Result<Arc<BatchRunner>> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;

    let mut feeds = FeedRegistry::new();
    feeds.register(Arc::new(PowerWeatherFeed::new(
        http.clone(),
        config.weather_base_url.clone(),
    )));
    feeds.register(Arc::new(ModisVegetationFeed::new(
        http.clone(),
        config.vegetation_base_url.clone(),
        config.modis_product.clone(),
    )));
    feeds.register(Arc::new(FirmsFireFeed::new(
        http.clone(),
        config.fire_base_url.clone(),
        config.firms_api_key.clone(),
        config.firms_source.clone(),
        config.min_hotspot_confidence,
        config.fire_buffer_km,
    )));

    let sink: Box<dyn AlertSink> = match &config.alert_webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(
            http,
            url.clone(),
            config.alert_webhook_attempts,
        )),
        None => Box::new(NullSink),
    };
    let alerts = Arc::new(AlertEngine::new(
        storage.clone(),
        sink,
        config.debounce_policy(),
    ));

    let pipeline = Arc::new(Pipeline::new(
        storage,
        feeds,
        Arc::new(ObservationCache::new(config.cache_windows())),
        alerts,
        config.tolerance_bands(),
        config.fire_buffer_km,
    ));
    Ok(Arc::new(BatchRunner::new(
        pipeline,
        config.retry_policy(),
        config.concurrency_limit,
        config.batch_deadline(),
    )))
}
