//! Satellite vegetation-index client (MODIS subset style API).

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::feeds::{FeedClient, FeedQuery};
use crate::models::{FeedType, Observation, ObservationPayload, VegetationIndexSample};

const NDVI_BAND: &str = "250m_16_days_NDVI";

/// Raw MODIS NDVI is an integer scaled by 10000; -3000 marks no data.
const NDVI_SCALE: f64 = 10_000.0;
const NDVI_FILL: f64 = -3000.0;

pub struct ModisVegetationFeed {
    http: reqwest::Client,
    base_url: Url,
    product: String,
}

#[derive(Debug, Deserialize)]
struct SubsetResponse {
    subset: Vec<SubsetEntry>,
}

#[derive(Debug, Deserialize)]
struct SubsetEntry {
    calendar_date: String,
    band: String,
    data: Vec<f64>,
}

impl ModisVegetationFeed {
    pub fn new(http: reqwest::Client, base_url: Url, product: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            product: product.into(),
        }
    }

    fn endpoint(&self) -> Result<Url, FetchError> {
        self.base_url
            .join(&format!("{}/subset", self.product))
            .map_err(|e| FetchError::Permanent(format!("bad vegetation base url: {e}")))
    }
}

/// MODIS composite date: "A" + year + day-of-year.
fn modis_date(date: NaiveDate) -> String {
    format!("A{}{:03}", date.year(), date.ordinal())
}

/// Mean of the valid pixels in a subset tile, scaled to [-1, 1].
fn mean_ndvi(data: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = data.iter().copied().filter(|v| *v != NDVI_FILL).collect();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64 / NDVI_SCALE)
}

#[async_trait]
impl FeedClient for ModisVegetationFeed {
    fn feed_type(&self) -> FeedType {
        FeedType::VegetationIndex
    }

    fn source(&self) -> &str {
        "modis_subset"
    }

    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<Observation>, FetchError> {
        let centroid = query.geometry.centroid();
        let url = self.endpoint()?;

        let response = self
            .http
            .get(url)
            .query(&[
                ("latitude", centroid.lat.to_string()),
                ("longitude", centroid.lon.to_string()),
                ("band", NDVI_BAND.to_string()),
                ("startDate", modis_date(query.start_date)),
                ("endDate", modis_date(query.end_date)),
                ("kmAboveBelow", "0".to_string()),
                ("kmLeftRight", "0".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(FetchError::from_status(status, "vegetation feed"));
        }

        let body: SubsetResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("vegetation feed: unparseable body: {e}")))?;

        let mut observations = Vec::new();
        for entry in &body.subset {
            if entry.band != NDVI_BAND {
                continue;
            }
            let Ok(date) = NaiveDate::parse_from_str(&entry.calendar_date, "%Y-%m-%d") else {
                continue;
            };
            let Some(ndvi) = mean_ndvi(&entry.data) else {
                continue;
            };
            observations.push(Observation::new(
                query.field_id,
                date,
                ObservationPayload::VegetationIndex(VegetationIndexSample {
                    ndvi,
                    evi: None,
                    quality: None,
                    product: self.product.clone(),
                }),
                self.source(),
            ));
        }
        Ok(observations)
    }
}
