//! Daily point weather client (NASA POWER style API).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::feeds::{FeedClient, FeedQuery};
use crate::models::{FeedType, Observation, ObservationPayload, WeatherDaily};

const PARAMETERS: &str = "T2M,T2M_MAX,T2M_MIN,RH2M,PRECTOTCORR,WS2M,ALLSKY_SFC_SW_DWN";

/// Upstream "no data" sentinel.
const MISSING: f64 = -999.0;

pub struct PowerWeatherFeed {
    http: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct PowerResponse {
    properties: PowerProperties,
}

#[derive(Debug, Deserialize)]
struct PowerProperties {
    /// Parameter name -> (YYYYMMDD -> value).
    parameter: HashMap<String, BTreeMap<String, f64>>,
}

impl PowerWeatherFeed {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    fn endpoint(&self) -> Result<Url, FetchError> {
        self.base_url
            .join("api/temporal/daily/point")
            .map_err(|e| FetchError::Permanent(format!("bad weather base url: {e}")))
    }
}

fn clean(value: Option<&f64>) -> Option<f64> {
    match value {
        Some(v) if *v != MISSING => Some(*v),
        _ => None,
    }
}

/// Some archive products report 2m temperature in Kelvin. Anything above
/// 200 cannot be a plausible Celsius reading, so normalize it.
fn to_celsius(value: Option<f64>) -> Option<f64> {
    value.map(|v| if v > 200.0 { v - 273.15 } else { v })
}

#[async_trait]
impl FeedClient for PowerWeatherFeed {
    fn feed_type(&self) -> FeedType {
        FeedType::Weather
    }

    fn source(&self) -> &str {
        "nasa_power"
    }

    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<Observation>, FetchError> {
        let centroid = query.geometry.centroid();
        let url = self.endpoint()?;

        let response = self
            .http
            .get(url)
            .query(&[
                ("parameters", PARAMETERS.to_string()),
                ("community", "AG".to_string()),
                ("format", "JSON".to_string()),
                ("longitude", centroid.lon.to_string()),
                ("latitude", centroid.lat.to_string()),
                ("start", query.start_date.format("%Y%m%d").to_string()),
                ("end", query.end_date.format("%Y%m%d").to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(FetchError::from_status(status, "weather feed"));
        }

        let body: PowerResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("weather feed: unparseable body: {e}")))?;
        let params = &body.properties.parameter;

        // Every parameter series is keyed by the same dates; use T2M as the
        // date spine and tolerate series that are missing entirely.
        let empty = BTreeMap::new();
        let spine = params.get("T2M").unwrap_or(&empty);
        let series = |name: &str, date_key: &str| clean(params.get(name).and_then(|s| s.get(date_key)));

        let mut observations = Vec::new();
        for date_key in spine.keys() {
            let Ok(date) = NaiveDate::parse_from_str(date_key, "%Y%m%d") else {
                continue;
            };
            if date < query.start_date || date > query.end_date {
                continue;
            }

            let daily = WeatherDaily {
                temp_min_c: to_celsius(series("T2M_MIN", date_key)),
                temp_max_c: to_celsius(series("T2M_MAX", date_key)),
                temp_avg_c: to_celsius(series("T2M", date_key)),
                precipitation_mm: series("PRECTOTCORR", date_key),
                relative_humidity_pct: series("RH2M", date_key),
                wind_speed_ms: series("WS2M", date_key),
                solar_radiation_mj: series("ALLSKY_SFC_SW_DWN", date_key),
            };
            observations.push(Observation::new(
                query.field_id,
                date,
                ObservationPayload::Weather(daily),
                self.source(),
            ));
        }
        Ok(observations)
    }
}
