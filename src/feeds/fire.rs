//! Active-fire hotspot client (FIRMS area CSV style API).

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use url::Url;

use crate::error::FetchError;
use crate::feeds::{FeedClient, FeedQuery};
use crate::geo::Point;
use crate::models::{FeedType, FireHotspot, Observation, ObservationPayload};

pub struct FirmsFireFeed {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    /// Satellite source segment of the path, e.g. "VIIRS_SNPP_NRT".
    satellite: String,
    /// Hotspots below this confidence are dropped during parsing.
    min_confidence: f64,
    /// Kilometres added around the field bounding box when querying.
    buffer_km: f64,
}

impl FirmsFireFeed {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        api_key: impl Into<String>,
        satellite: impl Into<String>,
        min_confidence: f64,
        buffer_km: f64,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key: api_key.into(),
            satellite: satellite.into(),
            min_confidence,
            buffer_km,
        }
    }
}

/// FIRMS reports VIIRS confidence as l/n/h and MODIS as a 0-100 number.
fn parse_confidence(raw: &str) -> Option<f64> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "l" | "low" => Some(30.0),
        "n" | "nominal" => Some(50.0),
        "h" | "high" => Some(80.0),
        other => other.parse().ok(),
    }
}

/// acq_time is HMM or HHMM without a separator.
fn parse_acq_time(raw: &str) -> Option<NaiveTime> {
    let t: u32 = raw.trim().parse().ok()?;
    NaiveTime::from_hms_opt(t / 100, t % 100, 0)
}

fn parse_csv(body: &str, min_confidence: f64) -> Result<Vec<(NaiveDate, FireHotspot)>, FetchError> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let index = |name: &str| {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| FetchError::Permanent(format!("fire feed: missing csv column {name}")))
    };

    let lat_i = index("latitude")?;
    let lon_i = index("longitude")?;
    let conf_i = index("confidence")?;
    let date_i = index("acq_date")?;
    let time_i = index("acq_time")?;
    // brightness and frp are informational; tolerate their absence.
    let bright_i = columns.iter().position(|c| *c == "brightness");
    let frp_i = columns.iter().position(|c| *c == "frp");

    let mut hotspots = Vec::new();
    for line in lines {
        let cells: Vec<&str> = line.split(',').collect();
        let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or("");

        let (Ok(lat), Ok(lon)) = (cell(lat_i).parse::<f64>(), cell(lon_i).parse::<f64>()) else {
            continue;
        };
        let Some(confidence) = parse_confidence(cell(conf_i)) else {
            continue;
        };
        if confidence < min_confidence {
            continue;
        }
        let Ok(date) = NaiveDate::parse_from_str(cell(date_i), "%Y-%m-%d") else {
            continue;
        };
        let time = parse_acq_time(cell(time_i)).unwrap_or(NaiveTime::MIN);

        hotspots.push((
            date,
            FireHotspot {
                location: Point::new(lon, lat),
                confidence,
                acquired_at: Utc.from_utc_datetime(&date.and_time(time)),
                brightness: bright_i.and_then(|i| cell(i).parse().ok()),
                frp: frp_i.and_then(|i| cell(i).parse().ok()),
            },
        ));
    }
    Ok(hotspots)
}

#[async_trait]
impl FeedClient for FirmsFireFeed {
    fn feed_type(&self) -> FeedType {
        FeedType::Fire
    }

    fn source(&self) -> &str {
        "firms"
    }

    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<Observation>, FetchError> {
        let bbox = query.geometry.bounding_box().expanded_km(self.buffer_km);
        let days = (query.end_date - query.start_date).num_days().clamp(0, 9) + 1;
        let path = format!(
            "api/area/csv/{}/{}/{:.4},{:.4},{:.4},{:.4}/{}",
            self.api_key,
            self.satellite,
            bbox.min_lon,
            bbox.min_lat,
            bbox.max_lon,
            bbox.max_lat,
            days,
        );
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| FetchError::Permanent(format!("bad fire base url: {e}")))?;

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(FetchError::from_status(status, "fire feed"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("fire feed: truncated body: {e}")))?;

        let observations = parse_csv(&body, self.min_confidence)?
            .into_iter()
            .filter(|(date, _)| *date >= query.start_date && *date <= query.end_date)
            .map(|(date, hotspot)| {
                Observation::new(
                    query.field_id,
                    date,
                    ObservationPayload::Fire(hotspot),
                    self.source(),
                )
            })
            .collect();
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
latitude,longitude,brightness,acq_date,acq_time,confidence,frp
45.1234,7.5678,330.5,2025-06-01,1342,82,12.4
45.2000,7.6000,310.0,2025-06-01,142,30,3.1
45.3000,7.7000,305.0,2025-06-02,0015,n,5.0
";

    #[test]
    fn parses_rows_and_filters_low_confidence() {
        let hotspots = parse_csv(CSV, 50.0).unwrap();
        assert_eq!(hotspots.len(), 2);

        let (date, first) = &hotspots[0];
        assert_eq!(*date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(first.location.lat, 45.1234);
        assert_eq!(first.confidence, 82.0);
        assert_eq!(first.brightness, Some(330.5));
        assert_eq!(first.acquired_at.format("%H:%M").to_string(), "13:42");

        // "n" maps to nominal confidence 50 and survives the filter.
        assert_eq!(hotspots[1].1.confidence, 50.0);
    }

    #[test]
    fn missing_required_column_is_permanent() {
        let err = parse_csv("latitude,longitude\n1,2\n", 0.0).unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[test]
    fn short_acq_time_parses() {
        assert_eq!(
            parse_acq_time("142"),
            NaiveTime::from_hms_opt(1, 42, 0)
        );
    }
}
