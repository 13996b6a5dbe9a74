use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Point;

/// The three external feed classes the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedType {
    Weather,
    VegetationIndex,
    Fire,
}

impl FeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Weather => "weather",
            FeedType::VegetationIndex => "vegetation_index",
            FeedType::Fire => "fire",
        }
    }
}

impl std::fmt::Display for FeedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily aggregate weather for a field centroid. Any value may be missing
/// when the upstream reports a gap.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherDaily {
    pub temp_min_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub temp_avg_c: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub relative_humidity_pct: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub solar_radiation_mj: Option<f64>,
}

/// Single vegetation-index sample over a field geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationIndexSample {
    /// Normalized difference vegetation index, already scaled to [-1, 1].
    pub ndvi: f64,
    pub evi: Option<f64>,
    pub quality: Option<String>,
    pub product: String,
}

/// Active-fire detection near a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireHotspot {
    pub location: Point,
    /// Detection confidence, 0-100.
    pub confidence: f64,
    pub acquired_at: DateTime<Utc>,
    pub brightness: Option<f64>,
    pub frp: Option<f64>,
}

/// Feed-specific observation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationPayload {
    Weather(WeatherDaily),
    VegetationIndex(VegetationIndexSample),
    Fire(FireHotspot),
}

impl ObservationPayload {
    pub fn feed_type(&self) -> FeedType {
        match self {
            ObservationPayload::Weather(_) => FeedType::Weather,
            ObservationPayload::VegetationIndex(_) => FeedType::VegetationIndex,
            ObservationPayload::Fire(_) => FeedType::Fire,
        }
    }
}

/// Normalized observation as returned by a feed client. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub field_id: Uuid,
    pub feed_type: FeedType,
    pub observation_date: NaiveDate,
    pub payload: ObservationPayload,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

impl Observation {
    /// Builds an observation, deriving `feed_type` from the payload so the
    /// two can never disagree.
    pub fn new(
        field_id: Uuid,
        observation_date: NaiveDate,
        payload: ObservationPayload,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            field_id,
            feed_type: payload.feed_type(),
            observation_date,
            payload,
            fetched_at: Utc::now(),
            source: source.into(),
        }
    }

    pub fn weather(&self) -> Option<&WeatherDaily> {
        match &self.payload {
            ObservationPayload::Weather(w) => Some(w),
            _ => None,
        }
    }

    pub fn vegetation(&self) -> Option<&VegetationIndexSample> {
        match &self.payload {
            ObservationPayload::VegetationIndex(v) => Some(v),
            _ => None,
        }
    }

    pub fn fire_hotspot(&self) -> Option<&FireHotspot> {
        match &self.payload {
            ObservationPayload::Fire(h) => Some(h),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_type_follows_payload() {
        let obs = Observation::new(
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            ObservationPayload::VegetationIndex(VegetationIndexSample {
                ndvi: 0.6,
                evi: None,
                quality: None,
                product: "MOD13Q1".into(),
            }),
            "modis",
        );
        assert_eq!(obs.feed_type, FeedType::VegetationIndex);
        assert!(obs.vegetation().is_some());
        assert!(obs.weather().is_none());
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = ObservationPayload::Weather(WeatherDaily {
            temp_max_c: Some(31.2),
            ..Default::default()
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "weather");
        assert_eq!(json["temp_max_c"], 31.2);
    }
}
