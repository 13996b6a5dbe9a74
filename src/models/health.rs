use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discrete health bucket derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    /// Bucket boundaries: >=90 excellent, 75-89 good, 60-74 fair,
    /// 40-59 poor, below 40 critical.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Excellent
        } else if score >= 75.0 {
            HealthStatus::Good
        } else if score >= 60.0 {
            HealthStatus::Fair
        } else if score >= 40.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
            HealthStatus::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which observation classes contributed to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBasis {
    VegetationAndWeather,
    WeatherOnly,
}

/// Persisted health score for one field on one date. History is retained;
/// a recomputation upserts by (field_id, as_of_date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub field_id: Uuid,
    pub as_of_date: NaiveDate,
    pub score: f64,
    pub status: HealthStatus,
    pub basis: ScoreBasis,
    pub contributing_observation_ids: Vec<Uuid>,
}

/// Result of a health computation. Too little data is a normal outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthOutcome {
    Scored(HealthScore),
    InsufficientData,
}

impl HealthOutcome {
    pub fn scored(&self) -> Option<&HealthScore> {
        match self {
            HealthOutcome::Scored(s) => Some(s),
            HealthOutcome::InsufficientData => None,
        }
    }
}
