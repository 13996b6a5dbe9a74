use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discrete fire-risk ladder for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireRiskLevel {
    None,
    Low,
    Moderate,
    High,
    Extreme,
}

impl FireRiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FireRiskLevel::None => "none",
            FireRiskLevel::Low => "low",
            FireRiskLevel::Moderate => "moderate",
            FireRiskLevel::High => "high",
            FireRiskLevel::Extreme => "extreme",
        }
    }
}

impl std::fmt::Display for FireRiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-risk assessment for one field on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireRisk {
    pub field_id: Uuid,
    pub as_of_date: NaiveDate,
    pub hotspot_count: usize,
    pub nearest_distance_km: Option<f64>,
    pub risk_level: FireRiskLevel,
}
