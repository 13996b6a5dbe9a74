//! Core domain types shared across feeds, scoring, alerting and storage.

mod alert;
mod field;
mod fire;
mod health;
mod observation;

pub use alert::{Alert, AlertEvent, AlertKind, AlertSeverity, AlertTransition};
pub use field::{CropType, FieldRecord};
pub use fire::{FireRisk, FireRiskLevel};
pub use health::{HealthOutcome, HealthScore, HealthStatus, ScoreBasis};
pub use observation::{
    FeedType, FireHotspot, Observation, ObservationPayload, VegetationIndexSample, WeatherDaily,
};
