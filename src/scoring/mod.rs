//! Pure scoring functions: observations in, indicators out.
//!
//! Nothing in here performs IO; the runner feeds cached observations in and
//! persists whatever comes out.

mod fire;
mod health;

pub use fire::compute_fire_risk;
pub use health::{
    StressKind, ToleranceBand, WeatherStress, assess_weather_stress, compute_health,
    default_tolerance_bands,
};
