//! Fire-risk assessment from hotspot detections near a field boundary.

use chrono::{Days, NaiveDate};
use uuid::Uuid;

use crate::geo::Polygon;
use crate::models::{FireRisk, FireRiskLevel, Observation};

const CLOSE_KM: f64 = 2.0;
const CRITICAL_KM: f64 = 0.5;

/// Maps hotspots within `buffer_km` of the boundary onto the risk ladder.
///
/// Extreme requires detections within 500 m on at least two consecutive
/// days, which is why the caller passes the recent hotspot history rather
/// than a single day's batch.
pub fn compute_fire_risk(
    hotspots: &[Observation],
    field_id: Uuid,
    geometry: &Polygon,
    buffer_km: f64,
    as_of: NaiveDate,
) -> FireRisk {
    let mut relevant: Vec<(NaiveDate, f64)> = hotspots
        .iter()
        .filter_map(|o| o.fire_hotspot().map(|h| (o.observation_date, h)))
        .map(|(date, h)| (date, geometry.distance_to_boundary_km(&h.location)))
        .filter(|(_, km)| *km <= buffer_km)
        .collect();
    relevant.sort_by(|a, b| a.1.total_cmp(&b.1));

    let hotspot_count = relevant.len();
    let nearest_distance_km = relevant.first().map(|(_, km)| *km);

    let within_close = relevant.iter().filter(|(_, km)| *km <= CLOSE_KM).count();
    let mut critical_dates: Vec<NaiveDate> = relevant
        .iter()
        .filter(|(_, km)| *km <= CRITICAL_KM)
        .map(|(date, _)| *date)
        .collect();
    critical_dates.sort();
    critical_dates.dedup();
    let consecutive_critical = critical_dates
        .windows(2)
        .any(|pair| pair[0].checked_add_days(Days::new(1)) == Some(pair[1]));

    let risk_level = if consecutive_critical {
        FireRiskLevel::Extreme
    } else if !critical_dates.is_empty() {
        FireRiskLevel::High
    } else if within_close > 0 || hotspot_count >= 3 {
        FireRiskLevel::Moderate
    } else if hotspot_count > 0 {
        FireRiskLevel::Low
    } else {
        FireRiskLevel::None
    };

    FireRisk {
        field_id,
        as_of_date: as_of,
        hotspot_count,
        nearest_distance_km,
        risk_level,
    }
}
