//! Crop health scoring from vegetation and weather observations.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{
    CropType, HealthOutcome, HealthScore, HealthStatus, Observation, ScoreBasis, WeatherDaily,
};

/// Starting score for a weather-only estimate, before penalties. Used only
/// when the weather actually breaches the tolerance band; in-band weather
/// without a vegetation sample says nothing about the crop.
const WEATHER_ONLY_BASELINE: f64 = 70.0;

/// Penalty per degree Celsius outside the temperature band.
const TEMP_PENALTY_PER_DEG: f64 = 3.0;
/// Penalty per millimetre of rain above the daily tolerance.
const RAIN_PENALTY_PER_MM: f64 = 0.5;

const TEMP_PENALTY_CAP: f64 = 30.0;
const RAIN_PENALTY_CAP: f64 = 20.0;

/// Degrees beyond the band at which a temperature breach counts as severe.
const SEVERE_TEMP_MARGIN_C: f64 = 5.0;

/// Crop-specific weather tolerance. Values outside the band deduct from the
/// health score and, in the severe range, raise weather alerts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBand {
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub max_daily_rain_mm: f64,
}

/// Built-in bands; overridable through configuration.
pub fn default_tolerance_bands() -> HashMap<CropType, ToleranceBand> {
    let band = |temp_min_c, temp_max_c, max_daily_rain_mm| ToleranceBand {
        temp_min_c,
        temp_max_c,
        max_daily_rain_mm,
    };
    HashMap::from([
        (CropType::Wheat, band(3.0, 32.0, 40.0)),
        (CropType::Corn, band(8.0, 35.0, 50.0)),
        (CropType::Rice, band(12.0, 38.0, 80.0)),
        (CropType::Soybean, band(8.0, 34.0, 50.0)),
        (CropType::Cotton, band(12.0, 38.0, 40.0)),
        (CropType::Barley, band(2.0, 30.0, 40.0)),
        (CropType::Potato, band(4.0, 28.0, 45.0)),
        (CropType::Tomato, band(8.0, 32.0, 40.0)),
        (CropType::Other, band(5.0, 33.0, 50.0)),
    ])
}

/// One day's penalty for weather outside the band, capped per factor.
fn day_penalty(day: &WeatherDaily, band: &ToleranceBand) -> f64 {
    let mut penalty = 0.0;
    if let Some(tmax) = day.temp_max_c {
        penalty += ((tmax - band.temp_max_c).max(0.0) * TEMP_PENALTY_PER_DEG).min(TEMP_PENALTY_CAP);
    }
    if let Some(tmin) = day.temp_min_c {
        penalty += ((band.temp_min_c - tmin).max(0.0) * TEMP_PENALTY_PER_DEG).min(TEMP_PENALTY_CAP);
    }
    if let Some(rain) = day.precipitation_mm {
        penalty +=
            ((rain - band.max_daily_rain_mm).max(0.0) * RAIN_PENALTY_PER_MM).min(RAIN_PENALTY_CAP);
    }
    penalty
}

/// Average weather-stress penalty across the observed days.
fn weather_penalty(weather: &[&WeatherDaily], band: &ToleranceBand) -> f64 {
    if weather.is_empty() {
        return 0.0;
    }
    weather.iter().map(|d| day_penalty(d, band)).sum::<f64>() / weather.len() as f64
}

/// Computes a 0-100 health score for one field.
///
/// The vegetation term maps NDVI from [-1, 1] onto [0, 100]; NDVI at or
/// below zero means water or bare ground and clips the term to zero. The
/// weather penalty is deducted from that term. Without any vegetation sample
/// the score degrades to a weather-only estimate from a fixed baseline, but
/// only when the weather breached the tolerance band; in-band weather alone
/// carries no crop signal, so the outcome is `InsufficientData` rather than
/// a fabricated score.
pub fn compute_health(
    vegetation: &[Observation],
    weather: &[Observation],
    crop_type: CropType,
    bands: &HashMap<CropType, ToleranceBand>,
    as_of: NaiveDate,
) -> HealthOutcome {
    let latest_sample = vegetation
        .iter()
        .filter(|o| o.vegetation().is_some())
        .max_by_key(|o| o.observation_date);
    let weather_days: Vec<(&Observation, &WeatherDaily)> = weather
        .iter()
        .filter_map(|o| o.weather().map(|w| (o, w)))
        .collect();

    let band = bands
        .get(&crop_type)
        .or_else(|| bands.get(&CropType::Other))
        .copied()
        .unwrap_or(ToleranceBand {
            temp_min_c: 5.0,
            temp_max_c: 33.0,
            max_daily_rain_mm: 50.0,
        });
    let days: Vec<&WeatherDaily> = weather_days.iter().map(|(_, w)| *w).collect();
    let penalty = weather_penalty(&days, &band);

    let (base, basis, mut contributing) = match latest_sample {
        Some(obs) => {
            // Filter above guarantees the payload is a vegetation sample.
            let ndvi = obs.vegetation().map(|v| v.ndvi).unwrap_or(0.0);
            let term = if ndvi <= 0.0 {
                0.0
            } else {
                (ndvi + 1.0) / 2.0 * 100.0
            };
            (term, ScoreBasis::VegetationAndWeather, vec![obs.id])
        }
        // Weather-only estimates need an out-of-band signal to stand on.
        None if penalty > 0.0 => (WEATHER_ONLY_BASELINE, ScoreBasis::WeatherOnly, Vec::new()),
        None => return HealthOutcome::InsufficientData,
    };
    contributing.extend(weather_days.iter().map(|(o, _)| o.id));

    let score = (base - penalty).clamp(0.0, 100.0);
    HealthOutcome::Scored(HealthScore {
        field_id: latest_sample
            .map(|o| o.field_id)
            .or_else(|| weather_days.first().map(|(o, _)| o.field_id))
            .unwrap_or_default(),
        as_of_date: as_of,
        score,
        status: HealthStatus::from_score(score),
        basis,
        contributing_observation_ids: contributing,
    })
}

/// A weather condition worth alerting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StressKind {
    Heat,
    Frost,
    HeavyRain,
}

impl StressKind {
    /// Stable alert dedup key for the condition.
    pub fn dedup_key(&self) -> &'static str {
        match self {
            StressKind::Heat => "heat_stress",
            StressKind::Frost => "frost_risk",
            StressKind::HeavyRain => "heavy_rain",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StressKind::Heat => "Heat stress",
            StressKind::Frost => "Frost risk",
            StressKind::HeavyRain => "Heavy rainfall",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherStress {
    pub kind: StressKind,
    /// Severe breaches raise alerts; mild ones only affect the score.
    pub severe: bool,
    pub worst_value: f64,
}

/// Scans the weather window for out-of-band conditions, keeping the worst
/// reading per condition.
pub fn assess_weather_stress(weather: &[Observation], band: &ToleranceBand) -> Vec<WeatherStress> {
    let mut heat: Option<f64> = None;
    let mut frost: Option<f64> = None;
    let mut rain: Option<f64> = None;

    for day in weather.iter().filter_map(|o| o.weather()) {
        if let Some(tmax) = day.temp_max_c {
            if tmax > band.temp_max_c {
                heat = Some(heat.map_or(tmax, |h: f64| h.max(tmax)));
            }
        }
        if let Some(tmin) = day.temp_min_c {
            if tmin < band.temp_min_c {
                frost = Some(frost.map_or(tmin, |f: f64| f.min(tmin)));
            }
        }
        if let Some(mm) = day.precipitation_mm {
            if mm > band.max_daily_rain_mm {
                rain = Some(rain.map_or(mm, |r: f64| r.max(mm)));
            }
        }
    }

    let mut stresses = Vec::new();
    if let Some(worst) = heat {
        stresses.push(WeatherStress {
            kind: StressKind::Heat,
            severe: worst >= band.temp_max_c + SEVERE_TEMP_MARGIN_C,
            worst_value: worst,
        });
    }
    if let Some(worst) = frost {
        stresses.push(WeatherStress {
            kind: StressKind::Frost,
            severe: worst <= band.temp_min_c - SEVERE_TEMP_MARGIN_C,
            worst_value: worst,
        });
    }
    if let Some(worst) = rain {
        stresses.push(WeatherStress {
            kind: StressKind::HeavyRain,
            severe: worst >= band.max_daily_rain_mm * 2.0,
            worst_value: worst,
        });
    }
    stresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObservationPayload, VegetationIndexSample};
    use uuid::Uuid;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn ndvi_obs(field_id: Uuid, ndvi: f64) -> Observation {
        Observation::new(
            field_id,
            as_of(),
            ObservationPayload::VegetationIndex(VegetationIndexSample {
                ndvi,
                evi: None,
                quality: None,
                product: "MOD13Q1".into(),
            }),
            "modis",
        )
    }

    fn weather_obs(field_id: Uuid, day: WeatherDaily) -> Observation {
        Observation::new(field_id, as_of(), ObservationPayload::Weather(day), "power")
    }

    fn mild_day() -> WeatherDaily {
        WeatherDaily {
            temp_min_c: Some(14.0),
            temp_max_c: Some(26.0),
            precipitation_mm: Some(2.0),
            ..Default::default()
        }
    }

    #[test]
    fn healthy_ndvi_without_penalty_scores_91() {
        let field_id = Uuid::new_v4();
        let bands = default_tolerance_bands();
        let outcome = compute_health(
            &[ndvi_obs(field_id, 0.82)],
            &[weather_obs(field_id, mild_day())],
            CropType::Wheat,
            &bands,
            as_of(),
        );
        let score = outcome.scored().unwrap();
        assert!((score.score - 91.0).abs() < 1e-9, "score was {}", score.score);
        assert_eq!(score.status, HealthStatus::Excellent);
        assert_eq!(score.basis, ScoreBasis::VegetationAndWeather);
        assert_eq!(score.contributing_observation_ids.len(), 2);
    }

    #[test]
    fn non_positive_ndvi_clips_vegetation_term_to_zero() {
        let field_id = Uuid::new_v4();
        let bands = default_tolerance_bands();
        let outcome = compute_health(
            &[ndvi_obs(field_id, -0.2)],
            &[],
            CropType::Wheat,
            &bands,
            as_of(),
        );
        let score = outcome.scored().unwrap();
        assert_eq!(score.score, 0.0);
        assert_eq!(score.status, HealthStatus::Critical);
    }

    #[test]
    fn heat_above_band_deducts_from_score() {
        let field_id = Uuid::new_v4();
        let bands = default_tolerance_bands();
        // Wheat tolerates up to 32C; 36C is a 4-degree breach, 12 points.
        let hot = WeatherDaily {
            temp_max_c: Some(36.0),
            ..mild_day()
        };
        let outcome = compute_health(
            &[ndvi_obs(field_id, 0.82)],
            &[weather_obs(field_id, hot)],
            CropType::Wheat,
            &bands,
            as_of(),
        );
        let score = outcome.scored().unwrap();
        assert!((score.score - 79.0).abs() < 1e-9, "score was {}", score.score);
        assert_eq!(score.status, HealthStatus::Good);
    }

    #[test]
    fn no_vegetation_with_stressed_weather_scores_weather_only() {
        let field_id = Uuid::new_v4();
        let bands = default_tolerance_bands();
        // Corn tolerates up to 35C; 39C is a 4-degree breach, 12 points off
        // the baseline.
        let hot = WeatherDaily {
            temp_max_c: Some(39.0),
            ..mild_day()
        };
        let weather = weather_obs(field_id, hot);
        let weather_id = weather.id;
        let outcome = compute_health(&[], &[weather], CropType::Corn, &bands, as_of());
        let score = outcome.scored().unwrap();
        assert!((score.score - 58.0).abs() < 1e-9, "score was {}", score.score);
        assert_eq!(score.basis, ScoreBasis::WeatherOnly);
        assert_eq!(score.contributing_observation_ids, vec![weather_id]);
    }

    #[test]
    fn no_vegetation_with_in_band_weather_is_insufficient_data() {
        let field_id = Uuid::new_v4();
        let bands = default_tolerance_bands();
        let outcome = compute_health(
            &[],
            &[weather_obs(field_id, mild_day())],
            CropType::Corn,
            &bands,
            as_of(),
        );
        assert_eq!(outcome, HealthOutcome::InsufficientData);
    }

    #[test]
    fn zero_observations_is_insufficient_data() {
        let bands = default_tolerance_bands();
        let outcome = compute_health(&[], &[], CropType::Wheat, &bands, as_of());
        assert_eq!(outcome, HealthOutcome::InsufficientData);
    }

    #[test]
    fn latest_vegetation_sample_wins() {
        let field_id = Uuid::new_v4();
        let bands = default_tolerance_bands();
        let mut old = ndvi_obs(field_id, 0.2);
        old.observation_date = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap();
        let recent = ndvi_obs(field_id, 0.82);
        let outcome = compute_health(
            &[old, recent],
            &[],
            CropType::Wheat,
            &bands,
            as_of(),
        );
        assert!((outcome.scored().unwrap().score - 91.0).abs() < 1e-9);
    }

    #[test]
    fn stress_assessment_flags_severe_heat() {
        let field_id = Uuid::new_v4();
        let band = default_tolerance_bands()[&CropType::Wheat];
        let scorcher = WeatherDaily {
            temp_max_c: Some(38.5),
            ..mild_day()
        };
        let stresses = assess_weather_stress(&[weather_obs(field_id, scorcher)], &band);
        assert_eq!(stresses.len(), 1);
        assert_eq!(stresses[0].kind, StressKind::Heat);
        assert!(stresses[0].severe);
        assert_eq!(stresses[0].worst_value, 38.5);
    }

    #[test]
    fn in_band_weather_produces_no_stress() {
        let field_id = Uuid::new_v4();
        let band = default_tolerance_bands()[&CropType::Wheat];
        let stresses = assess_weather_stress(&[weather_obs(field_id, mild_day())], &band);
        assert!(stresses.is_empty());
    }
}
