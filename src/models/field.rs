use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Polygon;

/// Crop grown on a field. Drives the tolerance bands used by health scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropType {
    Wheat,
    Corn,
    Rice,
    Soybean,
    Cotton,
    Barley,
    Potato,
    Tomato,
    Other,
}

impl CropType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CropType::Wheat => "wheat",
            CropType::Corn => "corn",
            CropType::Rice => "rice",
            CropType::Soybean => "soybean",
            CropType::Cotton => "cotton",
            CropType::Barley => "barley",
            CropType::Potato => "potato",
            CropType::Tomato => "tomato",
            CropType::Other => "other",
        }
    }
}

impl std::fmt::Display for CropType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only field roster entry supplied by the record-keeping layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: Uuid,
    pub name: String,
    /// Fields registered without a drawn boundary cannot be processed and
    /// are reported as `no_boundary` by the runner.
    #[serde(default)]
    pub boundary: Option<Polygon>,
    pub crop_type: CropType,
    #[serde(default)]
    pub planting_date: Option<NaiveDate>,
    pub active: bool,
}
