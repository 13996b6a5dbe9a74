//! Lightweight geodesic helpers for field boundaries.
//!
//! Distances are computed with the haversine formula for point-to-point
//! checks and a local equirectangular projection for point-to-edge distance.
//! Accuracy is well within what a kilometre-scale fire buffer needs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeoError {
    #[error("polygon requires at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("coordinate out of range: lon={lon}, lat={lat}")]
    CoordinateOutOfRange { lon: f64, lat: f64 },
}

/// Longitude/latitude pair in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_valid(&self) -> bool {
        (-180.0..=180.0).contains(&self.lon) && (-90.0..=90.0).contains(&self.lat)
    }

    /// Great-circle distance to another point in kilometres.
    pub fn haversine_km(&self, other: &Point) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Axis-aligned bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Grow the box by `km` on every side, converting kilometres to degrees
    /// at the box's central latitude.
    pub fn expanded_km(&self, km: f64) -> BoundingBox {
        let mid_lat = (self.min_lat + self.max_lat) / 2.0;
        let lat_deg = km / 111.0;
        let lon_deg = km / (111.0 * mid_lat.to_radians().cos().abs().max(0.01));
        BoundingBox {
            min_lon: (self.min_lon - lon_deg).max(-180.0),
            min_lat: (self.min_lat - lat_deg).max(-90.0),
            max_lon: (self.max_lon + lon_deg).min(180.0),
            max_lat: (self.max_lat + lat_deg).min(90.0),
        }
    }
}

/// Simple closed polygon (single exterior ring, no holes).
///
/// Vertices are stored without the closing duplicate; edges wrap around from
/// the last vertex back to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(mut vertices: Vec<Point>) -> Result<Self, GeoError> {
        // Drop an explicit closing vertex if the ring repeats its start.
        if vertices.len() > 3 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(GeoError::TooFewVertices(vertices.len()));
        }
        if let Some(bad) = vertices.iter().find(|v| !v.is_valid()) {
            return Err(GeoError::CoordinateOutOfRange {
                lon: bad.lon,
                lat: bad.lat,
            });
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn centroid(&self) -> Point {
        let n = self.vertices.len() as f64;
        let (lon, lat) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(lon, lat), v| (lon + v.lon, lat + v.lat));
        Point::new(lon / n, lat / n)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::MAX,
            min_lat: f64::MAX,
            max_lon: f64::MIN,
            max_lat: f64::MIN,
        };
        for v in &self.vertices {
            bbox.min_lon = bbox.min_lon.min(v.lon);
            bbox.min_lat = bbox.min_lat.min(v.lat);
            bbox.max_lon = bbox.max_lon.max(v.lon);
            bbox.max_lat = bbox.max_lat.max(v.lat);
        }
        bbox
    }

    /// Ray-casting point-in-polygon test in plain lon/lat space.
    pub fn contains(&self, point: &Point) -> bool {
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let vi = &self.vertices[i];
            let vj = &self.vertices[j];
            if (vi.lat > point.lat) != (vj.lat > point.lat) {
                let intersect_lon =
                    vj.lon + (point.lat - vj.lat) / (vi.lat - vj.lat) * (vi.lon - vj.lon);
                if point.lon < intersect_lon {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Distance from `point` to the polygon boundary in kilometres.
    ///
    /// Points inside the polygon report 0. Outside points report the minimum
    /// distance to any edge, measured in a local equirectangular projection
    /// centred on the point.
    pub fn distance_to_boundary_km(&self, point: &Point) -> f64 {
        if self.contains(point) {
            return 0.0;
        }

        let cos_lat = point.lat.to_radians().cos().abs().max(0.01);
        let project = |p: &Point| -> (f64, f64) {
            (
                (p.lon - point.lon) * 111.0 * cos_lat,
                (p.lat - point.lat) * 111.0,
            )
        };

        let n = self.vertices.len();
        let mut min_km = f64::MAX;
        for i in 0..n {
            let a = project(&self.vertices[i]);
            let b = project(&self.vertices[(i + 1) % n]);
            min_km = min_km.min(point_to_segment_km(a, b));
        }
        min_km
    }
}

impl TryFrom<Vec<Point>> for Polygon {
    type Error = GeoError;

    fn try_from(vertices: Vec<Point>) -> Result<Self, Self::Error> {
        Polygon::new(vertices)
    }
}

impl From<Polygon> for Vec<Point> {
    fn from(polygon: Polygon) -> Self {
        polygon.vertices
    }
}

/// Distance from the origin to segment `ab` in projected kilometre space.
fn point_to_segment_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (ax, ay) = a;
    let (bx, by) = b;
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        ((-ax * dx - ay * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Polygon {
        Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_degenerate_rings() {
        let err = Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).unwrap_err();
        assert_eq!(err, GeoError::TooFewVertices(2));
    }

    #[test]
    fn drops_closing_vertex() {
        let polygon = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 0.0),
        ])
        .unwrap();
        assert_eq!(polygon.vertices().len(), 3);
    }

    #[test]
    fn contains_interior_point() {
        let polygon = unit_square();
        assert!(polygon.contains(&Point::new(0.5, 0.5)));
        assert!(!polygon.contains(&Point::new(1.5, 0.5)));
    }

    #[test]
    fn interior_point_has_zero_boundary_distance() {
        let polygon = unit_square();
        assert_eq!(polygon.distance_to_boundary_km(&Point::new(0.5, 0.5)), 0.0);
    }

    #[test]
    fn exterior_distance_is_roughly_planar() {
        let polygon = unit_square();
        // 0.1 degrees of latitude east of the right edge, ~11.1 km.
        let d = polygon.distance_to_boundary_km(&Point::new(1.1, 0.5));
        assert!((d - 11.1).abs() < 0.5, "distance was {d}");
    }

    #[test]
    fn haversine_equator_degree() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(1.0, 0.0);
        let d = a.haversine_km(&b);
        assert!((d - 111.19).abs() < 0.5, "distance was {d}");
    }

    #[test]
    fn bbox_expansion_grows_all_sides() {
        let bbox = unit_square().bounding_box();
        let grown = bbox.expanded_km(111.0);
        assert!(grown.min_lat < bbox.min_lat - 0.9);
        assert!(grown.max_lat > bbox.max_lat + 0.9);
        assert!(grown.min_lon < bbox.min_lon);
        assert!(grown.max_lon > bbox.max_lon);
    }
}
