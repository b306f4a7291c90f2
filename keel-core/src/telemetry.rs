//! Vessel telemetry records
//!
//! Telemetry reaches the engine pre-parsed. [`read_csv`] covers the common
//! case of a logger export with one row per fix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::error::{KeelError, Result};

/// Mean Earth radius in nautical miles
const EARTH_RADIUS_NM: f64 = 3440.065;

/// One position fix from the vessel's logger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Knots
    pub speed_over_ground: f64,
    /// Knots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_over_water: Option<f64>,
    /// Degrees true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_rpm: Option<f64>,
    /// Gallons per hour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_flow_gph: Option<f64>,
}

impl TelemetryRecord {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, speed_over_ground: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            speed_over_ground,
            speed_over_water: None,
            heading: None,
            engine_rpm: None,
            fuel_flow_gph: None,
        }
    }

    pub fn with_fuel_flow(mut self, gph: f64) -> Self {
        self.fuel_flow_gph = Some(gph);
        self
    }

    pub fn with_speed_over_water(mut self, knots: f64) -> Self {
        self.speed_over_water = Some(knots);
        self
    }

    /// Name of the first field holding a non-finite or out-of-range value
    pub fn invalid_field(&self) -> Option<&'static str> {
        let optional = |v: Option<f64>| v.is_some_and(|v| !v.is_finite());

        if !self.latitude.is_finite() || self.latitude.abs() > 90.0 {
            Some("latitude")
        } else if !self.longitude.is_finite() || self.longitude.abs() > 180.0 {
            Some("longitude")
        } else if !self.speed_over_ground.is_finite() || self.speed_over_ground < 0.0 {
            Some("speed_over_ground")
        } else if optional(self.speed_over_water) {
            Some("speed_over_water")
        } else if optional(self.heading) {
            Some("heading")
        } else if optional(self.engine_rpm) {
            Some("engine_rpm")
        } else if optional(self.fuel_flow_gph) || self.fuel_flow_gph.is_some_and(|v| v < 0.0) {
            Some("fuel_flow_gph")
        } else {
            None
        }
    }

    /// Great-circle distance to another fix, nautical miles
    pub fn distance_nm(&self, other: &TelemetryRecord) -> f64 {
        haversine_nm(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Great-circle distance between two coordinates, nautical miles
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_NM * a.sqrt().clamp(0.0, 1.0).asin()
}

/// Read telemetry from CSV with a header row.
///
/// Required columns: `timestamp` (RFC 3339), `latitude`, `longitude`,
/// `speed_over_ground`. Optional: `speed_over_water`, `heading`,
/// `engine_rpm`, `fuel_flow_gph`.
///
/// # Errors
///
/// Returns [`KeelError::InvalidInput`] naming the offending row.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<TelemetryRecord>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    reader
        .deserialize::<TelemetryRecord>()
        .enumerate()
        .map(|(idx, row)| {
            row.map_err(|e: csv::Error| {
                KeelError::InvalidInput(format!("telemetry row {}: {}", idx + 2, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_nm(45.0, -61.0, 46.0, -61.0);
        assert!((d - 60.04).abs() < 0.1, "got {}", d);
        assert_eq!(haversine_nm(45.0, -61.0, 45.0, -61.0), 0.0);
    }

    #[test]
    fn test_invalid_field_detection() {
        let ts = Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(TelemetryRecord::new(ts, 45.8, -61.0, 10.0).invalid_field(), None);
        assert_eq!(
            TelemetryRecord::new(ts, f64::NAN, -61.0, 10.0).invalid_field(),
            Some("latitude")
        );
        assert_eq!(
            TelemetryRecord::new(ts, 45.8, -61.0, f64::INFINITY).invalid_field(),
            Some("speed_over_ground")
        );
        assert_eq!(
            TelemetryRecord::new(ts, 45.8, -61.0, 3.0)
                .with_fuel_flow(f64::NAN)
                .invalid_field(),
            Some("fuel_flow_gph")
        );
    }

    #[test]
    fn test_read_csv_with_optional_columns() {
        let data = "\
timestamp,latitude,longitude,speed_over_ground,fuel_flow_gph
2023-06-01T08:00:00Z,45.80,-61.00,0.0,0.5
2023-06-01T09:00:00Z,45.85,-61.02,12.5,
";
        let records = read_csv(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fuel_flow_gph, Some(0.5));
        assert_eq!(records[1].fuel_flow_gph, None);
        assert_eq!(records[1].speed_over_ground, 12.5);
    }

    #[test]
    fn test_read_csv_reports_row() {
        let data = "timestamp,latitude,longitude,speed_over_ground\nnot-a-date,1,2,3\n";
        let err = read_csv(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 2"), "{}", err);
    }
}
