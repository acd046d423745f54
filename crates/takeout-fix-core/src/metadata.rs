use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SidecarError;

/// A GPS fix from a sidecar. (0, 0) means "unknown" in Google's exports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl GeoPoint {
    /// A real location: not the (0, 0) placeholder and within range.
    pub fn is_real(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Fields extracted from one sidecar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedMetadata {
    /// photoTakenTime, epoch seconds (UTC)
    pub photo_taken: Option<i64>,
    /// creationTime, epoch seconds (UTC)
    pub created: Option<i64>,
    /// Only real (non-zero) locations are kept
    pub gps: Option<GeoPoint>,
    pub description: Option<String>,
}

impl ResolvedMetadata {
    /// Timestamp to apply to the file: photo taken, else creation.
    pub fn timestamp(&self) -> Option<i64> {
        self.photo_taken.or(self.created)
    }
}

/// Read and parse a sidecar file.
pub fn read_sidecar(path: &Path) -> Result<ResolvedMetadata, SidecarError> {
    let bytes = std::fs::read(path).map_err(|source| SidecarError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sidecar(&bytes).map_err(|source| SidecarError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse Google's JSON metadata. Malformed JSON is an error; missing or
/// oddly-typed fields just contribute nothing.
///
/// ```json
/// {
///   "title": "IMG_0001.jpg",
///   "description": "",
///   "creationTime":   { "timestamp": "1688277863", "formatted": "..." },
///   "photoTakenTime": { "timestamp": "1476983598", "formatted": "..." },
///   "geoData":     { "latitude": 0.0, "longitude": 0.0, "altitude": 0.0 },
///   "geoDataExif": { "latitude": 0.0, "longitude": 0.0, "altitude": 0.0 }
/// }
/// ```
pub fn parse_sidecar(json_bytes: &[u8]) -> Result<ResolvedMetadata, serde_json::Error> {
    let data: Value = serde_json::from_slice(json_bytes)?;

    let gps = geo_point(&data["geoData"])
        .filter(GeoPoint::is_real)
        .or_else(|| geo_point(&data["geoDataExif"]).filter(GeoPoint::is_real));

    let description = data["description"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ResolvedMetadata {
        photo_taken: epoch(&data["photoTakenTime"]["timestamp"]),
        created: epoch(&data["creationTime"]["timestamp"]),
        gps,
        description,
    })
}

/// Google writes epochs as strings; accept plain integers too.
fn epoch(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn geo_point(value: &Value) -> Option<GeoPoint> {
    Some(GeoPoint {
        latitude: value["latitude"].as_f64()?,
        longitude: value["longitude"].as_f64()?,
        altitude: value["altitude"].as_f64().filter(|a| *a != 0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sidecar() {
        let json = br#"{
            "title": "vacation.jpg",
            "description": "  Golden Gate  ",
            "creationTime": {"timestamp": "1688277863", "formatted": "2023-07-02 06:04:23 UTC"},
            "photoTakenTime": {"timestamp": "1609459200", "formatted": "2021-01-01 00:00:00 UTC"},
            "geoData": {"latitude": 37.7749, "longitude": -122.4194, "altitude": 12.5}
        }"#;
        let meta = parse_sidecar(json).unwrap();
        assert_eq!(meta.photo_taken, Some(1609459200));
        assert_eq!(meta.created, Some(1688277863));
        assert_eq!(meta.timestamp(), Some(1609459200));
        assert_eq!(meta.description.as_deref(), Some("Golden Gate"));
        let gps = meta.gps.unwrap();
        assert_eq!(gps.latitude, 37.7749);
        assert_eq!(gps.longitude, -122.4194);
        assert_eq!(gps.altitude, Some(12.5));
    }

    #[test]
    fn test_integer_epoch_and_creation_fallback() {
        let meta = parse_sidecar(br#"{"photoTakenTime": {"timestamp": 1609459200}}"#).unwrap();
        assert_eq!(meta.photo_taken, Some(1609459200));

        let meta = parse_sidecar(br#"{"creationTime": {"timestamp": "42"}}"#).unwrap();
        assert_eq!(meta.photo_taken, None);
        assert_eq!(meta.timestamp(), Some(42));
    }

    #[test]
    fn test_zero_gps_is_absent() {
        let meta = parse_sidecar(
            br#"{"geoData": {"latitude": 0.0, "longitude": 0.0},
                 "geoDataExif": {"latitude": 48.85, "longitude": 2.35}}"#,
        )
        .unwrap();
        assert_eq!(meta.gps.map(|g| g.latitude), Some(48.85));

        let meta = parse_sidecar(br#"{"geoData": {"latitude": 0.0, "longitude": 0.0}}"#).unwrap();
        assert!(meta.gps.is_none());
    }

    #[test]
    fn test_missing_and_odd_fields_degrade() {
        let meta = parse_sidecar(br#"{"photoTakenTime": "yesterday", "description": ""}"#).unwrap();
        assert_eq!(meta, ResolvedMetadata::default());
        let meta = parse_sidecar(b"[]").unwrap();
        assert_eq!(meta, ResolvedMetadata::default());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(parse_sidecar(b"{ not json").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg.json");
        std::fs::write(&path, "{\"photoTakenTime\": ").unwrap();
        assert!(matches!(read_sidecar(&path), Err(SidecarError::Json { .. })));
        assert!(matches!(
            read_sidecar(&dir.path().join("missing.json")),
            Err(SidecarError::Io { .. })
        ));
    }
}
