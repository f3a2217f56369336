//! Location sample normalization.
//!
//! Raw fixes arrive from the provider with string timestamps, optional sensor
//! fields and plenty of duplicates (the background geolocation SDK re-delivers
//! buffered points after a resume). Normalization parses, validates, dedupes
//! and sorts them. Anything malformed is dropped, never surfaced as an error.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimelineError};
use crate::segments::SegmentConfig;
use crate::GpsPoint;

/// A location fix as delivered by the samples provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLocationSample {
    /// RFC 3339 timestamp
    pub recorded_at: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
}

/// A validated location fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: Option<f64>,
    /// Device-reported speed in m/s
    pub speed_mps: Option<f64>,
    /// Device-reported heading in degrees
    pub heading_deg: Option<f64>,
}

impl LocationSample {
    /// Create a sample with no optional sensor fields.
    pub fn new(recorded_at: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            recorded_at,
            latitude,
            longitude,
            accuracy_m: None,
            speed_mps: None,
            heading_deg: None,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Validate and convert a raw fix.
    ///
    /// Optional fields that are negative or not finite are treated as absent.
    pub fn try_from_raw(raw: &RawLocationSample) -> Result<Self> {
        let recorded_at = parse_timestamp(&raw.recorded_at)?;

        let point = GpsPoint::new(raw.latitude, raw.longitude);
        if !point.is_valid() {
            return Err(TimelineError::InvalidCoordinates {
                latitude: raw.latitude,
                longitude: raw.longitude,
            });
        }

        Ok(Self {
            recorded_at,
            latitude: raw.latitude,
            longitude: raw.longitude,
            accuracy_m: non_negative(raw.accuracy_m),
            speed_mps: non_negative(raw.speed_mps),
            heading_deg: non_negative(raw.heading_deg).map(|h| h % 360.0),
        })
    }

    /// Composite identity used for deduplication.
    fn dedup_key(&self) -> SampleKey {
        SampleKey {
            second: self.recorded_at.timestamp(),
            lat_e5: (self.latitude * 1e5).round() as i64,
            lng_e5: (self.longitude * 1e5).round() as i64,
            accuracy_dm: self.accuracy_m.map(|a| (a * 10.0).round() as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SampleKey {
    second: i64,
    lat_e5: i64,
    lng_e5: i64,
    accuracy_dm: Option<i64>,
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimelineError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

fn non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse, validate, dedupe and sort raw samples.
///
/// Samples whose accuracy radius exceeds `config.max_sample_accuracy_m` are
/// dropped along with malformed ones.
pub fn normalize_samples(raw: &[RawLocationSample], config: &SegmentConfig) -> Vec<LocationSample> {
    let mut seen: HashSet<SampleKey> = HashSet::with_capacity(raw.len());
    let mut dropped_invalid = 0usize;
    let mut dropped_inaccurate = 0usize;

    let mut samples: Vec<LocationSample> = raw
        .iter()
        .filter_map(|r| match LocationSample::try_from_raw(r) {
            Ok(s) => Some(s),
            Err(e) => {
                debug!("[Samples] Dropping sample: {}", e);
                dropped_invalid += 1;
                None
            }
        })
        .filter(|s| match s.accuracy_m {
            Some(acc) if acc > config.max_sample_accuracy_m => {
                dropped_inaccurate += 1;
                false
            }
            _ => true,
        })
        .filter(|s| seen.insert(s.dedup_key()))
        .collect();

    samples.sort_by_key(|s| s.recorded_at);

    info!(
        "[Samples] Normalized {} of {} samples ({} invalid, {} inaccurate, {} duplicates)",
        samples.len(),
        raw.len(),
        dropped_invalid,
        dropped_inaccurate,
        raw.len() - samples.len() - dropped_invalid - dropped_inaccurate
    );

    samples
}

/// Keep only samples recorded in `[start, end)`.
pub fn clip_to_window(
    samples: &[LocationSample],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<LocationSample> {
    samples
        .iter()
        .filter(|s| s.recorded_at >= start && s.recorded_at < end)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ts: &str, lat: f64, lng: f64, acc: Option<f64>) -> RawLocationSample {
        RawLocationSample {
            recorded_at: ts.to_string(),
            latitude: lat,
            longitude: lng,
            accuracy_m: acc,
            speed_mps: None,
            heading_deg: None,
        }
    }

    #[test]
    fn test_try_from_raw_rejects_bad_timestamp() {
        let r = raw("not-a-time", 10.0, 10.0, None);
        assert!(matches!(
            LocationSample::try_from_raw(&r),
            Err(TimelineError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_try_from_raw_rejects_bad_coordinates() {
        let r = raw("2024-03-01T10:00:00Z", 95.0, 10.0, None);
        assert!(matches!(
            LocationSample::try_from_raw(&r),
            Err(TimelineError::InvalidCoordinates { .. })
        ));
        let r = raw("2024-03-01T10:00:00Z", f64::NAN, 10.0, None);
        assert!(LocationSample::try_from_raw(&r).is_err());
    }

    #[test]
    fn test_try_from_raw_drops_bad_optionals() {
        let mut r = raw("2024-03-01T10:00:00+02:00", 10.0, 10.0, Some(-5.0));
        r.speed_mps = Some(f64::INFINITY);
        r.heading_deg = Some(370.0);
        let s = LocationSample::try_from_raw(&r).unwrap();
        assert_eq!(s.accuracy_m, None);
        assert_eq!(s.speed_mps, None);
        assert_eq!(s.heading_deg, Some(10.0));
        assert_eq!(s.recorded_at.to_rfc3339(), "2024-03-01T08:00:00+00:00");
    }

    #[test]
    fn test_normalize_dedupes_and_sorts() {
        let input = vec![
            raw("2024-03-01T10:05:00Z", 40.0, -74.0, Some(10.0)),
            raw("2024-03-01T10:00:00Z", 40.0, -74.0, Some(10.0)),
            // Same second, same rounded position, same accuracy: duplicate
            raw("2024-03-01T10:00:00.400Z", 40.000001, -74.000001, Some(10.02)),
            // Different accuracy: kept
            raw("2024-03-01T10:00:00Z", 40.0, -74.0, Some(25.0)),
            raw("garbage", 40.0, -74.0, None),
        ];
        let out = normalize_samples(&input, &SegmentConfig::default());
        assert_eq!(out.len(), 3);
        assert!(out.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    }

    #[test]
    fn test_normalize_drops_inaccurate() {
        let input = vec![
            raw("2024-03-01T10:00:00Z", 40.0, -74.0, Some(5000.0)),
            raw("2024-03-01T10:01:00Z", 40.0, -74.0, Some(15.0)),
        ];
        let out = normalize_samples(&input, &SegmentConfig::default());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_samples(&[], &SegmentConfig::default()).is_empty());
    }

    #[test]
    fn test_clip_to_window() {
        let input = vec![
            raw("2024-03-01T23:59:00Z", 40.0, -74.0, None),
            raw("2024-03-02T00:00:00Z", 40.0, -74.0, None),
            raw("2024-03-02T12:00:00Z", 40.0, -74.0, None),
            raw("2024-03-03T00:00:00Z", 40.0, -74.0, None),
        ];
        let samples = normalize_samples(&input, &SegmentConfig::default());
        let start = parse_timestamp("2024-03-02T00:00:00Z").unwrap();
        let end = parse_timestamp("2024-03-03T00:00:00Z").unwrap();
        assert_eq!(clip_to_window(&samples, start, end).len(), 2);
    }
}
