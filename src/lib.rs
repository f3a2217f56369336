//! # Life Timeline
//!
//! Turns a day of passive signals into an editable timeline.
//!
//! This library provides:
//! - Segmentation of noisy, irregular GPS fixes into stays and commutes
//! - "Same place" matching with an explainable [`place_match::MatchReason`]
//! - Location blocks with app usage, carry-forward over data gaps, and
//!   same-place merging
//! - Reconciliation of generated blocks with the user's own events
//!
//! ## Features
//!
//! - **`parallel`** - Build many days at once with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use life_timeline::{build_day_timeline, DayInput, RawLocationSample, TimelineConfig};
//!
//! let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
//! let mut input = DayInput::new(start, start + Duration::days(1));
//!
//! // Two hours of fixes at one spot
//! input.samples = (0..12)
//!     .map(|i| RawLocationSample {
//!         recorded_at: (start + Duration::minutes(8 * 60 + i * 10)).to_rfc3339(),
//!         latitude: 40.7128,
//!         longitude: -74.0060,
//!         accuracy_m: Some(15.0),
//!         speed_mps: None,
//!         heading_deg: None,
//!     })
//!     .collect();
//!
//! let timeline = build_day_timeline(&input, &TimelineConfig::default());
//! assert_eq!(timeline.location_blocks.len(), 1);
//! println!("{}", timeline.location_blocks[0].location_label);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TimelineError};

// Geographic utilities (distance, geohash, centroid)
pub mod geo_utils;

// Algorithm toolbox - modular access to the individual stages
// Use life_timeline::algorithms::{...} for standalone access
pub mod algorithms;

// Sample parsing, validation and dedup
pub mod samples;
pub use samples::{normalize_samples, LocationSample, RawLocationSample};

// Walking / cycling / driving classification
pub mod movement;
pub use movement::{classify_movement, MovementConfig, MovementType};

// Saved and inferred places
pub mod places;
pub use places::{InferredPlace, PlaceDirectory, PlaceType, UserPlace};

// Same-place predicate chain
pub mod place_match;
pub use place_match::{is_same_block_location, is_same_place, MatchReason};

// Segment generation and merging
pub mod segments;
pub use segments::{generate_segments, merge_segments, ActivitySegment, InferredActivity, SegmentConfig};

// Screen-time sessions and coalescing
pub mod screen_time;
pub use screen_time::{coalesce_sessions, RawScreenTimeSession, ScreenTimeSession, ScreenTimeWindow};

// Location blocks, gap filling and consecutive merge
pub mod blocks;
pub use blocks::{
    build_blocks_from_segments, build_blocks_from_summaries, carry_forward_labels, fill_gaps,
    merge_consecutive_blocks, BlockType, GapFillConfig, HourlySummary, LocationBlock,
};

// Review timeline reconciliation
pub mod reconcile;
pub use reconcile::{
    reconcile_time_blocks, BlockSource, EventCategory, ReconcileConfig, ScheduledEvent, TimeBlock,
    Workout,
};

// End-to-end day pipeline
pub mod pipeline;
#[cfg(feature = "parallel")]
pub use pipeline::build_timelines_parallel;
pub use pipeline::{build_day_timeline, DayInput, DayTimeline};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use life_timeline::GpsPoint;
/// let point = GpsPoint::new(40.7128, -74.0060); // New York
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Configuration for the whole day pipeline.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Segment generation and merging thresholds
    pub segment: SegmentConfig,

    /// Speed bands for commute classification
    pub movement: MovementConfig,

    /// Two locations closer than this are the same place.
    /// Default: 200.0 meters
    pub place_match_radius_m: f64,

    /// Carry-forward over data gaps
    pub gap_fill: GapFillConfig,

    /// Review timeline candidates
    pub reconcile: ReconcileConfig,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            segment: SegmentConfig::default(),
            movement: MovementConfig::default(),
            place_match_radius_m: 200.0,
            gap_fill: GapFillConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl TimelineConfig {
    /// Parse a JSON config and validate it. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segment;
        positive(seg.stationary_radius_m, "segment.stationary_radius_m")?;
        positive(self.place_match_radius_m, "place_match_radius_m")?;
        positive(seg.max_sample_accuracy_m, "segment.max_sample_accuracy_m")?;
        if !seg.min_commute_distance_m.is_finite() || seg.min_commute_distance_m < 0.0 {
            return Err(config_error("segment.min_commute_distance_m must be finite and >= 0"));
        }
        duration(seg.min_segment_duration_secs, "segment.min_segment_duration_secs")?;
        duration(seg.max_stationary_gap_secs, "segment.max_stationary_gap_secs")?;
        duration(seg.max_commute_gap_secs, "segment.max_commute_gap_secs")?;
        duration(seg.segment_merge_gap_secs, "segment.segment_merge_gap_secs")?;

        let mv = &self.movement;
        positive(mv.walking_max_speed_mps, "movement.walking_max_speed_mps")?;
        let order = mv
            .walking_max_speed_mps
            .partial_cmp(&mv.cycling_max_speed_mps)
            .ok_or_config("movement speeds must be comparable")?;
        if order != std::cmp::Ordering::Less {
            return Err(config_error(
                "movement.walking_max_speed_mps must be below cycling_max_speed_mps",
            ));
        }

        let gf = &self.gap_fill;
        duration(gf.max_gap_secs, "gap_fill.max_gap_secs")?;
        duration(gf.pre_travel_buffer_secs, "gap_fill.pre_travel_buffer_secs")?;
        if gf.min_gap_secs < 0 || gf.min_gap_secs > gf.max_gap_secs {
            return Err(config_error("gap_fill.min_gap_secs must be in [0, max_gap_secs]"));
        }
        if !(gf.confidence_decay > 0.0 && gf.confidence_decay <= 1.0) {
            return Err(config_error("gap_fill.confidence_decay must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&gf.confidence_floor) {
            return Err(config_error("gap_fill.confidence_floor must be in [0, 1]"));
        }

        let rc = &self.reconcile;
        duration(rc.screen_time_gap_secs, "reconcile.screen_time_gap_secs")?;
        duration(rc.min_screen_block_secs, "reconcile.min_screen_block_secs")?;
        Ok(())
    }
}

/// Upper bound on every duration setting: one week.
const MAX_DURATION_SECS: i64 = 7 * 24 * 3600;

fn duration(value: i64, name: &str) -> Result<()> {
    if (0..=MAX_DURATION_SECS).contains(&value) {
        Ok(())
    } else {
        Err(config_error(&format!(
            "{} must be between 0 and {} seconds",
            name, MAX_DURATION_SECS
        )))
    }
}

fn positive(value: f64, name: &str) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(config_error(&format!("{} must be finite and > 0", name)))
    }
}

fn config_error(message: &str) -> TimelineError {
    TimelineError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validity() {
        assert!(GpsPoint::new(51.5074, -0.1278).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = TimelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.place_match_radius_m, 200.0);
        assert_eq!(config.gap_fill.max_gap_secs, 16 * 3600);
        assert_eq!(config.reconcile.screen_time_gap_secs, 900);
    }

    #[test]
    fn test_from_json_partial() {
        let config = TimelineConfig::from_json(
            r#"{"place_match_radius_m": 150.0, "gap_fill": {"confidence_decay": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(config.place_match_radius_m, 150.0);
        assert_eq!(config.gap_fill.confidence_decay, 0.5);
        assert_eq!(config.gap_fill.confidence_floor, 0.3);
        assert_eq!(config.segment, SegmentConfig::default());
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            TimelineConfig::from_json(r#"{"gap_fill": {"confidence_decay": 1.5}}"#),
            Err(TimelineError::Config { .. })
        ));
        assert!(matches!(
            TimelineConfig::from_json(r#"{"gap_fill": {"min_gap_secs": 100000}}"#),
            Err(TimelineError::Config { .. })
        ));
        assert!(matches!(
            TimelineConfig::from_json(r#"{"movement": {"walking_max_speed_mps": 9.0}}"#),
            Err(TimelineError::Config { .. })
        ));
        assert!(matches!(
            TimelineConfig::from_json(r#"{"gap_fill": {"pre_travel_buffer_secs": 9223372036854775807}}"#),
            Err(TimelineError::Config { .. })
        ));
        assert!(matches!(
            TimelineConfig::from_json(r#"{"segment": {"max_commute_gap_secs": -1}}"#),
            Err(TimelineError::Config { .. })
        ));
        assert!(matches!(
            TimelineConfig::from_json(r#"{"reconcile": {"screen_time_gap_secs": 864000}}"#),
            Err(TimelineError::Config { .. })
        ));
        assert!(matches!(
            TimelineConfig::from_json("not json"),
            Err(TimelineError::Json(_))
        ));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = TimelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(TimelineConfig::from_json(&json).unwrap(), config);
    }
}
