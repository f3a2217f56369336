//! # Algorithm Toolbox
//!
//! Direct access to the individual timeline stages. Use these to run one
//! step on your own data without going through [`crate::build_day_timeline`].
//!
//! ## Core Algorithms
//!
//! - **Segmentation**: stays and commutes from location fixes
//! - **Place Matching**: ordered predicate chain with a [`MatchReason`]
//! - **Block Building**: segment runs or hourly summaries into blocks
//! - **Gap Filling**: label carry-forward and synthesized gap blocks
//! - **Reconciliation**: generated candidates against user events
//!
//! ## Geographic Utilities
//!
//! - **Haversine Distance**: Great-circle distance between GPS points
//! - **Geohash**: Encode/decode of place cells
//! - **Centroid**: Mean position of a cluster of fixes
//!
//! # Example
//!
//! ```rust
//! use life_timeline::algorithms::{encode_geohash, haversine_distance, GpsPoint};
//!
//! let office = GpsPoint::new(40.7580, -73.9855);
//! let cafe = GpsPoint::new(40.7590, -73.9845);
//! let distance = haversine_distance(&office, &cafe);
//! assert!(distance > 100.0 && distance < 200.0);
//!
//! let cell = encode_geohash(office.latitude, office.longitude, 7);
//! assert_eq!(cell.len(), 7);
//! ```

// =============================================================================
// Core Types (re-exported from lib)
// =============================================================================

pub use crate::{GpsPoint, TimelineConfig};

// =============================================================================
// Geographic Utilities
// =============================================================================

pub use crate::geo_utils::{
    centroid, decode_geohash, encode_geohash, haversine_distance, meters_to_degrees,
    polyline_length,
};

// =============================================================================
// Segmentation
// =============================================================================

/// Greedy stay detection followed by commute classification.
///
/// Input samples must be normalized (sorted and deduplicated) first.
pub use crate::segments::generate_segments;

/// Fold adjacent same-place segments together.
pub use crate::segments::merge_segments;

/// Speed-band movement classification (median reported speed when available).
pub use crate::movement::classify_movement;

// =============================================================================
// Place Matching
// =============================================================================

/// Decision order: travel, place id, geohash, proximity, label.
pub use crate::place_match::{
    is_placeholder_label, is_same_block_location, is_same_place, match_places, MatchReason,
    PlaceSignature,
};

// =============================================================================
// Blocks
// =============================================================================

pub use crate::blocks::{
    aggregate_app_usage, build_blocks_from_segments, build_blocks_from_summaries,
    carry_forward_labels, fill_gaps, merge_consecutive_blocks,
};

// =============================================================================
// Screen Time and Reconciliation
// =============================================================================

/// Split sessions into windows at inactivity gaps.
pub use crate::screen_time::coalesce_sessions;

pub use crate::reconcile::{
    reconcile_time_blocks, time_blocks_from_location, time_blocks_from_screen_time,
    time_blocks_from_workouts,
};
