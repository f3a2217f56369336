//! "Same place" decisions for segments and blocks.
//!
//! The decision is an ordered chain of predicates. Each predicate either
//! decides (returns a [`MatchReason`]) or abstains (`None`); the first decision
//! wins. Identity signals outrank geometry, which outranks free-text labels.
//!
//! The predicates are pure. Callers that want to trace decisions log the
//! returned reason.

use serde::{Deserialize, Serialize};

use crate::blocks::LocationBlock;
use crate::geo_utils::{decode_geohash, haversine_distance};
use crate::segments::ActivitySegment;
use crate::GpsPoint;

/// Labels that carry no place identity.
const PLACEHOLDER_LABELS: [&str; 3] = ["unknown location", "location", "unknown"];

/// Why two locations were (or were not) judged to be the same place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum MatchReason {
    /// Both sides are travel: consecutive legs of one journey
    BothTravel,
    /// Exactly one side is travel
    TravelMismatch,
    SamePlaceId,
    SameGeohash,
    WithinRadius { distance_m: f64 },
    SameLabel,
    NoMatch,
}

impl MatchReason {
    pub fn is_match(&self) -> bool {
        matches!(
            self,
            MatchReason::BothTravel
                | MatchReason::SamePlaceId
                | MatchReason::SameGeohash
                | MatchReason::WithinRadius { .. }
                | MatchReason::SameLabel
        )
    }
}

/// True for empty labels and generic placeholders such as "Unknown Location".
///
/// # Example
/// ```
/// use life_timeline::place_match::is_placeholder_label;
/// assert!(is_placeholder_label("  Unknown Location "));
/// assert!(!is_placeholder_label("Home"));
/// ```
pub fn is_placeholder_label(label: &str) -> bool {
    let normalized = label.trim().to_lowercase();
    normalized.is_empty() || PLACEHOLDER_LABELS.contains(&normalized.as_str())
}

/// The place-identity view of a segment or block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceSignature<'a> {
    pub is_travel: bool,
    pub place_id: Option<&'a str>,
    pub geohash: Option<&'a str>,
    pub point: Option<GpsPoint>,
    pub label: Option<&'a str>,
}

impl<'a> PlaceSignature<'a> {
    /// Segment granularity: geohash equality is not consulted.
    pub fn of_segment(segment: &'a ActivitySegment) -> Self {
        Self {
            is_travel: segment.is_commute(),
            place_id: non_empty(segment.place_id.as_deref()),
            geohash: None,
            point: segment.point(),
            label: segment.place_label.as_deref(),
        }
    }

    /// Block granularity: geohash equality is consulted and a geohash-only
    /// block is located at its cell centre.
    pub fn of_block(block: &'a LocationBlock) -> Self {
        let geohash = non_empty(block.geohash7.as_deref());
        Self {
            is_travel: block.is_travel(),
            place_id: non_empty(block.place_id.as_deref()),
            geohash,
            point: block.point().or_else(|| geohash.and_then(decode_geohash)),
            label: Some(block.location_label.as_str()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn travel_rule(a: &PlaceSignature, b: &PlaceSignature) -> Option<MatchReason> {
    match (a.is_travel, b.is_travel) {
        (true, true) => Some(MatchReason::BothTravel),
        (true, false) | (false, true) => Some(MatchReason::TravelMismatch),
        (false, false) => None,
    }
}

fn place_id_rule(a: &PlaceSignature, b: &PlaceSignature) -> Option<MatchReason> {
    match (a.place_id, b.place_id) {
        (Some(x), Some(y)) if x == y => Some(MatchReason::SamePlaceId),
        _ => None,
    }
}

fn geohash_rule(a: &PlaceSignature, b: &PlaceSignature) -> Option<MatchReason> {
    match (a.geohash, b.geohash) {
        (Some(x), Some(y)) if x.eq_ignore_ascii_case(y) => Some(MatchReason::SameGeohash),
        _ => None,
    }
}

fn proximity_rule(a: &PlaceSignature, b: &PlaceSignature, radius_m: f64) -> Option<MatchReason> {
    let (pa, pb) = (a.point?, b.point?);
    let distance_m = haversine_distance(&pa, &pb);
    (distance_m < radius_m).then_some(MatchReason::WithinRadius { distance_m })
}

fn label_rule(a: &PlaceSignature, b: &PlaceSignature) -> Option<MatchReason> {
    let (la, lb) = (a.label?, b.label?);
    if is_placeholder_label(la) || is_placeholder_label(lb) {
        return None;
    }
    (la.trim().to_lowercase() == lb.trim().to_lowercase()).then_some(MatchReason::SameLabel)
}

/// Run the predicate chain over two signatures.
pub fn match_places(a: &PlaceSignature, b: &PlaceSignature, radius_m: f64) -> MatchReason {
    travel_rule(a, b)
        .or_else(|| place_id_rule(a, b))
        .or_else(|| geohash_rule(a, b))
        .or_else(|| proximity_rule(a, b, radius_m))
        .or_else(|| label_rule(a, b))
        .unwrap_or(MatchReason::NoMatch)
}

/// Whether two segments are at the same place.
pub fn is_same_place(a: &ActivitySegment, b: &ActivitySegment, radius_m: f64) -> MatchReason {
    match_places(
        &PlaceSignature::of_segment(a),
        &PlaceSignature::of_segment(b),
        radius_m,
    )
}

/// Whether two blocks resolve to the same location.
pub fn is_same_block_location(a: &LocationBlock, b: &LocationBlock, radius_m: f64) -> MatchReason {
    match_places(&PlaceSignature::of_block(a), &PlaceSignature::of_block(b), radius_m)
}
