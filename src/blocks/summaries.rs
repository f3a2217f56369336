//! Fallback block building from hourly location summaries.
//!
//! Older days only have per-hour rollups. Consecutive hours with the same
//! place key become one block; when segments overlap the group their real
//! timestamps replace the hour boundaries.

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::{
    aggregate_app_usage, block_id, dominant_activity, travel_label, weighted_confidence, BlockType,
    LocationBlock, UNKNOWN_LOCATION_LABEL,
};
use crate::place_match::{is_placeholder_label, match_places, PlaceSignature};
use crate::places::PlaceDirectory;
use crate::screen_time::ScreenTimeSession;
use crate::segments::{ActivitySegment, InferredActivity};

/// One hour of rolled-up location evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlySummary {
    pub id: String,
    /// Start of the hour bucket
    pub hour_start: DateTime<Utc>,
    #[serde(default)]
    pub place_label: Option<String>,
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub geohash7: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub is_commute: bool,
    pub activity: InferredActivity,
    pub confidence: f64,
    #[serde(default)]
    pub sample_count: u32,
}

impl HourlySummary {
    pub fn hour_end(&self) -> DateTime<Utc> {
        self.hour_start + Duration::hours(1)
    }

    fn meaningful_label(&self) -> Option<&str> {
        self.place_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !is_placeholder_label(l))
    }

    /// Grouping key: commute, else place id, else geohash, else label.
    fn group_key(&self) -> String {
        if self.is_commute {
            return "commute".to_string();
        }
        if let Some(id) = self.place_id.as_deref().filter(|id| !id.is_empty()) {
            return format!("place:{}", id);
        }
        if let Some(hash) = self.geohash7.as_deref().filter(|h| !h.is_empty()) {
            return format!("geohash:{}", hash.to_ascii_lowercase());
        }
        match self.meaningful_label() {
            Some(label) => format!("label:{}", label.to_lowercase()),
            None => "unknown".to_string(),
        }
    }
}

/// Build blocks from hourly summaries, using overlapping segments for timing.
pub fn build_blocks_from_summaries(
    summaries: &[HourlySummary],
    segments: &[ActivitySegment],
    sessions: &[ScreenTimeSession],
    places: &PlaceDirectory,
) -> Vec<LocationBlock> {
    let mut sorted: Vec<&HourlySummary> = summaries.iter().collect();
    sorted.sort_by_key(|s| s.hour_start);

    let groups = sorted.into_iter().fold(Vec::<Vec<&HourlySummary>>::new(), |mut groups, summary| {
        let joins = groups.last().and_then(|g| g.last()).is_some_and(|last| {
            last.hour_end() == summary.hour_start && last.group_key() == summary.group_key()
        });
        match groups.last_mut() {
            Some(group) if joins => group.push(summary),
            _ => groups.push(vec![summary]),
        }
        groups
    });

    let blocks: Vec<LocationBlock> = groups
        .iter()
        .enumerate()
        .filter_map(|(i, group)| {
            let destination = groups
                .get(i + 1)
                .filter(|next| !next[0].is_commute)
                .and_then(|next| group_label(next));
            block_from_summaries(group, destination, segments, sessions, places)
        })
        .collect();

    info!(
        "[Blocks] Built {} blocks from {} hourly summaries",
        blocks.len(),
        summaries.len()
    );
    blocks
}

fn group_label<'a>(group: &[&'a HourlySummary]) -> Option<&'a str> {
    group.iter().copied().find_map(|s| s.meaningful_label())
}

fn group_signature<'a>(group: &[&'a HourlySummary]) -> PlaceSignature<'a> {
    PlaceSignature {
        is_travel: group.first().is_some_and(|s| s.is_commute),
        place_id: group
            .iter()
            .copied()
            .find_map(|s| s.place_id.as_deref())
            .filter(|id| !id.trim().is_empty()),
        geohash: group
            .iter()
            .copied()
            .find_map(|s| s.geohash7.as_deref())
            .filter(|h| !h.trim().is_empty()),
        point: None,
        label: group_label(group),
    }
}

fn is_unidentified_stay(signature: &PlaceSignature) -> bool {
    !signature.is_travel
        && signature.place_id.is_none()
        && signature.geohash.is_none()
        && signature.label.map_or(true, is_placeholder_label)
}

/// Whether a segment describes the same place as a summary group.
///
/// Hourly rollups have no radius, so only identity signals are compared.
/// Unidentified stays belong to an unidentified group.
fn segment_in_group(segment: &ActivitySegment, group: &PlaceSignature) -> bool {
    let seg = PlaceSignature {
        geohash: segment.geohash7.as_deref().filter(|h| !h.trim().is_empty()),
        point: None,
        ..PlaceSignature::of_segment(segment)
    };
    (is_unidentified_stay(group) && is_unidentified_stay(&seg))
        || match_places(group, &seg, 0.0).is_match()
}

fn block_from_summaries(
    group: &[&HourlySummary],
    destination: Option<&str>,
    segments: &[ActivitySegment],
    sessions: &[ScreenTimeSession],
    places: &PlaceDirectory,
) -> Option<LocationBlock> {
    let first = group.first()?;
    let hours_start = first.hour_start;
    let hours_end = group.last()?.hour_end();
    let is_travel = first.is_commute;
    let signature = group_signature(group);

    let mut constituent: Vec<ActivitySegment> = segments
        .iter()
        .filter(|s| s.started_at < hours_end && s.ended_at > hours_start && s.ended_at > s.started_at)
        .filter(|s| segment_in_group(s, &signature))
        .cloned()
        .collect();
    constituent.sort_by_key(|s| s.started_at);

    let (start, end) = match (
        constituent.iter().map(|s| s.started_at).min(),
        constituent.iter().map(|s| s.ended_at).max(),
    ) {
        (Some(s), Some(e)) => (s, e),
        _ => (hours_start, hours_end),
    };
    if end <= start {
        return None;
    }

    let hour_secs = 3600;
    let (activity, confidence) = if constituent.is_empty() {
        (
            dominant_activity(group.iter().map(|s| (s.activity, hour_secs))),
            weighted_confidence(group.iter().map(|s| (s.confidence, hour_secs))),
        )
    } else {
        (
            dominant_activity(constituent.iter().map(|s| (s.inferred_activity, s.duration_secs()))),
            weighted_confidence(constituent.iter().map(|s| (s.activity_confidence, s.duration_secs()))),
        )
    };

    let (block_type, label, distance_m, movement_type) = if is_travel {
        let movement = constituent
            .iter()
            .filter(|s| s.movement_type.is_some())
            .max_by_key(|s| s.duration_secs())
            .and_then(|s| s.movement_type);
        let distance = constituent.iter().filter_map(|s| s.distance_m).sum::<f64>();
        (
            BlockType::Travel,
            travel_label(movement, destination),
            (!constituent.is_empty()).then_some(distance),
            movement,
        )
    } else {
        let label = group_label(group)
            .unwrap_or(UNKNOWN_LOCATION_LABEL)
            .to_string();
        (BlockType::Stationary, label, None, None)
    };

    let geohash7 = if is_travel {
        None
    } else {
        group.iter().find_map(|s| s.geohash7.clone())
    };
    let (latitude, longitude) = if is_travel {
        (None, None)
    } else {
        group
            .iter()
            .find_map(|s| s.latitude.zip(s.longitude))
            .map_or((None, None), |(lat, lng)| (Some(lat), Some(lng)))
    };

    Some(LocationBlock {
        id: block_id(if is_travel { "travel" } else { "stay" }, start),
        block_type,
        location_label: label,
        inferred_place: geohash7.as_deref().and_then(|g| places.inferred(g)).cloned(),
        place_id: if is_travel {
            None
        } else {
            group.iter().find_map(|s| s.place_id.clone())
        },
        geohash7,
        latitude,
        longitude,
        confidence_score: confidence,
        start_time: start,
        end_time: end,
        duration_minutes: (end - start).num_minutes(),
        dominant_activity: activity,
        apps: aggregate_app_usage(sessions, start, end),
        segments: constituent,
        summary_ids: group.iter().map(|s| s.id.clone()).collect(),
        is_carried_forward: false,
        location_sample_count: group.iter().map(|s| s.sample_count).sum(),
        distance_m,
        movement_type,
        has_user_feedback: false,
        is_locked: false,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{at_min, stay_segment};
    use super::*;

    fn summary(id: &str, hour: i64, label: Option<&str>, place_id: Option<&str>) -> HourlySummary {
        HourlySummary {
            id: id.to_string(),
            hour_start: at_min(hour * 60),
            place_label: label.map(str::to_string),
            place_id: place_id.map(str::to_string),
            geohash7: None,
            latitude: None,
            longitude: None,
            is_commute: false,
            activity: InferredActivity::AtHome,
            confidence: 0.6,
            sample_count: 4,
        }
    }

    #[test]
    fn test_contiguous_same_key_grouped() {
        let summaries = vec![
            summary("h8", 8, Some("Home"), Some("p-home")),
            summary("h9", 9, Some("home"), Some("p-home")),
            summary("h10", 10, Some("Office"), Some("p-work")),
        ];
        let blocks = build_blocks_from_summaries(&summaries, &[], &[], &PlaceDirectory::default());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].summary_ids, vec!["h8", "h9"]);
        // No segments: hour boundaries
        assert_eq!(blocks[0].start_time, at_min(8 * 60));
        assert_eq!(blocks[0].end_time, at_min(10 * 60));
        assert_eq!(blocks[0].location_sample_count, 8);
        assert_eq!(blocks[1].location_label, "Office");
    }

    #[test]
    fn test_non_contiguous_hours_split() {
        let summaries = vec![
            summary("h8", 8, Some("Home"), None),
            summary("h11", 11, Some("Home"), None),
        ];
        let blocks = build_blocks_from_summaries(&summaries, &[], &[], &PlaceDirectory::default());
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_segment_timestamps_replace_hour_boundaries() {
        let summaries = vec![
            summary("h8", 8, Some("Home"), None),
            summary("h9", 9, Some("Home"), None),
        ];
        let segments = vec![stay_segment(8 * 60 + 12, 9 * 60 + 47, Some("Home"), 40.0)];
        let blocks = build_blocks_from_summaries(&summaries, &segments, &[], &PlaceDirectory::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_time, at_min(8 * 60 + 12));
        assert_eq!(blocks[0].end_time, at_min(9 * 60 + 47));
        assert_eq!(blocks[0].segments.len(), 1);
    }

    #[test]
    fn test_neighbouring_place_segment_ignored() {
        let summaries = vec![
            summary("h8", 8, Some("Home"), None),
            summary("h9", 9, Some("Home"), None),
            summary("h10", 10, Some("Office"), None),
        ];
        let segments = vec![
            stay_segment(8 * 60, 10 * 60 + 30, Some("Home"), 40.0),
            stay_segment(10 * 60 + 30, 11 * 60, Some("Office"), 40.1),
        ];
        let blocks = build_blocks_from_summaries(&summaries, &segments, &[], &PlaceDirectory::default());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].location_label, "Home");
        assert_eq!(blocks[0].end_time, at_min(10 * 60 + 30));
        assert_eq!(blocks[1].location_label, "Office");
        assert_eq!(blocks[1].start_time, at_min(10 * 60 + 30));
        assert_eq!(blocks[1].end_time, at_min(11 * 60));
        assert_eq!(blocks[1].segments.len(), 1);
    }

    #[test]
    fn test_place_id_matches_segment() {
        let summaries = vec![summary("h9", 9, None, Some("p-work"))];
        let mut office = stay_segment(9 * 60 + 5, 9 * 60 + 50, None, 40.1);
        office.place_id = Some("p-work".to_string());
        let elsewhere = stay_segment(8 * 60, 9 * 60 + 5, Some("Gym"), 40.2);
        let blocks =
            build_blocks_from_summaries(&summaries, &[elsewhere, office], &[], &PlaceDirectory::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_time, at_min(9 * 60 + 5));
        assert_eq!(blocks[0].end_time, at_min(9 * 60 + 50));
    }

    #[test]
    fn test_commute_summary_travel_block() {
        let mut commute = summary("h9", 9, None, None);
        commute.is_commute = true;
        commute.activity = InferredActivity::Commute;
        let summaries = vec![commute, summary("h10", 10, Some("Gym"), None)];
        let blocks = build_blocks_from_summaries(&summaries, &[], &[], &PlaceDirectory::default());
        assert_eq!(blocks[0].block_type, BlockType::Travel);
        assert_eq!(blocks[0].location_label, "Travel → Gym");
        assert_eq!(blocks[0].distance_m, None);
    }

    #[test]
    fn test_unlabelled_summary_unknown_location() {
        let blocks = build_blocks_from_summaries(
            &[summary("h3", 3, Some("location"), None)],
            &[],
            &[],
            &PlaceDirectory::default(),
        );
        assert_eq!(blocks[0].location_label, UNKNOWN_LOCATION_LABEL);
    }
}
