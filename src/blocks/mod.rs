//! # Location Blocks
//!
//! The user-facing unit of the timeline: one block per stay at a place or per
//! journey between places.
//!
//! ## Pipeline
//! 1. [`build_blocks_from_segments`] groups runs of same-place segments
//!    (or [`build_blocks_from_summaries`] groups hourly summaries when no
//!    segments exist)
//! 2. [`carry_forward_labels`] replaces placeholder labels with the previous
//!    stay's place
//! 3. [`fill_gaps`] synthesizes carried-forward blocks over data gaps
//! 4. [`merge_consecutive_blocks`] collapses adjacent blocks at one place and
//!    guarantees a non-overlapping, chronologically ordered result

mod gap_fill;
mod merge;
mod summaries;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::movement::MovementType;
use crate::place_match::{is_placeholder_label, is_same_place};
use crate::places::{InferredPlace, PlaceDirectory};
use crate::screen_time::ScreenTimeSession;
use crate::segments::{ActivitySegment, InferredActivity};
use crate::{GpsPoint, TimelineConfig};

pub use gap_fill::{carry_forward_labels, fill_gaps, GapFillConfig};
pub use merge::merge_consecutive_blocks;
pub use summaries::{build_blocks_from_summaries, HourlySummary};

/// Label of a stationary block with no known place.
pub const UNKNOWN_LOCATION_LABEL: &str = "Unknown Location";
/// Label of a journey whose destination is unknown.
pub const IN_TRANSIT_LABEL: &str = "In Transit";

/// Stationary at a place, or travelling between places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Stationary,
    Travel,
}

/// One foreground session of an app, clipped to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppSession {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// App usage within a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockApp {
    pub app_id: String,
    pub display_name: Option<String>,
    pub minutes: f64,
    pub sessions: Vec<AppSession>,
}

/// A merged, gap-filled unit of the day: one stay or one journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub location_label: String,
    pub inferred_place: Option<InferredPlace>,
    pub place_id: Option<String>,
    pub geohash7: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub confidence_score: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Always derived from the time range
    pub duration_minutes: i64,
    pub dominant_activity: InferredActivity,
    pub apps: Vec<BlockApp>,
    pub segments: Vec<ActivitySegment>,
    pub summary_ids: Vec<String>,
    pub is_carried_forward: bool,
    /// Location fixes backing the block (zero for carried-forward blocks)
    pub location_sample_count: u32,
    pub distance_m: Option<f64>,
    pub movement_type: Option<MovementType>,
    pub has_user_feedback: bool,
    pub is_locked: bool,
}

impl LocationBlock {
    pub fn is_travel(&self) -> bool {
        self.block_type == BlockType::Travel
    }

    pub fn duration_secs(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }

    pub fn point(&self) -> Option<GpsPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GpsPoint::new(lat, lng)).filter(GpsPoint::is_valid),
            _ => None,
        }
    }

    /// Label unless it is a placeholder.
    pub fn meaningful_label(&self) -> Option<&str> {
        Some(self.location_label.as_str()).filter(|l| !is_placeholder_label(l))
    }

    /// A stationary block that names a real place.
    pub fn has_meaningful_location(&self) -> bool {
        !self.is_travel() && (self.meaningful_label().is_some() || self.place_id.is_some())
    }

    /// Move the block to a new range, re-clipping app usage and segments and
    /// recomputing duration.
    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.duration_minutes = (end - start).num_minutes();
        self.apps = clip_apps(self.apps, start, end);
        self.segments = self
            .segments
            .into_iter()
            .filter(|s| s.started_at < end && s.ended_at > start)
            .map(|s| ActivitySegment {
                started_at: s.started_at.max(start),
                ended_at: s.ended_at.min(end),
                ..s
            })
            .collect();
        self
    }
}

/// Deterministic block id from its kind and start.
pub(crate) fn block_id(prefix: &str, start: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, start.timestamp())
}

/// Aggregate screen time within `[start, end)` per app id.
///
/// Sessions are clipped to the range; apps are ordered by minutes, most used first.
pub fn aggregate_app_usage(
    sessions: &[ScreenTimeSession],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<BlockApp> {
    let per_app = sessions
        .iter()
        .filter(|s| s.overlap_seconds(start, end) > 0)
        .fold(BTreeMap::new(), |mut acc: BTreeMap<&str, BlockApp>, s| {
            let clipped = AppSession {
                start: s.started_at.max(start),
                end: s.ended_at.min(end),
            };
            let app = acc.entry(s.app_id.as_str()).or_insert_with(|| BlockApp {
                app_id: s.app_id.clone(),
                display_name: s.display_name.clone(),
                minutes: 0.0,
                sessions: Vec::new(),
            });
            app.minutes += (clipped.end - clipped.start).num_seconds() as f64 / 60.0;
            app.sessions.push(clipped);
            acc
        });

    sort_apps(per_app.into_values().collect())
}

pub(crate) fn sort_apps(mut apps: Vec<BlockApp>) -> Vec<BlockApp> {
    apps.sort_by(|a, b| {
        b.minutes
            .total_cmp(&a.minutes)
            .then_with(|| a.app_id.cmp(&b.app_id))
    });
    apps
}

/// Clip app sessions to a new range, dropping apps left with no time.
fn clip_apps(apps: Vec<BlockApp>, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<BlockApp> {
    let clipped = apps
        .into_iter()
        .filter_map(|app| {
            let sessions: Vec<AppSession> = app
                .sessions
                .iter()
                .map(|s| AppSession {
                    start: s.start.max(start),
                    end: s.end.min(end),
                })
                .filter(|s| s.end > s.start)
                .collect();
            if sessions.is_empty() {
                return None;
            }
            let minutes = sessions
                .iter()
                .map(|s| (s.end - s.start).num_seconds() as f64 / 60.0)
                .sum();
            Some(BlockApp {
                minutes,
                sessions,
                ..app
            })
        })
        .collect();
    sort_apps(clipped)
}

/// Duration-weighted mode of segment activities.
pub(crate) fn dominant_activity<I>(weighted: I) -> InferredActivity
where
    I: IntoIterator<Item = (InferredActivity, i64)>,
{
    weighted
        .into_iter()
        .fold(BTreeMap::new(), |mut acc: BTreeMap<InferredActivity, i64>, (activity, secs)| {
            *acc.entry(activity).or_insert(0) += secs.max(0);
            acc
        })
        .into_iter()
        // Ties go to the activity that sorts first
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(activity, _)| activity)
        .unwrap_or(InferredActivity::Unknown)
}

/// Duration-weighted mean confidence; plain mean when every weight is zero.
pub(crate) fn weighted_confidence<I>(weighted: I) -> f64
where
    I: IntoIterator<Item = (f64, i64)>,
{
    let (sum, weight, plain, count) = weighted.into_iter().fold(
        (0.0, 0.0, 0.0, 0usize),
        |(sum, weight, plain, count), (confidence, secs)| {
            let w = secs.max(0) as f64;
            (sum + confidence * w, weight + w, plain + confidence, count + 1)
        },
    );
    if weight > 0.0 {
        sum / weight
    } else if count > 0 {
        plain / count as f64
    } else {
        0.0
    }
}

pub(crate) fn travel_label(movement: Option<MovementType>, destination: Option<&str>) -> String {
    match (movement, destination) {
        (Some(m), Some(dest)) => format!("{} → {}", m.label(), dest),
        (None, Some(dest)) => format!("Travel → {}", dest),
        (_, None) => IN_TRANSIT_LABEL.to_string(),
    }
}

/// Group runs of same-place segments into blocks.
///
/// Segments are expected to be merged already; any remaining same-place
/// neighbours within `gap_fill.max_gap_secs` still end up in one block.
pub fn build_blocks_from_segments(
    segments: &[ActivitySegment],
    sessions: &[ScreenTimeSession],
    places: &PlaceDirectory,
    config: &TimelineConfig,
) -> Vec<LocationBlock> {
    let mut sorted: Vec<&ActivitySegment> = segments
        .iter()
        .filter(|s| s.ended_at > s.started_at)
        .collect();
    sorted.sort_by_key(|s| (s.started_at, s.ended_at));

    let runs = sorted.into_iter().fold(Vec::<Vec<&ActivitySegment>>::new(), |mut runs, seg| {
        let joins = runs.last().and_then(|run| run.last()).is_some_and(|last| {
            let gap = (seg.started_at - last.ended_at).num_seconds();
            gap <= config.gap_fill.max_gap_secs
                && is_same_place(last, seg, config.place_match_radius_m).is_match()
        });
        match runs.last_mut() {
            Some(run) if joins => run.push(seg),
            _ => runs.push(vec![seg]),
        }
        runs
    });

    let blocks: Vec<LocationBlock> = runs
        .iter()
        .enumerate()
        .filter_map(|(i, run)| {
            let destination = runs
                .get(i + 1)
                .and_then(|next| next.first())
                .filter(|s| !s.is_commute())
                .and_then(|_| run_label(&runs[i + 1]));
            block_from_segments(run, destination, sessions, places)
        })
        .collect();

    info!(
        "[Blocks] Built {} blocks from {} segments",
        blocks.len(),
        segments.len()
    );
    blocks
}

/// Meaningful label of the longest labelled segment in a run.
fn run_label<'a>(run: &[&'a ActivitySegment]) -> Option<&'a str> {
    run.iter()
        .copied()
        .filter(|s| s.meaningful_label().is_some())
        .max_by_key(|s| s.duration_secs())
        .and_then(|s| s.meaningful_label())
}

fn block_from_segments(
    run: &[&ActivitySegment],
    destination: Option<&str>,
    sessions: &[ScreenTimeSession],
    places: &PlaceDirectory,
) -> Option<LocationBlock> {
    let start = run.iter().map(|s| s.started_at).min()?;
    let end = run.iter().map(|s| s.ended_at).max()?;
    if end <= start {
        return None;
    }

    let is_travel = run[0].is_commute();
    let activity = dominant_activity(run.iter().map(|s| (s.inferred_activity, s.duration_secs())));
    let confidence = weighted_confidence(run.iter().map(|s| (s.activity_confidence, s.duration_secs())));
    let sample_count = run.iter().map(|s| s.sample_count).sum();

    // Place identity comes from the longest labelled segment, else the longest one
    let anchor = run
        .iter()
        .filter(|s| s.meaningful_label().is_some())
        .max_by_key(|s| s.duration_secs())
        .or_else(|| run.iter().max_by_key(|s| s.duration_secs()))?;

    let (block_type, label, distance_m, movement_type) = if is_travel {
        let movement = run
            .iter()
            .filter(|s| s.movement_type.is_some())
            .max_by_key(|s| s.duration_secs())
            .and_then(|s| s.movement_type);
        let distance: f64 = run.iter().filter_map(|s| s.distance_m).sum();
        (
            BlockType::Travel,
            travel_label(movement, destination),
            Some(distance),
            movement,
        )
    } else {
        let label = anchor
            .meaningful_label()
            .unwrap_or(UNKNOWN_LOCATION_LABEL)
            .to_string();
        (BlockType::Stationary, label, None, None)
    };

    let geohash7 = if is_travel {
        None
    } else {
        anchor
            .geohash7
            .clone()
            .or_else(|| run.iter().find_map(|s| s.geohash7.clone()))
    };
    let point = if is_travel {
        None
    } else {
        anchor.point().or_else(|| run.iter().find_map(|s| s.point()))
    };

    let id_prefix = if is_travel { "travel" } else { "stay" };
    debug!(
        "[Blocks] {} block '{}' from {} segments",
        id_prefix,
        label,
        run.len()
    );

    Some(LocationBlock {
        id: block_id(id_prefix, start),
        block_type,
        location_label: label,
        inferred_place: geohash7.as_deref().and_then(|g| places.inferred(g)).cloned(),
        place_id: if is_travel {
            None
        } else {
            anchor
                .place_id
                .clone()
                .or_else(|| run.iter().find_map(|s| s.place_id.clone()))
        },
        geohash7,
        latitude: point.map(|p| p.latitude),
        longitude: point.map(|p| p.longitude),
        confidence_score: confidence,
        start_time: start,
        end_time: end,
        duration_minutes: (end - start).num_minutes(),
        dominant_activity: activity,
        apps: aggregate_app_usage(sessions, start, end),
        segments: run.iter().map(|s| (*s).clone()).collect(),
        summary_ids: vec![],
        is_carried_forward: false,
        location_sample_count: sample_count,
        distance_m,
        movement_type,
        has_user_feedback: false,
        is_locked: false,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_empty_segments_no_blocks() {
        let blocks = build_blocks_from_segments(&[], &[], &PlaceDirectory::default(), &TimelineConfig::default());
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_travel_label_uses_destination() {
        let segments = vec![
            stay_segment(0, 60, Some("Home"), 40.0),
            commute_segment(60, 80, MovementType::Walking, 1500.0),
            stay_segment(80, 200, Some("Office"), 40.05),
        ];
        let blocks = build_blocks_from_segments(&segments, &[], &PlaceDirectory::default(), &TimelineConfig::default());
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].location_label, "Walking → Office");
        assert_eq!(blocks[1].block_type, BlockType::Travel);
        assert_eq!(blocks[1].distance_m, Some(1500.0));
        assert_eq!(blocks[2].location_label, "Office");
    }

    #[test]
    fn test_travel_without_destination_is_in_transit() {
        let segments = vec![
            stay_segment(0, 60, Some("Home"), 40.0),
            commute_segment(60, 80, MovementType::Driving, 9000.0),
            stay_segment(80, 200, None, 40.2),
        ];
        let blocks = build_blocks_from_segments(&segments, &[], &PlaceDirectory::default(), &TimelineConfig::default());
        assert_eq!(blocks[1].location_label, IN_TRANSIT_LABEL);
        assert_eq!(blocks[2].location_label, UNKNOWN_LOCATION_LABEL);
    }

    #[test]
    fn test_travel_legs_sum_distance() {
        let segments = vec![
            commute_segment(0, 10, MovementType::Walking, 700.0),
            commute_segment(10, 40, MovementType::Driving, 12000.0),
        ];
        let blocks = build_blocks_from_segments(&segments, &[], &PlaceDirectory::default(), &TimelineConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].distance_m, Some(12700.0));
        assert_eq!(blocks[0].movement_type, Some(MovementType::Driving));
        assert_eq!(blocks[0].duration_minutes, 40);
    }

    #[test]
    fn test_block_range_from_segment_timestamps() {
        let segments = vec![
            stay_segment(17, 42, Some("Cafe"), 40.0),
            stay_segment(45, 58, Some("Cafe"), 40.0005),
        ];
        let blocks = build_blocks_from_segments(&segments, &[], &PlaceDirectory::default(), &TimelineConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_time, at_min(17));
        assert_eq!(blocks[0].end_time, at_min(58));
        assert_eq!(blocks[0].duration_minutes, 41);
        assert_eq!(blocks[0].segments.len(), 2);
        assert_eq!(blocks[0].location_sample_count, 12);
    }

    #[test]
    fn test_dominant_activity_and_confidence_weighted() {
        let mut long = stay_segment(0, 90, Some("Office"), 40.0);
        long.inferred_activity = InferredActivity::Working;
        long.activity_confidence = 0.9;
        let mut short = stay_segment(90, 120, Some("Office"), 40.0);
        short.inferred_activity = InferredActivity::ScreenTime;
        short.activity_confidence = 0.3;
        let blocks = build_blocks_from_segments(&[long, short], &[], &PlaceDirectory::default(), &TimelineConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].dominant_activity, InferredActivity::Working);
        assert!((blocks[0].confidence_score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_app_usage_clipped_and_summed() {
        let sessions = vec![
            ScreenTimeSession::new("chat", at_min(-10), at_min(10)),
            ScreenTimeSession::new("chat", at_min(20), at_min(25)),
            ScreenTimeSession::new("mail", at_min(30), at_min(31)),
            ScreenTimeSession::new("video", at_min(70), at_min(80)),
        ];
        let apps = aggregate_app_usage(&sessions, at_min(0), at_min(60));
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].app_id, "chat");
        assert!((apps[0].minutes - 15.0).abs() < 1e-9);
        assert_eq!(apps[0].sessions[0].start, at_min(0));
        assert_eq!(apps[1].app_id, "mail");
    }

    #[test]
    fn test_with_range_reclips_apps() {
        let mut block = stay_block(0, 60, "Home", 40.0);
        block.apps = aggregate_app_usage(
            &[ScreenTimeSession::new("chat", at_min(10), at_min(40))],
            at_min(0),
            at_min(60),
        );
        let block = block.with_range(at_min(30), at_min(60));
        assert_eq!(block.duration_minutes, 30);
        assert!((block.apps[0].minutes - 10.0).abs() < 1e-9);

        let block = block.with_range(at_min(45), at_min(60));
        assert!(block.apps.is_empty());
    }

    #[test]
    fn test_with_range_clips_segments() {
        let block = build_blocks_from_segments(
            &[
                stay_segment(0, 60, Some("Home"), 40.0),
                stay_segment(70, 120, Some("Home"), 40.0),
            ],
            &[],
            &PlaceDirectory::default(),
            &TimelineConfig::default(),
        )
        .remove(0)
        .with_range(at_min(80), at_min(100));
        assert_eq!(block.segments.len(), 1);
        assert_eq!(block.segments[0].started_at, at_min(80));
        assert_eq!(block.segments[0].ended_at, at_min(100));
    }

    #[test]
    fn test_dominant_activity_tie_is_deterministic() {
        let a = dominant_activity(vec![
            (InferredActivity::Visiting, 60),
            (InferredActivity::AtHome, 60),
        ]);
        let b = dominant_activity(vec![
            (InferredActivity::AtHome, 60),
            (InferredActivity::Visiting, 60),
        ]);
        assert_eq!(a, b);
        assert_eq!(a, InferredActivity::AtHome);
    }
}
