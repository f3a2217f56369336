//! # Segment Generation
//!
//! Turns one day of sorted location samples into contiguous activity segments.
//!
//! ## Algorithm
//! 1. Greedy stay detection: grow a cluster while the next fix stays within
//!    `stationary_radius_m` of the running centroid and arrives within
//!    `max_stationary_gap_secs`. Clusters spanning the minimum duration are
//!    stays; shorter ones give up their first fix as a moving sample.
//! 2. Fixes between stays form commute candidates, bounded by the last fix of
//!    the previous stay and the first fix of the next one.
//! 3. Stays are resolved against the place directory; commutes are classified
//!    by speed.
//! 4. Screen time overlapping each segment is attached.
//!
//! Periods with no fixes produce no segment; the gap filler deals with them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{centroid, haversine_distance, polyline_length};
use crate::movement::{classify_movement, MovementType};
use crate::place_match::{is_placeholder_label, is_same_place};
use crate::places::{PlaceDirectory, PlaceType};
use crate::samples::LocationSample;
use crate::screen_time::ScreenTimeSession;
use crate::{GpsPoint, TimelineConfig};

/// One fix per this many seconds counts as full sampling density.
const EXPECTED_SAMPLE_INTERVAL_SECS: f64 = 300.0;
/// Accuracy score used when no fix reports accuracy.
const DEFAULT_ACCURACY_SCORE: f64 = 0.5;

/// Configuration for segment generation and merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Fixes within this distance of a stay's centroid belong to it (meters)
    pub stationary_radius_m: f64,
    /// Segments shorter than this are noise (seconds). Default: 5 minutes
    pub min_segment_duration_secs: i64,
    /// Longest silence tolerated inside one stay (seconds)
    pub max_stationary_gap_secs: i64,
    /// Shortest path that counts as a commute (meters)
    pub min_commute_distance_m: f64,
    /// Longest commute inferred between two stays with no fixes in between (seconds)
    pub max_commute_gap_secs: i64,
    /// Fixes with a worse accuracy radius are dropped (meters)
    pub max_sample_accuracy_m: f64,
    /// Adjacent same-place segments closer than this are merged (seconds)
    pub segment_merge_gap_secs: i64,
    /// Apps kept per segment
    pub top_apps_limit: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            stationary_radius_m: 100.0,
            min_segment_duration_secs: 5 * 60,
            max_stationary_gap_secs: 3 * 3600,
            min_commute_distance_m: 150.0,
            max_commute_gap_secs: 3 * 3600,
            max_sample_accuracy_m: 500.0,
            segment_merge_gap_secs: 30 * 60,
            top_apps_limit: 3,
        }
    }
}

/// What the user was most likely doing during a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredActivity {
    AtHome,
    Working,
    Visiting,
    ScreenTime,
    Commute,
    Unknown,
}

impl InferredActivity {
    /// Activity implied by where a stay happened and how much of it was on screen.
    pub fn for_stay(place_type: PlaceType, has_label: bool, screen_share: f64) -> Self {
        match place_type {
            PlaceType::Home => InferredActivity::AtHome,
            PlaceType::Work => InferredActivity::Working,
            PlaceType::Frequent => InferredActivity::Visiting,
            PlaceType::Unknown if has_label => InferredActivity::Visiting,
            PlaceType::Unknown if screen_share > 0.5 => InferredActivity::ScreenTime,
            PlaceType::Unknown => InferredActivity::Unknown,
        }
    }
}

/// Screen time of one app within a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentApp {
    pub app_id: String,
    pub display_name: Option<String>,
    pub seconds: i64,
}

/// A contiguous interval classified as a stay at a place or a commute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySegment {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub place_label: Option<String>,
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub geohash7: Option<String>,
    #[serde(default)]
    pub location_lat: Option<f64>,
    #[serde(default)]
    pub location_lng: Option<f64>,
    pub inferred_activity: InferredActivity,
    #[serde(default)]
    pub movement_type: Option<MovementType>,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub top_apps: Vec<SegmentApp>,
    #[serde(default)]
    pub total_screen_seconds: i64,
    pub activity_confidence: f64,
    #[serde(default)]
    pub sample_count: u32,
}

impl ActivitySegment {
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds()
    }

    pub fn is_commute(&self) -> bool {
        self.inferred_activity == InferredActivity::Commute
    }

    pub fn point(&self) -> Option<GpsPoint> {
        match (self.location_lat, self.location_lng) {
            (Some(lat), Some(lng)) => Some(GpsPoint::new(lat, lng)).filter(GpsPoint::is_valid),
            _ => None,
        }
    }

    /// Label unless it is a placeholder.
    pub fn meaningful_label(&self) -> Option<&str> {
        self.place_label
            .as_deref()
            .filter(|l| !is_placeholder_label(l))
    }
}

/// Index range of a detected stay.
#[derive(Debug, Clone, Copy)]
struct Stay {
    first: usize,
    last: usize,
}

/// Generate segments for one day of samples.
///
/// `samples` must already be normalized (sorted, deduped). The output is
/// chronologically ordered and every segment ends after it starts.
pub fn generate_segments(
    samples: &[LocationSample],
    places: &PlaceDirectory,
    sessions: &[ScreenTimeSession],
    config: &TimelineConfig,
) -> Vec<ActivitySegment> {
    if samples.is_empty() {
        return vec![];
    }

    let stays = detect_stays(samples, &config.segment);
    let mut segments = Vec::with_capacity(stays.len() * 2 + 1);
    let mut cursor = 0;
    let mut prev: Option<Stay> = None;

    for stay in &stays {
        if let Some(commute) = build_commute(samples, prev, cursor, stay.first, Some(*stay), sessions, config) {
            segments.push(commute);
        }
        segments.push(build_stay(samples, *stay, places, sessions, &config.segment));
        cursor = stay.last + 1;
        prev = Some(*stay);
    }
    if let Some(commute) = build_commute(samples, prev, cursor, samples.len(), None, sessions, config) {
        segments.push(commute);
    }

    let min_duration = config.segment.min_segment_duration_secs.max(1);
    let before = segments.len();
    segments.retain(|s| s.duration_secs() >= min_duration);
    segments.sort_by_key(|s| (s.started_at, s.ended_at));

    info!(
        "[Segments] Generated {} segments ({} stays) from {} samples, {} dropped as noise",
        segments.len(),
        stays.len(),
        samples.len(),
        before - segments.len()
    );

    segments
}

fn detect_stays(samples: &[LocationSample], config: &SegmentConfig) -> Vec<Stay> {
    let mut stays = Vec::new();
    let mut i = 0;

    while i < samples.len() {
        let mut sum_lat = samples[i].latitude;
        let mut sum_lng = samples[i].longitude;
        let mut count = 1.0;
        let mut j = i;

        while j + 1 < samples.len() {
            let next = &samples[j + 1];
            let running = GpsPoint::new(sum_lat / count, sum_lng / count);
            let gap = (next.recorded_at - samples[j].recorded_at).num_seconds();
            if haversine_distance(&running, &next.point()) > config.stationary_radius_m
                || gap > config.max_stationary_gap_secs
            {
                break;
            }
            sum_lat += next.latitude;
            sum_lng += next.longitude;
            count += 1.0;
            j += 1;
        }

        let span = (samples[j].recorded_at - samples[i].recorded_at).num_seconds();
        if span >= config.min_segment_duration_secs.max(1) {
            stays.push(Stay { first: i, last: j });
            i = j + 1;
        } else {
            i += 1;
        }
    }

    stays
}

fn build_stay(
    samples: &[LocationSample],
    stay: Stay,
    places: &PlaceDirectory,
    sessions: &[ScreenTimeSession],
    config: &SegmentConfig,
) -> ActivitySegment {
    let members = &samples[stay.first..=stay.last];
    let started_at = members[0].recorded_at;
    let ended_at = members[members.len() - 1].recorded_at;
    let duration = (ended_at - started_at).num_seconds().max(1) as f64;

    let points: Vec<GpsPoint> = members.iter().map(LocationSample::point).collect();
    // members is never empty, so the centroid always exists
    let center = centroid(&points).unwrap_or(points[0]);
    let resolved = places.resolve(&center);

    let (top_apps, total_screen_seconds) =
        screen_time_within(sessions, started_at, ended_at, config.top_apps_limit);

    let density = sample_density(members.len(), duration);
    let accuracy = accuracy_score(members, config.max_sample_accuracy_m);
    let confidence = (0.4 * resolved.confidence + 0.35 * density + 0.25 * accuracy).clamp(0.05, 1.0);

    let activity = InferredActivity::for_stay(
        resolved.place_type,
        resolved.label.is_some(),
        total_screen_seconds as f64 / duration,
    );

    ActivitySegment {
        started_at,
        ended_at,
        place_label: resolved.label,
        place_id: resolved.place_id,
        geohash7: Some(resolved.geohash7),
        location_lat: Some(center.latitude),
        location_lng: Some(center.longitude),
        inferred_activity: activity,
        movement_type: None,
        distance_m: None,
        top_apps,
        total_screen_seconds,
        activity_confidence: confidence,
        sample_count: members.len() as u32,
    }
}

/// Commute over `samples[from..to]`, bounded by the neighbouring stays.
fn build_commute(
    samples: &[LocationSample],
    prev: Option<Stay>,
    from: usize,
    to: usize,
    next: Option<Stay>,
    sessions: &[ScreenTimeSession],
    config: &TimelineConfig,
) -> Option<ActivitySegment> {
    let moving = &samples[from..to];
    let path: Vec<&LocationSample> = prev
        .map(|p| &samples[p.last])
        .into_iter()
        .chain(moving.iter())
        .chain(next.map(|n| &samples[n.first]))
        .collect();

    if path.len() < 2 {
        return None;
    }

    let started_at = path[0].recorded_at;
    let ended_at = path[path.len() - 1].recorded_at;
    let duration = (ended_at - started_at).num_seconds();
    let points: Vec<GpsPoint> = path.iter().map(|s| s.point()).collect();
    let distance = polyline_length(&points);

    let seg = &config.segment;
    if duration < seg.min_segment_duration_secs.max(1)
        || distance < seg.min_commute_distance_m
        || (moving.is_empty() && duration > seg.max_commute_gap_secs)
    {
        debug!(
            "[Segments] Skipping commute candidate: {}s, {:.0}m, {} moving fixes",
            duration,
            distance,
            moving.len()
        );
        return None;
    }

    let speeds: Vec<f64> = moving.iter().filter_map(|s| s.speed_mps).collect();
    let movement = classify_movement(distance, duration, &speeds, &config.movement);
    let density = sample_density(moving.len(), duration as f64);
    let (top_apps, total_screen_seconds) =
        screen_time_within(sessions, started_at, ended_at, seg.top_apps_limit);

    Some(ActivitySegment {
        started_at,
        ended_at,
        place_label: None,
        place_id: None,
        geohash7: None,
        location_lat: None,
        location_lng: None,
        inferred_activity: InferredActivity::Commute,
        movement_type: Some(movement),
        distance_m: Some(distance),
        top_apps,
        total_screen_seconds,
        activity_confidence: (0.5 + 0.5 * density).clamp(0.05, 1.0),
        sample_count: moving.len() as u32,
    })
}

fn sample_density(count: usize, duration_secs: f64) -> f64 {
    let expected = (duration_secs / EXPECTED_SAMPLE_INTERVAL_SECS).max(1.0);
    (count as f64 / expected).min(1.0)
}

fn accuracy_score(samples: &[LocationSample], max_accuracy: f64) -> f64 {
    let accuracies: Vec<f64> = samples.iter().filter_map(|s| s.accuracy_m).collect();
    if accuracies.is_empty() || max_accuracy <= 0.0 {
        return DEFAULT_ACCURACY_SCORE;
    }
    let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    (1.0 - mean / max_accuracy).clamp(0.0, 1.0)
}

/// Per-app screen seconds clipped to `[start, end)`: top `limit` apps and the total.
fn screen_time_within(
    sessions: &[ScreenTimeSession],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: usize,
) -> (Vec<SegmentApp>, i64) {
    let per_app = sessions
        .iter()
        .map(|s| (s, s.overlap_seconds(start, end)))
        .filter(|(_, secs)| *secs > 0)
        .fold(BTreeMap::new(), |mut acc: BTreeMap<&str, SegmentApp>, (s, secs)| {
            acc.entry(s.app_id.as_str())
                .or_insert_with(|| SegmentApp {
                    app_id: s.app_id.clone(),
                    display_name: s.display_name.clone(),
                    seconds: 0,
                })
                .seconds += secs;
            acc
        });

    let total = per_app.values().map(|a| a.seconds).sum();
    (rank_apps(per_app.into_values().collect(), limit), total)
}

fn rank_apps(mut apps: Vec<SegmentApp>, limit: usize) -> Vec<SegmentApp> {
    apps.sort_by(|a, b| b.seconds.cmp(&a.seconds).then_with(|| a.app_id.cmp(&b.app_id)));
    apps.truncate(limit);
    apps
}

/// Merge adjacent segments at the same place.
///
/// Two segments merge when they are chronologically adjacent, separated by
/// at most `segment_merge_gap_secs`, and [`is_same_place`] matches them.
pub fn merge_segments(segments: Vec<ActivitySegment>, config: &TimelineConfig) -> Vec<ActivitySegment> {
    let mut sorted = segments;
    sorted.sort_by_key(|s| (s.started_at, s.ended_at));
    let input_len = sorted.len();

    let merged = sorted.into_iter().fold(Vec::<ActivitySegment>::new(), |mut acc, seg| {
        match acc.pop() {
            Some(last) => {
                let gap = (seg.started_at - last.ended_at).num_seconds();
                let reason = is_same_place(&last, &seg, config.place_match_radius_m);
                if gap <= config.segment.segment_merge_gap_secs && reason.is_match() {
                    debug!(
                        "[SegmentMerge] Merging {} and {} ({:?})",
                        last.started_at, seg.started_at, reason
                    );
                    acc.push(combine_segments(last, seg, config.segment.top_apps_limit));
                } else {
                    acc.push(last);
                    acc.push(seg);
                }
            }
            None => acc.push(seg),
        }
        acc
    });

    info!("[SegmentMerge] {} segments merged into {}", input_len, merged.len());
    merged
}

fn combine_segments(a: ActivitySegment, b: ActivitySegment, apps_limit: usize) -> ActivitySegment {
    let (wa, wb) = (a.duration_secs().max(0) as f64, b.duration_secs().max(0) as f64);
    let confidence = if wa + wb > 0.0 {
        (a.activity_confidence * wa + b.activity_confidence * wb) / (wa + wb)
    } else {
        (a.activity_confidence + b.activity_confidence) / 2.0
    };

    let started_at = a.started_at.min(b.started_at);
    let ended_at = a.ended_at.max(b.ended_at);
    let distance_m = match (a.distance_m, b.distance_m) {
        (None, None) => None,
        (x, y) => Some(x.unwrap_or(0.0) + y.unwrap_or(0.0)),
    };

    let apps = a
        .top_apps
        .iter()
        .chain(b.top_apps.iter())
        .fold(BTreeMap::new(), |mut acc: BTreeMap<String, SegmentApp>, app| {
            acc.entry(app.app_id.clone())
                .and_modify(|e| e.seconds += app.seconds)
                .or_insert_with(|| app.clone());
            acc
        });

    let total_screen_seconds = a.total_screen_seconds + b.total_screen_seconds;
    let sample_count = a.sample_count + b.sample_count;
    let (primary, secondary) = if wa >= wb { (a, b) } else { (b, a) };
    let place_label = primary
        .meaningful_label()
        .or_else(|| secondary.meaningful_label())
        .map(str::to_string)
        .or(primary.place_label.clone())
        .or(secondary.place_label.clone());

    ActivitySegment {
        started_at,
        ended_at,
        place_label,
        place_id: primary.place_id.or(secondary.place_id),
        geohash7: primary.geohash7.or(secondary.geohash7),
        location_lat: primary.location_lat.or(secondary.location_lat),
        location_lng: primary.location_lng.or(secondary.location_lng),
        inferred_activity: primary.inferred_activity,
        movement_type: primary.movement_type.or(secondary.movement_type),
        distance_m,
        top_apps: rank_apps(apps.into_values().collect(), apps_limit),
        total_screen_seconds,
        activity_confidence: confidence,
        sample_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::places::UserPlace;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn sample(minute: i64, lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(t0() + Duration::minutes(minute), lat, lng)
    }

    fn home_place() -> UserPlace {
        UserPlace {
            id: "home".to_string(),
            label: "Home".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            radius_m: 150.0,
            place_type: PlaceType::Home,
        }
    }

    /// Home for an hour, drive ~5km north over 10 minutes, then an hour at an unknown place.
    fn day_samples() -> Vec<LocationSample> {
        let mut samples = Vec::new();
        for m in (0..=60).step_by(5) {
            samples.push(sample(m, 40.7128, -74.0060));
        }
        for k in 1..=4 {
            samples.push(sample(60 + k * 2, 40.7128 + 0.009 * k as f64, -74.0060));
        }
        for m in (70..=130).step_by(5) {
            samples.push(sample(m, 40.7580, -74.0060));
        }
        samples
    }

    fn segment(start_min: i64, end_min: i64, label: Option<&str>, lat: f64) -> ActivitySegment {
        ActivitySegment {
            started_at: t0() + Duration::minutes(start_min),
            ended_at: t0() + Duration::minutes(end_min),
            place_label: label.map(str::to_string),
            place_id: None,
            geohash7: None,
            location_lat: Some(lat),
            location_lng: Some(-74.0060),
            inferred_activity: InferredActivity::Visiting,
            movement_type: None,
            distance_m: None,
            top_apps: vec![],
            total_screen_seconds: 0,
            activity_confidence: 0.8,
            sample_count: 5,
        }
    }

    #[test]
    fn test_empty_samples_no_segments() {
        let segs = generate_segments(&[], &PlaceDirectory::default(), &[], &TimelineConfig::default());
        assert!(segs.is_empty());
    }

    #[test]
    fn test_stay_commute_stay() {
        let places = PlaceDirectory::new(vec![home_place()], vec![]);
        let segs = generate_segments(&day_samples(), &places, &[], &TimelineConfig::default());

        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].place_label.as_deref(), Some("Home"));
        assert_eq!(segs[0].inferred_activity, InferredActivity::AtHome);
        assert!(segs[1].is_commute());
        assert_eq!(segs[1].movement_type, Some(MovementType::Driving));
        assert!(segs[1].distance_m.unwrap() > 4000.0);
        assert_eq!(segs[2].inferred_activity, InferredActivity::Unknown);
        assert!(segs[2].place_label.is_none());
        assert!(segs[2].geohash7.is_some());
    }

    #[test]
    fn test_segments_ordered_and_positive() {
        let segs = generate_segments(
            &day_samples(),
            &PlaceDirectory::default(),
            &[],
            &TimelineConfig::default(),
        );
        assert!(!segs.is_empty());
        for s in &segs {
            assert!(s.ended_at > s.started_at);
        }
        for w in segs.windows(2) {
            assert!(w[0].started_at <= w[1].started_at);
            assert!(w[0].ended_at <= w[1].started_at);
        }
    }

    #[test]
    fn test_short_stay_dropped() {
        // Three minutes at one place is noise
        let samples = vec![
            sample(0, 40.0, -74.0),
            sample(1, 40.0, -74.0),
            sample(3, 40.0, -74.0),
        ];
        let segs = generate_segments(&samples, &PlaceDirectory::default(), &[], &TimelineConfig::default());
        assert!(segs.is_empty());
    }

    #[test]
    fn test_long_silence_splits_stays_without_commute() {
        // Same spot, but a 5 hour hole: two stays, no commute in between
        let mut samples: Vec<LocationSample> =
            (0..=30).step_by(10).map(|m| sample(m, 40.0, -74.0)).collect();
        samples.extend((330..=360).step_by(10).map(|m| sample(m, 40.0, -74.0)));
        let segs = generate_segments(&samples, &PlaceDirectory::default(), &[], &TimelineConfig::default());
        assert_eq!(segs.len(), 2);
        assert!(segs.iter().all(|s| !s.is_commute()));
    }

    #[test]
    fn test_screen_time_attached() {
        let sessions = vec![
            ScreenTimeSession::new("chat", t0() + Duration::minutes(10), t0() + Duration::minutes(20)),
            ScreenTimeSession::new("mail", t0() + Duration::minutes(30), t0() + Duration::minutes(32)),
            // Extends past the stay: clipped
            ScreenTimeSession::new("video", t0() + Duration::minutes(55), t0() + Duration::minutes(90)),
        ];
        let places = PlaceDirectory::new(vec![home_place()], vec![]);
        let segs = generate_segments(&day_samples(), &places, &sessions, &TimelineConfig::default());
        let home = &segs[0];
        assert_eq!(home.total_screen_seconds, 17 * 60);
        assert_eq!(home.top_apps[0].app_id, "chat");
        assert_eq!(home.top_apps.len(), 3);
    }

    #[test]
    fn test_merge_same_place_segments() {
        // 150m apart, same label, no place id: proximity rule merges them
        let a = segment(0, 30, Some("Cafe"), 40.7128);
        let b = segment(40, 70, Some("Cafe"), 40.7128 + 0.00135);
        let merged = merge_segments(vec![a, b], &TimelineConfig::default());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].duration_secs(), 70 * 60);
        assert_eq!(merged[0].sample_count, 10);
    }

    #[test]
    fn test_merge_keeps_distinct_places() {
        // ~300m apart with different labels
        let a = segment(0, 30, Some("Cafe"), 40.7128);
        let b = segment(40, 70, Some("Library"), 40.7155);
        let merged = merge_segments(vec![a, b], &TimelineConfig::default());
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_respects_gap() {
        let a = segment(0, 30, Some("Cafe"), 40.7128);
        let b = segment(120, 150, Some("Cafe"), 40.7128);
        let merged = merge_segments(vec![a, b], &TimelineConfig::default());
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_commute_legs() {
        let mut a = segment(0, 10, None, 40.0);
        a.inferred_activity = InferredActivity::Commute;
        a.distance_m = Some(800.0);
        a.movement_type = Some(MovementType::Walking);
        let mut b = segment(12, 40, None, 41.0);
        b.inferred_activity = InferredActivity::Commute;
        b.distance_m = Some(9000.0);
        b.movement_type = Some(MovementType::Driving);
        let merged = merge_segments(vec![b, a], &TimelineConfig::default());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].distance_m, Some(9800.0));
        assert_eq!(merged[0].movement_type, Some(MovementType::Driving));
    }
}
