//! # Day Timeline Pipeline
//!
//! Wires every stage together for one calendar day:
//!
//! ```text
//! samples ─► segments ─► merged segments ─► blocks ─► labels carried
//!        (stored segments     (or hourly          ─► gaps filled
//!         when no samples)     summaries)         ─► same-place merge
//!                                                 ─► review reconciliation
//! ```
//!
//! The pipeline never fails on data: every stage drops what it cannot use, and
//! an empty day yields an empty timeline.

use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::blocks::{
    build_blocks_from_segments, build_blocks_from_summaries, carry_forward_labels, fill_gaps,
    merge_consecutive_blocks, HourlySummary, LocationBlock,
};
use crate::places::{InferredPlace, PlaceDirectory, UserPlace};
use crate::reconcile::{
    reconcile_time_blocks, time_blocks_from_location, time_blocks_from_screen_time,
    time_blocks_from_workouts, ScheduledEvent, TimeBlock, Workout,
};
use crate::samples::{clip_to_window, normalize_samples, RawLocationSample};
use crate::screen_time::{normalize_sessions, RawScreenTimeSession, ScreenTimeSession};
use crate::segments::{generate_segments, merge_segments, ActivitySegment};
use crate::TimelineConfig;

/// Everything known about one day, as fetched by the host application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayInput {
    /// Inclusive start of the day window
    pub day_start: DateTime<Utc>,
    /// Exclusive end of the day window
    pub day_end: DateTime<Utc>,
    #[serde(default)]
    pub samples: Vec<RawLocationSample>,
    #[serde(default)]
    pub screen_time: Vec<RawScreenTimeSession>,
    /// Segments computed by an earlier pass, used when there are no samples
    #[serde(default)]
    pub stored_segments: Vec<ActivitySegment>,
    #[serde(default)]
    pub hourly_summaries: Vec<HourlySummary>,
    #[serde(default)]
    pub user_places: Vec<UserPlace>,
    #[serde(default)]
    pub inferred_places: Vec<InferredPlace>,
    /// The user's own events for the day
    #[serde(default)]
    pub actual_events: Vec<ScheduledEvent>,
    #[serde(default)]
    pub workouts: Vec<Workout>,
}

impl DayInput {
    /// An input with a window and no data.
    pub fn new(day_start: DateTime<Utc>, day_end: DateTime<Utc>) -> Self {
        Self {
            day_start,
            day_end,
            ..Default::default()
        }
    }
}

/// The rendered day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTimeline {
    /// Chronological, non-overlapping
    pub location_blocks: Vec<LocationBlock>,
    /// Review timeline, sorted by start
    pub time_blocks: Vec<TimeBlock>,
    /// Merged segments the blocks were built from
    pub segments: Vec<ActivitySegment>,
}

impl DayTimeline {
    pub fn is_empty(&self) -> bool {
        self.location_blocks.is_empty() && self.time_blocks.is_empty() && self.segments.is_empty()
    }
}

/// Build the timeline for one day.
pub fn build_day_timeline(input: &DayInput, config: &TimelineConfig) -> DayTimeline {
    let start = Instant::now();
    let (day_start, day_end) = (input.day_start, input.day_end);
    if day_end <= day_start {
        warn!(
            "[Timeline] Empty day window {} .. {}, nothing to build",
            day_start, day_end
        );
        return DayTimeline::default();
    }

    let places = PlaceDirectory::new(input.user_places.clone(), input.inferred_places.clone());
    let samples = clip_to_window(&normalize_samples(&input.samples, &config.segment), day_start, day_end);
    let sessions: Vec<ScreenTimeSession> = normalize_sessions(&input.screen_time)
        .into_iter()
        .filter(|s| s.overlap_seconds(day_start, day_end) > 0)
        .collect();

    let generated = generate_segments(&samples, &places, &sessions, config);
    let from_samples = !generated.is_empty();
    let segments = if from_samples {
        generated
    } else {
        stored_segments_in_window(&input.stored_segments, day_start, day_end)
    };
    let segments = merge_segments(segments, config);

    // Hourly summaries only stand in when there were no fresh samples
    let blocks = if !from_samples && !input.hourly_summaries.is_empty() {
        build_blocks_from_summaries(&input.hourly_summaries, &segments, &sessions, &places)
    } else {
        build_blocks_from_segments(&segments, &sessions, &places, config)
    };
    let blocks = clip_blocks_to_window(blocks, day_start, day_end);

    let blocks = carry_forward_labels(blocks, config);
    let blocks = fill_gaps(blocks, &sessions, config);
    let location_blocks = merge_consecutive_blocks(blocks, config);

    let mut candidates = time_blocks_from_location(&location_blocks);
    candidates.extend(time_blocks_from_screen_time(&sessions, config));
    candidates.extend(time_blocks_from_workouts(&input.workouts));
    let time_blocks = reconcile_time_blocks(candidates, &input.actual_events);

    info!(
        "[Timeline] {}: {} segments, {} location blocks, {} time blocks in {}ms",
        day_start.date_naive(),
        segments.len(),
        location_blocks.len(),
        time_blocks.len(),
        start.elapsed().as_millis()
    );

    DayTimeline {
        location_blocks,
        time_blocks,
        segments,
    }
}

/// Build many days at once.
#[cfg(feature = "parallel")]
pub fn build_timelines_parallel(inputs: &[DayInput], config: &TimelineConfig) -> Vec<DayTimeline> {
    use rayon::prelude::*;

    let start = Instant::now();
    let timelines: Vec<DayTimeline> = inputs
        .par_iter()
        .map(|input| build_day_timeline(input, config))
        .collect();
    info!(
        "[Timeline] Built {} days in parallel in {}ms",
        timelines.len(),
        start.elapsed().as_millis()
    );
    timelines
}

fn stored_segments_in_window(
    stored: &[ActivitySegment],
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
) -> Vec<ActivitySegment> {
    stored
        .iter()
        .filter(|s| s.ended_at > s.started_at && s.started_at < day_end && s.ended_at > day_start)
        .cloned()
        .collect()
}

fn clip_blocks_to_window(
    blocks: Vec<LocationBlock>,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
) -> Vec<LocationBlock> {
    blocks
        .into_iter()
        .filter_map(|b| {
            let start = b.start_time.max(day_start);
            let end = b.end_time.min(day_end);
            if end <= start {
                return None;
            }
            if start == b.start_time && end == b.end_time {
                Some(b)
            } else {
                Some(b.with_range(start, end))
            }
        })
        .collect()
}
