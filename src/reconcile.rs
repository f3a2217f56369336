//! # Timeline Reconciliation
//!
//! Builds the review timeline from three kinds of generated evidence
//! (location blocks, coalesced screen time, workouts) and the user's own
//! "actual" events for the day.
//!
//! User data wins:
//! - a candidate overlapping a categorised user event is dropped
//! - a candidate overlapping an uncategorised ("unknown") user event takes the
//!   user's title and description but keeps its own, evidence-based timing
//! - an unknown user event that no candidate claimed is emitted on its own, so
//!   no user event is ever silently lost

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::blocks::{BlockType, LocationBlock};
use crate::screen_time::{coalesce_sessions, ScreenTimeSession};
use crate::segments::InferredActivity;
use crate::TimelineConfig;

/// Category of a calendar-like record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Unknown,
    Work,
    Sleep,
    Commute,
    Exercise,
    Social,
    Meal,
    Leisure,
    Errand,
    ScreenTime,
    #[serde(other)]
    Other,
}

impl EventCategory {
    fn for_activity(activity: InferredActivity) -> Self {
        match activity {
            InferredActivity::AtHome => EventCategory::Leisure,
            InferredActivity::Working => EventCategory::Work,
            InferredActivity::Visiting => EventCategory::Social,
            InferredActivity::ScreenTime => EventCategory::ScreenTime,
            InferredActivity::Commute => EventCategory::Commute,
            InferredActivity::Unknown => EventCategory::Unknown,
        }
    }
}

/// Evidence stored alongside a user event. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventMeta {
    pub source: Option<String>,
    pub confidence: Option<f64>,
    pub location_label: Option<String>,
    pub notes: Option<String>,
}

/// A user-entered ("actual") event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub category: EventCategory,
    /// Raw JSON evidence bag, as stored by the event store
    #[serde(default)]
    pub meta: Option<String>,
}

impl ScheduledEvent {
    /// Parse `meta`. Malformed JSON is treated as absent.
    pub fn parsed_meta(&self) -> Option<EventMeta> {
        let raw = self.meta.as_deref()?;
        serde_json::from_str(raw)
            .map_err(|e| debug!("[Reconcile] Ignoring meta of event {}: {}", self.id, e))
            .ok()
    }

    fn overlap_seconds(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        (self.end_time.min(end) - self.start_time.max(start)).num_seconds().max(0)
    }
}

/// A workout recorded by a fitness source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub id: String,
    pub activity_type: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub distance_m: Option<f64>,
}

/// Where a time block's evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    Location,
    ScreenTime,
    Workout,
    User,
}

/// A block on the review timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBlock {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub category: EventCategory,
    pub source: BlockSource,
    pub confidence: f64,
    /// The user event whose title this block carries
    pub user_event_id: Option<String>,
    /// Evidence bag
    pub meta: serde_json::Value,
}

impl TimeBlock {
    fn overlaps(&self, event: &ScheduledEvent) -> bool {
        event.overlap_seconds(self.start_time, self.end_time) > 0
    }
}

/// Tuning for reconciliation candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Inactivity that splits screen-time windows (seconds). Default: 15 minutes
    pub screen_time_gap_secs: i64,
    /// Shorter screen-time windows are not proposed (seconds). Default: 5 minutes
    pub min_screen_block_secs: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            screen_time_gap_secs: 15 * 60,
            min_screen_block_secs: 5 * 60,
        }
    }
}

/// One candidate per location block.
pub fn time_blocks_from_location(blocks: &[LocationBlock]) -> Vec<TimeBlock> {
    blocks
        .iter()
        .filter(|b| b.end_time > b.start_time)
        .map(|b| {
            let category = match b.block_type {
                BlockType::Travel => EventCategory::Commute,
                BlockType::Stationary => EventCategory::for_activity(b.dominant_activity),
            };
            let top_apps: Vec<&str> = b.apps.iter().take(3).map(|a| a.app_id.as_str()).collect();
            TimeBlock {
                id: format!("location-{}", b.id),
                title: b.location_label.clone(),
                description: b
                    .is_carried_forward
                    .then(|| "No location data; assumed unchanged".to_string()),
                start_time: b.start_time,
                end_time: b.end_time,
                category,
                source: BlockSource::Location,
                confidence: b.confidence_score,
                user_event_id: None,
                meta: json!({
                    "locationBlockId": b.id,
                    "placeId": b.place_id,
                    "geohash7": b.geohash7,
                    "isCarriedForward": b.is_carried_forward,
                    "sampleCount": b.location_sample_count,
                    "distanceM": b.distance_m,
                    "topApps": top_apps,
                }),
            }
        })
        .collect()
}

/// One candidate per coalesced screen-time window of at least `min_screen_block_secs`.
pub fn time_blocks_from_screen_time(sessions: &[ScreenTimeSession], config: &TimelineConfig) -> Vec<TimeBlock> {
    let rc = &config.reconcile;
    coalesce_sessions(sessions, rc.screen_time_gap_secs)
        .into_iter()
        .filter(|w| (w.end - w.start).num_seconds() >= rc.min_screen_block_secs)
        .map(|w| TimeBlock {
            id: format!("screen-{}", w.start.timestamp()),
            title: match w.top_app_name.as_deref() {
                Some(app) => format!("Screen time: {}", app),
                None => "Screen time".to_string(),
            },
            description: Some(format!("{} pickups", w.pickups)),
            start_time: w.start,
            end_time: w.end,
            category: EventCategory::ScreenTime,
            source: BlockSource::ScreenTime,
            confidence: 0.8,
            user_event_id: None,
            meta: json!({
                "pickups": w.pickups,
                "topApp": w.top_app,
                "topAppName": w.top_app_name,
                "appMinutes": w.app_minutes,
                "totalMinutes": w.total_minutes,
            }),
        })
        .collect()
}

/// One candidate per workout with a valid range.
pub fn time_blocks_from_workouts(workouts: &[Workout]) -> Vec<TimeBlock> {
    workouts
        .iter()
        .filter(|w| w.ended_at > w.started_at)
        .map(|w| TimeBlock {
            id: format!("workout-{}", w.id),
            title: w.activity_type.clone(),
            description: None,
            start_time: w.started_at,
            end_time: w.ended_at,
            category: EventCategory::Exercise,
            source: BlockSource::Workout,
            confidence: 0.95,
            user_event_id: None,
            meta: json!({
                "workoutId": w.id,
                "calories": w.calories,
                "distanceM": w.distance_m,
            }),
        })
        .collect()
}

/// Overlay the user's actual events onto generated candidates.
pub fn reconcile_time_blocks(candidates: Vec<TimeBlock>, actual_events: &[ScheduledEvent]) -> Vec<TimeBlock> {
    let events: Vec<&ScheduledEvent> = actual_events
        .iter()
        .filter(|e| {
            let valid = e.end_time > e.start_time;
            if !valid {
                debug!("[Reconcile] Ignoring event {} with empty range", e.id);
            }
            valid
        })
        .collect();

    let mut sorted = candidates;
    sorted.sort_by_key(|c| (c.start_time, c.end_time));

    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    let mut suppressed = 0usize;
    let mut out = Vec::with_capacity(sorted.len() + events.len());

    for candidate in sorted {
        let overlapping: Vec<&ScheduledEvent> = events
            .iter()
            .copied()
            .filter(|e| candidate.overlaps(e))
            .collect();

        if let Some(user) = overlapping.iter().find(|e| e.category != EventCategory::Unknown) {
            debug!(
                "[Reconcile] '{}' suppressed by user event '{}'",
                candidate.title, user.title
            );
            suppressed += 1;
            continue;
        }

        let best = overlapping
            .iter()
            .copied()
            .filter(|e| !claimed.contains(e.id.as_str()))
            .max_by(|a, b| {
                let oa = a.overlap_seconds(candidate.start_time, candidate.end_time);
                let ob = b.overlap_seconds(candidate.start_time, candidate.end_time);
                oa.cmp(&ob)
                    .then_with(|| b.start_time.cmp(&a.start_time))
                    .then_with(|| b.id.cmp(&a.id))
            });

        match best {
            Some(user) => {
                claimed.insert(user.id.as_str());
                debug!(
                    "[Reconcile] User event '{}' adopts timing of '{}'",
                    user.title, candidate.title
                );
                out.push(TimeBlock {
                    title: user.title.clone(),
                    description: user.description.clone().or(candidate.description),
                    user_event_id: Some(user.id.clone()),
                    ..candidate
                });
            }
            None => out.push(candidate),
        }
    }

    let unmatched: Vec<TimeBlock> = events
        .iter()
        .filter(|e| e.category == EventCategory::Unknown && !claimed.contains(e.id.as_str()))
        .map(|e| user_block(e))
        .collect();
    let unmatched_count = unmatched.len();
    out.extend(unmatched);
    out.sort_by(|a, b| {
        (a.start_time, a.end_time)
            .cmp(&(b.start_time, b.end_time))
            .then_with(|| a.id.cmp(&b.id))
    });

    info!(
        "[Reconcile] {} time blocks ({} suppressed, {} claimed, {} user-only)",
        out.len(),
        suppressed,
        claimed.len(),
        unmatched_count
    );
    out
}

fn user_block(event: &ScheduledEvent) -> TimeBlock {
    let meta = event.parsed_meta();
    TimeBlock {
        id: format!("user-{}", event.id),
        title: event.title.clone(),
        description: event.description.clone(),
        start_time: event.start_time,
        end_time: event.end_time,
        category: event.category,
        source: BlockSource::User,
        confidence: meta.as_ref().and_then(|m| m.confidence).unwrap_or(1.0),
        user_event_id: Some(event.id.clone()),
        meta: meta
            .and_then(|m| serde_json::to_value(m).ok())
            .unwrap_or(serde_json::Value::Null),
    }
}
