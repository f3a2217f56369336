//! Collapse adjacent blocks at the same place.
//!
//! Gap filling can leave several blocks at one place back to back. This pass
//! folds them into one block and trims overlaps between different places.

use std::collections::BTreeMap;

use log::{debug, info};

use super::{dominant_activity, sort_apps, weighted_confidence, BlockApp, LocationBlock};
use crate::place_match::{is_same_block_location, MatchReason};
use crate::segments::ActivitySegment;
use crate::TimelineConfig;

/// Merge same-place neighbours and trim overlaps.
///
/// Output is sorted by start time, non-overlapping, and every block has
/// `end_time > start_time`. Running the pass on its own output changes nothing.
pub fn merge_consecutive_blocks(blocks: Vec<LocationBlock>, config: &TimelineConfig) -> Vec<LocationBlock> {
    let input_len = blocks.len();
    let mut sorted: Vec<LocationBlock> = blocks
        .into_iter()
        .filter(|b| b.end_time > b.start_time)
        .collect();
    sorted.sort_by_key(|b| (b.start_time, b.end_time));

    let merged = sorted.into_iter().fold(Vec::<LocationBlock>::with_capacity(input_len), |mut acc, block| {
        let Some(last) = acc.pop() else {
            acc.push(block);
            return acc;
        };

        if let Some(reason) = mergeable(&last, &block, config) {
            log_merge(&last, &block, reason);
            push_combined(&mut acc, combine_blocks(last, block), config);
            return acc;
        }

        let last_end = last.end_time;
        acc.push(last);
        if block.start_time >= last_end {
            acc.push(block);
        } else if block.end_time > last_end {
            debug!(
                "[BlockMerge] Trimming '{}' to start at {}",
                block.location_label, last_end
            );
            let end = block.end_time;
            acc.push(block.with_range(last_end, end));
        } else {
            debug!(
                "[BlockMerge] Dropping '{}' covered by '{}'",
                block.location_label,
                acc.last().map_or("", |b| b.location_label.as_str())
            );
        }
        acc
    });

    if merged.len() != input_len {
        info!("[BlockMerge] {} blocks -> {}", input_len, merged.len());
    }
    merged
}

fn mergeable(a: &LocationBlock, b: &LocationBlock, config: &TimelineConfig) -> Option<MatchReason> {
    let gap = (b.start_time - a.end_time).num_seconds();
    let reason = is_same_block_location(a, b, config.place_match_radius_m);
    (reason.is_match() && gap <= config.gap_fill.max_gap_secs).then_some(reason)
}

/// Push a combined block, folding in earlier neighbours it now matches.
///
/// Combining can change a block's label and point, so the block before it
/// has to be checked again.
fn push_combined(acc: &mut Vec<LocationBlock>, mut block: LocationBlock, config: &TimelineConfig) {
    while let Some(prev) = acc.pop() {
        match mergeable(&prev, &block, config) {
            Some(reason) => {
                log_merge(&prev, &block, reason);
                block = combine_blocks(prev, block);
            }
            None => {
                acc.push(prev);
                break;
            }
        }
    }
    acc.push(block);
}

fn log_merge(a: &LocationBlock, b: &LocationBlock, reason: MatchReason) {
    debug!(
        "[BlockMerge] Merging '{}' and '{}' ({:?})",
        a.location_label, b.location_label, reason
    );
}

fn same_segment(a: &ActivitySegment, b: &ActivitySegment) -> bool {
    a.started_at == b.started_at && a.ended_at == b.ended_at
}

/// True when `b` lies inside `a` and carries no segment or summary `a` lacks.
fn is_repeat_of(a: &LocationBlock, b: &LocationBlock) -> bool {
    b.start_time >= a.start_time
        && b.end_time <= a.end_time
        && b.segments.iter().all(|s| a.segments.iter().any(|x| same_segment(x, s)))
        && b.summary_ids.iter().all(|id| a.summary_ids.contains(id))
}

/// Combine two same-place blocks; `a` starts no later than `b`.
fn combine_blocks(a: LocationBlock, b: LocationBlock) -> LocationBlock {
    if is_repeat_of(&a, &b) {
        let apps = if a.apps == b.apps { a.apps } else { merge_apps(a.apps, b.apps) };
        return LocationBlock {
            apps,
            is_carried_forward: a.is_carried_forward && b.is_carried_forward,
            has_user_feedback: a.has_user_feedback || b.has_user_feedback,
            is_locked: a.is_locked || b.is_locked,
            ..a
        };
    }

    let start = a.start_time.min(b.start_time);
    let end = a.end_time.max(b.end_time);
    let (a_secs, b_secs) = (a.duration_secs(), b.duration_secs());

    // Identity comes from the block that names a place, else the longer one
    let a_primary = match (a.meaningful_label().is_some(), b.meaningful_label().is_some()) {
        (true, false) => true,
        (false, true) => false,
        _ => a_secs >= b_secs,
    };
    let (primary, other) = if a_primary { (&a, &b) } else { (&b, &a) };

    let location_label = primary.location_label.clone();
    let inferred_place = primary.inferred_place.clone().or_else(|| other.inferred_place.clone());
    let place_id = primary.place_id.clone().or_else(|| other.place_id.clone());
    let geohash7 = primary.geohash7.clone().or_else(|| other.geohash7.clone());
    let point = primary.point().or_else(|| other.point());
    let movement_type = primary.movement_type.or(other.movement_type);

    let confidence = weighted_confidence([(a.confidence_score, a_secs), (b.confidence_score, b_secs)]);
    let activity = dominant_activity([(a.dominant_activity, a_secs), (b.dominant_activity, b_secs)]);

    // Segments both blocks hold count once
    let (shared_samples, shared_distance) = b
        .segments
        .iter()
        .filter(|s| a.segments.iter().any(|x| same_segment(x, s)))
        .fold((0u32, 0.0), |(samples, distance), s| {
            (samples + s.sample_count, distance + s.distance_m.unwrap_or(0.0))
        });
    let distance_m = match (a.distance_m, b.distance_m) {
        (None, None) => None,
        (x, y) => Some((x.unwrap_or(0.0) + y.unwrap_or(0.0) - shared_distance).max(0.0)),
    };
    let location_sample_count =
        a.location_sample_count + b.location_sample_count.saturating_sub(shared_samples);

    let mut summary_ids = a.summary_ids;
    for id in b.summary_ids {
        if !summary_ids.contains(&id) {
            summary_ids.push(id);
        }
    }
    let mut segments = a.segments;
    segments.extend(b.segments);
    segments.sort_by_key(|s| (s.started_at, s.ended_at));
    segments.dedup_by(|x, y| same_segment(x, y));

    LocationBlock {
        id: a.id,
        block_type: a.block_type,
        location_label,
        inferred_place,
        place_id,
        geohash7,
        latitude: point.map(|p| p.latitude),
        longitude: point.map(|p| p.longitude),
        confidence_score: confidence,
        start_time: start,
        end_time: end,
        duration_minutes: (end - start).num_minutes(),
        dominant_activity: activity,
        apps: merge_apps(a.apps, b.apps),
        segments,
        summary_ids,
        is_carried_forward: a.is_carried_forward && b.is_carried_forward,
        location_sample_count,
        distance_m,
        movement_type,
        has_user_feedback: a.has_user_feedback || b.has_user_feedback,
        is_locked: a.is_locked || b.is_locked,
    }
}

/// Sum app usage per app id, concatenating sessions.
///
/// A session that appears in both inputs (overlapping blocks) counts once.
fn merge_apps(a: Vec<BlockApp>, b: Vec<BlockApp>) -> Vec<BlockApp> {
    let per_app = a
        .into_iter()
        .chain(b)
        .fold(BTreeMap::new(), |mut acc: BTreeMap<String, BlockApp>, app| {
            match acc.remove(&app.app_id) {
                Some(existing) => {
                    let mut sessions = existing.sessions;
                    sessions.extend(app.sessions);
                    sessions.sort();
                    sessions.dedup();
                    let minutes = sessions
                        .iter()
                        .map(|s| (s.end - s.start).num_seconds() as f64 / 60.0)
                        .sum();
                    acc.insert(
                        existing.app_id.clone(),
                        BlockApp {
                            app_id: existing.app_id,
                            display_name: existing.display_name.or(app.display_name),
                            minutes,
                            sessions,
                        },
                    );
                }
                None => {
                    acc.insert(app.app_id.clone(), app);
                }
            }
            acc
        });
    sort_apps(per_app.into_values().collect())
}
