//! Carry-forward over data gaps.
//!
//! Phones stop reporting location when nothing moves, so a quiet evening at
//! home shows up as "no data". Two passes fix that: placeholder-labelled stays
//! inherit the previous stay's place, and genuine gaps between blocks are
//! filled with a lower-confidence copy of the previous stay.

use chrono::Duration;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{aggregate_app_usage, block_id, BlockType, LocationBlock};
use crate::geo_utils::haversine_distance;
use crate::place_match::is_same_block_location;
use crate::screen_time::ScreenTimeSession;
use crate::TimelineConfig;

/// Tuning for carry-forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapFillConfig {
    /// Gaps shorter than this are left alone (seconds). Default: 30 minutes
    pub min_gap_secs: i64,
    /// Gaps longer than this are not bridged (seconds). Default: 16 hours
    pub max_gap_secs: i64,
    /// Subtracted from a gap that ends in a travel block (seconds). Default: 30 minutes
    pub pre_travel_buffer_secs: i64,
    /// Carried-forward confidence is the previous block's times this. Default: 0.6
    pub confidence_decay: f64,
    /// Lower bound on carried-forward confidence. Default: 0.3
    pub confidence_floor: f64,
}

impl Default for GapFillConfig {
    fn default() -> Self {
        Self {
            min_gap_secs: 30 * 60,
            max_gap_secs: 16 * 3600,
            pre_travel_buffer_secs: 30 * 60,
            confidence_decay: 0.6,
            confidence_floor: 0.3,
        }
    }
}

/// Give placeholder-labelled stays the place of the stay right before them.
///
/// Suppressed when the previous block is travel, when the two are more than
/// `max_gap_secs` apart, or when the placeholder block's own coordinates lie
/// outside the match radius of the previous stay.
pub fn carry_forward_labels(blocks: Vec<LocationBlock>, config: &TimelineConfig) -> Vec<LocationBlock> {
    let mut sorted = blocks;
    sorted.sort_by_key(|b| (b.start_time, b.end_time));
    let mut relabelled = 0usize;

    let out = sorted.into_iter().fold(Vec::<LocationBlock>::new(), |mut acc, block| {
        let inherited = match acc.last() {
            Some(prev) if should_inherit_label(prev, &block, config) => {
                relabelled += 1;
                inherit_place(prev, block)
            }
            _ => block,
        };
        acc.push(inherited);
        acc
    });

    if relabelled > 0 {
        info!("[GapFill] Carried labels forward onto {} blocks", relabelled);
    }
    out
}

fn should_inherit_label(prev: &LocationBlock, block: &LocationBlock, config: &TimelineConfig) -> bool {
    if block.is_travel() || prev.is_travel() || block.meaningful_label().is_some() {
        return false;
    }
    if prev.meaningful_label().is_none() {
        return false;
    }
    let gap = (block.start_time - prev.end_time).num_seconds();
    if gap > config.gap_fill.max_gap_secs {
        return false;
    }
    match (prev.point(), block.point()) {
        (Some(a), Some(b)) => haversine_distance(&a, &b) < config.place_match_radius_m,
        _ => true,
    }
}

fn inherit_place(prev: &LocationBlock, block: LocationBlock) -> LocationBlock {
    debug!(
        "[GapFill] '{}' at {} inherits '{}'",
        block.location_label, block.start_time, prev.location_label
    );
    LocationBlock {
        location_label: prev.location_label.clone(),
        inferred_place: prev.inferred_place.clone().or(block.inferred_place),
        place_id: prev.place_id.clone().or(block.place_id),
        geohash7: prev.geohash7.clone().or(block.geohash7),
        latitude: prev.latitude.or(block.latitude),
        longitude: prev.longitude.or(block.longitude),
        ..block
    }
}

/// Insert carried-forward blocks over gaps between consecutive blocks.
///
/// A gap after a labelled stay is filled when, after subtracting the
/// pre-travel buffer if the next block is travel, it lasts between
/// `min_gap_secs` and `max_gap_secs`, and the next block is not a stay at a
/// different place. An unlabelled stay counts as different when both blocks
/// have coordinates that do not match.
pub fn fill_gaps(
    blocks: Vec<LocationBlock>,
    sessions: &[ScreenTimeSession],
    config: &TimelineConfig,
) -> Vec<LocationBlock> {
    let mut sorted = blocks;
    sorted.sort_by_key(|b| (b.start_time, b.end_time));

    let mut out = Vec::with_capacity(sorted.len() * 2);
    let mut filled = 0usize;
    let mut iter = sorted.into_iter().peekable();

    while let Some(block) = iter.next() {
        let gap_block = iter
            .peek()
            .and_then(|next| carried_forward_block(&block, next, sessions, config));
        out.push(block);
        if let Some(gap_block) = gap_block {
            filled += 1;
            out.push(gap_block);
        }
    }

    if filled > 0 {
        info!("[GapFill] Filled {} gaps", filled);
    }
    out
}

fn carried_forward_block(
    prev: &LocationBlock,
    next: &LocationBlock,
    sessions: &[ScreenTimeSession],
    config: &TimelineConfig,
) -> Option<LocationBlock> {
    let gf = &config.gap_fill;
    if prev.is_travel() || prev.meaningful_label().is_none() {
        return None;
    }

    // The user left some time before movement was first detected
    let gap_end = if next.is_travel() {
        next.start_time.checked_sub_signed(Duration::try_seconds(gf.pre_travel_buffer_secs)?)?
    } else {
        next.start_time
    };
    let gap_start = prev.end_time;
    let gap = (gap_end - gap_start).num_seconds();
    if gap < gf.min_gap_secs || gap > gf.max_gap_secs {
        return None;
    }

    // A stay elsewhere ends the carry, whether or not it names a place
    let next_is_placed = !next.is_travel()
        && (next.has_meaningful_location() || (is_located(prev) && is_located(next)));
    if next_is_placed
        && !is_same_block_location(prev, next, config.place_match_radius_m).is_match()
    {
        debug!(
            "[GapFill] Not bridging '{}' -> '{}': user moved",
            prev.location_label, next.location_label
        );
        return None;
    }

    let confidence = (prev.confidence_score * gf.confidence_decay).max(gf.confidence_floor);

    Some(LocationBlock {
        id: block_id("carried", gap_start),
        block_type: BlockType::Stationary,
        location_label: prev.location_label.clone(),
        inferred_place: prev.inferred_place.clone(),
        place_id: prev.place_id.clone(),
        geohash7: prev.geohash7.clone(),
        latitude: prev.latitude,
        longitude: prev.longitude,
        confidence_score: confidence,
        start_time: gap_start,
        end_time: gap_end,
        duration_minutes: (gap_end - gap_start).num_minutes(),
        dominant_activity: prev.dominant_activity,
        apps: aggregate_app_usage(sessions, gap_start, gap_end),
        segments: vec![],
        summary_ids: vec![],
        is_carried_forward: true,
        location_sample_count: 0,
        distance_m: None,
        movement_type: None,
        has_user_feedback: false,
        is_locked: false,
    })
}

fn is_located(block: &LocationBlock) -> bool {
    block.point().is_some() || block.geohash7.is_some()
}
