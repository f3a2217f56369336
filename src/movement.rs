//! Movement classification for commute segments.
//!
//! Speed bands are deliberately coarse. Phones report speed inconsistently
//! (absent indoors, zero while the GPS is warming up), so the median of the
//! reported values is only trusted when there are enough of them.

use serde::{Deserialize, Serialize};

/// Reported speeds needed before they override distance / duration.
const MIN_REPORTED_SPEEDS: usize = 3;

/// How the user moved during a commute segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Walking,
    Cycling,
    Driving,
}

impl MovementType {
    /// User-facing label ("Walking", "Cycling", "Driving").
    pub fn label(&self) -> &'static str {
        match self {
            MovementType::Walking => "Walking",
            MovementType::Cycling => "Cycling",
            MovementType::Driving => "Driving",
        }
    }
}

/// Speed band thresholds for movement classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Speeds at or below this are walking (m/s). Default: 2.2 (~8 km/h)
    pub walking_max_speed_mps: f64,
    /// Speeds at or below this are cycling (m/s). Default: 6.5 (~23 km/h)
    pub cycling_max_speed_mps: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            walking_max_speed_mps: 2.2,
            cycling_max_speed_mps: 6.5,
        }
    }
}

/// Classify a commute by its speed.
///
/// Uses the median of `reported_speeds` when at least three valid values are
/// present, otherwise the average speed `distance_m / duration_secs`.
///
/// # Example
/// ```
/// use life_timeline::movement::{classify_movement, MovementConfig, MovementType};
///
/// // 10 km in 15 minutes
/// let kind = classify_movement(10_000.0, 900, &[], &MovementConfig::default());
/// assert_eq!(kind, MovementType::Driving);
/// ```
pub fn classify_movement(
    distance_m: f64,
    duration_secs: i64,
    reported_speeds: &[f64],
    config: &MovementConfig,
) -> MovementType {
    let speed = median_speed(reported_speeds).unwrap_or_else(|| {
        if duration_secs <= 0 {
            0.0
        } else {
            distance_m.max(0.0) / duration_secs as f64
        }
    });

    if speed <= config.walking_max_speed_mps {
        MovementType::Walking
    } else if speed <= config.cycling_max_speed_mps {
        MovementType::Cycling
    } else {
        MovementType::Driving
    }
}

fn median_speed(speeds: &[f64]) -> Option<f64> {
    let mut valid: Vec<f64> = speeds
        .iter()
        .copied()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .collect();
    if valid.len() < MIN_REPORTED_SPEEDS {
        return None;
    }
    valid.sort_by(|a, b| a.total_cmp(b));
    let mid = valid.len() / 2;
    Some(if valid.len() % 2 == 0 {
        (valid[mid - 1] + valid[mid]) / 2.0
    } else {
        valid[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_bands_from_distance() {
        let config = MovementConfig::default();
        // 1.2 km in 15 min = 1.33 m/s
        assert_eq!(classify_movement(1200.0, 900, &[], &config), MovementType::Walking);
        // 4 km in 15 min = 4.4 m/s
        assert_eq!(classify_movement(4000.0, 900, &[], &config), MovementType::Cycling);
        // 15 km in 15 min = 16.7 m/s
        assert_eq!(classify_movement(15000.0, 900, &[], &config), MovementType::Driving);
    }

    #[test]
    fn test_zero_duration_is_walking() {
        assert_eq!(
            classify_movement(500.0, 0, &[], &MovementConfig::default()),
            MovementType::Walking
        );
    }

    #[test]
    fn test_reported_speeds_override_average() {
        let config = MovementConfig::default();
        // Average says walking (long dwell at a red light skews it), sensors say driving
        let speeds = [12.0, 14.0, f64::NAN, 13.0, -1.0];
        assert_eq!(classify_movement(1000.0, 900, &speeds, &config), MovementType::Driving);
    }

    #[test]
    fn test_too_few_reported_speeds_ignored() {
        let config = MovementConfig::default();
        assert_eq!(classify_movement(1000.0, 900, &[20.0, 20.0], &config), MovementType::Walking);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median_speed(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
    }
}
