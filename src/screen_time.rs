//! Screen-time sessions and their coalescing into usage windows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimelineError};
use crate::samples::parse_timestamp;

/// A screen-time session as delivered by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScreenTimeSession {
    pub app_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// RFC 3339 timestamp
    pub started_at: String,
    /// RFC 3339 timestamp
    pub ended_at: String,
    #[serde(default)]
    pub pickups: Option<u32>,
}

/// A validated foreground session of one app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenTimeSession {
    pub app_id: String,
    pub display_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Device pickups attributed to this session (one when absent)
    pub pickups: Option<u32>,
}

impl ScreenTimeSession {
    pub fn new(app_id: &str, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            app_id: app_id.to_string(),
            display_name: None,
            started_at,
            ended_at,
            pickups: None,
        }
    }

    /// Validate and convert a raw session.
    pub fn try_from_raw(raw: &RawScreenTimeSession) -> Result<Self> {
        let started_at = parse_timestamp(&raw.started_at)?;
        let ended_at = parse_timestamp(&raw.ended_at)?;
        if ended_at <= started_at || raw.app_id.trim().is_empty() {
            return Err(TimelineError::InvalidTimeRange {
                id: raw.app_id.clone(),
            });
        }
        Ok(Self {
            app_id: raw.app_id.trim().to_string(),
            display_name: raw
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            started_at,
            ended_at,
            pickups: raw.pickups,
        })
    }

    /// Name to show for the app, falling back to its id.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.app_id)
    }

    /// Seconds of this session inside `[start, end)`.
    pub fn overlap_seconds(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let s = self.started_at.max(start);
        let e = self.ended_at.min(end);
        (e - s).num_seconds().max(0)
    }
}

/// Parse and validate raw sessions, sorted by start time.
pub fn normalize_sessions(raw: &[RawScreenTimeSession]) -> Vec<ScreenTimeSession> {
    let mut sessions: Vec<ScreenTimeSession> = raw
        .iter()
        .filter_map(|r| {
            ScreenTimeSession::try_from_raw(r)
                .map_err(|e| debug!("[ScreenTime] Dropping session: {}", e))
                .ok()
        })
        .collect();
    sessions.sort_by_key(|s| (s.started_at, s.ended_at));
    sessions
}

/// A run of screen activity with no inactivity gap above the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenTimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub pickups: u32,
    /// Minutes per app id
    pub app_minutes: BTreeMap<String, f64>,
    /// App with the most minutes in the window
    pub top_app: Option<String>,
    /// Display name of the top app
    pub top_app_name: Option<String>,
    pub total_minutes: f64,
}

impl ScreenTimeWindow {
    fn open(session: &ScreenTimeSession) -> Self {
        Self {
            start: session.started_at,
            end: session.started_at,
            pickups: 0,
            app_minutes: BTreeMap::new(),
            top_app: None,
            top_app_name: None,
            total_minutes: 0.0,
        }
        .absorb(session)
    }

    fn absorb(mut self, session: &ScreenTimeSession) -> Self {
        let minutes = (session.ended_at - session.started_at).num_seconds() as f64 / 60.0;
        *self.app_minutes.entry(session.app_id.clone()).or_insert(0.0) += minutes;
        self.end = self.end.max(session.ended_at);
        self.total_minutes = (self.end - self.start).num_seconds() as f64 / 60.0;
        self.pickups += session.pickups.unwrap_or(1);
        self
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Coalesce sessions into windows separated by more than `gap_secs` of inactivity.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use life_timeline::screen_time::{coalesce_sessions, ScreenTimeSession};
///
/// let at = |h, m| Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap();
/// let sessions = vec![
///     ScreenTimeSession::new("mail", at(9, 0), at(9, 10)),
///     ScreenTimeSession::new("chat", at(9, 20), at(9, 25)),
///     ScreenTimeSession::new("chat", at(11, 0), at(11, 5)),
/// ];
/// let windows = coalesce_sessions(&sessions, 15 * 60);
/// assert_eq!(windows.len(), 2);
/// assert_eq!(windows[0].top_app.as_deref(), Some("mail"));
/// ```
pub fn coalesce_sessions(sessions: &[ScreenTimeSession], gap_secs: i64) -> Vec<ScreenTimeWindow> {
    let mut sorted: Vec<&ScreenTimeSession> = sessions.iter().collect();
    sorted.sort_by_key(|s| (s.started_at, s.ended_at));

    let gap_secs = gap_secs.max(0);
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();

    let mut windows = sorted.into_iter().fold(Vec::<ScreenTimeWindow>::new(), |mut acc, session| {
        names.entry(session.app_id.as_str()).or_insert(session.name());
        match acc.pop() {
            Some(window) if (session.started_at - window.end).num_seconds() <= gap_secs => {
                acc.push(window.absorb(session));
            }
            Some(window) => {
                acc.push(window);
                acc.push(ScreenTimeWindow::open(session));
            }
            None => acc.push(ScreenTimeWindow::open(session)),
        }
        acc
    });

    for window in &mut windows {
        let top = window
            .app_minutes
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(app, _)| app.clone());
        window.top_app_name = top
            .as_deref()
            .and_then(|app| names.get(app))
            .map(|n| n.to_string());
        window.top_app = top;
    }

    info!(
        "[ScreenTime] Coalesced {} sessions into {} windows",
        sessions.len(),
        windows.len()
    );
    windows
}
