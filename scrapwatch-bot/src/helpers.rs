use scrapwatch_db::Session;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap()
    .as_secs() as i64
}

pub fn round1(value: f64) -> f64 {
  (value * 10.0).round() / 10.0
}

pub fn hours_between(earlier: i64, later: i64) -> f64 {
  (later - earlier) as f64 / 3600.0
}

/// "5.2 hours" up to three days, "3.4 days" beyond that.
pub fn format_hours(hours: f64) -> String {
  if hours > 72.0 {
    format!("{} days", round1(hours / 24.0))
  } else {
    format!("{} hours", round1(hours))
  }
}

/// Seconds of play time accumulated on one server since `since`,
/// counting only the part of each session inside [since, now].
/// Open sessions count up to `now`.
pub fn time_played_since(sessions: &[Session], server_id: &str, since: i64, now: i64) -> i64 {
  sessions
    .iter()
    .filter(|s| s.server_id == server_id)
    .map(|s| {
      let stop = s.stop.unwrap_or(now).min(now);
      stop - s.start.max(since)
    })
    .filter(|played| *played > 0)
    .sum()
}
