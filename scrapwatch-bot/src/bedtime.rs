//! Sleep pattern mining over stored play sessions.
//!
//! A "bedtime" is the end of a session that is followed by a plausible
//! night of rest: the next session starts 5 to 12 hours later, and the
//! session itself began less than 5 hours after the previous one ended
//! (so it caps off an evening of play rather than a lone login).

use chrono::{Local, Offset};
use scrapwatch_db::Session;

use crate::helpers::round1;

/// Gap before a candidate session must be shorter than this (hours).
const MAX_GAP_BEFORE_HRS: f64 = 5.0;
/// The rest gap after a candidate must be longer than this (hours)...
const MIN_GAP_AFTER_HRS: f64 = 5.0;
/// ...and shorter than this (hours).
const MAX_GAP_AFTER_HRS: f64 = 12.0;
/// Candidates whose end time of day strays further than this from the
/// mean are dropped as outliers (hours).
const MAX_BEDTIME_DEVIATION_HRS: f64 = 4.0;
/// At most this many of the most recent candidates feed the averages.
const MAX_BEDTIME_SESSIONS: usize = 3;
/// Minimum completed sessions to attempt an analysis.
const MIN_SESSIONS: usize = 3;
/// Minimum surviving candidates for a result.
const MIN_BEDTIME_SESSIONS: usize = 2;

/// Sleep statistics derived from a player's session history.
#[derive(Debug, Clone, PartialEq)]
pub struct BedtimeStats {
    /// The sessions whose ends were taken as bedtimes
    pub sessions: Vec<Session>,
    /// Timezone offset the displayed times are shifted by
    pub tz_offset_hrs: i32,
    /// Mean end time of day, "HH.MM"
    pub average_bedtime: String,
    pub average_bedtime_deviation_hrs: f64,
    /// Mean start time of day of the following session, "HH.MM"
    pub average_wake_time: String,
    pub average_wake_deviation_hrs: f64,
    pub average_sleep_hrs: f64,
    pub min_sleep_hrs: f64,
}

/// A completed session together with its rest gap.
#[derive(Debug, Clone)]
struct Candidate {
    session: Session,
    stop: i64,
    next_start: i64,
    gap_after_hrs: f64,
}

/// Analyze using the host's local timezone offset.
pub fn analyze(sessions: &[Session]) -> Option<BedtimeStats> {
    let offset_secs = Local::now().offset().fix().local_minus_utc();
    analyze_at_offset(sessions, offset_secs / 3600)
}

/// Deterministic core; the offset is passed in whole hours.
pub fn analyze_at_offset(sessions: &[Session], tz_offset_hrs: i32) -> Option<BedtimeStats> {
    let mut completed: Vec<(i64, i64, &Session)> = sessions
        .iter()
        .filter_map(|session| session.stop.map(|stop| (session.start, stop, session)))
        .collect();
    completed.sort_by_key(|(start, _, _)| *start);

    if completed.len() < MIN_SESSIONS {
        return None;
    }

    // Only interior sessions qualify: the gaps on both sides are needed
    let mut candidates: Vec<Candidate> = Vec::new();
    for window in completed.windows(3) {
        let (_, prev_stop, _) = window[0];
        let (start, stop, session) = window[1];
        let (next_start, _, _) = window[2];

        let gap_before_hrs = (start - prev_stop) as f64 / 3600.0;
        let gap_after_hrs = (next_start - stop) as f64 / 3600.0;

        if gap_before_hrs < MAX_GAP_BEFORE_HRS
            && gap_after_hrs > MIN_GAP_AFTER_HRS
            && gap_after_hrs < MAX_GAP_AFTER_HRS
        {
            candidates.push(Candidate {
                session: session.clone(),
                stop,
                next_start,
                gap_after_hrs,
            });
        }
    }

    if candidates.len() > MIN_BEDTIME_SESSIONS {
        let bedtimes: Vec<f64> = candidates
            .iter()
            .map(|candidate| folded_time_of_day(candidate.stop))
            .collect();
        let center = mean(&bedtimes);
        candidates.retain(|candidate| {
            (folded_time_of_day(candidate.stop) - center).abs() <= MAX_BEDTIME_DEVIATION_HRS
        });
    }

    // windows() kept start order, so the most recent sit at the end
    if candidates.len() > MAX_BEDTIME_SESSIONS {
        candidates.drain(..candidates.len() - MAX_BEDTIME_SESSIONS);
    }

    if candidates.len() < MIN_BEDTIME_SESSIONS {
        return None;
    }

    let bedtimes: Vec<f64> = candidates
        .iter()
        .map(|candidate| folded_time_of_day(candidate.stop))
        .collect();
    let wake_times: Vec<f64> = candidates
        .iter()
        .map(|candidate| folded_time_of_day(candidate.next_start))
        .collect();
    let sleeps: Vec<f64> = candidates
        .iter()
        .map(|candidate| candidate.gap_after_hrs)
        .collect();

    let bedtime_mean = mean(&bedtimes);
    let wake_mean = mean(&wake_times);
    let min_sleep = sleeps.iter().copied().fold(f64::INFINITY, f64::min);

    Some(BedtimeStats {
        sessions: candidates
            .iter()
            .map(|candidate| candidate.session.clone())
            .collect(),
        tz_offset_hrs,
        average_bedtime: format_time_of_day(bedtime_mean, tz_offset_hrs),
        average_bedtime_deviation_hrs: round1(mean_abs_deviation(&bedtimes, bedtime_mean)),
        average_wake_time: format_time_of_day(wake_mean, tz_offset_hrs),
        average_wake_deviation_hrs: round1(mean_abs_deviation(&wake_times, wake_mean)),
        average_sleep_hrs: round1(mean(&sleeps)),
        min_sleep_hrs: round1(min_sleep),
    })
}

/// Time of day in fractional hours, with hours past noon folded to
/// negative values so times around midnight average sensibly
/// (23:00 becomes -1.0 while 01:00 stays 1.0).
fn folded_time_of_day(timestamp: i64) -> f64 {
    let hours = timestamp.rem_euclid(86_400) as f64 / 3600.0;
    if hours > 12.0 { hours - 24.0 } else { hours }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_abs_deviation(values: &[f64], center: f64) -> f64 {
    values.iter().map(|value| (value - center).abs()).sum::<f64>() / values.len() as f64
}

/// Render a folded time of day as "HH.MM" shifted into the timezone.
fn format_time_of_day(folded_hours: f64, tz_offset_hrs: i32) -> String {
    let local = (folded_hours + f64::from(tz_offset_hrs)).rem_euclid(24.0);
    let total_minutes = (local * 60.0).round() as i64;
    let hours = (total_minutes / 60).rem_euclid(24);
    let minutes = total_minutes % 60;
    format!("{hours:02}.{minutes:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;
    /// 2024-01-01T00:00:00Z
    const BASE: i64 = 1_704_067_200;

    fn at(day: i64, hour: f64) -> i64 {
        BASE + day * DAY + (hour * 3600.0) as i64
    }

    fn session(id: &str, start: i64, stop: Option<i64>) -> Session {
        Session {
            id: id.to_string(),
            player_id: "1001".to_string(),
            server_id: "42".to_string(),
            start,
            stop,
        }
    }

    /// Two evenings ending at 23:00 with interposed daytime sessions,
    /// sleeping until 07:00. Produces exactly two candidates.
    fn regular_two_nights() -> Vec<Session> {
        vec![
            session("d0-day", at(0, 14.0), Some(at(0, 17.0))),
            session("d0-eve", at(0, 18.0), Some(at(0, 23.0))),
            session("d1-day", at(1, 7.0), Some(at(1, 13.5))),
            session("d1-eve", at(1, 18.0), Some(at(1, 23.0))),
            session("d2-morn", at(2, 7.0), Some(at(2, 8.0))),
        ]
    }

    #[test]
    fn test_regular_schedule_reports_eight_hours() {
        let stats = analyze_at_offset(&regular_two_nights(), 0).unwrap();
        assert_eq!(stats.average_bedtime, "23.00");
        assert_eq!(stats.average_bedtime_deviation_hrs, 0.0);
        assert_eq!(stats.average_wake_time, "07.00");
        assert_eq!(stats.average_wake_deviation_hrs, 0.0);
        assert_eq!(stats.average_sleep_hrs, 8.0);
        assert_eq!(stats.min_sleep_hrs, 8.0);
        let ids: Vec<&str> = stats.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["d0-eve", "d1-eve"]);
    }

    #[test]
    fn test_timezone_shifts_displayed_times_only() {
        let stats = analyze_at_offset(&regular_two_nights(), 2).unwrap();
        assert_eq!(stats.average_bedtime, "01.00");
        assert_eq!(stats.average_wake_time, "09.00");
        assert_eq!(stats.average_sleep_hrs, 8.0);
        assert_eq!(stats.tz_offset_hrs, 2);

        let stats = analyze_at_offset(&regular_two_nights(), -3).unwrap();
        assert_eq!(stats.average_bedtime, "20.00");
        assert_eq!(stats.average_wake_time, "04.00");
    }

    #[test]
    fn test_unsorted_input_and_open_sessions_are_handled() {
        let mut sessions = regular_two_nights();
        sessions.swap(0, 3);
        sessions.swap(1, 4);
        sessions.push(session("open", at(2, 18.0), None));
        let stats = analyze_at_offset(&sessions, 0).unwrap();
        assert_eq!(stats.average_sleep_hrs, 8.0);
        assert_eq!(stats.average_bedtime, "23.00");
    }

    #[test]
    fn test_too_few_completed_sessions() {
        let sessions = vec![
            session("a", at(0, 18.0), Some(at(0, 23.0))),
            session("b", at(1, 7.0), Some(at(1, 13.5))),
            session("open", at(1, 18.0), None),
        ];
        assert!(analyze_at_offset(&sessions, 0).is_none());
    }

    #[test]
    fn test_no_qualifying_gaps() {
        // The interior session is followed by a 20 hour gap
        let sessions = vec![
            session("a", at(0, 10.0), Some(at(0, 11.0))),
            session("b", at(0, 12.0), Some(at(0, 15.0))),
            session("c", at(1, 11.0), Some(at(1, 12.0))),
        ];
        assert!(analyze_at_offset(&sessions, 0).is_none());
    }

    #[test]
    fn test_rest_gap_bounds_are_exclusive() {
        // Wake moved to 04:00: exactly 5 hours of rest, not enough
        let mut sessions = regular_two_nights();
        sessions[4] = session("d2-morn", at(2, 4.0), Some(at(2, 5.0)));
        assert!(analyze_at_offset(&sessions, 0).is_none());

        // Wake moved to 11:00: exactly 12 hours, too long
        let mut sessions = regular_two_nights();
        sessions[4] = session("d2-morn", at(2, 11.0), Some(at(2, 12.0)));
        assert!(analyze_at_offset(&sessions, 0).is_none());

        // Wake at 04:12 leaves 5.2 hours, back inside the bounds
        let mut sessions = regular_two_nights();
        sessions[4] = session("d2-morn", at(2, 4.2), Some(at(2, 5.0)));
        let stats = analyze_at_offset(&sessions, 0).unwrap();
        assert_eq!(stats.min_sleep_hrs, 5.2);
    }

    #[test]
    fn test_evening_warmup_gap_bound_is_exclusive() {
        // The second evening now starts exactly 5 hours after the
        // daytime session ended, so it no longer counts
        let mut sessions = regular_two_nights();
        sessions[2] = session("d1-day", at(1, 7.0), Some(at(1, 13.0)));
        assert!(analyze_at_offset(&sessions, 0).is_none());
    }

    #[test]
    fn test_bedtimes_across_midnight_average_correctly() {
        let sessions = vec![
            session("d0-day", at(0, 16.0), Some(at(0, 19.5))),
            session("d0-eve", at(0, 20.0), Some(at(0, 23.5))),
            session("d1-day", at(1, 7.5), Some(at(1, 13.0))),
            session("d1-eve", at(1, 17.0), Some(at(1, 20.5))),
            session("d1-late", at(1, 21.0), Some(at(1, 24.5))),
            session("d2-morn", at(2, 8.5), Some(at(2, 9.0))),
        ];
        let stats = analyze_at_offset(&sessions, 0).unwrap();
        // Ends at 23:30 and 00:30 average out to midnight, not noon
        assert_eq!(stats.average_bedtime, "00.00");
        assert_eq!(stats.average_bedtime_deviation_hrs, 0.5);
        assert_eq!(stats.average_wake_time, "08.00");
        assert_eq!(stats.average_wake_deviation_hrs, 0.5);
        assert_eq!(stats.average_sleep_hrs, 8.0);
    }

    #[test]
    fn test_outlier_bedtime_is_dropped() {
        let sessions = vec![
            session("d0-day", at(0, 18.0), Some(at(0, 21.5))),
            // Overnight binge ending at 08:00, far from the 23:00 norm
            session("d1-binge", at(1, 1.0), Some(at(1, 8.0))),
            session("d1-day", at(1, 13.5), Some(at(1, 17.0))),
            session("d1-eve", at(1, 18.0), Some(at(1, 23.0))),
            session("d2-day", at(2, 7.0), Some(at(2, 13.5))),
            session("d2-eve", at(2, 18.0), Some(at(2, 23.0))),
            session("d3-morn", at(3, 7.0), Some(at(3, 8.0))),
        ];
        let stats = analyze_at_offset(&sessions, 0).unwrap();
        assert_eq!(stats.average_bedtime, "23.00");
        assert_eq!(stats.average_sleep_hrs, 8.0);
        let ids: Vec<&str> = stats.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["d1-eve", "d2-eve"]);
    }

    #[test]
    fn test_only_three_most_recent_candidates_count() {
        let mut sessions = Vec::new();
        let wakes = [7.0, 7.0, 7.0, 6.0, 5.0];
        for day in 0..5 {
            sessions.push(session(
                &format!("d{day}-eve"),
                at(day, 18.0),
                Some(at(day, 23.0)),
            ));
            let wake = wakes[day as usize];
            sessions.push(session(
                &format!("d{}-day", day + 1),
                at(day + 1, wake),
                Some(at(day + 1, 13.5)),
            ));
        }
        let stats = analyze_at_offset(&sessions, 0).unwrap();
        assert_eq!(stats.sessions.len(), 3);
        let ids: Vec<&str> = stats.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["d2-eve", "d3-eve", "d4-eve"]);
        // Rest gaps of the kept nights: 8, 7 and 6 hours
        assert_eq!(stats.average_sleep_hrs, 7.0);
        assert_eq!(stats.min_sleep_hrs, 6.0);
        assert_eq!(stats.average_wake_time, "06.00");
        assert_eq!(stats.average_wake_deviation_hrs, 0.7);
    }
}
