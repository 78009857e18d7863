//! Aggregate analytics over the stored history, rendered by the `stats`
//! subcommand.

use anyhow::Result;
use chrono::Duration;

use crate::db::models::{
    ActivityBucket, ArtistPlaytime, HistorySummary, TrackPlays, TrackSkipRate,
};
use crate::db::Database;
use crate::normalize::parse_timestamp;
use crate::sessions::SESSION_GAP_MINUTES;

/// Tracks need at least this many plays before their skip rate is reported.
const SKIP_RATE_MIN_PLAYS: i64 = 5;

pub struct HistoryReport {
    pub summary: HistorySummary,
    pub top_tracks: Vec<TrackPlays>,
    pub artist_playtime: Vec<ArtistPlaytime>,
    pub skip_rates: Vec<TrackSkipRate>,
    pub activity: Vec<ActivityBucket>,
    pub session_count: usize,
    pub mean_session_minutes: f64,
}

/// One weekday's rollup of the hour × weekday activity buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekdayActivity {
    pub day_of_week: i64,
    pub total_plays: i64,
    pub peak_hour: i64,
    pub peak_plays: i64,
}

/// Collect the full stats report from the database.
pub fn gather(db: &Database) -> Result<HistoryReport> {
    let summary = db.history_summary()?;
    let top_tracks = db.top_tracks(10)?;
    let artist_playtime = db.artist_playtime(10)?;
    let skip_rates = db.track_skip_rates(SKIP_RATE_MIN_PLAYS, 20)?;
    let activity = db.activity_by_hour()?;

    let (session_count, mean_session_minutes) = session_rollup(&db.play_times()?);

    Ok(HistoryReport {
        summary,
        top_tracks,
        artist_playtime,
        skip_rates,
        activity,
        session_count,
        mean_session_minutes,
    })
}

/// Count listening sessions over stored timestamps (same 30-minute gap rule
/// as the model pipeline) and average the per-session played minutes.
fn session_rollup(play_times: &[(String, i64)]) -> (usize, f64) {
    let gap = Duration::minutes(SESSION_GAP_MINUTES);
    let mut sessions = 0usize;
    let mut total_ms = 0i64;
    let mut previous = None;

    for (ts, ms) in play_times {
        let Some(timestamp) = parse_timestamp(ts) else {
            continue;
        };
        match previous {
            Some(prev) if timestamp - prev <= gap => {}
            _ => sessions += 1,
        }
        previous = Some(timestamp);
        total_ms += ms;
    }

    if sessions == 0 {
        return (0, 0.0);
    }
    let mean_minutes = total_ms as f64 / 60_000.0 / sessions as f64;
    (sessions, mean_minutes)
}

const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Collapse hour × weekday buckets into one line per weekday: total plays and
/// the busiest hour. Weekdays with no plays are omitted.
fn weekday_rollup(activity: &[ActivityBucket]) -> Vec<WeekdayActivity> {
    let mut days: Vec<WeekdayActivity> = Vec::new();
    for bucket in activity {
        match days.iter_mut().find(|d| d.day_of_week == bucket.day_of_week) {
            Some(day) => {
                day.total_plays += bucket.plays;
                if bucket.plays > day.peak_plays {
                    day.peak_hour = bucket.hour;
                    day.peak_plays = bucket.plays;
                }
            }
            None => days.push(WeekdayActivity {
                day_of_week: bucket.day_of_week,
                total_plays: bucket.plays,
                peak_hour: bucket.hour,
                peak_plays: bucket.plays,
            }),
        }
    }
    days.sort_by_key(|d| d.day_of_week);
    days
}

/// Render the report as plain text.
pub fn render(report: &HistoryReport) {
    let s = &report.summary;
    println!("Library: {} plays, {} tracks, {} artists, {:.1} hours",
        s.total_plays, s.unique_tracks, s.unique_artists, s.total_hours);
    if let (Some(first), Some(last)) = (&s.first_timestamp, &s.last_timestamp) {
        println!("History range: {first} — {last}");
    }
    println!(
        "Sessions: {} (mean {:.1} min, {}-minute gap rule)",
        report.session_count, report.mean_session_minutes, SESSION_GAP_MINUTES
    );

    if !report.top_tracks.is_empty() {
        println!();
        println!("Most played tracks:");
        for t in &report.top_tracks {
            println!(
                "  {:>5}  {} — {}",
                t.play_count,
                t.artist.as_deref().unwrap_or("?"),
                t.track_name
            );
        }
    }

    if !report.artist_playtime.is_empty() {
        println!();
        println!("Top artists by hours:");
        for a in &report.artist_playtime {
            println!("  {:>7.1}h  {} ({} plays)", a.total_hours, a.artist, a.total_plays);
        }
    }

    if !report.activity.is_empty() {
        println!();
        println!("Listening activity by weekday:");
        for day in weekday_rollup(&report.activity) {
            println!(
                "  {}  {:>5} plays, busiest {:02}:00 ({} plays)",
                WEEKDAY_NAMES[day.day_of_week as usize],
                day.total_plays,
                day.peak_hour,
                day.peak_plays
            );
        }
    }

    if !report.skip_rates.is_empty() {
        println!();
        println!("Most skipped tracks (≥{SKIP_RATE_MIN_PLAYS} plays):");
        for r in &report.skip_rates {
            println!(
                "  {:>5.1}%  {} — {} ({} of {} plays)",
                r.skip_rate_percent,
                r.artist.as_deref().unwrap_or("?"),
                r.track_name,
                r.skips,
                r.total_plays
            );
        }
    }
}
