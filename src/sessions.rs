//! Listening-session segmentation: an inactivity gap of more than 30 minutes
//! between consecutive plays starts a new session.

use chrono::Duration;

use crate::features::EventFeatures;
use crate::normalize::CanonicalEvent;

/// Gap between consecutive plays that closes a session. The rule is strictly
/// greater-than: a gap of exactly 30 minutes stays in the same session.
pub const SESSION_GAP_MINUTES: i64 = 30;

/// Aggregated features for one listening session. Temporal fields come from
/// the session's first event; popularity fields are means across the session;
/// `duration_seconds` is the sum (the regression target).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFeatures {
    pub hour: u32,
    pub day_of_week: u32,
    pub month: u32,
    pub is_weekend: bool,
    pub artist_popularity: f64,
    pub track_popularity: f64,
    pub duration_seconds: f64,
}

impl SessionFeatures {
    /// Feature row for the duration regressor, in fixed column order.
    /// `duration_seconds` is the target, not a feature.
    pub fn row(&self) -> Vec<f64> {
        vec![
            self.hour as f64,
            self.day_of_week as f64,
            self.month as f64,
            self.is_weekend as u8 as f64,
            self.artist_popularity,
            self.track_popularity,
        ]
    }
}

/// Number of columns in a duration-regressor feature row.
pub const SESSION_FEATURE_COUNT: usize = 6;

/// Segment a time-ordered event sequence into sessions and aggregate each.
///
/// `events` must be sorted ascending by timestamp and `features` must be the
/// aligned per-event feature rows. Single linear pass; session ids are
/// assigned in non-decreasing order matching input order.
pub fn segment(events: &[CanonicalEvent], features: &[EventFeatures]) -> Vec<SessionFeatures> {
    debug_assert_eq!(events.len(), features.len());
    let gap = Duration::minutes(SESSION_GAP_MINUTES);

    let mut sessions: Vec<SessionFeatures> = Vec::new();
    let mut session_size = 0usize;

    for (i, (event, feature)) in events.iter().zip(features).enumerate() {
        let new_session =
            i == 0 || event.timestamp - events[i - 1].timestamp > gap;

        if new_session {
            finalize(&mut sessions, session_size);
            sessions.push(SessionFeatures {
                hour: feature.hour,
                day_of_week: feature.day_of_week,
                month: feature.month,
                is_weekend: feature.is_weekend,
                artist_popularity: 0.0,
                track_popularity: 0.0,
                duration_seconds: 0.0,
            });
            session_size = 0;
        }

        let current = sessions.last_mut().expect("session opened above");
        current.artist_popularity += feature.artist_popularity as f64;
        current.track_popularity += feature.track_popularity as f64;
        current.duration_seconds += event.duration_seconds as f64;
        session_size += 1;
    }

    finalize(&mut sessions, session_size);
    sessions
}

/// Turn the accumulated popularity sums of the most recent session into means.
fn finalize(sessions: &mut [SessionFeatures], size: usize) {
    if size == 0 {
        return;
    }
    if let Some(last) = sessions.last_mut() {
        last.artist_popularity /= size as f64;
        last.track_popularity /= size as f64;
    }
}
