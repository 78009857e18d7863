//! Event normalization: raw string-typed play records → canonical events.
//!
//! Raw records arrive either from the stored history (bulk training) or from a
//! prediction request (single row). Records that fail timestamp or duration
//! parsing are dropped and counted, never coerced.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

/// Fallback platform for records that don't carry one.
pub const DEFAULT_PLATFORM: &str = "Spotify";

/// Sentinel for missing categorical values. Encoders always include it in their
/// fitted vocabulary, so unseen categories at inference time map here too.
pub const UNKNOWN: &str = "Unknown";

// Durations are only trusted in MM:SS form. Anything else is dropped.
static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d{2})$").unwrap());

/// One raw play record as supplied by a collaborator (history query or
/// prediction payload). All fields are strings; parsing happens here.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub timestamp: String,
    pub artist: String,
    pub track_name: String,
    pub album: Option<String>,
    pub platform: Option<String>,
    /// `MM:SS` string.
    pub duration: String,
    /// `"Yes"` / `"No"`, present on the training path only.
    pub skipped: Option<String>,
}

/// One validated play event. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub timestamp: NaiveDateTime,
    pub artist: String,
    pub track_name: String,
    pub album: String,
    pub platform: String,
    pub duration_seconds: u32,
    pub skipped: Option<bool>,
}

/// Result of normalizing a batch, with drop counts for diagnostics.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub events: Vec<CanonicalEvent>,
    pub dropped_timestamps: usize,
    pub dropped_durations: usize,
}

/// Parse a `MM:SS` duration string to whole seconds.
/// Returns None for anything not matching `^\d+:\d{2}$`.
pub fn parse_duration(s: &str) -> Option<u32> {
    let caps = DURATION_RE.captures(s)?;
    let minutes: u32 = caps.get(1).unwrap().as_str().parse().ok()?;
    let seconds: u32 = caps.get(2).unwrap().as_str().parse().ok()?;
    Some(minutes * 60 + seconds)
}

/// Parse a timestamp using a cascade of accepted formats, always
/// timezone-naive. Offsets (including `Z`) are stripped, not converted.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    // RFC 3339 / ISO with offset: 2023-06-10T14:05:00Z, ...+02:00
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    None
}

/// Map the export's `"Yes"`/`"No"` skip flag. Anything else is unknown.
pub fn parse_skipped(s: &str) -> Option<bool> {
    match s {
        "Yes" => Some(true),
        "No" => Some(false),
        _ => None,
    }
}

/// Normalize one record, reporting which field made it unusable.
fn normalize_record(record: &RawRecord) -> Result<CanonicalEvent, DropReason> {
    let timestamp = parse_timestamp(&record.timestamp).ok_or(DropReason::Timestamp)?;
    let duration_seconds = parse_duration(&record.duration).ok_or(DropReason::Duration)?;

    Ok(CanonicalEvent {
        timestamp,
        artist: record.artist.clone(),
        track_name: record.track_name.clone(),
        album: record
            .album
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string()),
        platform: record
            .platform
            .clone()
            .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
        duration_seconds,
        skipped: record.skipped.as_deref().and_then(parse_skipped),
    })
}

enum DropReason {
    Timestamp,
    Duration,
}

/// Normalize a batch of raw records, dropping (and counting) the invalid ones.
pub fn normalize_batch(records: &[RawRecord]) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();

    for record in records {
        match normalize_record(record) {
            Ok(event) => outcome.events.push(event),
            Err(DropReason::Timestamp) => outcome.dropped_timestamps += 1,
            Err(DropReason::Duration) => outcome.dropped_durations += 1,
        }
    }

    if outcome.dropped_timestamps > 0 {
        log::warn!(
            "Dropped {} records with unparseable timestamps",
            outcome.dropped_timestamps
        );
    }
    if outcome.dropped_durations > 0 {
        log::warn!(
            "Dropped {} records with invalid durations",
            outcome.dropped_durations
        );
    }

    outcome
}
