/// Data for inserting one play row (ingest phase).
#[derive(Debug, Clone)]
pub struct NewPlay {
    /// Naive wall-clock timestamp, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub track_name: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub platform: Option<String>,
    /// `MM:SS` rendering of `ms_played`.
    pub duration: String,
    pub ms_played: i64,
    pub country: Option<String>,
    pub shuffle: Option<String>,
    pub skipped: Option<String>,
}

/// Play counts for one track (most-played ranking).
#[derive(Debug, Clone)]
pub struct TrackPlays {
    pub track_name: String,
    pub artist: Option<String>,
    pub play_count: i64,
}

/// Total listening time for one artist.
#[derive(Debug, Clone)]
pub struct ArtistPlaytime {
    pub artist: String,
    pub total_plays: i64,
    pub total_hours: f64,
}

/// Skip behavior for one track (tracks with enough plays to matter).
#[derive(Debug, Clone)]
pub struct TrackSkipRate {
    pub artist: Option<String>,
    pub track_name: String,
    pub total_plays: i64,
    pub skips: i64,
    pub skip_rate_percent: f64,
}

/// Play count for one hour × weekday bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityBucket {
    /// Monday=0 .. Sunday=6, matching the feature pipeline's convention.
    pub day_of_week: i64,
    pub hour: i64,
    pub plays: i64,
}

/// Whole-history rollup for the stats report.
#[derive(Debug, Clone, Default)]
pub struct HistorySummary {
    pub total_plays: i64,
    pub unique_tracks: i64,
    pub unique_artists: i64,
    pub total_hours: f64,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
}
