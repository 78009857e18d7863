use super::models::{
    ActivityBucket, ArtistPlaytime, HistorySummary, NewPlay, TrackPlays, TrackSkipRate,
};
use super::{Database, Result};
use crate::normalize::{parse_duration, RawRecord};
use rusqlite::params;

impl Database {
    /// Insert one play. Returns false when the dedupe index rejected it.
    pub fn insert_play(&self, p: &NewPlay) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO plays (
                timestamp, track_name, artist, album, platform,
                duration, ms_played, country, shuffle, skipped
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                p.timestamp,
                p.track_name,
                p.artist,
                p.album,
                p.platform,
                p.duration,
                p.ms_played,
                p.country,
                p.shuffle,
                p.skipped,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn count_plays(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM plays", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Rows usable for model training: every core field present and the
    /// duration in valid `MM:SS` form. The duration filter runs here so the
    /// pipeline only ever sees pattern-valid strings from the bulk path.
    pub fn training_records(&self) -> Result<Vec<RawRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, artist, track_name, album, platform, duration, skipped
             FROM plays
             WHERE timestamp IS NOT NULL
               AND artist IS NOT NULL
               AND track_name IS NOT NULL
               AND duration IS NOT NULL
               AND skipped IS NOT NULL
             ORDER BY timestamp",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(RawRecord {
                    timestamp: row.get(0)?,
                    artist: row.get(1)?,
                    track_name: row.get(2)?,
                    album: row.get(3)?,
                    platform: row.get(4)?,
                    duration: row.get(5)?,
                    skipped: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records
            .into_iter()
            .filter(|r| parse_duration(&r.duration).is_some())
            .collect())
    }

    pub fn top_tracks(&self, limit: usize) -> Result<Vec<TrackPlays>> {
        let mut stmt = self.conn.prepare(
            "SELECT track_name, artist, COUNT(*) AS play_count
             FROM plays
             WHERE track_name IS NOT NULL
             GROUP BY track_name, artist
             ORDER BY play_count DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(TrackPlays {
                    track_name: row.get(0)?,
                    artist: row.get(1)?,
                    play_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn artist_playtime(&self, limit: usize) -> Result<Vec<ArtistPlaytime>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist, COUNT(*) AS total_plays,
                    ROUND(SUM(ms_played) / 3600000.0, 2) AS total_hours
             FROM plays
             WHERE artist IS NOT NULL
             GROUP BY artist
             ORDER BY total_hours DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ArtistPlaytime {
                    artist: row.get(0)?,
                    total_plays: row.get(1)?,
                    total_hours: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per-track skip rates over tracks with at least `min_plays` plays.
    pub fn track_skip_rates(&self, min_plays: i64, limit: usize) -> Result<Vec<TrackSkipRate>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist, track_name, COUNT(*) AS total_plays,
                    SUM(CASE WHEN skipped = 'Yes' THEN 1 ELSE 0 END) AS skips,
                    ROUND(SUM(CASE WHEN skipped = 'Yes' THEN 1 ELSE 0 END) * 100.0
                          / COUNT(*), 1) AS skip_rate
             FROM plays
             WHERE track_name IS NOT NULL
             GROUP BY artist, track_name
             HAVING total_plays >= ?1
             ORDER BY skips DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![min_plays, limit as i64], |row| {
                Ok(TrackSkipRate {
                    artist: row.get(0)?,
                    track_name: row.get(1)?,
                    total_plays: row.get(2)?,
                    skips: row.get(3)?,
                    skip_rate_percent: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn history_summary(&self) -> Result<HistorySummary> {
        let summary = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT track_name),
                    COUNT(DISTINCT artist),
                    COALESCE(SUM(ms_played) / 3600000.0, 0.0),
                    MIN(timestamp),
                    MAX(timestamp)
             FROM plays",
            [],
            |row| {
                Ok(HistorySummary {
                    total_plays: row.get(0)?,
                    unique_tracks: row.get(1)?,
                    unique_artists: row.get(2)?,
                    total_hours: row.get(3)?,
                    first_timestamp: row.get(4)?,
                    last_timestamp: row.get(5)?,
                })
            },
        )?;
        Ok(summary)
    }

    /// Play counts bucketed by hour of day and day of week. SQLite's `%w`
    /// weekday is Sunday=0; the `+ 6) % 7` shift re-bases it to Monday=0 so
    /// the buckets line up with the feature pipeline's convention.
    pub fn activity_by_hour(&self) -> Result<Vec<ActivityBucket>> {
        let mut stmt = self.conn.prepare(
            "SELECT (CAST(strftime('%w', timestamp) AS INTEGER) + 6) % 7 AS dow,
                    CAST(strftime('%H', timestamp) AS INTEGER) AS hour,
                    COUNT(*) AS plays
             FROM plays
             GROUP BY dow, hour
             ORDER BY dow, hour",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ActivityBucket {
                    day_of_week: row.get(0)?,
                    hour: row.get(1)?,
                    plays: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All play timestamps with played milliseconds, time-ordered. Feeds the
    /// session rollup in the stats report.
    pub fn play_times(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, ms_played FROM plays ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(ts: &str, track: &str, artist: &str, skipped: &str, ms: i64) -> NewPlay {
        NewPlay {
            timestamp: ts.to_string(),
            track_name: track.to_string(),
            artist: Some(artist.to_string()),
            album: Some("Album".to_string()),
            platform: Some("android".to_string()),
            duration: format!("{}:{:02}", ms / 60000, (ms / 1000) % 60),
            ms_played: ms,
            country: Some("DE".to_string()),
            shuffle: Some("No".to_string()),
            skipped: Some(skipped.to_string()),
        }
    }

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_play(&play("2023-06-10 10:00:00", "T1", "A", "No", 200_000))
            .unwrap();
        db.insert_play(&play("2023-06-10 10:04:00", "T1", "A", "Yes", 30_000))
            .unwrap();
        db.insert_play(&play("2023-06-10 10:08:00", "T2", "B", "No", 180_000))
            .unwrap();
        db
    }

    #[test]
    fn test_insert_dedupe() {
        let db = Database::open_in_memory().unwrap();
        let p = play("2023-06-10 10:00:00", "T1", "A", "No", 200_000);
        assert!(db.insert_play(&p).unwrap());
        assert!(!db.insert_play(&p).unwrap());
        assert_eq!(db.count_plays().unwrap(), 1);
    }

    #[test]
    fn test_training_records_filters_invalid() {
        let db = seeded_db();
        // Null skipped flag — excluded
        let mut no_label = play("2023-06-10 11:00:00", "T3", "C", "No", 100_000);
        no_label.skipped = None;
        db.insert_play(&no_label).unwrap();
        // Malformed duration string — excluded
        let mut bad_duration = play("2023-06-10 12:00:00", "T4", "C", "No", 100_000);
        bad_duration.duration = "3m20s".to_string();
        db.insert_play(&bad_duration).unwrap();

        let records = db.training_records().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.skipped.is_some()));
    }

    #[test]
    fn test_top_tracks_ordering() {
        let db = seeded_db();
        let top = db.top_tracks(10).unwrap();
        assert_eq!(top[0].track_name, "T1");
        assert_eq!(top[0].play_count, 2);
    }

    #[test]
    fn test_artist_playtime_hours() {
        let db = seeded_db();
        let playtime = db.artist_playtime(10).unwrap();
        assert_eq!(playtime[0].artist, "A");
        assert_eq!(playtime[0].total_plays, 2);
        assert!(playtime[0].total_hours > 0.0);
    }

    #[test]
    fn test_skip_rates_threshold() {
        let db = seeded_db();
        assert!(db.track_skip_rates(5, 20).unwrap().is_empty());
        let rates = db.track_skip_rates(2, 20).unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].track_name, "T1");
        assert_eq!(rates[0].skips, 1);
        assert!((rates[0].skip_rate_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_activity_weekday_shift() {
        let db = Database::open_in_memory().unwrap();
        // 2023-06-10 Saturday, 2023-06-11 Sunday, 2023-06-12 Monday
        db.insert_play(&play("2023-06-10 10:00:00", "T1", "A", "No", 200_000))
            .unwrap();
        db.insert_play(&play("2023-06-10 10:30:00", "T2", "A", "No", 200_000))
            .unwrap();
        db.insert_play(&play("2023-06-11 21:00:00", "T1", "A", "No", 200_000))
            .unwrap();
        db.insert_play(&play("2023-06-12 08:00:00", "T1", "A", "No", 200_000))
            .unwrap();

        let activity = db.activity_by_hour().unwrap();
        assert_eq!(
            activity,
            vec![
                ActivityBucket { day_of_week: 0, hour: 8, plays: 1 },
                ActivityBucket { day_of_week: 5, hour: 10, plays: 2 },
                ActivityBucket { day_of_week: 6, hour: 21, plays: 1 },
            ]
        );
    }

    #[test]
    fn test_history_summary() {
        let db = seeded_db();
        let summary = db.history_summary().unwrap();
        assert_eq!(summary.total_plays, 3);
        assert_eq!(summary.unique_tracks, 2);
        assert_eq!(summary.unique_artists, 2);
        assert_eq!(summary.first_timestamp.as_deref(), Some("2023-06-10 10:00:00"));
    }
}
