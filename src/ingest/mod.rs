//! Streaming-history JSON export ingestion.
//!
//! A service export is a directory of `*.json` files, each a JSON array of
//! play entries. Entries are mapped to play rows (naive timestamp, `MM:SS`
//! duration string, Yes/No flags) and upserted into the database; the dedupe
//! index makes re-ingesting the same files a no-op.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::db::models::NewPlay;
use crate::db::Database;
use crate::normalize::parse_timestamp;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
}

/// One entry of a streaming-history export file. Field names follow the
/// export format; everything except the timestamp is nullable there.
#[derive(Debug, Deserialize)]
pub struct ExportEntry {
    pub ts: String,
    #[serde(default)]
    pub ms_played: Option<i64>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub conn_country: Option<String>,
    #[serde(default)]
    pub master_metadata_track_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_artist_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_album_name: Option<String>,
    #[serde(default)]
    pub shuffle: Option<bool>,
    #[serde(default)]
    pub skipped: Option<bool>,
}

#[derive(Debug, Default)]
pub struct IngestResult {
    pub files: u64,
    pub inserted: u64,
    pub duplicates: u64,
    /// Non-music entries (podcasts etc.) without a track name.
    pub skipped: u64,
    pub errors: u64,
}

/// Ingest all `*.json` export files found under `paths`.
pub fn ingest(db: &Database, paths: &[String]) -> std::result::Result<IngestResult, IngestError> {
    let mut json_files: Vec<std::path::PathBuf> = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if ext == "json" {
                json_files.push(entry.into_path());
            }
        }
    }
    json_files.sort();

    let pb = ProgressBar::new(json_files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Ingesting...");

    let mut result = IngestResult::default();

    for file in &json_files {
        pb.set_message(
            file.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );

        let contents = match std::fs::read_to_string(file) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to read {}: {e}", file.display());
                result.errors += 1;
                pb.inc(1);
                continue;
            }
        };
        let entries: Vec<ExportEntry> = match serde_json::from_str(&contents) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to parse {}: {e}", file.display());
                result.errors += 1;
                pb.inc(1);
                continue;
            }
        };

        result.files += 1;
        for entry in entries {
            match entry_to_play(&entry) {
                Some(play) => {
                    if db.insert_play(&play)? {
                        result.inserted += 1;
                    } else {
                        result.duplicates += 1;
                    }
                }
                None => result.skipped += 1,
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    log::info!(
        "Ingested {} files: {} plays, {} duplicates, {} skipped, {} errors",
        result.files,
        result.inserted,
        result.duplicates,
        result.skipped,
        result.errors
    );
    Ok(result)
}

/// Map one export entry to a play row. Returns None for entries without a
/// track name (podcast episodes) or with an unparseable timestamp.
pub fn entry_to_play(entry: &ExportEntry) -> Option<NewPlay> {
    let track_name = entry.master_metadata_track_name.clone()?;
    let timestamp = parse_timestamp(&entry.ts)?
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let ms_played = entry.ms_played.unwrap_or(0).max(0);

    Some(NewPlay {
        timestamp,
        track_name,
        artist: entry.master_metadata_album_artist_name.clone(),
        album: entry.master_metadata_album_album_name.clone(),
        platform: entry.platform.clone(),
        duration: format_mmss(ms_played),
        ms_played,
        country: entry.conn_country.clone(),
        shuffle: entry.shuffle.map(yes_no),
        skipped: entry.skipped.map(yes_no),
    })
}

/// Render milliseconds as the `MM:SS` duration string stored in the history.
fn format_mmss(ms: i64) -> String {
    format!("{}:{:02}", ms / 60_000, (ms / 1_000) % 60)
}

fn yes_no(flag: bool) -> String {
    if flag { "Yes".to_string() } else { "No".to_string() }
}
