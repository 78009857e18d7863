use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use replay::model::Analyzer;
use replay::normalize::RawRecord;

#[derive(Parser)]
#[command(name = "replay", version, about = "Personal streaming-history analyzer")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// One prospective play, supplied field by field.
#[derive(Args)]
struct PlayArgs {
    /// Path to the trained model file
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Timestamp of the play (e.g. "2023-06-10 14:05:00")
    #[arg(long)]
    timestamp: String,

    #[arg(long)]
    artist: String,

    #[arg(long)]
    track: String,

    #[arg(long)]
    album: String,

    /// Track duration as MM:SS
    #[arg(long)]
    duration: String,

    /// Playback platform (defaults to Spotify)
    #[arg(long)]
    platform: Option<String>,
}

impl PlayArgs {
    fn to_record(&self) -> RawRecord {
        RawRecord {
            timestamp: self.timestamp.clone(),
            artist: self.artist.clone(),
            track_name: self.track.clone(),
            album: Some(self.album.clone()),
            platform: self.platform.clone(),
            duration: self.duration.clone(),
            skipped: None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest streaming-history JSON export files into the library
    Ingest {
        /// Directories to scan (defaults to config file history_dirs)
        paths: Vec<String>,
    },

    /// Train the skip and session-duration models from stored history
    Train {
        /// Where to write the trained model (defaults to XDG data dir)
        #[arg(long)]
        model_path: Option<PathBuf>,
    },

    /// Predict the probability that a play would be skipped
    PredictSkip(PlayArgs),

    /// Predict the duration of a listening session, in minutes
    PredictSession(PlayArgs),

    /// Show aggregate listening statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = replay::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(replay::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = replay::db::Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Ingest { paths } => {
            // Resolve ingest paths: CLI args > config history_dirs
            let ingest_paths = if !paths.is_empty() {
                paths
            } else if !config.history_dirs.is_empty() {
                config
                    .history_dirs
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect()
            } else {
                anyhow::bail!(
                    "No directories to ingest. Pass paths as arguments or set history_dirs in config."
                );
            };

            let result = replay::ingest::ingest(&db, &ingest_paths).context("Ingest failed")?;
            println!(
                "Ingest complete: {} files, {} plays added, {} duplicates, {} skipped, {} errors",
                result.files, result.inserted, result.duplicates, result.skipped, result.errors
            );
        }

        Commands::Train { model_path } => {
            let records = db.training_records().context("Failed to load history")?;
            if records.is_empty() {
                anyhow::bail!("No valid training data available — run `replay ingest` first");
            }
            println!("Training on {} plays...", records.len());

            let mut analyzer = Analyzer::new();

            let skip_report = analyzer
                .train_skip(&records)
                .context("Skip model training failed")?;
            println!(
                "Skip model: {} events ({} dropped){}",
                skip_report.events,
                skip_report.dropped,
                match skip_report.holdout_accuracy {
                    Some(acc) => format!(", holdout accuracy {:.1}%", acc * 100.0),
                    None => String::new(),
                }
            );
            print_importances(&skip_report.feature_importances);

            let duration_report = analyzer
                .train_duration(&records)
                .context("Duration model training failed")?;
            println!(
                "Duration model: {} sessions from {} events{}",
                duration_report.sessions,
                duration_report.events,
                match duration_report.holdout_rmse_seconds {
                    Some(rmse) => format!(", holdout RMSE {:.0}s", rmse),
                    None => String::new(),
                }
            );
            print_importances(&duration_report.feature_importances);

            let model_path = model_path
                .or(config.model_path.clone())
                .unwrap_or_else(replay::config::default_model_path);
            analyzer
                .save(&model_path)
                .context("Failed to save trained model")?;
            println!("Model saved to {}", model_path.display());
        }

        Commands::PredictSkip(args) => {
            validate_duration(&args.duration)?;
            let analyzer = load_analyzer(args.model_path.as_ref(), &config)?;
            let probability = analyzer.predict_skip_probability(&args.to_record());
            println!("Skip probability: {probability:.4}");
        }

        Commands::PredictSession(args) => {
            validate_duration(&args.duration)?;
            let analyzer = load_analyzer(args.model_path.as_ref(), &config)?;
            let seconds = analyzer.predict_session_duration(&[args.to_record()]);
            println!("Predicted session duration: {:.1} minutes", seconds / 60.0);
        }

        Commands::Stats => {
            let report = replay::stats::gather(&db).context("Failed to gather stats")?;
            replay::stats::render(&report);
        }
    }

    Ok(())
}

/// Client-facing validation: malformed durations are rejected before the
/// pipeline sees them.
fn validate_duration(duration: &str) -> Result<()> {
    if replay::normalize::parse_duration(duration).is_none() {
        anyhow::bail!("Invalid duration format: {duration:?} (expected MM:SS)");
    }
    Ok(())
}

fn load_analyzer(
    cli_path: Option<&PathBuf>,
    config: &replay::config::AppConfig,
) -> Result<Analyzer> {
    let path = cli_path
        .cloned()
        .or(config.model_path.clone())
        .unwrap_or_else(replay::config::default_model_path);
    Analyzer::load(&path).with_context(|| {
        format!(
            "No trained model at {} — run `replay train` first",
            path.display()
        )
    })
}

fn print_importances(importances: &[(&'static str, f64)]) {
    let mut sorted: Vec<_> = importances.to_vec();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (name, value) in sorted.iter().take(5) {
        println!("    {name:<20} {:.3}", value);
    }
}
