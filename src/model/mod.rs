//! Listening-behavior models: skip classifier and session-duration regressor.
//!
//! The [`Analyzer`] owns the whole fitted state — encoder vocabularies, the two
//! scalers, and the two ensembles. Training fits everything exactly once;
//! every inference call replays that state read-only. The fitted analyzer
//! serializes to JSON so the predict subcommands see byte-identical state.

pub mod boost;
pub mod forest;
pub mod scaler;
pub mod tree;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::features::{FeatureBuilder, FeatureError};
use crate::normalize::{normalize_batch, RawRecord};
use crate::sessions;
use boost::{BoostParams, GradientBoostedTrees};
use forest::{BaggedForest, ForestParams};
use scaler::StandardScaler;

/// Neutral skip probability when inference cannot produce a real one.
pub const FALLBACK_SKIP_PROBABILITY: f64 = 0.5;

/// Default session duration (seconds) when inference cannot produce a real one.
pub const FALLBACK_SESSION_SECONDS: f64 = 1800.0;

/// Below this many rows (or sessions) no holdout split is made; the model
/// trains on everything and metrics are not reported.
const MIN_ROWS_FOR_HOLDOUT: usize = 10;

pub const SKIP_FEATURE_NAMES: [&str; 11] = [
    "hour",
    "day_of_week",
    "month",
    "is_weekend",
    "artist_popularity",
    "track_popularity",
    "album_popularity",
    "artist_encoded",
    "track_encoded",
    "album_encoded",
    "platform_encoded",
];

pub const SESSION_FEATURE_NAMES: [&str; 6] = [
    "hour",
    "day_of_week",
    "month",
    "is_weekend",
    "artist_popularity",
    "track_popularity",
];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model used before training")]
    NotFitted,
    #[error("No usable training data after normalization")]
    NoTrainingData,
    #[error("No valid events in inference batch")]
    NoValidEvents,
    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),
    #[error("Model file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Self-reported metrics from training the skip classifier.
#[derive(Debug)]
pub struct SkipTrainingReport {
    pub events: usize,
    /// Input rows not trained on: unparseable plus unlabeled.
    pub dropped: usize,
    /// None when the batch was too small for a holdout split.
    pub holdout_accuracy: Option<f64>,
    pub feature_importances: Vec<(&'static str, f64)>,
}

/// Self-reported metrics from training the duration regressor.
#[derive(Debug)]
pub struct DurationTrainingReport {
    pub events: usize,
    pub sessions: usize,
    pub holdout_rmse_seconds: Option<f64>,
    pub feature_importances: Vec<(&'static str, f64)>,
}

/// The fitted pipeline-plus-models state. Construct once, train once, then
/// treat as immutable for the serving lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analyzer {
    builder: FeatureBuilder,
    skip_scaler: StandardScaler,
    duration_scaler: StandardScaler,
    forest_params: ForestParams,
    boost_params: BoostParams,
    skip_model: Option<BaggedForest>,
    duration_model: Option<GradientBoostedTrees>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Analyzer {
            builder: FeatureBuilder::new(),
            skip_scaler: StandardScaler::new(),
            duration_scaler: StandardScaler::new(),
            forest_params: ForestParams::default(),
            boost_params: BoostParams::default(),
            skip_model: None,
            duration_model: None,
        }
    }

    /// Train the skip classifier. Fits the encoder vocabularies and the skip
    /// scaler on the full batch, then the forest on an 80% split (holdout
    /// metrics on the rest, when the batch is big enough).
    pub fn train_skip(&mut self, records: &[RawRecord]) -> Result<SkipTrainingReport, ModelError> {
        let outcome = normalize_batch(records);

        // Only labeled events train the classifier
        let events: Vec<_> = outcome
            .events
            .into_iter()
            .filter(|e| e.skipped.is_some())
            .collect();
        // Unparseable rows and rows without a skip label both count as dropped,
        // so events + dropped always equals the input row count
        let dropped = records.len() - events.len();
        if events.is_empty() {
            return Err(ModelError::NoTrainingData);
        }

        let features = self.builder.fit_transform(&events);
        let rows: Vec<Vec<f64>> = features.iter().map(|f| f.skip_row()).collect();
        let targets: Vec<f64> = events
            .iter()
            .map(|e| if e.skipped == Some(true) { 1.0 } else { 0.0 })
            .collect();

        self.skip_scaler.fit(&rows)?;
        let scaled = self.skip_scaler.transform(&rows)?;

        let (train_idx, test_idx) = holdout_split(scaled.len(), self.forest_params.seed);
        let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| scaled[i].clone()).collect();
        let train_targets: Vec<f64> = train_idx.iter().map(|&i| targets[i]).collect();

        let model = BaggedForest::fit(&train_rows, &train_targets, &self.forest_params)?;

        let holdout_accuracy = if test_idx.is_empty() {
            None
        } else {
            let correct = test_idx
                .iter()
                .filter(|&&i| {
                    let predicted = model.predict_probability(&scaled[i]) >= 0.5;
                    predicted == (targets[i] == 1.0)
                })
                .count();
            Some(correct as f64 / test_idx.len() as f64)
        };

        let feature_importances = SKIP_FEATURE_NAMES
            .iter()
            .zip(&model.feature_importances)
            .map(|(name, &v)| (*name, v))
            .collect();

        log::info!(
            "Skip model trained on {} events ({} dropped)",
            events.len(),
            dropped
        );
        self.skip_model = Some(model);

        Ok(SkipTrainingReport {
            events: events.len(),
            dropped,
            holdout_accuracy,
            feature_importances,
        })
    }

    /// Train the duration regressor over 30-minute-gap sessions. Reuses the
    /// encoder vocabularies fitted by [`train_skip`] when present.
    pub fn train_duration(
        &mut self,
        records: &[RawRecord],
    ) -> Result<DurationTrainingReport, ModelError> {
        let outcome = normalize_batch(records);
        let mut events = outcome.events;
        if events.is_empty() {
            return Err(ModelError::NoTrainingData);
        }
        events.sort_by_key(|e| e.timestamp);

        let features = if self.builder.is_fitted() {
            self.builder.transform(&events)?
        } else {
            self.builder.fit_transform(&events)
        };

        let session_features = sessions::segment(&events, &features);
        let rows: Vec<Vec<f64>> = session_features.iter().map(|s| s.row()).collect();
        let targets: Vec<f64> = session_features.iter().map(|s| s.duration_seconds).collect();

        self.duration_scaler.fit(&rows)?;
        let scaled = self.duration_scaler.transform(&rows)?;

        let (train_idx, test_idx) = holdout_split(scaled.len(), self.boost_params.seed);
        let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| scaled[i].clone()).collect();
        let train_targets: Vec<f64> = train_idx.iter().map(|&i| targets[i]).collect();

        let model = GradientBoostedTrees::fit(&train_rows, &train_targets, &self.boost_params)?;

        let holdout_rmse_seconds = if test_idx.is_empty() {
            None
        } else {
            let mse = test_idx
                .iter()
                .map(|&i| {
                    let err = model.predict_row(&scaled[i]) - targets[i];
                    err * err
                })
                .sum::<f64>()
                / test_idx.len() as f64;
            Some(mse.sqrt())
        };

        let feature_importances = SESSION_FEATURE_NAMES
            .iter()
            .zip(&model.feature_importances)
            .map(|(name, &v)| (*name, v))
            .collect();

        log::info!(
            "Duration model trained on {} sessions from {} events",
            session_features.len(),
            events.len()
        );
        self.duration_model = Some(model);

        Ok(DurationTrainingReport {
            events: events.len(),
            sessions: session_features.len(),
            holdout_rmse_seconds,
            feature_importances,
        })
    }

    fn try_predict_skip(&self, record: &RawRecord) -> Result<f64, ModelError> {
        let outcome = normalize_batch(std::slice::from_ref(record));
        if outcome.events.is_empty() {
            return Err(ModelError::NoValidEvents);
        }
        let features = self.builder.transform(&outcome.events)?;
        let row = self.skip_scaler.transform_row(&features[0].skip_row())?;
        let model = self.skip_model.as_ref().ok_or(ModelError::NotFitted)?;
        Ok(model.predict_probability(&row))
    }

    /// Probability in [0, 1] that this play would be skipped. Never fails:
    /// any inference error degrades to the neutral 0.5 and is logged.
    pub fn predict_skip_probability(&self, record: &RawRecord) -> f64 {
        match self.try_predict_skip(record) {
            Ok(p) => p,
            Err(e) => {
                log::error!("Skip prediction failed: {e}");
                FALLBACK_SKIP_PROBABILITY
            }
        }
    }

    fn try_predict_session(&self, records: &[RawRecord]) -> Result<f64, ModelError> {
        let outcome = normalize_batch(records);
        let mut events = outcome.events;
        if events.is_empty() {
            return Err(ModelError::NoValidEvents);
        }
        events.sort_by_key(|e| e.timestamp);

        let features = self.builder.transform(&events)?;
        let session_features = sessions::segment(&events, &features);
        // A prospective session is the whole (typically one-row) batch; the
        // first session carries the prediction.
        let row = self
            .duration_scaler
            .transform_row(&session_features[0].row())?;
        let model = self.duration_model.as_ref().ok_or(ModelError::NotFitted)?;
        Ok(model.predict_row(&row))
    }

    /// Predicted session duration in seconds. Never fails: any inference
    /// error degrades to the 1800-second default and is logged.
    pub fn predict_session_duration(&self, records: &[RawRecord]) -> f64 {
        match self.try_predict_session(records) {
            Ok(seconds) => seconds,
            Err(e) => {
                log::error!("Duration prediction failed: {e}");
                FALLBACK_SESSION_SECONDS
            }
        }
    }

    /// Persist the fitted state as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously saved analyzer and rebuild its lookup state.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path)?;
        let mut analyzer: Analyzer = serde_json::from_str(&json)?;
        analyzer.builder.rebuild_indexes();
        Ok(analyzer)
    }
}

/// Deterministic shuffled 80/20 split. Returns everything in the train side
/// when the batch is too small to hold anything out.
fn holdout_split(n: usize, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    if n < MIN_ROWS_FOR_HOLDOUT {
        return (indices, Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let test_len = n / 5;
    let test = indices.split_off(n - test_len);
    (indices, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic two-day history: morning plays rarely skipped, late-night
    /// plays mostly skipped, a couple of session gaps.
    fn training_records() -> Vec<RawRecord> {
        let mut records = Vec::new();
        let artists = ["Khruangbin", "Bonobo", "Tycho", "Caribou"];
        for day in 10..14 {
            for i in 0..12 {
                let hour = if i < 6 { 9 + i / 2 } else { 22 };
                let minute = (i * 7) % 60;
                let skipped = if hour >= 22 { "Yes" } else { "No" };
                records.push(RawRecord {
                    timestamp: format!("2023-06-{day:02} {hour:02}:{minute:02}:00"),
                    artist: artists[i % artists.len()].to_string(),
                    track_name: format!("Track {}", i % 6),
                    album: Some(format!("Album {}", i % 3)),
                    platform: Some("android".to_string()),
                    duration: format!("{}:{:02}", 2 + i % 4, (i * 11) % 60),
                    skipped: Some(skipped.to_string()),
                });
            }
        }
        records
    }

    fn trained() -> Analyzer {
        let mut analyzer = Analyzer::new();
        let records = training_records();
        analyzer.train_skip(&records).unwrap();
        analyzer.train_duration(&records).unwrap();
        analyzer
    }

    fn inference_record() -> RawRecord {
        RawRecord {
            timestamp: "2023-06-20 09:15:00".to_string(),
            artist: "Khruangbin".to_string(),
            track_name: "Track 1".to_string(),
            album: Some("Album 1".to_string()),
            platform: None,
            duration: "3:45".to_string(),
            skipped: None,
        }
    }

    #[test]
    fn test_untrained_skip_fallback_exactly_half() {
        let analyzer = Analyzer::new();
        assert_eq!(
            analyzer.predict_skip_probability(&inference_record()),
            0.5
        );
    }

    #[test]
    fn test_untrained_duration_fallback_thirty_minutes() {
        let analyzer = Analyzer::new();
        let seconds = analyzer.predict_session_duration(&[inference_record()]);
        assert_eq!(seconds, 1800.0);
        assert_eq!(seconds / 60.0, 30.0);
    }

    #[test]
    fn test_malformed_input_fallback() {
        let analyzer = trained();
        let mut bad = inference_record();
        bad.duration = "not a duration".to_string();
        assert_eq!(analyzer.predict_skip_probability(&bad), 0.5);
        assert_eq!(analyzer.predict_session_duration(&[bad]), 1800.0);
    }

    #[test]
    fn test_trained_probability_in_unit_interval() {
        let analyzer = trained();
        let p = analyzer.predict_skip_probability(&inference_record());
        assert!((0.0..=1.0).contains(&p), "p = {p}");
    }

    #[test]
    fn test_trained_duration_positive() {
        let analyzer = trained();
        let seconds = analyzer.predict_session_duration(&[inference_record()]);
        assert!(seconds > 0.0);
    }

    #[test]
    fn test_inference_idempotent_no_refit() {
        let analyzer = trained();
        let record = inference_record();
        let p = analyzer.predict_skip_probability(&record);
        let d = analyzer.predict_session_duration(std::slice::from_ref(&record));
        for _ in 0..5 {
            assert_eq!(analyzer.predict_skip_probability(&record), p);
            assert_eq!(
                analyzer.predict_session_duration(std::slice::from_ref(&record)),
                d
            );
        }
    }

    #[test]
    fn test_unseen_categories_use_unknown_path() {
        let analyzer = trained();
        let mut record = inference_record();
        record.artist = "Never Heard Of Them".to_string();
        record.track_name = "Brand New Single".to_string();
        record.album = None;
        let p = analyzer.predict_skip_probability(&record);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_dropped_accounts_for_every_input_row() {
        let mut records = training_records();
        let mut unlabeled = records[0].clone();
        unlabeled.timestamp = "2023-06-14 09:00:00".to_string();
        unlabeled.skipped = None;
        records.push(unlabeled);
        let mut unparseable = records[0].clone();
        unparseable.timestamp = "not a date".to_string();
        records.push(unparseable);

        let mut analyzer = Analyzer::new();
        let report = analyzer.train_skip(&records).unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(report.events + report.dropped, records.len());
    }

    #[test]
    fn test_no_labeled_rows_is_fatal() {
        let mut analyzer = Analyzer::new();
        let mut record = inference_record();
        record.skipped = None;
        assert!(matches!(
            analyzer.train_skip(&[record]),
            Err(ModelError::NoTrainingData)
        ));
    }

    #[test]
    fn test_empty_batch_is_fatal() {
        let mut analyzer = Analyzer::new();
        assert!(matches!(
            analyzer.train_duration(&[]),
            Err(ModelError::NoTrainingData)
        ));
    }

    #[test]
    fn test_holdout_metrics_reported() {
        let mut analyzer = Analyzer::new();
        let records = training_records();
        let skip_report = analyzer.train_skip(&records).unwrap();
        let accuracy = skip_report.holdout_accuracy.unwrap();
        assert!((0.0..=1.0).contains(&accuracy));

        let duration_report = analyzer.train_duration(&records).unwrap();
        assert!(duration_report.sessions > 1);
        // Small session count may fall below the holdout threshold
        if let Some(rmse) = duration_report.holdout_rmse_seconds {
            assert!(rmse >= 0.0);
        }
    }

    #[test]
    fn test_save_load_replays_identical_state() {
        let analyzer = trained();
        let dir = std::env::temp_dir().join("replay-model-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("analyzer.json");
        analyzer.save(&path).unwrap();

        let restored = Analyzer::load(&path).unwrap();
        let record = inference_record();
        assert_eq!(
            restored.predict_skip_probability(&record),
            analyzer.predict_skip_probability(&record)
        );
        assert_eq!(
            restored.predict_session_duration(std::slice::from_ref(&record)),
            analyzer.predict_session_duration(std::slice::from_ref(&record))
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_holdout_split_small_batch_no_test_side() {
        let (train, test) = holdout_split(5, 42);
        assert_eq!(train.len(), 5);
        assert!(test.is_empty());
    }

    #[test]
    fn test_holdout_split_deterministic() {
        let (a_train, a_test) = holdout_split(50, 42);
        let (b_train, b_test) = holdout_split(50, 42);
        assert_eq!(a_train, b_train);
        assert_eq!(a_test, b_test);
        assert_eq!(a_test.len(), 10);
    }
}
