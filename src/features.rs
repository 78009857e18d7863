//! Per-event feature derivation: temporal fields, batch-local popularity
//! counts, and closed-vocabulary categorical encoding.
//!
//! The encoder vocabularies are fitted once (training) and reused read-only for
//! every later transform. Re-fitting would reassign historical codes and
//! silently invalidate an already-trained model.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::normalize::{CanonicalEvent, UNKNOWN};

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Feature builder used before fitting — call fit_transform first")]
    NotFitted,
}

/// Derived features for one play event.
///
/// `day_of_week` follows the Monday=0 .. Sunday=6 convention, so the weekend
/// flag is `day_of_week >= 5`. Popularity counts are occurrence counts within
/// the batch being processed, not historical totals — a single-row inference
/// batch always yields popularity 1.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFeatures {
    pub hour: u32,
    pub day_of_week: u32,
    pub month: u32,
    pub is_weekend: bool,
    pub artist_popularity: u32,
    pub track_popularity: u32,
    pub album_popularity: u32,
    pub artist_encoded: u32,
    pub track_encoded: u32,
    pub album_encoded: u32,
    pub platform_encoded: u32,
}

impl EventFeatures {
    /// Feature row for the skip classifier, in fixed column order.
    pub fn skip_row(&self) -> Vec<f64> {
        vec![
            self.hour as f64,
            self.day_of_week as f64,
            self.month as f64,
            self.is_weekend as u8 as f64,
            self.artist_popularity as f64,
            self.track_popularity as f64,
            self.album_popularity as f64,
            self.artist_encoded as f64,
            self.track_encoded as f64,
            self.album_encoded as f64,
            self.platform_encoded as f64,
        ]
    }
}

/// Number of columns in a skip-classifier feature row.
pub const SKIP_FEATURE_COUNT: usize = 11;

/// Closed-vocabulary categorical encoder.
///
/// The fitted vocabulary is the sorted unique value set of the fit batch plus
/// the `"Unknown"` sentinel; a value's code is its index in that sorted list.
/// Out-of-vocabulary values encode to the sentinel's code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u32>,
}

impl LabelEncoder {
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Self {
        let mut classes: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        classes.push(UNKNOWN.to_string());
        classes.sort();
        classes.dedup();
        let mut encoder = LabelEncoder {
            classes,
            index: HashMap::new(),
        };
        encoder.rebuild_index();
        encoder
    }

    /// Rebuild the lookup map from `classes`. Needed after deserialization,
    /// since only the vocabulary itself is persisted.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i as u32))
            .collect();
    }

    pub fn encode(&self, value: &str) -> u32 {
        match self.index.get(value) {
            Some(&code) => code,
            // UNKNOWN is always a fitted class, so this lookup cannot miss
            None => self.index[UNKNOWN],
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Fitted encoder state for the four categorical fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSet {
    pub artist: LabelEncoder,
    pub track: LabelEncoder,
    pub album: LabelEncoder,
    pub platform: LabelEncoder,
}

impl EncoderSet {
    /// Rebuild all lookup maps after deserialization.
    pub fn rebuild_indexes(&mut self) {
        self.artist.rebuild_index();
        self.track.rebuild_index();
        self.album.rebuild_index();
        self.platform.rebuild_index();
    }
}

/// Converts canonical events into feature rows, owning the encoder state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureBuilder {
    encoders: Option<EncoderSet>,
}

impl FeatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.encoders.is_some()
    }

    /// Rebuild encoder lookup maps after deserialization.
    pub fn rebuild_indexes(&mut self) {
        if let Some(encoders) = &mut self.encoders {
            encoders.rebuild_indexes();
        }
    }

    /// Fit fresh encoder vocabularies from `events` and return their features.
    /// Training mode; call once per process lifetime.
    pub fn fit_transform(&mut self, events: &[CanonicalEvent]) -> Vec<EventFeatures> {
        if self.encoders.is_some() {
            log::warn!("Re-fitting encoder vocabularies — previously assigned codes change");
        }
        self.encoders = Some(EncoderSet {
            artist: LabelEncoder::fit(events.iter().map(|e| e.artist.as_str())),
            track: LabelEncoder::fit(events.iter().map(|e| e.track_name.as_str())),
            album: LabelEncoder::fit(events.iter().map(|e| e.album.as_str())),
            platform: LabelEncoder::fit(events.iter().map(|e| e.platform.as_str())),
        });
        self.transform(events).expect("encoders fitted above")
    }

    /// Derive features using the already-fitted vocabularies. Unseen categories
    /// encode to the `"Unknown"` code.
    pub fn transform(&self, events: &[CanonicalEvent]) -> Result<Vec<EventFeatures>, FeatureError> {
        let encoders = self.encoders.as_ref().ok_or(FeatureError::NotFitted)?;

        // Popularity is always batch-local: counted over the events passed to
        // this call, training batch or single-row inference batch alike.
        let artist_counts = count_by(events, |e| e.artist.as_str());
        let track_counts = count_by(events, |e| e.track_name.as_str());
        let album_counts = count_by(events, |e| e.album.as_str());

        Ok(events
            .iter()
            .map(|e| {
                let day_of_week = e.timestamp.weekday().num_days_from_monday();
                EventFeatures {
                    hour: e.timestamp.hour(),
                    day_of_week,
                    month: e.timestamp.month(),
                    is_weekend: day_of_week >= 5,
                    artist_popularity: artist_counts[e.artist.as_str()],
                    track_popularity: track_counts[e.track_name.as_str()],
                    album_popularity: album_counts[e.album.as_str()],
                    artist_encoded: encoders.artist.encode(&e.artist),
                    track_encoded: encoders.track.encode(&e.track_name),
                    album_encoded: encoders.album.encode(&e.album),
                    platform_encoded: encoders.platform.encode(&e.platform),
                }
            })
            .collect())
    }
}

fn count_by<'a, F>(events: &'a [CanonicalEvent], key: F) -> HashMap<&'a str, u32>
where
    F: Fn(&'a CanonicalEvent) -> &'a str,
{
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for event in events {
        *counts.entry(key(event)).or_insert(0) += 1;
    }
    counts
}
