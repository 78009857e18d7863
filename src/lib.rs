pub mod config;
pub mod db;
pub mod features;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod sessions;
pub mod stats;

/// Application name for XDG paths
pub const APP_NAME: &str = "replay";
