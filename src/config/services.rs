//! Per-service configuration sections.

use std::path::PathBuf;

use serde::Deserialize;

use crate::storage::{DEFAULT_MAX_LIMIT, HISTORY_COLLECTION};
use crate::topology::{HISTORY_QUEUE, RECOMMENDATIONS_QUEUE};

/// File served by `GET /video` when none is configured.
pub const DEFAULT_VIDEO_PATH: &str = "./videos/SampleVideo_1280x720_1mb.mp4";

/// Video streaming service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// The media file to stream.
    pub path: PathBuf,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_VIDEO_PATH),
        }
    }
}

/// History service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub queue: String,
    pub collection: String,
    /// Upper bound applied to the `limit` query parameter.
    pub max_limit: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            queue: HISTORY_QUEUE.to_string(),
            collection: HISTORY_COLLECTION.to_string(),
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

/// Recommendations service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommendationsConfig {
    pub queue: String,
}

impl Default for RecommendationsConfig {
    fn default() -> Self {
        Self {
            queue: RECOMMENDATIONS_QUEUE.to_string(),
        }
    }
}
