//! The "content was viewed" event and its wire codec.
//!
//! The payload is a single-field record. Producers may encode it as BSON or
//! JSON; consumers pick the decoder from the message content type and fall
//! back to trying both when the content type is missing.

use serde::{Deserialize, Serialize};

/// Content type attached to BSON-encoded events.
pub const CONTENT_TYPE_BSON: &str = "application/bson";
/// Content type attached to JSON-encoded events.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding or decoding a [`ViewEvent`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode view event as {encoding}: {message}")]
    Encode {
        encoding: Encoding,
        message: String,
    },

    #[error("Failed to decode view event: {0}")]
    Decode(String),
}

/// A single view of a piece of content.
///
/// Identity is not unique: the same path viewed twice produces two equal
/// events, and consumers keep both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    #[serde(rename = "videoPath")]
    pub video_path: String,
}

impl ViewEvent {
    pub fn new(video_path: impl Into<String>) -> Self {
        Self {
            video_path: video_path.into(),
        }
    }

    /// Serialize with the given encoding.
    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>> {
        match encoding {
            Encoding::Bson => bson::to_vec(self).map_err(|e| CodecError::Encode {
                encoding,
                message: e.to_string(),
            }),
            Encoding::Json => serde_json::to_vec(self).map_err(|e| CodecError::Encode {
                encoding,
                message: e.to_string(),
            }),
        }
    }

    /// Deserialize a payload, choosing the decoder from `content_type`.
    ///
    /// Unknown or absent content types try BSON first, then JSON.
    pub fn decode(payload: &[u8], content_type: Option<&str>) -> Result<Self> {
        match content_type.and_then(Encoding::from_content_type) {
            Some(encoding) => Self::decode_as(payload, encoding),
            None => Self::decode_as(payload, Encoding::Bson)
                .or_else(|_| Self::decode_as(payload, Encoding::Json)),
        }
    }

    fn decode_as(payload: &[u8], encoding: Encoding) -> Result<Self> {
        match encoding {
            Encoding::Bson => {
                bson::from_slice(payload).map_err(|e| CodecError::Decode(format!("bson: {}", e)))
            }
            Encoding::Json => serde_json::from_slice(payload)
                .map_err(|e| CodecError::Decode(format!("json: {}", e))),
        }
    }
}

/// Self-describing encodings understood on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Bson,
    Json,
}

impl Encoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Bson => CONTENT_TYPE_BSON,
            Encoding::Json => CONTENT_TYPE_JSON,
        }
    }

    /// Map a message content type back to an encoding, ignoring parameters
    /// such as `; charset=utf-8`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case(CONTENT_TYPE_BSON) {
            Some(Encoding::Bson)
        } else if essence.eq_ignore_ascii_case(CONTENT_TYPE_JSON) {
            Some(Encoding::Json)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Bson => f.write_str("bson"),
            Encoding::Json => f.write_str("json"),
        }
    }
}
