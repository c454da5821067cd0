//! Tagged payload representation for channel transport.
//!
//! The bridge channel is JSON end-to-end, so binary frames cannot travel as
//! raw bytes. Every payload crosses the boundary in one of three explicit
//! shapes: plain text, base64-tagged bytes, or a structured JSON value.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A payload in channel-transportable form.
///
/// The tag makes the representation explicit on the wire:
/// ```json
/// {"type": "bytes", "base64": "AAECAw=="}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Plain UTF-8 text, passed through unchanged.
    Text { text: String },
    /// Binary data, base64-encoded for the JSON channel.
    Bytes { base64: String },
    /// A structured value, serialized to canonical JSON text on dispatch.
    Json { value: Value },
}

impl Payload {
    /// Wraps raw bytes as a base64-tagged payload.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Payload::Bytes {
            base64: BASE64.encode(bytes),
        }
    }

    /// Wraps plain text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    /// Wraps a structured JSON value.
    pub fn from_json(value: Value) -> Self {
        Payload::Json { value }
    }

    /// Decodes this payload back into raw bytes.
    ///
    /// Text and JSON payloads yield their canonical textual form as UTF-8.
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            Payload::Text { text } => Ok(text.as_bytes().to_vec()),
            Payload::Bytes { base64 } => BASE64.decode(base64),
            Payload::Json { value } => Ok(value.to_string().into_bytes()),
        }
    }

    /// Returns the payload as text when it has a textual form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Payload::Text { text } => Some(text.clone()),
            Payload::Json { value } => Some(value.to_string()),
            Payload::Bytes { .. } => None,
        }
    }

    /// Classifies an inbound byte-wrapped frame as text or binary.
    ///
    /// The channel cannot natively distinguish "binary" from
    /// "text-that-looks-like-bytes": JSON control messages sometimes arrive
    /// wrapped as byte arrays. If the bytes decode as UTF-8 and parse as
    /// JSON the frame is delivered as text; everything else (heartbeats and
    /// other genuine binary) is preserved byte-for-byte.
    ///
    /// This is a heuristic carried over from the observed channel behavior:
    /// a binary payload whose bytes happen to form valid JSON text will be
    /// misclassified. An explicit frame-type tag from the sender would
    /// remove the ambiguity.
    pub fn classify_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) if serde_json::from_str::<Value>(text).is_ok() => {
                Payload::from_text(text)
            }
            _ => Payload::from_bytes(bytes),
        }
    }
}
