//! Simple messaging protocol: text and binary payloads between agents.
//!
//! Payloads are JSON bodies, either plain text or a base64-encoded
//! attachment. Encode and decode validate the body and re-emit it in
//! canonical form, so malformed payloads are rejected at the sender's
//! connection instead of reaching recipients.

use crate::adapter::ProtocolAdapter;
use agentmesh_types::error::{MeshError, MeshResult};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Protocol name.
pub const SIMPLE_MESSAGING: &str = "simple_messaging";

/// Adapter config key limiting attachment size in bytes.
pub const MAX_ATTACHMENT_BYTES_KEY: &str = "max_attachment_bytes";

/// Default attachment size limit (8 MB).
const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 8 * 1024 * 1024;

/// Payload body for the simple messaging protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimplePayload {
    /// Plain text message.
    Text {
        /// The message text.
        text: String,
    },
    /// Binary attachment.
    Attachment {
        /// Original file name.
        filename: String,
        /// MIME type.
        mime_type: String,
        /// Base64-encoded content.
        data: String,
    },
}

impl SimplePayload {
    /// Build a text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Build an attachment payload from raw bytes.
    pub fn attachment(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self::Attachment {
            filename: filename.into(),
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Serialize to the canonical wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// The decoded attachment content, when this is an attachment.
    pub fn attachment_bytes(&self) -> MeshResult<Option<Vec<u8>>> {
        match self {
            Self::Text { .. } => Ok(None),
            Self::Attachment { data, .. } => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map(Some)
                .map_err(|e| MeshError::Internal(format!("invalid attachment encoding: {e}"))),
        }
    }
}

/// Simple messaging adapter: one per agent connection.
pub struct SimpleMessagingAdapter {
    max_attachment_bytes: usize,
}

impl SimpleMessagingAdapter {
    /// Build from the agent's adapter configuration.
    pub fn new(config: &HashMap<String, String>) -> MeshResult<Self> {
        let max_attachment_bytes = match config.get(MAX_ATTACHMENT_BYTES_KEY) {
            Some(raw) => raw.parse().map_err(|_| {
                MeshError::Config(format!(
                    "invalid {MAX_ATTACHMENT_BYTES_KEY} value '{raw}' for {SIMPLE_MESSAGING}"
                ))
            })?,
            None => DEFAULT_MAX_ATTACHMENT_BYTES,
        };
        Ok(Self {
            max_attachment_bytes,
        })
    }

    /// Parse, validate, and re-emit a payload in canonical form.
    fn canonicalize(&self, payload: &[u8]) -> MeshResult<Vec<u8>> {
        let body: SimplePayload = serde_json::from_slice(payload)?;
        if let SimplePayload::Attachment { data, .. } = &body {
            // Base64 inflates by 4/3, so the encoded length bounds the raw size.
            let approx_raw = data.len() / 4 * 3;
            if approx_raw > self.max_attachment_bytes {
                return Err(MeshError::Internal(format!(
                    "attachment exceeds {} byte limit",
                    self.max_attachment_bytes
                )));
            }
        }
        Ok(serde_json::to_vec(&body)?)
    }
}

#[async_trait]
impl ProtocolAdapter for SimpleMessagingAdapter {
    fn protocol(&self) -> &str {
        SIMPLE_MESSAGING
    }

    fn encode(&self, payload: &[u8]) -> MeshResult<Vec<u8>> {
        self.canonicalize(payload)
    }

    fn decode(&self, payload: &[u8]) -> MeshResult<Vec<u8>> {
        self.canonicalize(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SimpleMessagingAdapter {
        SimpleMessagingAdapter::new(&HashMap::new()).unwrap()
    }

    #[test]
    fn test_text_round_trip() {
        let adapter = adapter();
        let payload = SimplePayload::text("hello").to_bytes();
        let encoded = adapter.encode(&payload).unwrap();
        let decoded = adapter.decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_attachment_round_trip() {
        let adapter = adapter();
        let payload =
            SimplePayload::attachment("report.pdf", "application/pdf", b"%PDF-1.7").to_bytes();
        let encoded = adapter.encode(&payload).unwrap();
        let decoded = adapter.decode(&encoded).unwrap();
        assert_eq!(decoded, payload);

        let body: SimplePayload = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(body.attachment_bytes().unwrap().unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let adapter = adapter();
        assert!(adapter.encode(b"not json").is_err());
        assert!(adapter.decode(br#"{"kind":"unknown"}"#).is_err());
    }

    #[test]
    fn test_attachment_limit_from_config() {
        let mut config = HashMap::new();
        config.insert(MAX_ATTACHMENT_BYTES_KEY.to_string(), "16".to_string());
        let adapter = SimpleMessagingAdapter::new(&config).unwrap();

        let small = SimplePayload::attachment("a.bin", "application/octet-stream", b"12345678");
        assert!(adapter.encode(&small.to_bytes()).is_ok());

        let large = SimplePayload::attachment(
            "b.bin",
            "application/octet-stream",
            &[0u8; 64],
        );
        assert!(adapter.encode(&large.to_bytes()).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = HashMap::new();
        config.insert(MAX_ATTACHMENT_BYTES_KEY.to_string(), "lots".to_string());
        assert!(SimpleMessagingAdapter::new(&config).is_err());
    }
}
