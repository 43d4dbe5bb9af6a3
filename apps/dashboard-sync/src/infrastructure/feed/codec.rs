//! Frame Codec
//!
//! Turns raw WebSocket frames into structured JSON. Shape interpretation is
//! left to `infrastructure::normalize`; this layer only rejects frames that
//! are not JSON at all.

use serde_json::Value;

/// Errors decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame body is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Binary frame is not UTF-8.
    #[error("binary frame is not UTF-8")]
    InvalidUtf8,
}

/// JSON frame decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidJson` if the text is not JSON.
    pub fn decode(&self, text: &str) -> Result<Value, CodecError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the bytes are not UTF-8 JSON.
    pub fn decode_binary(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        self.decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_object() {
        let value = JsonCodec::new()
            .decode(r#"{"type":"order_update","data":{"id":"o-1"}}"#)
            .unwrap();
        assert_eq!(value["data"]["id"], "o-1");
    }

    #[test]
    fn decodes_scalars_and_arrays() {
        let codec = JsonCodec::new();
        assert_eq!(codec.decode("42").unwrap(), json!(42));
        assert_eq!(codec.decode(" [1,2] ").unwrap(), json!([1, 2]));
    }

    #[test]
    fn rejects_garbage() {
        let err = JsonCodec::new().decode("{not json").unwrap_err();
        assert!(matches!(err, CodecError::InvalidJson(_)));
    }

    #[test]
    fn rejects_non_utf8_binary() {
        let err = JsonCodec::new().decode_binary(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8));
    }

    #[test]
    fn decodes_binary_json() {
        let value = JsonCodec::new().decode_binary(br#"{"bid":1}"#).unwrap();
        assert_eq!(value["bid"], 1);
    }
}
