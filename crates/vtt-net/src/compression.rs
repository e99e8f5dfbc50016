//! LZ4 compression for frames and for compressed batch/delta bodies.
//!
//! Frames carry a one-byte flag in front of the message so the receiver knows
//! whether to inflate. Batch and delta bodies use [`pack_json`] /
//! [`unpack_json`]: plain LZ4 with a size prefix over the JSON encoding.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Frame flag: message bytes follow as-is.
pub const FLAG_RAW: u8 = 0x00;

/// Frame flag: message bytes are LZ4-compressed with a size prefix.
pub const FLAG_LZ4: u8 = 0x01;

/// When outbound frames get compressed.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Messages shorter than this many bytes are sent raw. Default: 512.
    pub threshold: usize,
    /// Master switch. Default: true.
    pub enabled: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: 512,
            enabled: true,
        }
    }
}

/// Prefix an encoded message with its compression flag, compressing it when
/// it is large enough.
pub fn compress_payload(message: &[u8], config: &CompressionConfig) -> Vec<u8> {
    let (flag, body) = if config.enabled && message.len() >= config.threshold {
        (FLAG_LZ4, compress_prepend_size(message))
    } else {
        (FLAG_RAW, message.to_vec())
    };
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(flag);
    out.extend_from_slice(&body);
    out
}

/// Strip the compression flag and inflate if needed, returning the encoded
/// message.
pub fn decompress_payload(frame: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let (&flag, body) = frame.split_first().ok_or(CompressionError::EmptyPayload)?;
    match flag {
        FLAG_RAW => Ok(body.to_vec()),
        FLAG_LZ4 => decompress_size_prepended(body)
            .map_err(|e| CompressionError::DecompressFailed(e.to_string())),
        other => Err(CompressionError::UnknownFlag(other)),
    }
}

/// Serialize `value` to JSON and LZ4-compress it.
pub fn pack_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CompressionError> {
    let json = serde_json::to_vec(value)?;
    Ok(compress_prepend_size(&json))
}

/// Inverse of [`pack_json`].
pub fn unpack_json<T: DeserializeOwned>(packed: &[u8]) -> Result<T, CompressionError> {
    let json = decompress_size_prepended(packed)
        .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Errors raised while inflating frames or packed bodies.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// No flag byte present.
    #[error("empty payload: no compression flag")]
    EmptyPayload,
    /// LZ4 rejected the input.
    #[error("LZ4 decompression failed: {0}")]
    DecompressFailed(String),
    /// The flag byte is neither raw nor LZ4.
    #[error("unknown compression flag: 0x{0:02X}")]
    UnknownFlag(u8),
    /// The inflated body is not the expected JSON.
    #[error("packed body is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_short_message_is_sent_raw() {
        let payload = compress_payload(b"{\"type\":\"ping\"}", &CompressionConfig::default());
        assert_eq!(payload[0], FLAG_RAW);
        assert_eq!(&payload[1..], b"{\"type\":\"ping\"}");
    }

    #[test]
    fn test_large_state_sync_is_compressed() {
        let tokens: Vec<Value> = (0..200)
            .map(|i| json!({"id": format!("token-{i}"), "position": {"x": 0, "y": 0}}))
            .collect();
        let message = serde_json::to_vec(&tokens).unwrap();

        let payload = compress_payload(&message, &CompressionConfig::default());
        assert_eq!(payload[0], FLAG_LZ4);
        assert!(payload.len() < message.len() / 2);
        assert_eq!(decompress_payload(&payload).unwrap(), message);
    }

    #[test]
    fn test_threshold_boundary() {
        let config = CompressionConfig {
            threshold: 8,
            enabled: true,
        };
        assert_eq!(compress_payload(b"1234567", &config)[0], FLAG_RAW);
        assert_eq!(compress_payload(b"12345678", &config)[0], FLAG_LZ4);
    }

    #[test]
    fn test_disabled_never_compresses() {
        let config = CompressionConfig {
            threshold: 0,
            enabled: false,
        };
        let payload = compress_payload(&[b'a'; 4096], &config);
        assert_eq!(payload[0], FLAG_RAW);
        assert_eq!(payload.len(), 4097);
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(matches!(decompress_payload(&[]), Err(CompressionError::EmptyPayload)));
        assert!(matches!(
            decompress_payload(&[0x7F, 1, 2]),
            Err(CompressionError::UnknownFlag(0x7F))
        ));
        assert!(matches!(
            decompress_payload(&[FLAG_LZ4, 16, 0, 0, 0, 0xF0]),
            Err(CompressionError::DecompressFailed(_))
        ));
    }

    #[test]
    fn test_packed_json_restores_events() {
        let events = json!([
            {"type": "token_moved", "priority": "high", "timestamp": 1},
            {"type": "chat_message", "priority": "low", "timestamp": 2}
        ]);
        let packed = pack_json(&events).unwrap();
        let restored: Value = unpack_json(&packed).unwrap();
        assert_eq!(restored, events);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let result = unpack_json::<Value>(&[16, 0, 0, 0, 0xF0]);
        assert!(result.is_err());

        let packed = compress_prepend_size(b"{not json");
        assert!(matches!(unpack_json::<Value>(&packed), Err(CompressionError::Json(_))));
    }
}
