//! Opaque cursor for keyset pagination over campaign domain tables.
//!
//! The cursor captures the last-seen position in the stable
//! `(offset_index, domain_id)` ordering: the monotonic ordering key plus
//! the row's unique id as tie-break for duplicate ordering values. It
//! deliberately never encodes a numeric row offset: offsets drift as
//! rows are inserted or deleted during a long traversal, which is exactly
//! the failure mode keyset pagination exists to avoid.
//!
//! Encoding is URL-safe base64 (no padding) over a fixed 24-byte layout:
//! 8 bytes big-endian `offset_index` followed by the 16 uuid bytes.
//! A cursor that fails to decode is a [`PipelineError::MalformedCursor`];
//! callers treat that as "start over", never as fatal.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

const CURSOR_LEN: usize = 8 + 16;

/// Resume point in the stable `(offset_index, domain_id)` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainCursor {
    /// Monotonic ordering key of the last row seen.
    pub offset_index: i64,
    /// Unique id of the last row seen; breaks ties between rows sharing
    /// an `offset_index`.
    pub domain_id: Uuid,
}

impl DomainCursor {
    pub fn new(offset_index: i64, domain_id: Uuid) -> Self {
        Self {
            offset_index,
            domain_id,
        }
    }

    /// Encode the cursor as an opaque token.
    pub fn encode(&self) -> String {
        let mut bytes = [0u8; CURSOR_LEN];
        bytes[..8].copy_from_slice(&self.offset_index.to_be_bytes());
        bytes[8..].copy_from_slice(self.domain_id.as_bytes());
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Decode a token back into a cursor.
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| PipelineError::MalformedCursor {
                reason: format!("not valid base64: {e}"),
            })?;

        if bytes.len() != CURSOR_LEN {
            return Err(PipelineError::MalformedCursor {
                reason: format!("expected {CURSOR_LEN} bytes, got {}", bytes.len()),
            });
        }

        let mut key = [0u8; 8];
        key.copy_from_slice(&bytes[..8]);
        let offset_index = i64::from_be_bytes(key);

        let domain_id = Uuid::from_slice(&bytes[8..]).map_err(|e| {
            PipelineError::MalformedCursor {
                reason: format!("not a valid uuid: {e}"),
            }
        })?;

        Ok(Self {
            offset_index,
            domain_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = DomainCursor::new(42_000, Uuid::new_v4());
        let decoded = DomainCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn test_cursor_round_trip_extremes() {
        for offset in [i64::MIN, -1, 0, 1, i64::MAX] {
            let cursor = DomainCursor::new(offset, Uuid::nil());
            let decoded = DomainCursor::decode(&cursor.encode()).unwrap();
            assert_eq!(cursor, decoded);
        }
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = DomainCursor::decode("not base64!!").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedCursor { .. }));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let short = URL_SAFE_NO_PAD.encode([1u8, 2, 3]);
        let err = DomainCursor::decode(&short).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedCursor { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_token() {
        let cursor = DomainCursor::new(7, Uuid::new_v4());
        let mut token = cursor.encode();
        token.truncate(token.len() - 4);
        assert!(DomainCursor::decode(&token).is_err());
    }
}
