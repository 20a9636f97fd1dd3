//! Response bodies for successful gateway requests
//!
//! List requests answer with a [`QueryEnvelope`]:
//!
//! ```json
//! {"q_results": [...], "count": 2, "limit": 2, "offset": 0}
//! ```
//!
//! Inserts answer with an [`InsertAck`]: `{"ok": true}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorRecord;

/// Content type of every gateway response body
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Result of a list request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    /// Decoded documents, in store order
    pub q_results: Value,

    /// Total number of documents matching the filter, ignoring offset and limit
    pub count: u64,

    /// Limit echoed from the request, 0 when unlimited
    pub limit: u64,

    /// Offset echoed from the request
    pub offset: u64,
}

impl QueryEnvelope {
    pub fn new(q_results: Value, count: u64, limit: u64, offset: u64) -> Self {
        Self {
            q_results,
            count,
            limit,
            offset,
        }
    }
}

/// Acknowledgement of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertAck {
    pub ok: bool,
}

impl Default for InsertAck {
    fn default() -> Self {
        Self { ok: true }
    }
}

/// Serialize a payload, failing with `AllocationFailed` when it exceeds `max_bytes`
pub fn to_body<T: Serialize>(payload: &T, max_bytes: usize) -> Result<Vec<u8>, ErrorRecord> {
    let body = serde_json::to_vec(payload).map_err(|e| {
        ErrorRecord::allocation_failed(format!("Failed to serialize response: {}", e))
    })?;

    if body.len() > max_bytes {
        return Err(ErrorRecord::allocation_failed(format!(
            "Response of {} bytes exceeds the {} byte limit",
            body.len(),
            max_bytes
        )));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let envelope = QueryEnvelope::new(
            json!([{"name": "Ann"}, {"name": "Anna"}]),
            2,
            2,
            0,
        );
        let body = to_body(&envelope, usize::MAX).unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(
            value,
            json!({
                "q_results": [{"name": "Ann"}, {"name": "Anna"}],
                "count": 2,
                "limit": 2,
                "offset": 0
            })
        );
    }

    #[test]
    fn test_envelope_field_order() {
        let body = to_body(&QueryEnvelope::new(json!([]), 7, 0, 5), usize::MAX).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"q_results":[],"count":7,"limit":0,"offset":5}"#
        );
    }

    #[test]
    fn test_insert_ack() {
        let body = to_body(&InsertAck::default(), usize::MAX).unwrap();
        assert_eq!(body, br#"{"ok":true}"#);
    }

    #[test]
    fn test_body_limit() {
        let envelope = QueryEnvelope::new(json!([{"blob": "x".repeat(64)}]), 1, 0, 0);
        let err = to_body(&envelope, 32).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AllocationFailed);
        assert_eq!(err.status, http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
