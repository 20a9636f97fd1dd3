//! Error types and HTTP response conversion
//!
//! Two layers live here:
//! - [`Error`]: service-level failures (configuration, I/O, pool setup) surfaced
//!   to the host process.
//! - [`ErrorRecord`]: the per-request failure taxonomy. A record is created where
//!   the failure happens, travels up the handler as the `Err` side of a
//!   `Result`, and is rendered once into a status code and JSON body.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Structured Store Errors
// ============================================================================

/// Store operation being performed when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// Establishing a connection
    Connect,
    /// Checking a connection out of the pool
    PoolAcquire,
    /// Running a query
    Find,
    /// Counting matches
    Count,
    /// Inserting a document
    Insert,
    /// Liveness round-trip
    Ping,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::PoolAcquire => write!(f, "pool_acquire"),
            Self::Find => write!(f, "find"),
            Self::Count => write!(f, "count"),
            Self::Insert => write!(f, "insert"),
            Self::Ping => write!(f, "ping"),
        }
    }
}

/// Category of store error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Store unreachable or connection dropped
    ConnectionFailed,
    /// Credentials rejected
    AuthFailed,
    /// Query or cursor iteration failed
    QueryFailed,
    /// Filter rejected as malformed, such as an invalid regular expression
    InvalidQuery,
    /// Write rejected
    WriteFailed,
    /// Round-trip exceeded its deadline
    Timeout,
    /// No pooled connection became available in time
    PoolExhausted,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::AuthFailed => write!(f, "auth_failed"),
            Self::QueryFailed => write!(f, "query_failed"),
            Self::InvalidQuery => write!(f, "invalid_query"),
            Self::WriteFailed => write!(f, "write_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
        }
    }
}

/// Structured store error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// The operation being performed when the error occurred
    pub operation: StoreOperation,
    /// The category of error
    pub kind: StoreErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl StoreError {
    pub fn new(operation: StoreOperation, kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            StoreOperation::Connect,
            StoreErrorKind::ConnectionFailed,
            message,
        )
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(StoreOperation::Connect, StoreErrorKind::AuthFailed, message)
    }

    pub fn query_failed(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::QueryFailed, message)
    }

    pub fn invalid_query(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::InvalidQuery, message)
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::new(StoreOperation::Insert, StoreErrorKind::WriteFailed, message)
    }

    pub fn timeout(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::Timeout, message)
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::new(
            StoreOperation::PoolAcquire,
            StoreErrorKind::PoolExhausted,
            message,
        )
    }

    /// Check if this error is transient and a later attempt may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::ConnectionFailed
                | StoreErrorKind::Timeout
                | StoreErrorKind::PoolExhausted
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Store {} error during {}: {}",
            self.kind, self.operation, self.message
        )
    }
}

impl std::error::Error for StoreError {}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Service Errors
// ============================================================================

/// Result type alias using the service error
pub type Result<T> = std::result::Result<T, Error>;

/// Service-level error type
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Structured store error
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Connection pool could not be built
    #[error("Pool error: {0}")]
    Pool(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

// ============================================================================
// Request Error Taxonomy
// ============================================================================

/// Every way a single gateway request can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Method other than GET or POST
    MethodNotAllowed,
    /// Conditional request short-circuit
    NotModified,
    /// Connection or collection could not be acquired
    StoreUnavailable,
    /// Credentialed connection rejected
    AuthFailed,
    /// Store reported an error while reading results
    CursorError,
    /// Response body could not be produced within limits
    AllocationFailed,
    /// Malformed `q` parameter
    BadQuery,
    /// POST body missing, not JSON, or not an object
    BadBody,
    /// Store round-trip exceeded its deadline
    StoreTimeout,
    /// Store rejected an insert
    WriteFailed,
    /// No route for the request path
    NotFound,
    /// Request body over the configured limit
    PayloadTooLarge,
    /// Whole request exceeded the service timeout
    RequestTimeout,
    /// Other client error raised outside the gateway handler
    BadRequest,
    /// Unexpected server failure, including a recovered panic
    Internal,
}

impl ErrorKind {
    /// HTTP status this kind is reported with
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotModified => StatusCode::NOT_MODIFIED,
            Self::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AuthFailed => StatusCode::UNAUTHORIZED,
            Self::CursorError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AllocationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadQuery => StatusCode::BAD_REQUEST,
            Self::BadBody => StatusCode::BAD_REQUEST,
            Self::StoreTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::WriteFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code placed in the error body
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::NotModified => "NOT_MODIFIED",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::AuthFailed => "AUTH_FAILED",
            Self::CursorError => "CURSOR_ERROR",
            Self::AllocationFailed => "ALLOCATION_FAILED",
            Self::BadQuery => "BAD_QUERY",
            Self::BadBody => "BAD_BODY",
            Self::StoreTimeout => "STORE_TIMEOUT",
            Self::WriteFailed => "WRITE_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A request failure, created at its origin and reported exactly once
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.status(),
            message: message.into(),
        }
    }

    pub fn method_not_allowed(method: &http::Method) -> Self {
        Self::new(
            ErrorKind::MethodNotAllowed,
            format!("Method {} is not allowed; use GET or POST", method),
        )
    }

    pub fn not_modified() -> Self {
        Self::new(ErrorKind::NotModified, "Not modified")
    }

    pub fn bad_query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadQuery, message)
    }

    pub fn bad_body(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadBody, message)
    }

    pub fn allocation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AllocationFailed, message)
    }

    /// Record for a bare error status produced by routing or middleware
    ///
    /// The status is kept as given; only the kind and message are derived.
    pub fn from_status(status: StatusCode) -> Self {
        let kind = match status {
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::METHOD_NOT_ALLOWED => ErrorKind::MethodNotAllowed,
            StatusCode::REQUEST_TIMEOUT => ErrorKind::RequestTimeout,
            StatusCode::PAYLOAD_TOO_LARGE => ErrorKind::PayloadTooLarge,
            s if s.is_client_error() => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        };
        let message = match kind {
            ErrorKind::NotFound => "No resource at this path",
            ErrorKind::MethodNotAllowed => "Method is not allowed on this path",
            ErrorKind::RequestTimeout => "Request timed out",
            ErrorKind::PayloadTooLarge => "Request body exceeds the configured limit",
            _ => status.canonical_reason().unwrap_or("Request failed"),
        };

        Self {
            kind,
            status,
            message: message.to_string(),
        }
    }

    /// Render into `(status, JSON body)`
    ///
    /// `NotModified` produces an empty body since a 304 must not carry one.
    pub fn report(&self) -> (StatusCode, Vec<u8>) {
        if self.kind == ErrorKind::NotModified {
            return (self.status, Vec::new());
        }
        let body = ErrorResponse::from(self);
        let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| {
            br#"{"error":"Internal server error","code":"ALLOCATION_FAILED","status":500}"#
                .to_vec()
        });
        (self.status, bytes)
    }

    /// Log the failure once at a level matching its status class
    pub(crate) fn log(&self) {
        if self.status.is_server_error() {
            tracing::error!(kind = %self.kind, status = self.status.as_u16(), "Request failed: {}", self.message);
        } else if self.status.is_client_error() {
            tracing::warn!(kind = %self.kind, status = self.status.as_u16(), "Request rejected: {}", self.message);
        } else {
            tracing::debug!(kind = %self.kind, status = self.status.as_u16(), "{}", self.message);
        }
    }
}

impl From<StoreError> for ErrorRecord {
    fn from(err: StoreError) -> Self {
        let kind = match err.kind {
            StoreErrorKind::ConnectionFailed | StoreErrorKind::PoolExhausted => {
                ErrorKind::StoreUnavailable
            }
            StoreErrorKind::AuthFailed => ErrorKind::AuthFailed,
            StoreErrorKind::QueryFailed => ErrorKind::CursorError,
            StoreErrorKind::InvalidQuery => ErrorKind::BadQuery,
            StoreErrorKind::WriteFailed => ErrorKind::WriteFailed,
            StoreErrorKind::Timeout => ErrorKind::StoreTimeout,
        };

        let message = match kind {
            ErrorKind::StoreUnavailable => "Document store unavailable",
            ErrorKind::AuthFailed => "Document store rejected the configured credentials",
            ErrorKind::CursorError => "Document store failed while reading results",
            ErrorKind::BadQuery => "Query pattern is not a valid regular expression",
            ErrorKind::WriteFailed => "Document store rejected the write",
            ErrorKind::StoreTimeout => "Document store operation timed out",
            _ => "Document store operation failed",
        };

        tracing::debug!(
            operation = %err.operation,
            store_kind = %err.kind,
            retriable = err.is_retriable(),
            "Store error: {}", err.message
        );

        Self::new(kind, message)
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Error code
    pub code: String,

    /// HTTP status code
    pub status: u16,
}

impl From<&ErrorRecord> for ErrorResponse {
    fn from(record: &ErrorRecord) -> Self {
        Self {
            error: record.message.clone(),
            code: record.kind.code().to_string(),
            status: record.status.as_u16(),
        }
    }
}

impl IntoResponse for ErrorRecord {
    fn into_response(self) -> Response {
        let (status, body) = self.report();
        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(crate::responses::JSON_CONTENT_TYPE),
        );
        if self.kind == ErrorKind::MethodNotAllowed {
            headers.insert(header::ALLOW, HeaderValue::from_static("GET, POST"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_statuses() {
        assert_eq!(ErrorKind::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ErrorKind::NotModified.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(ErrorKind::StoreUnavailable.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorKind::AuthFailed.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::CursorError.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorKind::AllocationFailed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorKind::BadQuery.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::BadBody.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::StoreTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ErrorKind::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ErrorKind::RequestTimeout.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_record_from_bare_status() {
        let record = ErrorRecord::from_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(record.kind, ErrorKind::PayloadTooLarge);
        assert_eq!(record.status, StatusCode::PAYLOAD_TOO_LARGE);

        let record = ErrorRecord::from_status(StatusCode::REQUEST_TIMEOUT);
        assert_eq!(record.kind, ErrorKind::RequestTimeout);

        let record = ErrorRecord::from_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(record.kind, ErrorKind::BadRequest);
        assert_eq!(record.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(record.message, "Unsupported Media Type");

        let record = ErrorRecord::from_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(record.kind, ErrorKind::Internal);
        assert_eq!(record.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_report_body_shape() {
        let record = ErrorRecord::bad_query("q must look like field:value");
        let (status, body) = record.report();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "BAD_QUERY");
        assert_eq!(json["status"], 400);
        assert_eq!(json["error"], "q must look like field:value");
    }

    #[test]
    fn test_not_modified_has_empty_body() {
        let (status, body) = ErrorRecord::not_modified().report();
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(body.is_empty());
    }

    #[test]
    fn test_store_error_mapping() {
        let cases = [
            (StoreError::connection_failed("refused"), ErrorKind::StoreUnavailable),
            (StoreError::pool_exhausted("busy"), ErrorKind::StoreUnavailable),
            (StoreError::auth_failed("bad password"), ErrorKind::AuthFailed),
            (StoreError::query_failed(StoreOperation::Find, "cursor killed"), ErrorKind::CursorError),
            (StoreError::invalid_query(StoreOperation::Find, "unmatched ("), ErrorKind::BadQuery),
            (StoreError::write_failed("duplicate key"), ErrorKind::WriteFailed),
            (StoreError::timeout(StoreOperation::Count, "deadline"), ErrorKind::StoreTimeout),
        ];

        for (store_err, expected) in cases {
            let record = ErrorRecord::from(store_err);
            assert_eq!(record.kind, expected);
            assert_eq!(record.status, expected.status());
        }
    }

    #[test]
    fn test_store_message_not_leaked() {
        let record = ErrorRecord::from(StoreError::auth_failed("user app, password hunter2"));
        assert!(!record.message.contains("hunter2"));
    }

    #[test]
    fn test_retriable() {
        assert!(StoreError::connection_failed("x").is_retriable());
        assert!(StoreError::timeout(StoreOperation::Find, "x").is_retriable());
        assert!(!StoreError::auth_failed("x").is_retriable());
        assert!(!StoreError::write_failed("x").is_retriable());
        assert!(!StoreError::invalid_query(StoreOperation::Find, "x").is_retriable());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::query_failed(StoreOperation::Find, "cursor not found");
        assert_eq!(
            err.to_string(),
            "Store query_failed error during find: cursor not found"
        );
    }

    #[test]
    fn test_method_not_allowed_response_headers() {
        let response = ErrorRecord::method_not_allowed(&http::Method::DELETE).into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }
}
