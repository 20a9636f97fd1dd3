//! Per-request orchestration
//!
//! A request moves through these stages in order, and any stage may end it
//! with an [`ErrorRecord`]:
//!
//! 1. method check (GET or POST)
//! 2. conditional check (`If-Modified-Since`, when enabled)
//! 3. input parsing (query string or JSON body)
//! 4. pooled connection checkout
//! 5. store dispatch under a per-operation deadline
//! 6. response assembly
//!
//! Input is parsed before a connection is checked out, so malformed requests
//! never touch the store. The checked-out connection is returned to the pool
//! when the request future completes or is dropped.

use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bson::Document;
use std::future::Future;
use std::time::Duration;

use crate::codec;
use crate::config::Config;
use crate::error::{ErrorRecord, StoreError, StoreOperation, StoreResult};
use crate::pool::{self, PooledStore, StorePool};
use crate::query::QuerySpec;
use crate::responses::{self, InsertAck, QueryEnvelope, JSON_CONTENT_TYPE};
use crate::store::{DocumentStore, StoreConnector};

/// What a request asks the store to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// GET: list matching documents
    List,
    /// POST: store the body as a new document
    Insert,
}

impl Operation {
    /// Method check
    pub fn from_method(method: &Method) -> Result<Self, ErrorRecord> {
        match *method {
            Method::GET => Ok(Self::List),
            Method::POST => Ok(Self::Insert),
            _ => Err(ErrorRecord::method_not_allowed(method)),
        }
    }
}

/// The parts of an HTTP request the gateway looks at
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(query: impl Into<String>) -> Self {
        Self::new(Method::GET).with_query(query)
    }

    pub fn post(body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST).with_body(body)
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A successful gateway response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    /// Body parsed as JSON
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
            self.body,
        )
            .into_response()
    }
}

/// Per-request limits and switches
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Deadline for each store round-trip
    pub op_timeout: Duration,

    /// Answer 304 whenever `If-Modified-Since` is present
    pub honor_if_modified_since: bool,

    /// Largest response body the gateway will produce
    pub max_response_bytes: usize,
}

impl HandlerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            op_timeout: config.store.op_timeout(),
            honor_if_modified_since: config.gateway.honor_if_modified_since,
            max_response_bytes: config.gateway.max_response_bytes(),
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Serves gateway requests against a pooled store
pub struct RequestHandler<C: StoreConnector> {
    pool: StorePool<C>,
    settings: HandlerSettings,
}

impl<C: StoreConnector> Clone for RequestHandler<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<C: StoreConnector> RequestHandler<C> {
    pub fn new(pool: StorePool<C>, settings: HandlerSettings) -> Self {
        Self { pool, settings }
    }

    pub fn pool(&self) -> &StorePool<C> {
        &self.pool
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Handle a request and render the outcome, logging failures once
    pub async fn respond(&self, request: GatewayRequest) -> Response {
        match self.process(request).await {
            Ok(response) => response.into_response(),
            Err(record) => {
                record.log();
                record.into_response()
            }
        }
    }

    /// Handle a request
    #[tracing::instrument(skip_all, fields(method = %request.method))]
    pub async fn process(&self, request: GatewayRequest) -> Result<GatewayResponse, ErrorRecord> {
        let operation = Operation::from_method(&request.method)?;

        if self.settings.honor_if_modified_since
            && request.headers.contains_key(header::IF_MODIFIED_SINCE)
        {
            return Err(ErrorRecord::not_modified());
        }

        match operation {
            Operation::List => {
                let query = QuerySpec::parse(request.query.as_deref().unwrap_or_default())?;
                let store = self.connect().await?;
                self.list(&store, query).await
            }
            Operation::Insert => {
                let document = codec::document_from_body(&request.body)?;
                let store = self.connect().await?;
                self.insert(&store, document).await
            }
        }
    }

    async fn connect(&self) -> Result<PooledStore<C>, ErrorRecord> {
        let store = pool::checkout(&self.pool).await?;
        Ok(store)
    }

    async fn list(&self, store: &C::Store, query: QuerySpec) -> Result<GatewayResponse, ErrorRecord> {
        let filter = query.filter_document();

        let documents = self
            .deadline(StoreOperation::Find, store.find(filter.clone(), query.offset, query.limit))
            .await?;
        let count = self
            .deadline(StoreOperation::Count, store.count(filter))
            .await?;

        tracing::debug!(
            returned = documents.len(),
            matched = count,
            offset = query.offset,
            limit = query.limit,
            "Query served"
        );

        let envelope = QueryEnvelope::new(codec::decode(documents), count, query.limit, query.offset);
        let body = responses::to_body(&envelope, self.settings.max_response_bytes)?;
        Ok(GatewayResponse::ok(body))
    }

    async fn insert(&self, store: &C::Store, document: Document) -> Result<GatewayResponse, ErrorRecord> {
        self.deadline(StoreOperation::Insert, store.insert(document))
            .await?;

        tracing::debug!("Document inserted");

        let body = responses::to_body(&InsertAck::default(), self.settings.max_response_bytes)?;
        Ok(GatewayResponse::ok(body))
    }

    /// Bound one store round-trip by the configured deadline
    async fn deadline<T>(
        &self,
        operation: StoreOperation,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.settings.op_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(
                operation,
                format!("No reply within {:?}", self.settings.op_timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::ErrorKind;
    use crate::store::{MemoryConnector, MemoryStore};
    use bson::doc;
    use serde_json::json;
    use std::sync::Arc;

    fn fixture() -> MemoryStore {
        MemoryStore::with_documents(vec![
            doc! { "name": "anna" },
            doc! { "name": "bob" },
            doc! { "name": "annie" },
        ])
    }

    fn handler_with(connector: MemoryConnector, settings: HandlerSettings) -> RequestHandler<MemoryConnector> {
        let config = Arc::new(StoreConfig {
            max_connections: 1,
            acquire_timeout_ms: 100,
            ..Default::default()
        });
        let pool = pool::build_pool(connector, config).unwrap();
        RequestHandler::new(pool, settings)
    }

    fn handler(connector: MemoryConnector) -> RequestHandler<MemoryConnector> {
        handler_with(connector, HandlerSettings::default())
    }

    fn names(body: &serde_json::Value) -> Vec<String> {
        body["q_results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_list_with_regex_and_limit() {
        let handler = handler(MemoryConnector::new(fixture()));

        let response = handler
            .process(GatewayRequest::get("q=name:ann&offset=0&limit=2"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let body = response.json().unwrap();
        assert_eq!(names(&body), vec!["anna", "annie"]);
        assert_eq!(body["count"], 2);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["offset"], 0);
    }

    #[tokio::test]
    async fn test_count_ignores_paging() {
        let handler = handler(MemoryConnector::new(fixture()));

        let body = handler
            .process(GatewayRequest::get("q=name:ANN&offset=1&limit=1"))
            .await
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(names(&body), vec!["annie"]);
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_list_defaults_to_everything() {
        let handler = handler(MemoryConnector::new(fixture()));

        let body = handler
            .process(GatewayRequest::new(Method::GET))
            .await
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(names(&body), vec!["anna", "bob", "annie"]);
        assert_eq!(body["count"], 3);
        assert_eq!(body["limit"], 0);
        assert_eq!(body["offset"], 0);
    }

    #[tokio::test]
    async fn test_object_ids_rendered_as_extended_json() {
        let handler = handler(MemoryConnector::new(fixture()));

        let body = handler
            .process(GatewayRequest::get("q=name:bob"))
            .await
            .unwrap()
            .json()
            .unwrap();
        assert!(body["q_results"][0]["_id"]["$oid"].is_string());
    }

    #[tokio::test]
    async fn test_disallowed_method_never_touches_store() {
        let connector = MemoryConnector::new(fixture());
        let handler = handler(connector.clone());

        let err = handler
            .process(GatewayRequest::new(Method::DELETE))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MethodNotAllowed);
        assert_eq!(err.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(connector.connect_attempts(), 0);
        assert_eq!(connector.store().operations(), 0);
    }

    #[tokio::test]
    async fn test_store_offline() {
        let connector = MemoryConnector::offline();
        let handler = handler(connector.clone());

        let err = handler
            .process(GatewayRequest::get("q=name:ann"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StoreUnavailable);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(connector.store().operations(), 0);
    }

    #[tokio::test]
    async fn test_bad_query_never_touches_store() {
        let connector = MemoryConnector::new(fixture());
        let handler = handler(connector.clone());

        let err = handler
            .process(GatewayRequest::get("q=nameann"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadQuery);
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_bad_query() {
        let handler = handler(MemoryConnector::new(fixture()));

        let err = handler
            .process(GatewayRequest::get("q=name:("))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadQuery);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let store = fixture().require_credentials("app", "secret");
        let handler = handler(MemoryConnector::new(store));

        let err = handler
            .process(GatewayRequest::get("q=name:ann"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthFailed);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cursor_error_releases_connection() {
        let store = fixture();
        let handler = handler(MemoryConnector::new(store.clone()));

        store.fail_reads(true);
        let err = handler
            .process(GatewayRequest::get("q=name:ann"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CursorError);

        // Single-connection pool: the failed request must have returned it
        store.fail_reads(false);
        let response = handler.process(GatewayRequest::get("q=name:ann")).await;
        assert!(response.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_hits_deadline() {
        let store = fixture();
        store.set_latency(Duration::from_secs(60));
        let settings = HandlerSettings {
            op_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let handler = handler_with(MemoryConnector::new(store), settings);

        let err = handler
            .process(GatewayRequest::get("q=name:ann"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StoreTimeout);
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_insert_drops_operator_keys() {
        let store = MemoryStore::new();
        let handler = handler(MemoryConnector::new(store.clone()));

        let body = json!({
            "name": "cy",
            "$set": { "admin": true },
            "profile": { "$where": "1", "age": 3_000_000_000_i64 }
        });
        let response = handler
            .process(GatewayRequest::post(body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.json().unwrap(), json!({ "ok": true }));

        let docs = store.documents().await;
        assert_eq!(docs.len(), 1);
        assert!(!docs[0].contains_key("$set"));
        let profile = docs[0].get_document("profile").unwrap();
        assert!(!profile.contains_key("$where"));
        assert_eq!(profile.get_i64("age").unwrap(), 3_000_000_000);
    }

    #[tokio::test]
    async fn test_insert_bad_body_never_touches_store() {
        let connector = MemoryConnector::new(MemoryStore::new());
        let handler = handler(connector.clone());

        for body in ["", "not json", "[1, 2]"] {
            let err = handler
                .process(GatewayRequest::post(body))
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::BadBody, "body {:?}", body);
        }
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_insert_write_failure() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let handler = handler(MemoryConnector::new(store));

        let err = handler
            .process(GatewayRequest::post(r#"{"name":"cy"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::WriteFailed);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_if_modified_since_ignored_by_default() {
        let handler = handler(MemoryConnector::new(fixture()));
        let request = GatewayRequest::get("q=name:bob").with_header(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        assert!(handler.process(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_if_modified_since_when_enabled() {
        let connector = MemoryConnector::new(fixture());
        let settings = HandlerSettings {
            honor_if_modified_since: true,
            ..Default::default()
        };
        let handler = handler_with(connector.clone(), settings);
        let request = GatewayRequest::get("q=name:bob").with_header(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        let err = handler.process(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotModified);
        assert_eq!(err.status, StatusCode::NOT_MODIFIED);
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_oversized_response() {
        let settings = HandlerSettings {
            max_response_bytes: 16,
            ..Default::default()
        };
        let handler = handler_with(MemoryConnector::new(fixture()), settings);

        let err = handler
            .process(GatewayRequest::new(Method::GET))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AllocationFailed);
    }

    #[tokio::test]
    async fn test_respond_sets_json_content_type() {
        let handler = handler(MemoryConnector::new(fixture()));

        let ok = handler.respond(GatewayRequest::get("q=name:bob")).await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);

        let rejected = handler.respond(GatewayRequest::new(Method::PUT)).await;
        assert_eq!(rejected.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(rejected.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(rejected.headers()[header::ALLOW], "GET, POST");
    }
}
