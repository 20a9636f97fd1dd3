//! HTTP server with graceful shutdown

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::Config,
    error::Result,
    handler::GatewayRequest,
    health,
    middleware::{
        json_error_body, request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    },
    state::AppState,
    store::StoreConnector,
};

/// Path of the liveness probe
pub const HEALTH_PATH: &str = "/health";

/// Path of the readiness probe
pub const READY_PATH: &str = "/ready";

/// Build the application router
///
/// The gateway resource accepts every method so that disallowed ones reach
/// the handler's method check and get the JSON 405 body.
pub fn router<C: StoreConnector>(state: AppState<C>) -> Router {
    let gateway_path = state.config().gateway.path.clone();
    let body_limit = state.config().service.body_limit_mb * 1024 * 1024;

    Router::new()
        .route(HEALTH_PATH, get(health::health::<C>))
        .route(READY_PATH, get(health::readiness::<C>))
        .route(&gateway_path, any(gateway::<C>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn gateway<C: StoreConnector>(
    State(state): State<AppState<C>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = GatewayRequest {
        method,
        query: uri.query().map(str::to_string),
        headers,
        body,
    };
    state.handler().respond(request).await
}

/// Server instance
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Wrap the router in the middleware stack
    ///
    /// Layers are applied in reverse order (last added is outermost).
    pub fn with_middleware(&self, app: Router) -> Router {
        let body_limit = self.config.service.body_limit_mb * 1024 * 1024;

        app
            // Request timeout
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                self.config.service.timeout(),
            ))
            // Request body size limit
            .layer(RequestBodyLimitLayer::new(body_limit))
            // Tracing
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            // Request tracking
            .layer(sensitive_headers_layer())
            .layer(request_id_propagation_layer())
            .layer(request_id_layer())
            // Panic recovery
            .layer(CatchPanicLayer::new())
            // JSON bodies for errors raised by the layers above
            .layer(axum::middleware::map_response(json_error_body))
    }

    /// Run the server with the given router until SIGINT or SIGTERM
    pub async fn serve(self, app: Router) -> Result<()> {
        let addr = self.config.service.socket_addr();

        tracing::info!("Starting {} on {}", self.config.service.name, addr);
        self.log_config();

        let app = self.with_middleware(app);
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }

    fn log_config(&self) {
        let store = &self.config.store;
        let gateway = &self.config.gateway;

        tracing::info!("Gateway configuration:");
        tracing::info!("  - Resource path: {}", gateway.path);
        tracing::info!("  - Store: {:?} at {}", store.backend, store.redacted_uri());
        tracing::info!("  - Collection: {}", store.collection);
        tracing::info!("  - Max store connections: {}", store.max_connections);
        tracing::info!("  - Store operation timeout: {:?}", store.op_timeout());
        tracing::info!(
            "  - If-Modified-Since short-circuit: {}",
            if gateway.honor_if_modified_since { "enabled" } else { "disabled" }
        );
        tracing::info!(
            "  - Request body limit: {} MB",
            self.config.service.body_limit_mb
        );
        tracing::info!(
            "  - Request timeout: {} seconds",
            self.config.service.timeout_secs
        );
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("Shutdown signal received, draining requests...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::middleware::REQUEST_ID_HEADER;
    use crate::pool;
    use crate::responses::JSON_CONTENT_TYPE;
    use crate::store::{MemoryConnector, MemoryStore};
    use axum::body::{to_bytes, Body};
    use bson::doc;
    use http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(connector: MemoryConnector) -> Router {
        app_with(Config::default(), connector)
    }

    fn app_with(config: Config, connector: MemoryConnector) -> Router {
        let store_config = Arc::new(StoreConfig {
            max_connections: 2,
            acquire_timeout_ms: 100,
            ..config.store.clone()
        });
        let pool = pool::build_pool(connector, store_config).unwrap();
        let state = AppState::with_pool(config.clone(), pool);
        Server::new(config).with_middleware(router(state))
    }

    fn fixture() -> MemoryConnector {
        MemoryConnector::new(MemoryStore::with_documents(vec![
            doc! { "name": "anna" },
            doc! { "name": "bob" },
            doc! { "name": "annie" },
        ]))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_query() {
        let response = app(fixture())
            .oneshot(
                Request::get("/?q=name:ann&offset=0&limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());

        let body = body_json(response).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["offset"], 0);
        assert_eq!(body["q_results"][0]["name"], "anna");
        assert_eq!(body["q_results"][1]["name"], "annie");
    }

    #[tokio::test]
    async fn test_post_then_get() {
        let connector = MemoryConnector::new(MemoryStore::new());
        let app = app(connector.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name":"Dora","$inc":{"n":1}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "ok": true }));

        let response = app
            .oneshot(Request::get("/?q=name:dora").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert!(body["q_results"][0].get("$inc").is_none());
    }

    #[tokio::test]
    async fn test_delete_is_rejected_without_store_access() {
        let connector = fixture();
        let response = app(connector.clone())
            .oneshot(Request::delete("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
        let body = body_json(response).await;
        assert_eq!(body["code"], "METHOD_NOT_ALLOWED");
        assert_eq!(body["status"], 405);
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_store_unavailable() {
        let connector = MemoryConnector::offline();
        let response = app(connector.clone())
            .oneshot(Request::get("/?q=name:ann").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "STORE_UNAVAILABLE");
        assert_eq!(connector.store().operations(), 0);
    }

    #[tokio::test]
    async fn test_bad_query() {
        let response = app(fixture())
            .oneshot(Request::get("/?q=oops").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_QUERY");
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let response = app(fixture())
            .oneshot(
                Request::get(HEALTH_PATH)
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness() {
        let response = app(fixture())
            .oneshot(Request::get(READY_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ready"], true);
        assert_eq!(body["dependencies"]["store"]["healthy"], true);

        let response = app(MemoryConnector::offline())
            .oneshot(Request::get(READY_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["ready"], false);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let big = format!(r#"{{"blob":"{}"}}"#, "x".repeat(11 * 1024 * 1024));
        let response = app(MemoryConnector::new(MemoryStore::new()))
            .oneshot(Request::post("/").body(Body::from(big)).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = body_json(response).await;
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(body["status"], 413);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_json() {
        let mut config = Config::default();
        config.service.timeout_secs = 1;
        config.store.op_timeout_ms = 60_000;
        let connector = fixture();
        connector.store().set_latency(Duration::from_secs(30));

        let response = app_with(config, connector)
            .oneshot(Request::get("/?q=name:ann").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        let body = body_json(response).await;
        assert_eq!(body["code"], "REQUEST_TIMEOUT");
        assert_eq!(body["status"], 408);
    }

    #[tokio::test]
    async fn test_unrouted_path_is_json() {
        let response = app(fixture())
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }

    #[test]
    fn test_server_creation() {
        let config = Config::default();
        let server = Server::new(config.clone());
        assert_eq!(server.config().service.port, config.service.port);
    }
}
