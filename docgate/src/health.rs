//! Health check handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    pool::{self, StorePoolHealth},
    state::AppState,
    store::{DocumentStore, StoreConnector},
};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness check response with dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Dependency statuses
    pub dependencies: HashMap<String, DependencyStatus>,

    /// Store pool metrics
    pub pool: StorePoolHealth,
}

/// Individual dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Dependency is healthy
    pub healthy: bool,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Simple health check (liveness probe)
///
/// Always returns 200 OK if the service is running.
pub async fn health<C: StoreConnector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness check (readiness probe)
///
/// Checks a connection out of the pool and pings the store. Returns 503
/// Service Unavailable when either step fails.
pub async fn readiness<C: StoreConnector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    let timeout = state.config().store.op_timeout();

    let probe = async {
        let store = pool::checkout(state.pool()).await?;
        store.ping().await
    };

    let status = match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(())) => DependencyStatus {
            healthy: true,
            message: Some("Connected".to_string()),
        },
        Ok(Err(e)) => {
            tracing::error!("Store health check failed: {}", e);
            DependencyStatus {
                healthy: false,
                message: Some(format!("Connection failed: {}", e.kind)),
            }
        }
        Err(_) => {
            tracing::error!("Store health check timed out after {:?}", timeout);
            DependencyStatus {
                healthy: false,
                message: Some("Ping timed out".to_string()),
            }
        }
    };

    let ready = status.healthy;
    let mut dependencies = HashMap::new();
    dependencies.insert("store".to_string(), status);

    let response = ReadinessResponse {
        ready,
        service: state.config().service.name.clone(),
        dependencies,
        pool: state.pool_health(),
    };

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(response))
}
