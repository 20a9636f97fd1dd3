//! # docgate
//!
//! JSON-over-HTTP gateway for a single document-store collection.
//!
//! - `GET <path>?q=<field>:<value>&offset=<n>&limit=<n>` lists documents whose
//!   `field` matches `value` as a case-insensitive regular expression
//! - `POST <path>` with a JSON object body stores it as a new document
//! - any other method is answered with 405
//!
//! ## Features
//!
//! - **Codec**: JSON to BSON with integer width selection, `/pattern/flags`
//!   regex literals, and `_id` object-id parsing
//! - **Connection pooling**: deadpool-managed store connections, pinged on reuse
//! - **Deadlines**: every store round-trip bounded by `store.op_timeout_ms`
//! - **Backends**: MongoDB (feature `mongodb`) and an in-memory collection
//! - **Observability**: structured tracing, request ID propagation
//! - **Health checks**: liveness and readiness probes
//!
//! ## Example
//!
//! ```rust,no_run
//! use docgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let connector = MemoryConnector::new(MemoryStore::new());
//!     let state = AppState::connect(config.clone(), connector).await?;
//!
//!     Server::new(config).serve(router(state)).await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod pool;
pub mod query;
pub mod responses;
pub mod server;
pub mod state;
pub mod store;

pub mod prelude {
    pub use crate::config::{Config, GatewayConfig, LogFormat, ServiceConfig, StoreBackend, StoreConfig};
    pub use crate::error::{
        Error, ErrorKind, ErrorRecord, ErrorResponse, Result, StoreError, StoreErrorKind,
        StoreOperation,
    };
    pub use crate::handler::{GatewayRequest, GatewayResponse, HandlerSettings, RequestHandler};
    pub use crate::health::{health, readiness};
    pub use crate::observability::init_tracing;
    pub use crate::pool::{StorePool, StorePoolHealth};
    pub use crate::query::{Matcher, QuerySpec};
    pub use crate::responses::{InsertAck, QueryEnvelope};
    pub use crate::server::{router, Server};
    pub use crate::state::AppState;
    pub use crate::store::{DocumentStore, MemoryConnector, MemoryStore, StoreConnector};

    #[cfg(feature = "mongodb")]
    pub use crate::store::{MongoConnector, MongoStore};

    pub use axum::Router;
}
