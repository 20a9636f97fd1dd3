//! Document store abstraction
//!
//! The gateway talks to exactly one collection through [`DocumentStore`].
//! Connections are produced by a [`StoreConnector`] and held in the pool
//! defined in [`crate::pool`].
//!
//! Two backends ship with the crate:
//!
//! - [`memory`]: an in-process collection used for tests, demos, and
//!   `docgate serve --memory`
//! - `mongo` (feature `mongodb`, on by default): a MongoDB collection reached
//!   through the official driver

use bson::Document;
use std::future::Future;

use crate::config::StoreConfig;
use crate::error::StoreResult;

pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::{MemoryConnector, MemoryStore};

#[cfg(feature = "mongodb")]
pub use mongo::{MongoConnector, MongoStore};

/// One live connection to the configured collection
///
/// Uses RPITIT so implementations can be written as plain `async fn`.
pub trait DocumentStore: Send + Sync + 'static {
    /// Documents matching `filter`, skipping `offset`, at most `limit` (0 = all)
    fn find(
        &self,
        filter: Document,
        offset: u64,
        limit: u64,
    ) -> impl Future<Output = StoreResult<Vec<Document>>> + Send;

    /// Number of documents matching `filter`
    fn count(&self, filter: Document) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Store one document
    fn insert(&self, document: Document) -> impl Future<Output = StoreResult<()>> + Send;

    /// Cheap liveness round-trip
    fn ping(&self) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Opens new store connections
pub trait StoreConnector: Send + Sync + 'static {
    type Store: DocumentStore;

    /// Open and authenticate one connection
    fn connect(&self, config: &StoreConfig)
        -> impl Future<Output = StoreResult<Self::Store>> + Send;
}
