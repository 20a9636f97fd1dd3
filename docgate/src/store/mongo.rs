//! MongoDB-backed document store
//!
//! Each pooled connection wraps a driver client limited to a single socket,
//! so the gateway pool (not the driver) decides how many connections exist.

use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::{
    error::{Error as MongoError, ErrorKind as MongoErrorKind},
    options::{ClientOptions, Credential, ServerAddress},
    Client, Collection, Database,
};

use super::{DocumentStore, StoreConnector};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreErrorKind, StoreOperation, StoreResult};

/// Opens single-connection MongoDB clients
#[derive(Debug, Clone)]
pub struct MongoConnector {
    app_name: String,
}

impl Default for MongoConnector {
    fn default() -> Self {
        Self::new("docgate")
    }
}

impl MongoConnector {
    /// Connector that reports `app_name` to the server
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    fn client_options(&self, config: &StoreConfig) -> ClientOptions {
        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: config.address.clone(),
            port: Some(config.port),
        }];
        options.app_name = Some(self.app_name.clone());
        options.max_pool_size = Some(1);
        options.min_pool_size = Some(0);
        options.connect_timeout = Some(config.connect_timeout());
        options.server_selection_timeout = Some(config.connect_timeout());

        if config.has_credentials() {
            let mut credential = Credential::default();
            credential.username = Some(config.username.clone());
            credential.password = Some(config.password.clone());
            options.credential = Some(credential);
        }

        options
    }
}

impl StoreConnector for MongoConnector {
    type Store = MongoStore;

    async fn connect(&self, config: &StoreConfig) -> StoreResult<MongoStore> {
        let client = Client::with_options(self.client_options(config))
            .map_err(|e| classify(e, StoreOperation::Connect))?;

        let database = client.database(&config.database);
        let collection = database.collection::<Document>(&config.collection);
        let store = MongoStore {
            database,
            collection,
        };

        // The driver connects lazily; force the handshake and authentication now
        store
            .ping()
            .await
            .map_err(|e| StoreError::new(StoreOperation::Connect, e.kind, e.message))?;

        tracing::debug!(
            uri = %config.redacted_uri(),
            collection = %config.collection,
            "Opened MongoDB connection"
        );
        Ok(store)
    }
}

/// One MongoDB connection bound to the configured collection
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
    collection: Collection<Document>,
}

impl DocumentStore for MongoStore {
    async fn find(&self, filter: Document, offset: u64, limit: u64) -> StoreResult<Vec<Document>> {
        let mut action = self.collection.find(filter).skip(offset);
        if limit > 0 {
            action = action.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let cursor = action
            .await
            .map_err(|e| classify(e, StoreOperation::Find))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| classify(e, StoreOperation::Find))
    }

    async fn count(&self, filter: Document) -> StoreResult<u64> {
        self.collection
            .count_documents(filter)
            .await
            .map_err(|e| classify(e, StoreOperation::Count))
    }

    async fn insert(&self, document: Document) -> StoreResult<()> {
        self.collection
            .insert_one(document)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, StoreOperation::Insert))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| classify(e, StoreOperation::Ping))
    }
}

/// Map a driver error onto the store taxonomy
fn classify(err: MongoError, operation: StoreOperation) -> StoreError {
    let kind = match err.kind.as_ref() {
        MongoErrorKind::Authentication { .. } => StoreErrorKind::AuthFailed,
        MongoErrorKind::ServerSelection { .. }
        | MongoErrorKind::Io(_)
        | MongoErrorKind::ConnectionPoolCleared { .. }
        | MongoErrorKind::DnsResolve { .. } => StoreErrorKind::ConnectionFailed,
        MongoErrorKind::Command(command) if command.code == AUTHENTICATION_FAILED_CODE => {
            StoreErrorKind::AuthFailed
        }
        MongoErrorKind::Command(command)
            if is_read(operation) && INVALID_QUERY_CODES.contains(&command.code) =>
        {
            StoreErrorKind::InvalidQuery
        }
        _ => match operation {
            StoreOperation::Insert => StoreErrorKind::WriteFailed,
            StoreOperation::Connect | StoreOperation::Ping => StoreErrorKind::ConnectionFailed,
            _ => StoreErrorKind::QueryFailed,
        },
    };

    StoreError::new(operation, kind, err.to_string())
}

fn is_read(operation: StoreOperation) -> bool {
    matches!(operation, StoreOperation::Find | StoreOperation::Count)
}

/// Server error code for rejected credentials
const AUTHENTICATION_FAILED_CODE: i32 = 18;

/// Server error codes for a malformed filter: `BadValue` and invalid regex
const INVALID_QUERY_CODES: [i32; 2] = [2, 51091];
