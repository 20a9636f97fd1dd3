//! In-process document store
//!
//! Holds one collection in memory and evaluates the subset of filter
//! semantics the gateway produces:
//!
//! - equality, with numbers compared across `Int32`, `Int64`, and `Double`
//! - regular expressions (`i`, `m`, `s`, `x` flags) against string fields
//! - array fields match when any element matches
//! - dotted paths reach into embedded documents and array indexes
//!
//! Fault injection hooks let tests exercise every store failure the gateway
//! reports.

use bson::{oid::ObjectId, Bson, Document, Regex as BsonRegex};
use regex::{Regex, RegexBuilder};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{DocumentStore, StoreConnector};
use crate::codec::ID_KEY;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreErrorKind, StoreOperation, StoreResult};

#[derive(Debug, Default)]
struct Inner {
    documents: RwLock<Vec<Document>>,
    credentials: OnceLock<(String, String)>,
    available: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    latency_ms: AtomicU64,
    operations: AtomicUsize,
}

/// Shared in-memory collection
///
/// Clones share the same documents; each pooled connection is a clone.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty, reachable collection that accepts any credentials
    pub fn new() -> Self {
        let inner = Inner {
            available: AtomicBool::new(true),
            ..Default::default()
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Collection pre-filled with `documents`
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let prepared: Vec<Document> = documents.into_iter().map(with_object_id).collect();
        let inner = Inner {
            documents: RwLock::new(prepared),
            available: AtomicBool::new(true),
            ..Default::default()
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Require these credentials on connect
    ///
    /// Only the first call takes effect.
    pub fn require_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let _ = self
            .inner
            .credentials
            .set((username.into(), password.into()));
        self
    }

    /// Mark the store reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Make every find and count fail as a broken cursor would
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every insert fail
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every data operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of find, count, and insert calls served so far
    pub fn operations(&self) -> usize {
        self.inner.operations.load(Ordering::SeqCst)
    }

    /// Snapshot of the stored documents
    pub async fn documents(&self) -> Vec<Document> {
        self.inner.documents.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self, operation: StoreOperation) -> StoreResult<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::new(
                operation,
                StoreErrorKind::ConnectionFailed,
                "In-memory store is offline",
            ))
        }
    }

    fn authenticate(&self, config: &StoreConfig) -> StoreResult<()> {
        match self.inner.credentials.get() {
            Some((user, pass)) if *user != config.username || *pass != config.password => Err(
                StoreError::auth_failed(format!("Authentication failed for user {:?}", config.username)),
            ),
            _ => Ok(()),
        }
    }

    /// Count the call and apply injected latency
    async fn begin(&self, operation: StoreOperation) -> StoreResult<()> {
        self.inner.operations.fetch_add(1, Ordering::SeqCst);
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_available(operation)
    }

    fn check_reads(&self, operation: StoreOperation) -> StoreResult<()> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::query_failed(operation, "Cursor was killed"));
        }
        Ok(())
    }

    async fn matching(&self, filter: &Document, operation: StoreOperation) -> StoreResult<Vec<Document>> {
        let filter = CompiledFilter::compile(filter, operation)?;
        let documents = self.inner.documents.read().await;
        Ok(documents
            .iter()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }
}

impl DocumentStore for MemoryStore {
    async fn find(&self, filter: Document, offset: u64, limit: u64) -> StoreResult<Vec<Document>> {
        self.begin(StoreOperation::Find).await?;
        self.check_reads(StoreOperation::Find)?;

        let matched = self.matching(&filter, StoreOperation::Find).await?;
        let skipped = matched.into_iter().skip(offset as usize);
        Ok(if limit > 0 {
            skipped.take(limit as usize).collect()
        } else {
            skipped.collect()
        })
    }

    async fn count(&self, filter: Document) -> StoreResult<u64> {
        self.begin(StoreOperation::Count).await?;
        self.check_reads(StoreOperation::Count)?;

        Ok(self.matching(&filter, StoreOperation::Count).await?.len() as u64)
    }

    async fn insert(&self, document: Document) -> StoreResult<()> {
        self.begin(StoreOperation::Insert).await?;
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write_failed("Write rejected by in-memory store"));
        }

        self.inner
            .documents
            .write()
            .await
            .push(with_object_id(document));
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available(StoreOperation::Ping)
    }
}

fn with_object_id(mut document: Document) -> Document {
    if !document.contains_key(ID_KEY) {
        let mut with_id = Document::new();
        with_id.insert(ID_KEY, ObjectId::new());
        for (key, value) in std::mem::take(&mut document) {
            with_id.insert(key, value);
        }
        return with_id;
    }
    document
}

// ============================================================================
// Filter evaluation
// ============================================================================

enum Condition {
    Equals(Bson),
    Pattern(Regex),
}

struct CompiledFilter {
    conditions: Vec<(Vec<String>, Condition)>,
}

impl CompiledFilter {
    fn compile(filter: &Document, operation: StoreOperation) -> StoreResult<Self> {
        let mut conditions = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            let path = key.split('.').map(str::to_string).collect();
            let condition = match value {
                Bson::RegularExpression(re) => Condition::Pattern(compile_regex(re, operation)?),
                other => Condition::Equals(other.clone()),
            };
            conditions.push((path, condition));
        }
        Ok(Self { conditions })
    }

    fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|(path, condition)| {
            let values = resolve(document, path);
            match condition {
                Condition::Equals(Bson::Null) if values.is_empty() => true,
                Condition::Equals(expected) => values.iter().any(|v| equals_or_contains(v, expected)),
                Condition::Pattern(re) => values.iter().any(|v| pattern_matches(v, re)),
            }
        })
    }
}

fn compile_regex(re: &BsonRegex, operation: StoreOperation) -> StoreResult<Regex> {
    let mut builder = RegexBuilder::new(&re.pattern);
    for flag in re.options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            _ => &mut builder,
        };
    }
    builder.build().map_err(|e| {
        StoreError::invalid_query(operation, format!("Invalid regular expression: {}", e))
    })
}

/// Every value reachable through `path`, descending through arrays
fn resolve<'a>(document: &'a Document, path: &[String]) -> Vec<&'a Bson> {
    let mut out = Vec::new();
    if let Some((head, rest)) = path.split_first() {
        if let Some(value) = document.get(head) {
            descend(value, rest, &mut out);
        }
    }
    out
}

fn descend<'a>(value: &'a Bson, rest: &[String], out: &mut Vec<&'a Bson>) {
    let Some((head, tail)) = rest.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(head) {
                descend(next, tail, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    descend(next, tail, out);
                }
            } else {
                for item in items {
                    if let Bson::Document(doc) = item {
                        if let Some(next) = doc.get(head) {
                            descend(next, tail, out);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn equals_or_contains(value: &Bson, expected: &Bson) -> bool {
    if values_equal(value, expected) {
        return true;
    }
    match value {
        Bson::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

fn pattern_matches(value: &Bson, re: &Regex) -> bool {
    match value {
        Bson::String(s) => re.is_match(s),
        Bson::Array(items) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if re.is_match(s))),
        _ => false,
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Hands out connections to one shared [`MemoryStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connector whose store refuses every connection
    pub fn offline() -> Self {
        let store = MemoryStore::new();
        store.set_available(false);
        Self::new(store)
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Number of connect calls made so far
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    async fn connect(&self, config: &StoreConfig) -> StoreResult<MemoryStore> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.store.check_available(StoreOperation::Connect)?;
        self.store.authenticate(config)?;

        tracing::trace!(collection = %config.collection, "Opened in-memory store connection");
        Ok(self.store.clone())
    }
}
