//! Document store abstraction plus an in-memory implementation that can
//! mirror its contents to a JSON file.

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::storage::{load_json, persist_json};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use tokio::sync::Mutex;
use tracing::debug;

pub type Document = Value;
pub type Snapshot = Vec<(String, Document)>;
pub type Collections = BTreeMap<String, BTreeMap<String, Document>>;
pub type Listener = Arc<dyn Fn(&[(String, Document)]) + Send + Sync>;

const SERVER_TIMESTAMP_KEY: &str = "__serverTimestamp";

/// Placeholder replaced with the commit instant when the write lands.
pub fn server_timestamp() -> Value {
    let mut marker = Map::new();
    marker.insert(SERVER_TIMESTAMP_KEY.to_string(), Value::Bool(true));
    Value::Object(marker)
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        data: Document,
    },
    /// Field paths may be dotted (`progress.task-1`).
    Update {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// Fails the whole batch unless `field` currently equals `expected`.
    Verify {
        collection: String,
        id: String,
        field: String,
        expected: Value,
    },
}

impl WriteOp {
    pub fn set(collection: &str, id: &str, data: Document) -> Self {
        Self::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }
    }

    pub fn update(collection: &str, id: &str, fields: Map<String, Value>) -> Self {
        Self::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        }
    }

    pub fn delete(collection: &str, id: &str) -> Self {
        Self::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn verify(collection: &str, id: &str, field: &str, expected: Value) -> Self {
        Self::Verify {
            collection: collection.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            expected,
        }
    }

    fn collection(&self) -> &str {
        match self {
            Self::Set { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. }
            | Self::Verify { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    All,
    FieldEquals { field: String, value: Value },
}

impl Query {
    pub fn field_equals(field: &str, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            field: field.to_string(),
            value: value.into(),
        }
    }

    fn matches(&self, document: &Document) -> bool {
        match self {
            Self::All => true,
            Self::FieldEquals { field, value } => get_path(document, field) == Some(value),
        }
    }
}

/// Handle returned by [`DocumentStore::subscribe`]; the listener stays
/// registered until [`Subscription::unsubscribe`] is called.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Snapshot, StoreError>;

    /// Applies every op or none of them.
    async fn batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Calls `listener` with the current matching documents, then again after
    /// every commit touching `collection`.
    async fn subscribe(
        &self,
        collection: &str,
        query: Query,
        listener: Listener,
    ) -> Result<Subscription, StoreError>;

    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<(), StoreError> {
        self.batch(vec![WriteOp::set(collection, id, data)]).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.batch(vec![WriteOp::update(collection, id, fields)]).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.batch(vec![WriteOp::delete(collection, id)]).await
    }
}

struct Registration {
    collection: String,
    query: Query,
    listener: Listener,
}

type ListenerTable = HashMap<u64, Registration>;

pub struct MemoryStore {
    data: Mutex<Collections>,
    path: Option<PathBuf>,
    listeners: Arc<SyncMutex<ListenerTable>>,
    next_listener: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_data(Collections::new(), None, clock)
    }

    /// Loads `path` (empty when missing) and writes every commit back to it.
    pub async fn open(path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        let data = load_json(&path).await;
        Self::with_data(data, Some(path), clock)
    }

    fn with_data(data: Collections, path: Option<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Mutex::new(data),
            path,
            listeners: Arc::new(SyncMutex::new(HashMap::new())),
            next_listener: AtomicU64::new(1),
            clock,
        }
    }

    pub async fn snapshot(&self) -> Collections {
        self.data.lock().await.clone()
    }

    fn notify(&self, data: &Collections, touched: &BTreeSet<String>) {
        let pending: Vec<(Listener, Snapshot)> = lock_table(&self.listeners)
            .values()
            .filter(|registration| touched.contains(&registration.collection))
            .map(|registration| {
                (
                    Arc::clone(&registration.listener),
                    query_snapshot(data, &registration.collection, &registration.query),
                )
            })
            .collect();
        for (listener, snapshot) in pending {
            listener(&snapshot);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let data = self.data.lock().await;
        Ok(data.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Snapshot, StoreError> {
        let data = self.data.lock().await;
        Ok(query_snapshot(&data, collection, query))
    }

    async fn batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let now = Value::String(self.clock.now().to_rfc3339());
        let mut data = self.data.lock().await;
        let mut working = data.clone();
        let mut touched = BTreeSet::new();
        let op_count = ops.len();

        for op in ops {
            if !matches!(op, WriteOp::Verify { .. }) {
                touched.insert(op.collection().to_string());
            }
            apply_op(&mut working, op, &now)?;
        }

        if let Some(path) = &self.path {
            persist_json(path, &working).await?;
        }
        *data = working;
        debug!(ops = op_count, "committed batch");

        self.notify(&data, &touched);
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        query: Query,
        listener: Listener,
    ) -> Result<Subscription, StoreError> {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let data = self.data.lock().await;
        let initial = query_snapshot(&data, collection, &query);
        lock_table(&self.listeners).insert(
            id,
            Registration {
                collection: collection.to_string(),
                query,
                listener: Arc::clone(&listener),
            },
        );
        listener(&initial);
        drop(data);

        let table = Arc::downgrade(&self.listeners);
        Ok(Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                lock_table(&table).remove(&id);
            }
        }))
    }
}

fn lock_table(table: &SyncMutex<ListenerTable>) -> std::sync::MutexGuard<'_, ListenerTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn query_snapshot(data: &Collections, collection: &str, query: &Query) -> Snapshot {
    data.get(collection)
        .map(|docs| {
            docs.iter()
                .filter(|(_, document)| query.matches(document))
                .map(|(id, document)| (id.clone(), document.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn apply_op(collections: &mut Collections, op: WriteOp, now: &Value) -> Result<(), StoreError> {
    match op {
        WriteOp::Set {
            collection,
            id,
            data: mut document,
        } => {
            resolve_timestamps(&mut document, now);
            collections.entry(collection).or_default().insert(id, document);
        }
        WriteOp::Update {
            collection,
            id,
            fields,
        } => {
            let Some(document) = collections.get_mut(&collection).and_then(|docs| docs.get_mut(&id)) else {
                return Err(StoreError::NotFound { collection, id });
            };
            for (path, mut value) in fields {
                resolve_timestamps(&mut value, now);
                set_path(document, &path, value);
            }
        }
        WriteOp::Delete { collection, id } => {
            if let Some(docs) = collections.get_mut(&collection) {
                docs.remove(&id);
            }
        }
        WriteOp::Verify {
            collection,
            id,
            field,
            expected,
        } => {
            let holds = collections
                .get(&collection)
                .and_then(|docs| docs.get(&id))
                .and_then(|document| get_path(document, &field))
                .map_or(expected.is_null(), |current| *current == expected);
            if !holds {
                return Err(StoreError::Conflict {
                    collection,
                    id,
                    field,
                });
            }
        }
    }
    Ok(())
}

fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.len() == 1 && object.get(SERVER_TIMESTAMP_KEY) == Some(&Value::Bool(true)))
}

fn resolve_timestamps(value: &mut Value, now: &Value) {
    if is_server_timestamp(value) {
        *value = now.clone();
        return;
    }
    match value {
        Value::Object(object) => object.values_mut().for_each(|child| resolve_timestamps(child, now)),
        Value::Array(items) => items.iter_mut().for_each(|child| resolve_timestamps(child, now)),
        _ => {}
    }
}

fn get_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.as_object()?.get(segment))
}

fn set_path(document: &mut Value, path: &str, value: Value) {
    if !document.is_object() {
        *document = Value::Object(Map::new());
    }
    match path.split_once('.') {
        None => document[path] = value,
        Some((head, rest)) => set_path(&mut document[head], rest, value),
    }
}

/// Wraps a [`MemoryStore`] and injects failures into the next few calls.
#[cfg(test)]
pub(crate) struct FaultyStore {
    inner: Arc<MemoryStore>,
    failing_batches: std::sync::atomic::AtomicUsize,
    vanished_batches: std::sync::atomic::AtomicUsize,
    blind_reads: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FaultyStore {
    pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_batches: Default::default(),
            vanished_batches: Default::default(),
            blind_reads: Default::default(),
        }
    }

    /// The next `count` batches fail with an io error and write nothing.
    pub(crate) fn fail_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// The next `count` batches fail as if their target document had just been deleted.
    pub(crate) fn vanish_batches(&self, count: usize) {
        self.vanished_batches.store(count, Ordering::SeqCst);
    }

    /// The next `count` point reads report the document as missing.
    pub(crate) fn hide_reads(&self, count: usize) {
        self.blind_reads.store(count, Ordering::SeqCst);
    }

    fn take(counter: &std::sync::atomic::AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        if Self::take(&self.blind_reads) {
            return Ok(None);
        }
        self.inner.get(collection, id).await
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Snapshot, StoreError> {
        self.inner.query(collection, query).await
    }

    async fn batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if Self::take(&self.failing_batches) {
            return Err(std::io::Error::other("injected write failure").into());
        }
        if Self::take(&self.vanished_batches) {
            let (collection, id) = match ops.first() {
                Some(
                    WriteOp::Set { collection, id, .. }
                    | WriteOp::Update { collection, id, .. }
                    | WriteOp::Delete { collection, id }
                    | WriteOp::Verify { collection, id, .. },
                ) => (collection.clone(), id.clone()),
                None => (String::new(), String::new()),
            };
            return Err(StoreError::NotFound { collection, id });
        }
        self.inner.batch(ops).await
    }

    async fn subscribe(
        &self,
        collection: &str,
        query: Query,
        listener: Listener,
    ) -> Result<Subscription, StoreError> {
        self.inner.subscribe(collection, query, listener).await
    }
}
