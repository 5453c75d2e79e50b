//! Remote store abstraction: the document API the rest of the crate talks to.
//!
//! [`DocumentStore`] is the capability surface (CRUD, equality queries and
//! live queries). [`MemoryStore`] is the in-process implementation, optionally
//! persisted to a single JSON file.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Plain field set of a stored document.
pub type Fields = Map<String, Value>;

/// Callback receiving the full result set of a live query.
pub type SnapshotFn = Box<dyn Fn(Vec<Document>) + Send + Sync>;

/// A stored document: server-assigned identifier plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality filters plus an optional sort field.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    /// Whether a field set satisfies every equality filter.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters
            .iter()
            .all(|(name, value)| fields.get(name) == Some(value))
    }

    /// Filter and sort a set of documents.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.matches(&doc.fields))
            .collect();

        if let Some((ref field, direction)) = self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_values(a.fields.get(field), b.fields.get(field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        out
    }
}

/// Order two optional field values. Missing values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        _ => CmpOrdering::Equal,
    }
}

// ============================================================================
// Subscription handle
// ============================================================================

/// Cancellation handle for a live query.
///
/// `unsubscribe` may be called any number of times; dropping the handle
/// unsubscribes as well. A snapshot callback that was already executing when
/// `unsubscribe` was called may still run to completion. No snapshot is
/// started afterwards.
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wrap a delivery task. The task must check `cancelled` before each
    /// callback invocation.
    pub fn new(cancelled: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self { cancelled, task }
    }

    pub fn unsubscribe(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("live query cancelled");
        }
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire) && !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ============================================================================
// DocumentStore trait
// ============================================================================

/// Capability interface over the document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document and return its generated identifier.
    async fn create_document(&self, collection: &str, fields: Fields) -> Result<String>;

    /// Fetch one document, `None` if it does not exist.
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Merge `partial` into an existing document.
    ///
    /// Fails with [`Error::NotFound`] if the identifier does not exist.
    async fn update_document(&self, collection: &str, id: &str, partial: Fields) -> Result<()>;

    /// Remove a document. Removing a missing identifier succeeds.
    async fn delete_document(&self, collection: &str, id: &str) -> Result<()>;

    /// All documents whose fields equal every `(field, value)` pair.
    async fn query_equals(
        &self,
        collection: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<Document>>;

    /// Start a live query. `on_snapshot` receives the full matching result
    /// set once immediately and again after every change to the collection.
    async fn subscribe(
        &self,
        collection: &str,
        query: Query,
        on_snapshot: SnapshotFn,
    ) -> Result<Subscription>;
}

// ============================================================================
// MemoryStore
// ============================================================================

type Collections = HashMap<String, BTreeMap<String, Fields>>;

/// On-disk layout of a persisted [`MemoryStore`].
#[derive(Debug, Default, Deserialize)]
struct StoreFile {
    collections: Collections,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    collections: &'a Collections,
}

struct Inner {
    collections: RwLock<Collections>,
    changes: broadcast::Sender<String>,
    path: Option<PathBuf>,
    /// Serializes mutations so each one starts from the last published state.
    persist_lock: Mutex<()>,
}

/// In-process document store with live queries.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

impl MemoryStore {
    /// Volatile store, lost when the process exits.
    pub fn new() -> Self {
        Self::with_state(Collections::new(), None)
    }

    /// Open (or create) a store persisted at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Store(format!("create {}: {e}", parent.display())))?;
        }

        let state = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::Store(format!("read {}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                StoreFile::default()
            } else {
                serde_json::from_str::<StoreFile>(&raw)
                    .map_err(|e| Error::Store(format!("parse {}: {e}", path.display())))?
            }
        } else {
            StoreFile::default()
        };

        debug!(path = %path.display(), "opened store");
        Ok(Self::with_state(state.collections, Some(path.to_path_buf())))
    }

    fn with_state(collections: Collections, path: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(collections),
                changes,
                path,
                persist_lock: Mutex::new(()),
            }),
        }
    }

    /// Current contents of a collection, ordered by identifier.
    fn snapshot(&self, collection: &str) -> Result<Vec<Document>> {
        let guard = self
            .inner
            .collections
            .read()
            .map_err(|_| Error::Store("store lock poisoned".into()))?;
        Ok(guard
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Apply `change` to a copy of the state, persist the copy, then publish it
    /// and notify live queries.
    ///
    /// `change` returns `None` when it left the state untouched; nothing is
    /// written or broadcast then. If persisting fails the visible state is
    /// unchanged.
    async fn commit<R, F>(&self, collection: &str, change: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut Collections) -> Option<R> + Send,
        R: Send,
    {
        let _guard = self.inner.persist_lock.lock().await;

        let mut next = self
            .inner
            .collections
            .read()
            .map_err(|_| Error::Store("store lock poisoned".into()))?
            .clone();
        let Some(out) = change(&mut next) else {
            return Ok(None);
        };

        self.persist(&next).await?;

        *self
            .inner
            .collections
            .write()
            .map_err(|_| Error::Store("store lock poisoned".into()))? = next;
        // No receivers is fine: nobody is watching.
        let _ = self.inner.changes.send(collection.to_string());
        Ok(Some(out))
    }

    async fn persist(&self, collections: &Collections) -> Result<()> {
        let Some(ref path) = self.inner.path else {
            return Ok(());
        };

        let body = serde_json::to_vec_pretty(&StoreFileRef { collections })
            .map_err(|e| Error::Store(format!("serialize store: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::Store(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Store(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, collection: &str, fields: Fields) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.commit(collection, |c| {
            c.entry(collection.to_string())
                .or_default()
                .insert(id.clone(), fields);
            Some(())
        })
        .await?;
        debug!(collection, id = %id, "document created");
        Ok(id)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let guard = self
            .inner
            .collections
            .read()
            .map_err(|_| Error::Store("store lock poisoned".into()))?;
        Ok(guard
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn update_document(&self, collection: &str, id: &str, partial: Fields) -> Result<()> {
        let updated = self
            .commit(collection, |c| {
                let fields = c.get_mut(collection)?.get_mut(id)?;
                fields.extend(partial);
                Some(())
            })
            .await?;

        updated.ok_or_else(|| Error::not_found(collection, id))
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.commit(collection, |c| c.get_mut(collection)?.remove(id).map(|_| ()))
            .await?;
        Ok(())
    }

    async fn query_equals(
        &self,
        collection: &str,
        filters: &[(String, Value)],
    ) -> Result<Vec<Document>> {
        let query = Query {
            filters: filters.to_vec(),
            order_by: None,
        };
        Ok(query.apply(self.snapshot(collection)?))
    }

    async fn subscribe(
        &self,
        collection: &str,
        query: Query,
        on_snapshot: SnapshotFn,
    ) -> Result<Subscription> {
        // Subscribe before the first read so no change slips between them.
        let mut changes = self.inner.changes.subscribe();
        let store = self.clone();
        let collection = collection.to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = tokio::spawn(async move {
            loop {
                let docs = match store.snapshot(&collection) {
                    Ok(docs) => query.apply(docs),
                    Err(e) => {
                        warn!(collection = %collection, "live query read failed: {e}");
                        return;
                    }
                };
                if flag.load(Ordering::Acquire) {
                    return;
                }
                on_snapshot(docs);

                loop {
                    match changes.recv().await {
                        Ok(changed) if changed == collection => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "live query lagged, resynchronizing");
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        });

        Ok(Subscription::new(cancelled, task))
    }
}

// ============================================================================
// Tests
// ============================================================================
