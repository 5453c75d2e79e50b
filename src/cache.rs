//! Read-through cache of generated content, persisted in the document store.
//!
//! For each [`CacheKey`] the coordinator serves the stored copy when one
//! exists and otherwise runs the producer and persists its output. Cached
//! text never expires; only [`CacheCoordinator::refresh`] replaces it.
//!
//! Lookups and writes are not serialized. Two concurrent first reads of the
//! same uncached key may both run the producer and both create a document.
//! When that has happened, reads and refreshes settle on the document with
//! the smallest identifier and never add another.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::llm::GenerationError;
use crate::model::{FEATURE_DIGESTS, FeatureDigest, OWNER_FIELD, timestamp};
use crate::store::{Document, DocumentStore, Fields};

// ============================================================================
// Keys
// ============================================================================

/// Whether cached digests are kept per user or shared by everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheScope {
    #[default]
    PerUser,
    Shared,
}

impl CacheScope {
    pub fn key(self, language: &str, identity: &Identity) -> CacheKey {
        CacheKey {
            language: language.to_string(),
            owner: match self {
                Self::PerUser => Some(identity.id.clone()),
                Self::Shared => None,
            },
        }
    }
}

impl FromStr for CacheScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-user" | "per_user" | "user" => Ok(Self::PerUser),
            "shared" | "global" => Ok(Self::Shared),
            other => Err(format!(
                "unknown cache scope '{other}', expected 'per-user' or 'shared'"
            )),
        }
    }
}

/// Logical language name plus, in per-user scope, the owning user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub language: String,
    pub owner: Option<String>,
}

impl CacheKey {
    fn filters(&self) -> Vec<(String, Value)> {
        let mut filters = vec![("language".to_string(), json!(self.language))];
        if let Some(ref owner) = self.owner {
            filters.push((OWNER_FIELD.to_string(), json!(owner)));
        }
        filters
    }

    /// Shared keys must not pick up per-user documents.
    fn accepts(&self, doc: &Document) -> bool {
        self.owner.is_some()
            || doc
                .fields
                .get(OWNER_FIELD)
                .is_none_or(|owner| owner.is_null())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Read back from the store.
    Store,
    /// Produced by this call and persisted.
    Generated,
}

/// Content served by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached {
    pub text: String,
    pub last_updated: DateTime<Utc>,
    pub source: CacheSource,
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<dyn DocumentStore>,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Serve the stored copy for `key`, producing and persisting it on a miss.
    ///
    /// A producer failure is returned as-is and nothing is cached. A store
    /// failure is returned as-is and the producer is not run.
    pub async fn get_or_produce<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<Cached>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<String, GenerationError>>,
    {
        if let Some(doc) = self.find(key).await? {
            let digest = FeatureDigest::decode(&doc)?;
            let last_updated = digest.last_updated_at().ok_or_else(|| Error::Decode {
                collection: FEATURE_DIGESTS.to_string(),
                id: doc.id.clone(),
                reason: format!("lastUpdated '{}' is not a timestamp", digest.last_updated),
            })?;
            debug!(language = %key.language, id = %doc.id, "digest cache hit");
            return Ok(Cached {
                last_updated,
                text: digest.text,
                source: CacheSource::Store,
            });
        }

        debug!(language = %key.language, "digest cache miss");
        let text = produce(key, producer).await?;
        let now = Utc::now();
        let id = self
            .store
            .create_document(FEATURE_DIGESTS, new_digest_fields(key, &text, now))
            .await?;
        info!(language = %key.language, id = %id, "digest generated and stored");

        Ok(Cached {
            text,
            last_updated: now,
            source: CacheSource::Generated,
        })
    }

    /// Run the producer unconditionally and overwrite the stored copy.
    ///
    /// Updates the existing document in place when there is one, otherwise
    /// creates it. Exactly one store mutation per successful call.
    pub async fn refresh<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<Cached>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<String, GenerationError>>,
    {
        let text = produce(key, producer).await?;
        let now = Utc::now();

        match self.find(key).await? {
            Some(doc) => {
                let mut partial = Fields::new();
                partial.insert("text".into(), json!(text));
                partial.insert("lastUpdated".into(), json!(timestamp(now)));
                self.store
                    .update_document(FEATURE_DIGESTS, &doc.id, partial)
                    .await?;
                info!(language = %key.language, id = %doc.id, "digest refreshed in place");
            }
            None => {
                let id = self
                    .store
                    .create_document(FEATURE_DIGESTS, new_digest_fields(key, &text, now))
                    .await?;
                info!(language = %key.language, id = %id, "digest refreshed into new document");
            }
        }

        Ok(Cached {
            text,
            last_updated: now,
            source: CacheSource::Generated,
        })
    }

    /// The document backing `key`, if any.
    async fn find(&self, key: &CacheKey) -> Result<Option<Document>> {
        let mut docs: Vec<Document> = self
            .store
            .query_equals(FEATURE_DIGESTS, &key.filters())
            .await?
            .into_iter()
            .filter(|doc| key.accepts(doc))
            .collect();

        if docs.len() > 1 {
            warn!(
                language = %key.language,
                count = docs.len(),
                "multiple digest documents for one key"
            );
        }
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs.into_iter().next())
    }
}

async fn produce<F, Fut>(key: &CacheKey, producer: F) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<String, GenerationError>>,
{
    match producer().await {
        Ok(text) if text.trim().is_empty() => {
            warn!(language = %key.language, "producer returned blank text");
            Err(Error::Generation(GenerationError::EmptyResponse))
        }
        Ok(text) => Ok(text),
        Err(e) => {
            warn!(language = %key.language, "producer failed: {e}");
            Err(Error::Generation(e))
        }
    }
}

fn new_digest_fields(key: &CacheKey, text: &str, at: DateTime<Utc>) -> Fields {
    let mut fields = Fields::new();
    fields.insert("language".into(), json!(key.language));
    fields.insert("text".into(), json!(text));
    fields.insert("lastUpdated".into(), json!(timestamp(at)));
    if let Some(ref owner) = key.owner {
        fields.insert(OWNER_FIELD.into(), json!(owner));
    }
    fields
}

// ============================================================================
// Tests
// ============================================================================
