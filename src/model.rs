//! Entity records persisted in the document store.
//!
//! Every record is decoded from a [`Document`] through `serde`; a shape
//! mismatch is an [`Error::Decode`], never a silently half-filled value.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{Document, Fields};

/// Collection holding [`Category`] documents.
pub const CATEGORIES: &str = "categories";
/// Collection holding [`Link`] documents.
pub const LINKS: &str = "links";
/// Collection holding [`FeatureDigest`] documents.
pub const FEATURE_DIGESTS: &str = "featureDigests";

/// Field carrying the owning user's identifier.
pub const OWNER_FIELD: &str = "ownerId";
/// Field carrying the creation timestamp.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Format a timestamp the way it is stored.
///
/// Fixed precision keeps lexicographic and chronological order identical.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Merge the identifier into the fields and deserialize.
fn decode_as<T: DeserializeOwned>(collection: &str, doc: &Document) -> Result<T> {
    let mut fields = doc.fields.clone();
    fields.insert("id".to_string(), Value::String(doc.id.clone()));
    serde_json::from_value(Value::Object(fields)).map_err(|e| Error::Decode {
        collection: collection.to_string(),
        id: doc.id.clone(),
        reason: e.to_string(),
    })
}

/// A record type stored in its own collection.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Collection name in the store.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn owner_id(&self) -> &str;

    /// Stored `createdAt` timestamp.
    fn created_at(&self) -> &str;

    /// Decode a stored document into a typed record.
    fn decode(doc: &Document) -> Result<Self> {
        decode_as(Self::COLLECTION, doc)
    }

    /// Field set to persist. The identifier lives beside the fields, not in them.
    fn encode(&self) -> Result<Fields> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => {
                fields.remove("id");
                Ok(fields)
            }
            Ok(other) => Err(Error::Store(format!(
                "{} encoded to non-object: {other}",
                Self::COLLECTION
            ))),
            Err(e) => Err(Error::Store(format!("encode {}: {e}", Self::COLLECTION))),
        }
    }
}

/// Sort records by `createdAt`, newest first. Ties keep their current order.
///
/// One-shot listings come back in no particular order; this gives them the
/// same order live queries deliver.
pub fn sort_newest_first<T: Entity>(items: &mut [T]) {
    items.sort_by(|a, b| b.created_at().cmp(a.created_at()));
}

/// A named group of links, owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
}

impl Entity for Category {
    const COLLECTION: &'static str = CATEGORIES;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn created_at(&self) -> &str {
        &self.created_at
    }
}

/// A saved link. `category_id` is a soft reference; the category may be gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub url: String,
    pub category_id: String,
    pub owner_id: String,
    pub created_at: String,
}

impl Entity for Link {
    const COLLECTION: &'static str = LINKS;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn created_at(&self) -> &str {
        &self.created_at
    }
}

/// Cached generated text for one language.
///
/// `owner_id` is set only when digests are cached per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDigest {
    #[serde(default)]
    pub id: String,
    pub language: String,
    pub text: String,
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl FeatureDigest {
    /// Decode a digest document.
    pub fn decode(doc: &Document) -> Result<Self> {
        decode_as(FEATURE_DIGESTS, doc)
    }

    /// `lastUpdated` as a timestamp, if it parses.
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_updated)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

// ============================================================================
// Tests
// ============================================================================
