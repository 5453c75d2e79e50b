//! Category and link repository over the document store.
//!
//! Two synchronization strategies are offered side by side:
//!
//! - **Pull**: [`Repository::list`] runs a one-shot owner-filtered query. The
//!   caller re-lists (or patches its local view, see [`crate::patch`]) after
//!   every mutation.
//! - **Push**: [`Repository::subscribe`] watches the whole collection, newest
//!   first, and hands the callback the caller's full current set every time
//!   anything in the collection changes. Each payload replaces the previous
//!   one; it is never a delta.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{CREATED_AT_FIELD, Category, Entity, Link, OWNER_FIELD, timestamp};
use crate::store::{Direction, Document, DocumentStore, Fields, Query, Subscription};

/// Owner-scoped CRUD over one entity collection.
pub struct Repository<T: Entity> {
    store: Arc<dyn DocumentStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// Every entity owned by `owner_id`. Order is unspecified.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<T>> {
        self.list_where(owner_id, Vec::new()).await
    }

    async fn list_where(
        &self,
        owner_id: &str,
        mut filters: Vec<(String, Value)>,
    ) -> Result<Vec<T>> {
        filters.insert(0, (OWNER_FIELD.to_string(), json!(owner_id)));
        let docs = self.store.query_equals(T::COLLECTION, &filters).await?;
        docs.iter().map(T::decode).collect()
    }

    /// One entity by identifier. Someone else's entity is reported as missing.
    pub async fn get(&self, owner_id: &str, id: &str) -> Result<T> {
        let doc = self.owned_document(owner_id, id).await?;
        T::decode(&doc)
    }

    /// Persist a new entity and return it with its generated identifier.
    pub async fn create(&self, mut entity: T) -> Result<T> {
        let fields = entity.encode()?;
        let id = self.store.create_document(T::COLLECTION, fields).await?;
        debug!(collection = T::COLLECTION, id = %id, "entity created");
        entity.set_id(id);
        Ok(entity)
    }

    /// Apply `partial` to an existing entity and return the updated record.
    ///
    /// Fails with [`Error::NotFound`] if the identifier no longer exists or
    /// belongs to another owner.
    pub async fn update(&self, owner_id: &str, id: &str, partial: Fields) -> Result<T> {
        let mut doc = self.owned_document(owner_id, id).await?;
        self.store
            .update_document(T::COLLECTION, id, partial.clone())
            .await?;
        debug!(collection = T::COLLECTION, id, "entity updated");

        for (k, v) in partial {
            doc.fields.insert(k, v);
        }
        T::decode(&doc)
    }

    /// Remove an entity. Missing identifiers and other owners' entities are
    /// left alone without error.
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<()> {
        match self.owned_document(owner_id, id).await {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => {
                debug!(collection = T::COLLECTION, id, "delete of absent entity ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match self.store.delete_document(T::COLLECTION, id).await {
            Err(Error::NotFound { .. }) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Live view of `owner_id`'s entities, newest first.
    ///
    /// The store is watched collection-wide; filtering to `owner_id` happens
    /// here on every snapshot. Documents that fail to decode are skipped.
    /// See [`Subscription`] for cancellation semantics.
    pub async fn subscribe<F>(&self, owner_id: &str, on_change: F) -> Result<Subscription>
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let owner = owner_id.to_string();
        let query = Query::new().order_by(CREATED_AT_FIELD, Direction::Descending);

        self.store
            .subscribe(
                T::COLLECTION,
                query,
                Box::new(move |docs: Vec<Document>| {
                    let owned: Vec<T> = docs
                        .iter()
                        .filter_map(|doc| match T::decode(doc) {
                            Ok(entity) => Some(entity),
                            Err(e) => {
                                warn!("skipping document in live query: {e}");
                                None
                            }
                        })
                        .filter(|entity| entity.owner_id() == owner)
                        .collect();
                    on_change(owned);
                }),
            )
            .await
    }

    async fn owned_document(&self, owner_id: &str, id: &str) -> Result<Document> {
        match self.store.get_document(T::COLLECTION, id).await? {
            Some(doc) if doc.fields.get(OWNER_FIELD) == Some(&json!(owner_id)) => Ok(doc),
            Some(_) => {
                debug!(collection = T::COLLECTION, id, "entity owned by another user");
                Err(Error::not_found(T::COLLECTION, id))
            }
            None => Err(Error::not_found(T::COLLECTION, id)),
        }
    }
}

/// Trim a user-supplied value and reject it when blank.
fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("'{field}' must not be empty")));
    }
    Ok(trimmed.to_string())
}

impl Repository<Category> {
    pub async fn create_category(&self, owner_id: &str, name: &str) -> Result<Category> {
        let category = Category {
            id: String::new(),
            name: required("name", name)?,
            owner_id: owner_id.to_string(),
            created_at: timestamp(Utc::now()),
        };
        self.create(category).await
    }

    /// Change the name only.
    pub async fn rename(&self, owner_id: &str, id: &str, name: &str) -> Result<Category> {
        let mut partial = Fields::new();
        partial.insert("name".into(), json!(required("name", name)?));
        self.update(owner_id, id, partial).await
    }
}

impl Repository<Link> {
    pub async fn create_link(
        &self,
        owner_id: &str,
        category_id: &str,
        title: &str,
        url: &str,
    ) -> Result<Link> {
        let link = Link {
            id: String::new(),
            title: required("title", title)?,
            url: required("url", url)?,
            category_id: category_id.to_string(),
            owner_id: owner_id.to_string(),
            created_at: timestamp(Utc::now()),
        };
        self.create(link).await
    }

    /// Change title and url.
    pub async fn edit(&self, owner_id: &str, id: &str, title: &str, url: &str) -> Result<Link> {
        let mut partial = Fields::new();
        partial.insert("title".into(), json!(required("title", title)?));
        partial.insert("url".into(), json!(required("url", url)?));
        self.update(owner_id, id, partial).await
    }

    /// Links filed under one category.
    pub async fn list_in_category(&self, owner_id: &str, category_id: &str) -> Result<Vec<Link>> {
        self.list_where(
            owner_id,
            vec![("categoryId".to_string(), json!(category_id))],
        )
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CATEGORIES, LINKS};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn repos(store: &MemoryStore) -> (Repository<Category>, Repository<Link>) {
        let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
        (Repository::new(store.clone()), Repository::new(store))
    }

    fn raw_link(owner: &str, title: &str, created_at: &str) -> Fields {
        json!({
            "title": title,
            "url": "https://example.com",
            "categoryId": "c1",
            "ownerId": owner,
            "createdAt": created_at,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn test_rename_keeps_id() {
        let store = MemoryStore::new();
        let (categories, _) = repos(&store);

        let created = categories.create_category("u1", "Reading").await.unwrap();
        categories
            .rename("u1", &created.id, "Reading List")
            .await
            .unwrap();

        let listed = categories.list("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].name, "Reading List");
    }

    #[tokio::test]
    async fn test_create_trims_and_rejects_blank() {
        let store = MemoryStore::new();
        let (categories, links) = repos(&store);

        let created = categories.create_category("u1", "  Tools ").await.unwrap();
        assert_eq!(created.name, "Tools");

        assert!(matches!(
            categories.create_category("u1", "   ").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            links.create_link("u1", &created.id, "Docs", "").await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(categories.list("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_category_keeps_links() {
        let store = MemoryStore::new();
        let (categories, links) = repos(&store);

        let category = categories.create_category("u1", "C1").await.unwrap();
        let link = links
            .create_link("u1", &category.id, "Rust", "https://rust-lang.org")
            .await
            .unwrap();

        categories.delete("u1", &category.id).await.unwrap();

        let still_there = links.get("u1", &link.id).await.unwrap();
        assert_eq!(still_there.category_id, category.id);
        assert!(categories.get("u1", &category.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let (_, links) = repos(&store);

        let link = links
            .create_link("u1", "c1", "Rust", "https://rust-lang.org")
            .await
            .unwrap();
        links.delete("u1", &link.id).await.unwrap();
        links.delete("u1", &link.id).await.unwrap();
        links.delete("u1", "never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let (categories, _) = repos(&store);

        let err = categories.rename("u1", "gone", "x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_other_owner_cannot_update_or_delete() {
        let store = MemoryStore::new();
        let (categories, _) = repos(&store);

        let mine = categories.create_category("alice", "Mine").await.unwrap();

        let err = categories.rename("bob", &mine.id, "Stolen").await.unwrap_err();
        assert!(err.is_not_found());

        categories.delete("bob", &mine.id).await.unwrap();
        let untouched = categories.get("alice", &mine.id).await.unwrap();
        assert_eq!(untouched.name, "Mine");
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped() {
        let store = MemoryStore::new();
        let (categories, links) = repos(&store);

        categories.create_category("alice", "A").await.unwrap();
        categories.create_category("bob", "B").await.unwrap();
        links.create_link("alice", "c", "a", "https://a").await.unwrap();
        links.create_link("bob", "c", "b", "https://b").await.unwrap();

        let alice_categories = categories.list("alice").await.unwrap();
        assert!(alice_categories.iter().all(|c| c.owner_id == "alice"));
        assert_eq!(alice_categories.len(), 1);

        let bob_links = links.list("bob").await.unwrap();
        assert!(bob_links.iter().all(|l| l.owner_id == "bob"));
        assert_eq!(bob_links.len(), 1);
    }

    #[tokio::test]
    async fn test_list_in_category() {
        let store = MemoryStore::new();
        let (_, links) = repos(&store);

        links.create_link("u1", "c1", "one", "https://1").await.unwrap();
        links.create_link("u1", "c2", "two", "https://2").await.unwrap();

        let in_c1 = links.list_in_category("u1", "c1").await.unwrap();
        assert_eq!(in_c1.len(), 1);
        assert_eq!(in_c1[0].title, "one");
    }

    #[tokio::test]
    async fn test_list_reports_malformed_document() {
        let store = MemoryStore::new();
        let (categories, _) = repos(&store);
        store
            .create_document(
                CATEGORIES,
                json!({"ownerId": "u1"}).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();

        assert!(matches!(
            categories.list("u1").await,
            Err(Error::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_subscribe_orders_newest_first_and_filters_owner() {
        let store = MemoryStore::new();
        let (_, links) = repos(&store);
        for (owner, title, at) in [
            ("u1", "old", "2024-01-01T00:00:00.000000Z"),
            ("u2", "foreign", "2024-02-01T00:00:00.000000Z"),
            ("u1", "new", "2024-03-01T00:00:00.000000Z"),
        ] {
            store
                .create_document(LINKS, raw_link(owner, title, at))
                .await
                .unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = links
            .subscribe("u1", move |snapshot| {
                let _ = tx.send(snapshot);
            })
            .await
            .unwrap();

        let snapshot = rx.recv().await.unwrap();
        let titles: Vec<_> = snapshot.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_own_writes_and_skips_bad_documents() {
        let store = MemoryStore::new();
        let (_, links) = repos(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = links
            .subscribe("u1", move |snapshot| {
                let _ = tx.send(snapshot);
            })
            .await
            .unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        store
            .create_document(LINKS, json!({"title": 7}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        let created = links
            .create_link("u1", "c1", "echo", "https://echo")
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, created.id);

        sub.unsubscribe();
        links
            .create_link("u1", "c1", "after", "https://after")
            .await
            .unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(matches!(waited, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_subscribe_other_owner_change_redelivers_full_set() {
        let store = MemoryStore::new();
        let (_, links) = repos(&store);
        links.create_link("u1", "c1", "mine", "https://m").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = links
            .subscribe("u1", move |snapshot| {
                let _ = tx.send(snapshot);
            })
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        links.create_link("u2", "c9", "theirs", "https://t").await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "mine");
    }
}
