//! Application façade: binds the current identity to the repositories and
//! the digest service.
//!
//! Every operation asks the identity provider first. When nobody is signed in
//! the operation does nothing (empty list, `Ok(None)`), before any store or
//! generation call is made.

use std::sync::Arc;

use tracing::debug;

use crate::cache::Cached;
use crate::context::Context;
use crate::digest::{DigestService, DigestSettings};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::model::{Category, Link};
use crate::repository::Repository;
use crate::store::Subscription;

#[derive(Clone)]
pub struct Bookmarks {
    ctx: Context,
    categories: Repository<Category>,
    links: Repository<Link>,
    digests: DigestService,
}

impl Bookmarks {
    pub fn new(ctx: Context, settings: DigestSettings) -> Self {
        Self {
            categories: Repository::new(Arc::clone(&ctx.store)),
            links: Repository::new(Arc::clone(&ctx.store)),
            digests: DigestService::new(&ctx, settings),
            ctx,
        }
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.ctx.identity.current_user()
    }

    /// The current user, or [`Error::Unauthenticated`] for surfaces that must
    /// explain why nothing happened.
    pub fn require_user(&self) -> Result<Identity> {
        self.current_user().ok_or(Error::Unauthenticated)
    }

    fn user_for(&self, operation: &'static str) -> Option<Identity> {
        let user = self.current_user();
        if user.is_none() {
            debug!(operation, "not signed in, skipping");
        }
        user
    }

    // ------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------

    pub async fn categories(&self) -> Result<Vec<Category>> {
        match self.user_for("list categories") {
            Some(user) => self.categories.list(&user.id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn category(&self, id: &str) -> Result<Option<Category>> {
        match self.user_for("get category") {
            Some(user) => self.categories.get(&user.id, id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn add_category(&self, name: &str) -> Result<Option<Category>> {
        match self.user_for("add category") {
            Some(user) => self
                .categories
                .create_category(&user.id, name)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    pub async fn rename_category(&self, id: &str, name: &str) -> Result<Option<Category>> {
        match self.user_for("rename category") {
            Some(user) => self.categories.rename(&user.id, id, name).await.map(Some),
            None => Ok(None),
        }
    }

    /// Links filed under the category stay where they are.
    pub async fn delete_category(&self, id: &str) -> Result<()> {
        match self.user_for("delete category") {
            Some(user) => self.categories.delete(&user.id, id).await,
            None => Ok(()),
        }
    }

    pub async fn watch_categories<F>(&self, on_change: F) -> Result<Option<Subscription>>
    where
        F: Fn(Vec<Category>) + Send + Sync + 'static,
    {
        match self.user_for("watch categories") {
            Some(user) => self
                .categories
                .subscribe(&user.id, on_change)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    pub async fn links(&self) -> Result<Vec<Link>> {
        match self.user_for("list links") {
            Some(user) => self.links.list(&user.id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn links_in(&self, category_id: &str) -> Result<Vec<Link>> {
        match self.user_for("list links in category") {
            Some(user) => self.links.list_in_category(&user.id, category_id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn link(&self, id: &str) -> Result<Option<Link>> {
        match self.user_for("get link") {
            Some(user) => self.links.get(&user.id, id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn add_link(
        &self,
        category_id: &str,
        title: &str,
        url: &str,
    ) -> Result<Option<Link>> {
        match self.user_for("add link") {
            Some(user) => self
                .links
                .create_link(&user.id, category_id, title, url)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    pub async fn edit_link(&self, id: &str, title: &str, url: &str) -> Result<Option<Link>> {
        match self.user_for("edit link") {
            Some(user) => self.links.edit(&user.id, id, title, url).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn delete_link(&self, id: &str) -> Result<()> {
        match self.user_for("delete link") {
            Some(user) => self.links.delete(&user.id, id).await,
            None => Ok(()),
        }
    }

    pub async fn watch_links<F>(&self, on_change: F) -> Result<Option<Subscription>>
    where
        F: Fn(Vec<Link>) + Send + Sync + 'static,
    {
        match self.user_for("watch links") {
            Some(user) => self.links.subscribe(&user.id, on_change).await.map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Digests
    // ------------------------------------------------------------------

    pub async fn digest(&self, language: &str) -> Result<Option<Cached>> {
        match self.user_for("digest") {
            Some(user) => self.digests.digest(&user, language).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn refresh_digest(&self, language: &str) -> Result<Option<Cached>> {
        match self.user_for("refresh digest") {
            Some(user) => self.digests.refresh(&user, language).await.map(Some),
            None => Ok(None),
        }
    }

    /// Whether the refresh affordance should be enabled for the current user.
    pub fn can_refresh(&self) -> bool {
        self.current_user()
            .is_some_and(|user| self.digests.may_refresh(&user))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheScope;
    use crate::edit::EditState;
    use crate::identity::Session;
    use crate::llm::{MockGenerationClient, ModelConfig};
    use crate::patch::{LocalView, Patch};
    use crate::store::{Document, DocumentStore, Fields, MemoryStore, Query, SnapshotFn};
    use async_trait::async_trait;
    use serde_json::Value;

    /// Store that fails every call, proving a code path never touched it.
    struct UnreachableStore;

    #[async_trait]
    impl DocumentStore for UnreachableStore {
        async fn create_document(&self, _: &str, _: Fields) -> Result<String> {
            Err(Error::Store("unreachable".into()))
        }
        async fn get_document(&self, _: &str, _: &str) -> Result<Option<Document>> {
            Err(Error::Store("unreachable".into()))
        }
        async fn update_document(&self, _: &str, _: &str, _: Fields) -> Result<()> {
            Err(Error::Store("unreachable".into()))
        }
        async fn delete_document(&self, _: &str, _: &str) -> Result<()> {
            Err(Error::Store("unreachable".into()))
        }
        async fn query_equals(&self, _: &str, _: &[(String, Value)]) -> Result<Vec<Document>> {
            Err(Error::Store("unreachable".into()))
        }
        async fn subscribe(&self, _: &str, _: Query, _: SnapshotFn) -> Result<Subscription> {
            Err(Error::Store("unreachable".into()))
        }
    }

    fn settings(privileged: Option<&str>) -> DigestSettings {
        DigestSettings {
            scope: CacheScope::PerUser,
            model: ModelConfig::new("gpt-4-turbo", 1000),
            privileged_email: privileged.map(str::to_string),
        }
    }

    fn signed_in_app(responses: Vec<&str>) -> (Bookmarks, Arc<Session>) {
        let session = Arc::new(Session::signed_in(Identity::new(
            "u1",
            Some("u1@example.com".into()),
        )));
        let ctx = Context::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockGenerationClient::new(responses)),
            session.clone(),
        );
        (Bookmarks::new(ctx, settings(None)), session)
    }

    #[tokio::test]
    async fn test_signed_out_is_noop_without_network() {
        let mock = Arc::new(MockGenerationClient::new(vec![]));
        let ctx = Context::new(
            Arc::new(UnreachableStore),
            mock.clone(),
            Arc::new(Session::signed_out()),
        );
        let app = Bookmarks::new(ctx, settings(None));

        assert!(app.categories().await.unwrap().is_empty());
        assert!(app.add_category("Reading").await.unwrap().is_none());
        assert!(app.rename_category("c1", "x").await.unwrap().is_none());
        app.delete_category("c1").await.unwrap();
        assert!(app.links_in("c1").await.unwrap().is_empty());
        assert!(app.add_link("c1", "t", "u").await.unwrap().is_none());
        app.delete_link("l1").await.unwrap();
        assert!(app.watch_links(|_| {}).await.unwrap().is_none());
        assert!(app.digest("TypeScript").await.unwrap().is_none());
        assert!(app.refresh_digest("TypeScript").await.unwrap().is_none());
        assert!(!app.can_refresh());
        assert!(matches!(app.require_user(), Err(Error::Unauthenticated)));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_pull_mode_with_local_patches() {
        let (app, _) = signed_in_app(vec![]);
        let mut view = LocalView::new();
        view.replace_all(app.categories().await.unwrap());

        let created = app.add_category("Reading").await.unwrap().unwrap();
        view.apply(Patch::Insert(created.clone()));

        let renamed = app
            .rename_category(&created.id, "Reading List")
            .await
            .unwrap()
            .unwrap();
        view.apply(Patch::Replace(renamed));

        let fresh = app.categories().await.unwrap();
        assert_eq!(view.items(), fresh.as_slice());
        assert_eq!(fresh[0].name, "Reading List");

        app.delete_category(&created.id).await.unwrap();
        view.apply(Patch::Remove(created.id.clone()));
        assert!(view.items().is_empty());
        assert!(app.categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_category_of_other_user_is_not_found() {
        let (app, session) = signed_in_app(vec![]);
        let created = app.add_category("Private").await.unwrap().unwrap();

        session.sign_in(Identity::new("intruder", None));
        let err = app.category(&created.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(app.categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_link_edit_flow_keeps_draft_on_failure() {
        let (app, _) = signed_in_app(vec![]);
        let link = app
            .add_link("c1", "Rust", "https://rust-lang.org")
            .await
            .unwrap()
            .unwrap();

        let mut edit = EditState::Viewing;
        edit.begin((link.title.clone(), link.url.clone()));
        edit.set_draft(("Rust Book".to_string(), "   ".to_string()));

        let failed = edit
            .save(|(title, url)| {
                let app = app.clone();
                let id = link.id.clone();
                async move { app.edit_link(&id, &title, &url).await }
            })
            .await;
        assert!(matches!(failed, Err(Error::InvalidInput(_))));
        assert_eq!(
            edit.draft(),
            Some(&("Rust Book".to_string(), "   ".to_string()))
        );

        edit.set_draft(("Rust Book".to_string(), "https://doc.rust-lang.org/book".to_string()));
        let saved = edit
            .save(|(title, url)| {
                let app = app.clone();
                let id = link.id.clone();
                async move { app.edit_link(&id, &title, &url).await }
            })
            .await
            .unwrap()
            .flatten()
            .unwrap();
        assert_eq!(saved.title, "Rust Book");
        assert_eq!(edit, EditState::Viewing);

        let stored = app.link(&link.id).await.unwrap().unwrap();
        assert_eq!(stored.url, "https://doc.rust-lang.org/book");
    }

    #[tokio::test]
    async fn test_digest_through_facade() {
        let (app, _) = signed_in_app(vec!["1. **Feature** — desc"]);

        let first = app.digest("TypeScript").await.unwrap().unwrap();
        let again = app.digest("TypeScript").await.unwrap().unwrap();
        assert_eq!(first.text, again.text);
        assert!(app.can_refresh());
    }
}
