//! Linkshelf: personal bookmark organizer with cached language digests.
//! Shared library for the MCP server and the CLI.

pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod digest;
pub mod edit;
pub mod error;
pub mod identity;
pub mod llm;
pub mod mcp;
pub mod model;
pub mod patch;
pub mod repository;
pub mod store;

use std::sync::Arc;

pub use app::Bookmarks;
pub use config::Config;
pub use error::{Error, Result};

use context::Context;
use identity::Session;
use llm::GenerationClient;
use store::MemoryStore;

/// Open the configured store and wire a [`Bookmarks`] façade around it.
///
/// The returned session starts signed in as `config.user`, or signed out.
pub fn open_bookmarks(
    config: &Config,
    generator: Arc<dyn GenerationClient>,
) -> Result<(Bookmarks, Arc<Session>)> {
    let store = MemoryStore::open(&config.store_path)?;
    let session = Arc::new(match config.user.clone() {
        Some(user) => Session::signed_in(user),
        None => Session::signed_out(),
    });
    let ctx = Context::new(Arc::new(store), generator, session.clone());
    Ok((Bookmarks::new(ctx, config.digest_settings()), session))
}
