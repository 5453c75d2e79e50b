use std::sync::Arc;

use tracing::info;

use linkshelf::mcp::run_mcp_server;
use linkshelf::{Config, open_bookmarks};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    // Digests need a generation client, so fail early without credentials.
    let generator = config.provider.client_from_env().map_err(|e| {
        format!(
            "{e}. Set {} to enable feature digests.",
            config.provider.api_key_var()
        )
    })?;

    let (bookmarks, _session) = open_bookmarks(&config, Arc::from(generator))?;
    info!(
        store = %config.store_path.display(),
        signed_in = bookmarks.current_user().is_some(),
        "starting MCP server"
    );

    run_mcp_server(bookmarks).await
}
