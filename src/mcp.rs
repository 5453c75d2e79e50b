//! MCP (Model Context Protocol) server interface for bookmark operations.
//!
//! Exposes categories, links and language digests as MCP tools over stdio.

use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::Bookmarks;
use crate::cache::{CacheSource, Cached};
use crate::digest::LANGUAGES;
use crate::error::Error;

// ============================================================================
// Tool Input Schemas
// ============================================================================

/// Parameters for creating a category.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CategoryAddParams {
    /// Display name of the new category.
    pub name: String,
}

/// Parameters for renaming a category.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CategoryRenameParams {
    /// Category identifier.
    pub id: String,
    /// New display name.
    pub name: String,
}

/// Parameters identifying one entity.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct IdParams {
    /// Entity identifier.
    pub id: String,
}

/// Parameters for listing links.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct LinkListParams {
    /// Only links filed under this category. Omit for all of the user's links.
    pub category_id: Option<String>,
}

/// Parameters for saving a link.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct LinkAddParams {
    /// Category to file the link under.
    pub category_id: String,
    pub title: String,
    pub url: String,
}

/// Parameters for editing a link.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct LinkEditParams {
    /// Link identifier.
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Parameters naming a digest language.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DigestParams {
    /// Language name, e.g. "TypeScript", "JavaScript" or "C#".
    #[schemars(description = "One of the languages listed by digest_languages")]
    pub language: String,
}

// ============================================================================
// MCP Server
// ============================================================================

/// MCP server exposing bookmark operations as tools.
#[derive(Clone)]
pub struct BookmarkServer {
    app: Bookmarks,
    tool_router: ToolRouter<Self>,
}

impl BookmarkServer {
    pub fn new(app: Bookmarks) -> Self {
        Self {
            app,
            tool_router: Self::tool_router(),
        }
    }
}

fn to_mcp(err: Error) -> McpError {
    match err {
        Error::NotFound { .. } | Error::InvalidInput(_) => {
            McpError::invalid_params(err.to_string(), None)
        }
        Error::Forbidden(_) | Error::Unauthenticated => {
            McpError::invalid_request(err.to_string(), None)
        }
        other => McpError::internal_error(other.to_string(), None),
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn digest_json(language: &str, cached: &Cached) -> serde_json::Value {
    json!({
        "language": language,
        "text": cached.text,
        "lastUpdated": cached.last_updated.to_rfc3339(),
        "cached": cached.source == CacheSource::Store,
    })
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for BookmarkServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "linkshelf".into(),
                title: Some("Linkshelf".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Personal bookmark organizer. Group links into categories and read \
                 cached feature digests for a few programming languages."
                    .into(),
            ),
        }
    }
}

#[tool_router(router = tool_router)]
impl BookmarkServer {
    #[tool(name = "category_list", description = "List the signed-in user's categories")]
    async fn category_list(&self) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        let categories = self.app.categories().await.map_err(to_mcp)?;
        json_result(&categories)
    }

    #[tool(name = "category_add", description = "Create a category")]
    async fn category_add(
        &self,
        Parameters(params): Parameters<CategoryAddParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        let created = self.app.add_category(&params.name).await.map_err(to_mcp)?;
        json_result(&created)
    }

    #[tool(name = "category_rename", description = "Rename a category in place")]
    async fn category_rename(
        &self,
        Parameters(params): Parameters<CategoryRenameParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        let renamed = self
            .app
            .rename_category(&params.id, &params.name)
            .await
            .map_err(to_mcp)?;
        json_result(&renamed)
    }

    #[tool(
        name = "category_delete",
        description = "Delete a category. Links filed under it are kept."
    )]
    async fn category_delete(
        &self,
        Parameters(params): Parameters<IdParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        self.app.delete_category(&params.id).await.map_err(to_mcp)?;
        json_result(&json!({ "deleted": params.id }))
    }

    #[tool(
        name = "link_list",
        description = "List saved links, optionally only those in one category"
    )]
    async fn link_list(
        &self,
        Parameters(params): Parameters<LinkListParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        let links = match params.category_id {
            Some(ref category_id) => self.app.links_in(category_id).await,
            None => self.app.links().await,
        }
        .map_err(to_mcp)?;
        json_result(&links)
    }

    #[tool(name = "link_add", description = "Save a link under a category")]
    async fn link_add(
        &self,
        Parameters(params): Parameters<LinkAddParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        let link = self
            .app
            .add_link(&params.category_id, &params.title, &params.url)
            .await
            .map_err(to_mcp)?;
        json_result(&link)
    }

    #[tool(name = "link_edit", description = "Change a link's title and url")]
    async fn link_edit(
        &self,
        Parameters(params): Parameters<LinkEditParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        let link = self
            .app
            .edit_link(&params.id, &params.title, &params.url)
            .await
            .map_err(to_mcp)?;
        json_result(&link)
    }

    #[tool(name = "link_delete", description = "Delete a saved link")]
    async fn link_delete(
        &self,
        Parameters(params): Parameters<IdParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        self.app.delete_link(&params.id).await.map_err(to_mcp)?;
        json_result(&json!({ "deleted": params.id }))
    }

    #[tool(
        name = "digest_languages",
        description = "List the languages that have feature digests"
    )]
    async fn digest_languages(&self) -> Result<CallToolResult, McpError> {
        let names: Vec<&str> = LANGUAGES.iter().map(|l| l.name).collect();
        json_result(&json!({
            "languages": names,
            "canRefresh": self.app.can_refresh(),
        }))
    }

    #[tool(
        name = "digest_get",
        description = "Feature digest for a language. Generated on first request, then served from cache."
    )]
    async fn digest_get(
        &self,
        Parameters(params): Parameters<DigestParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        match self.app.digest(&params.language).await.map_err(to_mcp)? {
            Some(cached) => json_result(&digest_json(&params.language, &cached)),
            None => Err(to_mcp(Error::Unauthenticated)),
        }
    }

    #[tool(
        name = "digest_refresh",
        description = "Regenerate a language's feature digest and replace the cached copy"
    )]
    async fn digest_refresh(
        &self,
        Parameters(params): Parameters<DigestParams>,
    ) -> Result<CallToolResult, McpError> {
        self.app.require_user().map_err(to_mcp)?;
        match self
            .app
            .refresh_digest(&params.language)
            .await
            .map_err(to_mcp)?
        {
            Some(cached) => json_result(&digest_json(&params.language, &cached)),
            None => Err(to_mcp(Error::Unauthenticated)),
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Run the MCP server on stdio transport.
pub async fn run_mcp_server(app: Bookmarks) -> Result<(), Box<dyn std::error::Error>> {
    let server = BookmarkServer::new(app);
    let service = server.serve(stdio()).await.map_err(|e| e.to_string())?;
    service.waiting().await.map_err(|e| e.to_string())?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
