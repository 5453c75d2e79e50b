use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::debug;

use linkshelf::cache::{CacheScope, CacheSource, Cached};
use linkshelf::digest::{LANGUAGES, emphasis_to_html};
use linkshelf::llm::{GenerationClient, UnconfiguredClient};
use linkshelf::model::{Category, Link, sort_newest_first};
use linkshelf::{Bookmarks, Config, open_bookmarks};

#[derive(Parser)]
#[command(
    name = "linkshelf-cli",
    about = "Linkshelf — organize saved links into categories and read language digests"
)]
struct Cli {
    /// Output machine-readable JSON (default: human-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Store file (overrides LINKSHELF_STORE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Act as this user id (overrides LINKSHELF_USER_ID)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Email of the acting user (overrides LINKSHELF_USER_EMAIL)
    #[arg(long, global = true)]
    email: Option<String>,

    /// Digest cache scope: per-user or shared (overrides LINKSHELF_CACHE_SCOPE)
    #[arg(long, global = true)]
    scope: Option<CacheScope>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage categories
    Categories {
        #[command(subcommand)]
        action: CategoryAction,
    },
    /// Manage saved links
    Links {
        #[command(subcommand)]
        action: LinkAction,
    },
    /// Read or regenerate a language feature digest
    Digest {
        #[command(subcommand)]
        action: DigestAction,
    },
    /// List the languages that have digests
    Languages,
}

#[derive(Subcommand)]
enum CategoryAction {
    /// List categories, newest first
    List,
    /// Create a category
    Add { name: String },
    /// Rename a category
    Rename { id: String, name: String },
    /// Delete a category (its links are kept)
    Delete { id: String },
    /// Print the category list every time it changes, until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
enum LinkAction {
    /// List links, newest first
    List {
        /// Only links filed under this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Save a link under a category
    Add {
        #[arg(long)]
        category: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        url: String,
    },
    /// Change a link's title and url
    Edit {
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        url: String,
    },
    /// Delete a link
    Delete { id: String },
    /// Print the link list every time it changes, until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
enum DigestAction {
    /// Show the cached digest, generating it on first request
    Show {
        language: String,
        /// Render **bold** markers as <strong> tags
        #[arg(long)]
        html: bool,
    },
    /// Regenerate the digest and replace the cached copy
    Refresh { language: String },
}

// ============================================================================
// Output Formatting
// ============================================================================

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_category(category: &Category) {
    println!("{}  {}", category.id, category.name);
}

fn format_link(link: &Link) {
    println!("{}  {}", link.id, link.title);
    println!("  Url: {}", link.url);
    println!("  Category: {}", link.category_id);
}

fn format_categories(categories: &[Category]) {
    if categories.is_empty() {
        eprintln!("No categories yet.");
    }
    for category in categories {
        format_category(category);
    }
}

fn format_links(links: &[Link]) {
    for (i, link) in links.iter().enumerate() {
        if i > 0 {
            println!();
        }
        format_link(link);
    }
    if links.is_empty() {
        eprintln!("No links found.");
    }
}

fn print_digest(
    language: &str,
    cached: &Cached,
    json: bool,
    html: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = if html {
        emphasis_to_html(&cached.text)
    } else {
        cached.text.clone()
    };
    if json {
        return print_json(&json!({
            "language": language,
            "text": text,
            "lastUpdated": cached.last_updated.to_rfc3339(),
            "cached": cached.source == CacheSource::Store,
        }));
    }
    let origin = match cached.source {
        CacheSource::Store => "cached",
        CacheSource::Generated => "freshly generated",
    };
    eprintln!(
        "{language} ({origin}, updated {})",
        cached.last_updated.format("%Y-%m-%d %H:%M UTC")
    );
    println!("{text}");
    Ok(())
}

// ============================================================================
// Setup
// ============================================================================

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    Ok(Config::from_env()?.with_overrides(
        cli.store.clone(),
        cli.user.clone(),
        cli.email.clone(),
        cli.scope,
    ))
}

/// Generation client for the configured provider. Without an API key the
/// bookmark commands still work and digest misses report the missing key.
fn generator(config: &Config) -> Arc<dyn GenerationClient> {
    match config.provider.client_from_env() {
        Ok(client) => Arc::from(client),
        Err(e) => {
            debug!("generation disabled: {e}");
            Arc::new(UnconfiguredClient::new(config.provider))
        }
    }
}

/// Block until Ctrl-C.
async fn wait_for_interrupt() -> Result<(), Box<dyn std::error::Error>> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Command::Languages = cli.command {
        if cli.json {
            let names: Vec<&str> = LANGUAGES.iter().map(|l| l.name).collect();
            print_json(&names)?;
        } else {
            for language in LANGUAGES {
                println!("{}", language.name);
            }
        }
        return Ok(());
    }

    let (app, _session) = open_bookmarks(&config, generator(&config))?;
    app.require_user().map_err(|e| {
        format!("{e}. Set LINKSHELF_USER_ID or pass --user to choose who you are.")
    })?;

    match cli.command {
        Command::Categories { action } => run_categories(&app, action, cli.json).await?,
        Command::Links { action } => run_links(&app, action, cli.json).await?,
        Command::Digest { action } => run_digest(&app, action, cli.json).await?,
        Command::Languages => {}
    }

    Ok(())
}

async fn run_categories(
    app: &Bookmarks,
    action: CategoryAction,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        CategoryAction::List => {
            let mut categories = app.categories().await?;
            sort_newest_first(&mut categories);
            if json {
                print_json(&categories)?;
            } else {
                format_categories(&categories);
            }
        }
        CategoryAction::Add { name } => {
            if let Some(category) = app.add_category(&name).await? {
                if json {
                    print_json(&category)?;
                } else {
                    eprintln!("Created category '{}'", category.name);
                    format_category(&category);
                }
            }
        }
        CategoryAction::Rename { id, name } => {
            if let Some(category) = app.rename_category(&id, &name).await? {
                if json {
                    print_json(&category)?;
                } else {
                    format_category(&category);
                }
            }
        }
        CategoryAction::Delete { id } => {
            app.delete_category(&id).await?;
            if json {
                print_json(&json!({ "deleted": id }))?;
            } else {
                eprintln!("Deleted category {id}");
            }
        }
        CategoryAction::Watch => {
            let subscription = app
                .watch_categories(move |categories| {
                    if json {
                        if let Ok(line) = serde_json::to_string(&categories) {
                            println!("{line}");
                        }
                    } else {
                        println!("--- {} categories ---", categories.len());
                        format_categories(&categories);
                    }
                })
                .await?;
            wait_for_interrupt().await?;
            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
        }
    }
    Ok(())
}

async fn run_links(
    app: &Bookmarks,
    action: LinkAction,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        LinkAction::List { category } => {
            let mut links = match category {
                Some(ref category_id) => app.links_in(category_id).await?,
                None => app.links().await?,
            };
            sort_newest_first(&mut links);
            if json {
                print_json(&links)?;
            } else {
                format_links(&links);
            }
        }
        LinkAction::Add {
            category,
            title,
            url,
        } => {
            if let Some(link) = app.add_link(&category, &title, &url).await? {
                if json {
                    print_json(&link)?;
                } else {
                    eprintln!("Saved link '{}'", link.title);
                    format_link(&link);
                }
            }
        }
        LinkAction::Edit { id, title, url } => {
            if let Some(link) = app.edit_link(&id, &title, &url).await? {
                if json {
                    print_json(&link)?;
                } else {
                    format_link(&link);
                }
            }
        }
        LinkAction::Delete { id } => {
            app.delete_link(&id).await?;
            if json {
                print_json(&json!({ "deleted": id }))?;
            } else {
                eprintln!("Deleted link {id}");
            }
        }
        LinkAction::Watch => {
            let subscription = app
                .watch_links(move |links| {
                    if json {
                        if let Ok(line) = serde_json::to_string(&links) {
                            println!("{line}");
                        }
                    } else {
                        println!("--- {} links ---", links.len());
                        format_links(&links);
                    }
                })
                .await?;
            wait_for_interrupt().await?;
            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
        }
    }
    Ok(())
}

async fn run_digest(
    app: &Bookmarks,
    action: DigestAction,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        DigestAction::Show { language, html } => {
            if let Some(cached) = app.digest(&language).await? {
                print_digest(&language, &cached, json, html)?;
            }
        }
        DigestAction::Refresh { language } => {
            if let Some(cached) = app.refresh_digest(&language).await? {
                print_digest(&language, &cached, json, false)?;
            }
        }
    }
    Ok(())
}
