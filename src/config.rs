//! Runtime configuration resolved from environment variables.

use std::path::PathBuf;

use tracing::warn;

use crate::cache::CacheScope;
use crate::digest::DigestSettings;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::llm::{ModelConfig, Provider};

pub const ENV_STORE: &str = "LINKSHELF_STORE";
pub const ENV_CACHE_SCOPE: &str = "LINKSHELF_CACHE_SCOPE";
pub const ENV_PRIVILEGED_EMAIL: &str = "LINKSHELF_PRIVILEGED_EMAIL";
pub const ENV_PROVIDER: &str = "LINKSHELF_PROVIDER";
pub const ENV_MODEL: &str = "LINKSHELF_MODEL";
pub const ENV_MAX_OUTPUT_TOKENS: &str = "LINKSHELF_MAX_OUTPUT_TOKENS";
pub const ENV_USER_ID: &str = "LINKSHELF_USER_ID";
pub const ENV_USER_EMAIL: &str = "LINKSHELF_USER_EMAIL";

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store_path: PathBuf,
    pub cache_scope: CacheScope,
    pub privileged_email: Option<String>,
    pub provider: Provider,
    pub model: ModelConfig,
    /// Identity the binaries sign in as. `None` means signed out.
    pub user: Option<Identity>,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store_path = get(ENV_STORE)
            .map(PathBuf::from)
            .unwrap_or_else(default_store_path);

        let cache_scope = match get(ENV_CACHE_SCOPE) {
            Some(raw) => raw.parse().map_err(Error::Config)?,
            None => CacheScope::default(),
        };

        let provider = match get(ENV_PROVIDER) {
            Some(raw) => raw.parse().map_err(Error::Config)?,
            None => Provider::OpenAi,
        };

        let max_output_tokens = match get(ENV_MAX_OUTPUT_TOKENS) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Config(format!(
                        "{ENV_MAX_OUTPUT_TOKENS} must be a positive integer, got '{raw}'"
                    )));
                }
            },
            None => DEFAULT_MAX_OUTPUT_TOKENS,
        };

        let model = ModelConfig::new(
            get(ENV_MODEL).unwrap_or_else(|| provider.default_model().to_string()),
            max_output_tokens,
        );

        let user = get(ENV_USER_ID).map(|id| Identity::new(id, get(ENV_USER_EMAIL)));

        Ok(Self {
            store_path,
            cache_scope,
            privileged_email: get(ENV_PRIVILEGED_EMAIL),
            provider,
            model,
            user,
        })
    }

    /// Apply command-line overrides on top of the environment.
    ///
    /// `user` replaces the signed-in id and keeps the environment's email
    /// unless `email` is given too. `email` alone re-addresses the
    /// environment's user; with no user at all it is ignored.
    pub fn with_overrides(
        mut self,
        store_path: Option<PathBuf>,
        user: Option<String>,
        email: Option<String>,
        cache_scope: Option<CacheScope>,
    ) -> Self {
        if let Some(path) = store_path {
            self.store_path = path;
        }
        if let Some(scope) = cache_scope {
            self.cache_scope = scope;
        }
        match (user, self.user.take()) {
            (Some(id), current) => {
                let email = email.or_else(|| current.and_then(|u| u.email));
                self.user = Some(Identity::new(id, email));
            }
            (None, Some(mut current)) => {
                if email.is_some() {
                    current.email = email;
                }
                self.user = Some(current);
            }
            (None, None) => {
                if email.is_some() {
                    warn!("email override ignored: no user to apply it to");
                }
            }
        }
        self
    }

    pub fn digest_settings(&self) -> DigestSettings {
        DigestSettings {
            scope: self.cache_scope,
            model: self.model.clone(),
            privileged_email: self.privileged_email.clone(),
        }
    }
}

/// `$DATA_LOCAL/linkshelf/store.json`, or `./linkshelf/store.json` without a
/// data directory.
pub fn default_store_path() -> PathBuf {
    let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.join("linkshelf").join("store.json")
}
