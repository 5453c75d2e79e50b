//! Language feature digests: the catalogue, its prompts, and the cached
//! service the surfaces call.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::cache::{CacheCoordinator, CacheScope, Cached};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::llm::{GenerationClient, ModelConfig, Prompt};

/// System instruction shared by every digest request.
pub const SYSTEM_PROMPT: &str = "You are a helpful programming assistant. Provide concise, \
practical information about programming features. Format your response with numbered \
features, each with a title in bold, status, and description.";

/// A language with a digest panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub name: &'static str,
    pub prompt: &'static str,
}

pub const LANGUAGES: &[Language] = &[
    Language {
        name: "TypeScript",
        prompt: "highly requested TypeScript features under consideration or development",
    },
    Language {
        name: "JavaScript",
        prompt: "highly requested JavaScript features under consideration or development",
    },
    Language {
        name: "C#",
        prompt: "highly requested C# features under consideration or development",
    },
];

/// Look up a catalogue entry, ignoring ASCII case.
pub fn find_language(name: &str) -> Option<&'static Language> {
    let name = name.trim();
    LANGUAGES.iter().find(|l| l.name.eq_ignore_ascii_case(name))
}

impl Language {
    pub fn prompt(&self) -> Prompt {
        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user: self.prompt.to_string(),
        }
    }
}

static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*(.*?)\*\*").unwrap_or_else(|e| panic!("invalid emphasis regex: {e}"))
});

/// Turn `**bold**` markers into `<strong>` tags for HTML renderers.
pub fn emphasis_to_html(text: &str) -> String {
    EMPHASIS.replace_all(text, "<strong>$1</strong>").into_owned()
}

// ============================================================================
// Service
// ============================================================================

/// Digest-related settings chosen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSettings {
    pub scope: CacheScope,
    pub model: ModelConfig,
    /// Only this address may refresh. `None` lets every signed-in user.
    pub privileged_email: Option<String>,
}

/// Cached digests for the catalogue languages.
#[derive(Clone)]
pub struct DigestService {
    cache: CacheCoordinator,
    generator: Arc<dyn GenerationClient>,
    settings: DigestSettings,
}

impl DigestService {
    pub fn new(ctx: &Context, settings: DigestSettings) -> Self {
        Self {
            cache: CacheCoordinator::new(Arc::clone(&ctx.store)),
            generator: Arc::clone(&ctx.generator),
            settings,
        }
    }

    pub fn settings(&self) -> &DigestSettings {
        &self.settings
    }

    pub fn may_refresh(&self, identity: &Identity) -> bool {
        identity.may_refresh(self.settings.privileged_email.as_deref())
    }

    /// Cached digest for `language`, generated on first request.
    pub async fn digest(&self, identity: &Identity, language: &str) -> Result<Cached> {
        let language = known_language(language)?;
        let key = self.settings.scope.key(language.name, identity);
        self.cache
            .get_or_produce(&key, || self.generate(language))
            .await
    }

    /// Regenerate the digest for `language` and overwrite the cached copy.
    pub async fn refresh(&self, identity: &Identity, language: &str) -> Result<Cached> {
        let language = known_language(language)?;
        if !self.may_refresh(identity) {
            warn!(user = %identity.id, language = language.name, "refresh denied");
            return Err(Error::Forbidden(
                "refreshing digests is restricted to the privileged account".into(),
            ));
        }

        let key = self.settings.scope.key(language.name, identity);
        self.cache.refresh(&key, || self.generate(language)).await
    }

    async fn generate(
        &self,
        language: &'static Language,
    ) -> std::result::Result<String, crate::llm::GenerationError> {
        debug!(language = language.name, model = %self.settings.model.model, "requesting digest");
        self.generator
            .generate(&language.prompt(), &self.settings.model)
            .await
            .map(|completion| completion.text)
    }
}

fn known_language(name: &str) -> Result<&'static Language> {
    find_language(name).ok_or_else(|| {
        let known: Vec<&str> = LANGUAGES.iter().map(|l| l.name).collect();
        Error::InvalidInput(format!(
            "unknown language '{name}', expected one of: {}",
            known.join(", ")
        ))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSource;
    use crate::identity::Session;
    use crate::llm::{GenerationError, MockGenerationClient};
    use crate::model::FEATURE_DIGESTS;
    use crate::store::{DocumentStore, MemoryStore};

    fn setup(
        mock: MockGenerationClient,
        privileged: Option<&str>,
        scope: CacheScope,
    ) -> (DigestService, Arc<MockGenerationClient>, MemoryStore) {
        let store = MemoryStore::new();
        let mock = Arc::new(mock);
        let ctx = Context::new(
            Arc::new(store.clone()),
            mock.clone(),
            Arc::new(Session::signed_out()),
        );
        let service = DigestService::new(
            &ctx,
            DigestSettings {
                scope,
                model: ModelConfig::new("gpt-4-turbo", 1000),
                privileged_email: privileged.map(str::to_string),
            },
        );
        (service, mock, store)
    }

    fn user(id: &str, email: &str) -> Identity {
        Identity::new(id, Some(email.to_string()))
    }

    #[test]
    fn test_find_language_ignores_case() {
        assert_eq!(find_language("typescript").unwrap().name, "TypeScript");
        assert_eq!(find_language(" c# ").unwrap().name, "C#");
        assert!(find_language("Cobol").is_none());
    }

    #[test]
    fn test_emphasis_to_html() {
        assert_eq!(
            emphasis_to_html("1. **Decorators** — stage 3\n2. **Records**"),
            "1. <strong>Decorators</strong> — stage 3\n2. <strong>Records</strong>"
        );
        assert_eq!(emphasis_to_html("no markup"), "no markup");
    }

    #[tokio::test]
    async fn test_digest_generates_once_then_serves_cache() {
        let (service, mock, store) = setup(
            MockGenerationClient::new(vec!["1. **Feature** — desc"]),
            None,
            CacheScope::PerUser,
        );
        let alice = user("alice", "alice@example.com");

        let first = service.digest(&alice, "TypeScript").await.unwrap();
        let second = service.digest(&alice, "typescript").await.unwrap();

        assert_eq!(first.text, "1. **Feature** — desc");
        assert_eq!(second.text, first.text);
        assert_eq!(second.source, CacheSource::Store);
        assert_eq!(mock.calls(), 1);

        let prompt = &mock.prompts()[0];
        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt.user.contains("TypeScript features"));

        let docs = store.query_equals(FEATURE_DIGESTS, &[]).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].fields["language"], "TypeScript");
    }

    #[tokio::test]
    async fn test_unknown_language_never_generates() {
        let (service, mock, _) = setup(MockGenerationClient::new(vec![]), None, CacheScope::Shared);

        let err = service
            .digest(&user("u", "u@example.com"), "Cobol")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_gated_by_privileged_email() {
        let (service, mock, _) = setup(
            MockGenerationClient::new(vec!["v1", "v2"]),
            Some("admin@example.com"),
            CacheScope::Shared,
        );
        let admin = user("a", "admin@example.com");
        let guest = user("g", "guest@example.com");

        service.digest(&guest, "C#").await.unwrap();

        let denied = service.refresh(&guest, "C#").await.unwrap_err();
        assert!(matches!(denied, Error::Forbidden(_)));
        assert_eq!(mock.calls(), 1);

        let refreshed = service.refresh(&admin, "C#").await.unwrap();
        assert_eq!(refreshed.text, "v2");
        assert_eq!(service.digest(&guest, "C#").await.unwrap().text, "v2");
    }

    #[tokio::test]
    async fn test_failed_generation_is_retried_next_time() {
        let (service, mock, store) = setup(
            MockGenerationClient::scripted(vec![
                Err(GenerationError::Status {
                    status: 500,
                    body: "boom".into(),
                }),
                Ok("recovered".into()),
            ]),
            None,
            CacheScope::PerUser,
        );
        let alice = user("alice", "alice@example.com");

        assert!(service.digest(&alice, "JavaScript").await.is_err());
        assert!(
            store
                .query_equals(FEATURE_DIGESTS, &[])
                .await
                .unwrap()
                .is_empty()
        );

        let retry = service.digest(&alice, "JavaScript").await.unwrap();
        assert_eq!(retry.text, "recovered");
        assert_eq!(mock.calls(), 2);
    }
}
