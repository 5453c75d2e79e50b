//! Explicitly constructed bundle of the external collaborators.

use std::sync::Arc;

use crate::identity::IdentityProvider;
use crate::llm::GenerationClient;
use crate::store::DocumentStore;

/// Store, generation client and identity source, passed to every component
/// at construction time.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn DocumentStore>,
    pub generator: Arc<dyn GenerationClient>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Context {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn GenerationClient>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            generator,
            identity,
        }
    }
}
