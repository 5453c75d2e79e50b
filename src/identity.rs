//! Signed-in identity as seen by the core.
//!
//! Authentication itself happens elsewhere; the core only asks "who is the
//! current user", and treats `id` as the ownership key.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::info;

/// The current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
        }
    }

    /// Whether this user may force-refresh cached digests.
    ///
    /// With a privileged address configured only that address may refresh
    /// (compared case-insensitively). Without one, any signed-in user may.
    pub fn may_refresh(&self, privileged_email: Option<&str>) -> bool {
        match privileged_email {
            None => true,
            Some(allowed) => self
                .email
                .as_deref()
                .is_some_and(|email| email.trim().eq_ignore_ascii_case(allowed.trim())),
        }
    }
}

/// Source of the current identity.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<Identity>;
}

/// In-process session holding the signed-in identity.
#[derive(Debug, Default)]
pub struct Session {
    user: RwLock<Option<Identity>>,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            user: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(user = %identity.id, "signed in");
        if let Ok(mut user) = self.user.write() {
            *user = Some(identity);
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut user) = self.user.write()
            && let Some(previous) = user.take()
        {
            info!(user = %previous.id, "signed out");
        }
    }
}

impl IdentityProvider for Session {
    fn current_user(&self) -> Option<Identity> {
        self.user.read().ok().and_then(|user| user.clone())
    }
}
