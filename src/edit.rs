//! In-place edit affordance: `Viewing -> Editing -> Saving -> Viewing`.
//!
//! Cancelling returns to `Viewing`. A failed save goes back to `Editing`
//! with the user's draft intact.

use std::future::Future;

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditState<D> {
    Viewing,
    Editing {
        draft: D,
    },
    Saving {
        draft: D,
    },
}

impl<D> Default for EditState<D> {
    fn default() -> Self {
        Self::Viewing
    }
}

impl<D: Clone> EditState<D> {
    /// Start editing from the current value.
    pub fn begin(&mut self, current: D) {
        if matches!(self, Self::Viewing) {
            *self = Self::Editing { draft: current };
        }
    }

    /// Replace the draft while editing.
    pub fn set_draft(&mut self, draft: D) {
        if let Self::Editing { draft: slot } = self {
            *slot = draft;
        }
    }

    /// Abandon the draft.
    pub fn cancel(&mut self) {
        if matches!(self, Self::Editing { .. }) {
            *self = Self::Viewing;
        }
    }

    pub fn draft(&self) -> Option<&D> {
        match self {
            Self::Viewing => None,
            Self::Editing { draft } | Self::Saving { draft } => Some(draft),
        }
    }

    pub fn is_saving(&self) -> bool {
        matches!(self, Self::Saving { .. })
    }

    /// Submit the draft through `update`.
    ///
    /// Stays in `Saving` until `update` resolves. On success moves to
    /// `Viewing` and returns the saved value; on failure moves back to
    /// `Editing` with the same draft and returns the error. Outside
    /// `Editing` this does nothing and returns `Ok(None)`.
    pub async fn save<T, F, Fut>(&mut self, update: F) -> Result<Option<T>>
    where
        F: FnOnce(D) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let draft = match std::mem::replace(self, Self::Viewing) {
            Self::Editing { draft } => draft,
            other => {
                *self = other;
                return Ok(None);
            }
        };

        *self = Self::Saving {
            draft: draft.clone(),
        };
        match update(draft.clone()).await {
            Ok(saved) => {
                *self = Self::Viewing;
                Ok(Some(saved))
            }
            Err(e) => {
                warn!("save failed, keeping draft: {e}");
                *self = Self::Editing { draft };
                Err(e)
            }
        }
    }
}
