//! Local view maintenance after a mutation succeeds.
//!
//! In pull mode a caller can avoid a full re-list by applying the same change
//! to its local snapshot. [`apply_patch`] is that change, as a pure function.
//! In push mode every delivered snapshot simply replaces the view.

use crate::model::Entity;

/// A change already accepted by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    /// Add a new entity, or replace the one with the same id.
    Insert(T),
    /// Replace the entity with the same id. Absent ids are ignored.
    Replace(T),
    /// Drop the entity with this id, if present.
    Remove(String),
}

/// Apply `patch` to `items` and return the patched snapshot.
pub fn apply_patch<T: Entity>(mut items: Vec<T>, patch: Patch<T>) -> Vec<T> {
    match patch {
        Patch::Insert(entity) => {
            match items.iter_mut().find(|item| item.id() == entity.id()) {
                Some(slot) => *slot = entity,
                None => items.push(entity),
            }
            items
        }
        Patch::Replace(entity) => {
            if let Some(slot) = items.iter_mut().find(|item| item.id() == entity.id()) {
                *slot = entity;
            }
            items
        }
        Patch::Remove(id) => {
            items.retain(|item| item.id() != id);
            items
        }
    }
}

/// The caller's current picture of one entity collection.
#[derive(Debug, Clone)]
pub struct LocalView<T> {
    items: Vec<T>,
    revision: u64,
}

impl<T> Default for LocalView<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            revision: 0,
        }
    }
}

impl<T: Entity> LocalView<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Bumped on every change; lets a renderer skip identical frames.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Authoritative replacement: a pull-mode re-list or a push-mode snapshot.
    pub fn replace_all(&mut self, items: Vec<T>) {
        self.items = items;
        self.revision += 1;
    }

    /// Pull-mode optimistic update after a successful mutation.
    pub fn apply(&mut self, patch: Patch<T>) {
        self.items = apply_patch(std::mem::take(&mut self.items), patch);
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn category(id: &str, name: &str) -> Category {
        Category {
            id: id.into(),
            name: name.into(),
            owner_id: "u1".into(),
            created_at: "2024-01-01T00:00:00.000000Z".into(),
        }
    }

    fn names(items: &[Category]) -> Vec<&str> {
        items.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_insert_appends_new() {
        let out = apply_patch(vec![category("a", "A")], Patch::Insert(category("b", "B")));
        assert_eq!(names(&out), vec!["A", "B"]);
    }

    #[test]
    fn test_insert_existing_id_replaces() {
        let out = apply_patch(
            vec![category("a", "A"), category("b", "B")],
            Patch::Insert(category("a", "A2")),
        );
        assert_eq!(names(&out), vec!["A2", "B"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let out = apply_patch(
            vec![category("a", "A"), category("b", "B"), category("c", "C")],
            Patch::Replace(category("b", "Reading List")),
        );
        assert_eq!(names(&out), vec!["A", "Reading List", "C"]);
    }

    #[test]
    fn test_replace_unknown_id_is_noop() {
        let out = apply_patch(vec![category("a", "A")], Patch::Replace(category("z", "Z")));
        assert_eq!(names(&out), vec!["A"]);
    }

    #[test]
    fn test_remove_by_id() {
        let out = apply_patch(
            vec![category("a", "A"), category("b", "B")],
            Patch::Remove("a".into()),
        );
        assert_eq!(names(&out), vec!["B"]);

        let again = apply_patch(out, Patch::Remove("a".into()));
        assert_eq!(names(&again), vec!["B"]);
    }

    #[test]
    fn test_local_view_tracks_revisions() {
        let mut view = LocalView::new();
        view.replace_all(vec![category("a", "A")]);
        view.apply(Patch::Insert(category("b", "B")));
        view.apply(Patch::Remove("a".into()));

        assert_eq!(names(view.items()), vec!["B"]);
        assert_eq!(view.revision(), 3);
    }
}
