//! Per-user selection tracking.
//!
//! Selections are part of the replicated room state so every participant can
//! see what everyone else has grabbed. Operations report whether anything
//! changed; a `false` return means the caller must not re-broadcast.

use shared::{Selection, SelectionMode};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SelectionTracker {
    selections: HashMap<String, Selection>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(selections: HashMap<String, Selection>) -> Self {
        Self { selections }
    }

    pub fn to_map(&self) -> HashMap<String, Selection> {
        self.selections.clone()
    }

    pub fn selection(&self, uid: &str) -> Option<&Selection> {
        self.selections.get(uid)
    }

    /// The id a single-object consumer sees for `uid`.
    pub fn single_view(&self, uid: &str) -> Option<&str> {
        self.selections.get(uid).and_then(|s| s.single_view())
    }

    /// Replaces the user's selection with a single object.
    ///
    /// Re-selecting the already-selected single id is a no-op and returns
    /// `false` so no network message is re-emitted.
    pub fn select_one(&mut self, uid: &str, object_id: &str) -> bool {
        if let Some(Selection::Single { object_id: current }) = self.selections.get(uid) {
            if current == object_id {
                return false;
            }
        }

        self.selections.insert(
            uid.to_string(),
            Selection::Single {
                object_id: object_id.to_string(),
            },
        );
        true
    }

    pub fn deselect(&mut self, uid: &str) -> bool {
        self.selections.remove(uid).is_some()
    }

    /// Applies a multi-select in the requested mode (default replace).
    ///
    /// Append unions with the existing selection, preserving existing order
    /// and de-duplicating; subtract removes the listed ids preserving the
    /// order of what remains. An empty result clears the entry.
    pub fn select_multiple(
        &mut self,
        uid: &str,
        object_ids: Vec<String>,
        mode: SelectionMode,
    ) -> bool {
        let existing = self.current_ids(uid);

        let next: Vec<String> = match mode {
            SelectionMode::Replace => dedupe(object_ids),
            SelectionMode::Append => {
                let mut merged = existing.clone();
                for id in object_ids {
                    if !merged.contains(&id) {
                        merged.push(id);
                    }
                }
                merged
            }
            SelectionMode::Subtract => existing
                .iter()
                .filter(|id| !object_ids.contains(id))
                .cloned()
                .collect(),
        };

        if next == existing {
            return false;
        }

        if next.is_empty() {
            self.selections.remove(uid);
        } else {
            self.selections
                .insert(uid.to_string(), Selection::Multiple { object_ids: next });
        }
        true
    }

    pub fn clear_user(&mut self, uid: &str) {
        self.selections.remove(uid);
    }

    fn current_ids(&self, uid: &str) -> Vec<String> {
        match self.selections.get(uid) {
            Some(Selection::Single { object_id }) => vec![object_id.clone()],
            Some(Selection::Multiple { object_ids }) => object_ids.clone(),
            None => Vec::new(),
        }
    }
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
