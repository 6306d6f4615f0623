//! Stack of reversible edits applied on top of an entry's authoritative data.
//!
//! Edits compose in application order. Rolling back edit `k` undoes every later edit, undoes
//! `k`, then re-applies the later ones, so unrelated concurrent edits survive a rollback.

use super::patch::{apply_patches, diff, PatchError, PatchOp};
use serde_json::Value;
use std::fmt;

/// Identifier of one applied edit, unique per [`Api`](crate::api::Api).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchId(pub u64);

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "patch-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct AppliedPatch {
    id: PatchId,
    forward: Vec<PatchOp>,
    inverse: Vec<PatchOp>,
}

#[derive(Debug, Default, Clone)]
pub struct PatchStack {
    applied: Vec<AppliedPatch>,
}

/// Outcome of [`PatchStack::rollback`].
#[derive(Debug, PartialEq, Eq)]
pub enum Rollback {
    /// The edit was undone; the ids of later edits that could not be re-applied are listed.
    Undone { dropped: Vec<PatchId> },
    /// The edit is no longer on the stack (already undone, or replaced by fresh data).
    NotFound,
}

impl PatchStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an edit already applied to the data.
    pub fn push(&mut self, id: PatchId, forward: Vec<PatchOp>, inverse: Vec<PatchOp>) {
        self.applied.push(AppliedPatch { id, forward, inverse });
    }

    /// Forgets an edit without touching the data, making it permanent.
    pub fn commit(&mut self, id: PatchId) -> bool {
        let before = self.applied.len();
        self.applied.retain(|patch| patch.id != id);
        self.applied.len() != before
    }

    /// Undoes edit `id` on `data`, preserving later edits where they still apply.
    ///
    /// `data` and the stack are left unchanged on error.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError`] if an inverse no longer matches the shape of `data`.
    pub fn rollback(&mut self, data: &mut Value, id: PatchId) -> Result<Rollback, PatchError> {
        let Some(position) = self.applied.iter().position(|patch| patch.id == id) else {
            return Ok(Rollback::NotFound);
        };

        let mut working = data.clone();
        for later in self.applied[position + 1..].iter().rev() {
            apply_patches(&mut working, &later.inverse)?;
        }
        apply_patches(&mut working, &self.applied[position].inverse)?;

        let later = self.applied.split_off(position + 1);
        self.applied.truncate(position);

        let mut dropped = Vec::new();
        for patch in later {
            let before = working.clone();
            match apply_patches(&mut working, &patch.forward) {
                Ok(()) => {
                    let (_, inverse) = diff(&before, &working);
                    self.applied.push(AppliedPatch { id: patch.id, forward: patch.forward, inverse });
                }
                Err(_) => {
                    working = before;
                    dropped.push(patch.id);
                }
            }
        }

        *data = working;
        Ok(Rollback::Undone { dropped })
    }

    #[must_use]
    pub fn contains(&self, id: PatchId) -> bool {
        self.applied.iter().any(|patch| patch.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Drops every recorded edit. Used when authoritative data replaces the value.
    pub fn clear(&mut self) {
        self.applied.clear();
    }
}
