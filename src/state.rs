// SPDX-License-Identifier: MIT

//! Session state and field reducers
//!
//! Every flow declares its own state record together with a matching
//! update record. Nodes never write the state directly; they return an
//! update and the executor merges it through [SessionState::apply],
//! which composes the per-field reducers below. A merge is all or
//! nothing: a failed node produces no update, so the state never holds
//! half a step.

/// State threaded through one graph run.
pub trait SessionState: Send + Sync + 'static {
    /// Partial update produced by a node. Fields left unset keep the
    /// current value.
    type Update: Send + 'static;

    /// Merge an update into the state. Must be total: any update merges
    /// into any state without failing.
    fn apply(&mut self, update: Self::Update);
}

/// Per-field merge functions composed inside [SessionState::apply].
pub mod reducers {
    /// Append-only concatenation. New items land behind existing ones,
    /// order preserved, nothing removed or deduplicated.
    pub fn concat<T>(current: &mut Vec<T>, new: Vec<T>) {
        current.extend(new);
    }

    /// Replace with the latest value when one is present, otherwise keep
    /// the current value.
    pub fn replace<T>(current: &mut T, new: Option<T>) {
        if let Some(value) = new {
            *current = value;
        }
    }
}
