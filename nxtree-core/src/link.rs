//! Link handle registry.

use crate::tree::NodeId;
use crate::types::FileIdentity;
use std::collections::HashMap;

/// Resolution state of a link handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState<'a> {
    /// The target has been committed; its on-disk identity is known.
    Resolved(&'a FileIdentity),
    /// The target exists in the tree but has not been committed yet.
    Pending(NodeId),
    /// Nobody registered this handle.
    Unknown,
}

#[derive(Debug, Clone)]
enum Entry {
    Pending(NodeId),
    Resolved {
        target: NodeId,
        identity: FileIdentity,
    },
}

/// Maps link handle names to their target, pending or resolved.
///
/// Keys are stable handle names rather than node references, so resolution
/// does not depend on the order in which nodes are committed.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    entries: HashMap<String, Entry>,
}

impl LinkTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `handle` as pointing at `target`. A later registration of
    /// the same handle replaces the earlier one.
    pub fn register_pending(&mut self, handle: &str, target: NodeId) {
        self.entries
            .insert(handle.to_string(), Entry::Pending(target));
    }

    /// Declares `handle` as pointing at an already committed `target`.
    pub fn register_resolved(&mut self, handle: &str, target: NodeId, identity: FileIdentity) {
        self.entries
            .insert(handle.to_string(), Entry::Resolved { target, identity });
    }

    /// Resolves `handle` to `identity`. Returns false for unknown handles.
    pub fn resolve(&mut self, handle: &str, identity: FileIdentity) -> bool {
        let Some(entry) = self.entries.get_mut(handle) else {
            return false;
        };
        let target = match entry {
            Entry::Pending(target) | Entry::Resolved { target, .. } => *target,
        };
        *entry = Entry::Resolved { target, identity };
        true
    }

    /// Resolves every handle still pending on `target`. Returns how many
    /// handles were resolved.
    pub fn resolve_target(&mut self, target: NodeId, identity: &FileIdentity) -> usize {
        let mut resolved = 0;
        for entry in self.entries.values_mut() {
            if matches!(entry, Entry::Pending(t) if *t == target) {
                *entry = Entry::Resolved {
                    target,
                    identity: identity.clone(),
                };
                resolved += 1;
            }
        }
        resolved
    }

    /// Looks up the state of `handle`.
    #[must_use]
    pub fn lookup(&self, handle: &str) -> LinkState<'_> {
        match self.entries.get(handle) {
            Some(Entry::Pending(target)) => LinkState::Pending(*target),
            Some(Entry::Resolved { identity, .. }) => LinkState::Resolved(identity),
            None => LinkState::Unknown,
        }
    }
}
