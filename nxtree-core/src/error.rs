//! Error types for nxtree-core.

use std::fmt;
use thiserror::Error;

/// Result type alias for node tree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a pending write tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer length disagrees with the declared shape.
    #[error("shape {shape:?} holds {expected} elements but buffer has {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// A sibling with the same name already exists.
    #[error("node {name}({class}) already exists")]
    AlreadyExists { name: String, class: String },

    /// Children can only be attached to groups.
    #[error("{0} is a dataset and cannot hold children")]
    NotAGroup(String),

    /// Only datasets carry values; the root and populated groups cannot.
    #[error("{0} cannot hold a value")]
    NotADataset(String),

    /// The node was already committed and its structure is frozen.
    #[error("{0} is already committed")]
    Committed(String),

    /// The handle does not belong to this tree.
    #[error("unknown node id {0}")]
    UnknownNode(usize),

    /// A buffer could not be converted to its declared element type.
    #[error("cannot linearize data: {0}")]
    LinearizeFailed(String),

    /// Node, attribute or link names must be non-empty and free of '/'.
    #[error("invalid name {0:?}")]
    InvalidName(String),
}

/// Cumulative, human-readable error text attached to a node.
///
/// Commit failures never abort sibling work; they are appended here and
/// concatenated into the parent's trail as the write unwinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorTrail {
    message: String,
}

impl ErrorTrail {
    /// Creates an empty trail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure that happened on the node `label` refers to.
    pub fn record(&mut self, err: impl fmt::Display, label: &str) {
        self.message.push_str(&format!("{err} in {label};"));
    }

    /// Appends a child's trail, separated by `;`.
    pub fn absorb(&mut self, child: &str) {
        if child.is_empty() {
            return;
        }
        self.message.push(';');
        self.message.push_str(child);
    }

    /// Returns the accumulated text, empty when nothing failed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.message
    }

    /// Returns true when no failure has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    /// Returns the accumulated text and clears the trail.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.message)
    }
}

impl fmt::Display for ErrorTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trail_record_and_absorb() {
        let mut trail = ErrorTrail::new();
        assert!(trail.is_empty());

        trail.record(Error::NotAGroup("x".into()), "x(SDS)");
        trail.absorb("");
        trail.absorb("child failed");

        assert_eq!(
            trail.as_str(),
            "x is a dataset and cannot hold children in x(SDS);;child failed"
        );
    }

    #[test]
    fn test_trail_take_clears() {
        let mut trail = ErrorTrail::new();
        trail.record("boom", "a(NXentry)");
        let text = trail.take();
        assert_eq!(text, "boom in a(NXentry);");
        assert!(trail.is_empty());
    }
}
