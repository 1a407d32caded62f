//! nxtree-core: In-memory model for deferred NeXus writes.
//!
//! This crate holds everything about a pending write tree that does not touch
//! a file: element types and array payloads, shape normalization, slab
//! planning, the link handle table, and the node arena itself.
//!

pub mod error;
pub mod link;
pub mod shape;
pub mod slab;
pub mod tree;
pub mod types;

pub use error::{Error, ErrorTrail, Result};
pub use link::{LinkState, LinkTable};
pub use shape::{element_count, normalize};
pub use slab::{Slab, SlabIter, SlabPlan, MIN_SLAB_BUDGET, SLAB_LEADING_THRESHOLD};
pub use tree::{Child, Node, NodeId, NodeKind, NodeTree, DATASET_CLASS, ENTRY_CLASS, ROOT_CLASS};
pub use types::{ArrayData, Attribute, ElementType, FileIdentity, Value};
