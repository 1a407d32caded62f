//! The pending write tree.
//!
//! Nodes live in an arena owned by [`NodeTree`]; callers hold copyable
//! [`NodeId`] handles. Ownership runs from parent to child only: the parent
//! link is a plain handle and link children refer to handle names, never to
//! nodes directly.

use crate::error::ErrorTrail;
use crate::types::{ArrayData, Attribute, ElementType, FileIdentity, Value};
use crate::{Error, Result};
use std::fmt;

/// Class tag that makes a child a dataset.
pub const DATASET_CLASS: &str = "SDS";

/// Class tag of the top-level entry groups.
pub const ENTRY_CLASS: &str = "NXentry";

/// Name and class of the file root pseudo-node.
pub const ROOT_CLASS: &str = "File";

/// Handle to a node inside one [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena index of this node.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node turns into on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The file itself; never opened or closed as a group.
    Root,
    Group,
    Dataset,
}

/// A child slot: an owned node or a named reference to a link handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    Node(NodeId),
    Link { name: String, handle: String },
}

/// A pending group or dataset.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: NodeKind,
    class_name: String,
    parent: Option<NodeId>,
    value: Option<Value>,
    attributes: Vec<Attribute>,
    attributes_flushed: usize,
    children: Vec<Child>,
    children_flushed: usize,
    committed: bool,
    relocated: bool,
    identity: Option<FileIdentity>,
    errors: ErrorTrail,
}

impl Node {
    fn new(name: &str, kind: NodeKind, class_name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            class_name: class_name.to_string(),
            parent,
            value: None,
            attributes: Vec::new(),
            attributes_flushed: 0,
            children: Vec::new(),
            children_flushed: 0,
            committed: false,
            relocated: false,
            identity: None,
            errors: ErrorTrail::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// `name(class)`, used to tag error messages.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}({})", self.name, self.class_name)
    }

    /// Pending value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Every attribute declared on this node, flushed or not.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Attributes not yet flushed to the file.
    #[must_use]
    pub fn pending_attributes(&self) -> &[Attribute] {
        &self.attributes[self.attributes_flushed..]
    }

    /// Every child slot in declaration order.
    #[must_use]
    pub fn children(&self) -> &[Child] {
        &self.children
    }

    /// Child slots not yet written.
    #[must_use]
    pub fn pending_children(&self) -> &[Child] {
        &self.children[self.children_flushed..]
    }

    /// Owned child nodes in declaration order.
    pub fn owned_children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().filter_map(|c| match c {
            Child::Node(id) => Some(*id),
            Child::Link { .. } => None,
        })
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// True when the node was committed away from its natural parent and
    /// still needs a link at its own position.
    #[must_use]
    pub fn is_relocated(&self) -> bool {
        self.relocated
    }

    /// On-disk identity, known once the node has been opened in the file.
    #[must_use]
    pub fn identity(&self) -> Option<&FileIdentity> {
        self.identity.as_ref()
    }

    /// Cumulative error text; empty when nothing failed.
    #[must_use]
    pub fn error_message(&self) -> &str {
        self.errors.as_str()
    }

    pub fn errors_mut(&mut self) -> &mut ErrorTrail {
        &mut self.errors
    }

    /// Removes the pending value so its buffer is released after writing.
    pub fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }

    pub fn mark_attributes_flushed(&mut self) {
        self.attributes_flushed = self.attributes.len();
    }

    /// Marks the first `upto` child slots as written.
    pub fn mark_children_flushed(&mut self, upto: usize) {
        self.children_flushed = upto.min(self.children.len());
    }

    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    pub fn set_relocated(&mut self, relocated: bool) {
        self.relocated = relocated;
    }

    pub fn set_identity(&mut self, identity: FileIdentity) {
        self.identity = Some(identity);
    }

    fn is_frozen(&self) -> bool {
        self.committed && self.kind != NodeKind::Root
    }

    fn has_child_named(&self, tree: &NodeTree, name: &str) -> bool {
        self.children.iter().any(|c| match c {
            Child::Node(id) => tree.nodes[id.0].name == name,
            Child::Link { name: link, .. } => link == name,
        })
    }
}

/// Arena of pending nodes rooted at the file pseudo-node.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// Creates a tree holding only the file root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(ROOT_CLASS, NodeKind::Root, ROOT_CLASS, None)],
        }
    }

    /// The file root.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node.
    ///
    /// # Errors
    /// Returns [`Error::UnknownNode`] for handles from another tree.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::UnknownNode(id.0))
    }

    /// Looks up a node mutably.
    ///
    /// # Errors
    /// Returns [`Error::UnknownNode`] for handles from another tree.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(Error::UnknownNode(id.0))
    }

    /// Creates a child under `parent`. Class [`DATASET_CLASS`] makes a
    /// dataset, anything else a group.
    ///
    /// # Errors
    /// Returns an error if `parent` is a dataset or committed, if `name` is
    /// invalid, or if a sibling already uses `name`.
    pub fn create_child(&mut self, parent: NodeId, name: &str, class_name: &str) -> Result<NodeId> {
        validate_name(name)?;
        let p = self.node(parent)?;
        if p.kind == NodeKind::Dataset {
            return Err(Error::NotAGroup(p.label()));
        }
        if p.is_frozen() {
            return Err(Error::Committed(p.label()));
        }
        if p.has_child_named(self, name) {
            return Err(Error::AlreadyExists {
                name: name.to_string(),
                class: class_name.to_string(),
            });
        }

        let kind = if class_name == DATASET_CLASS {
            NodeKind::Dataset
        } else {
            NodeKind::Group
        };
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(Node::new(name, kind, class_name, Some(parent)));
        self.nodes[parent.0].children.push(Child::Node(id));
        Ok(id)
    }

    /// Replaces the pending value of `id`. A group without owned children
    /// becomes a dataset that keeps its class tag.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `product(shape) != data.len()`,
    /// or an error if the node cannot hold a value.
    pub fn set_value(
        &mut self,
        id: NodeId,
        element_type: ElementType,
        shape: &[usize],
        data: ArrayData,
    ) -> Result<()> {
        let node = self.node(id)?;
        if node.kind == NodeKind::Root || node.owned_children().next().is_some() {
            return Err(Error::NotADataset(node.label()));
        }
        if node.is_frozen() {
            return Err(Error::Committed(node.label()));
        }
        let value = Value::new(element_type, shape, data)?;

        let node = &mut self.nodes[id.0];
        node.kind = NodeKind::Dataset;
        node.value = Some(value);
        Ok(())
    }

    /// Appends an attribute; every declared attribute is flushed in order.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] on a bad shape, or
    /// [`Error::Committed`] if the node was already written.
    pub fn add_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        element_type: ElementType,
        shape: &[usize],
        data: ArrayData,
    ) -> Result<()> {
        validate_name(name)?;
        let node = self.node(id)?;
        if node.is_frozen() {
            return Err(Error::Committed(node.label()));
        }
        let value = Value::new(element_type, shape, data)?;
        self.nodes[id.0].attributes.push(Attribute {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    /// Appends a link child named `name` that resolves through `handle`.
    ///
    /// # Errors
    /// Returns an error if `id` is a dataset or committed, or if a sibling
    /// already uses `name`.
    pub fn add_link_child(&mut self, id: NodeId, name: &str, handle: &str) -> Result<()> {
        validate_name(name)?;
        validate_name(handle)?;
        let node = self.node(id)?;
        if node.kind == NodeKind::Dataset {
            return Err(Error::NotAGroup(node.label()));
        }
        if node.is_frozen() {
            return Err(Error::Committed(node.label()));
        }
        if node.has_child_named(self, name) {
            return Err(Error::AlreadyExists {
                name: name.to_string(),
                class: "link".to_string(),
            });
        }
        self.nodes[id.0].children.push(Child::Link {
            name: name.to_string(),
            handle: handle.to_string(),
        });
        Ok(())
    }

    /// Owned child of `parent` called `name`.
    #[must_use]
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let p = self.nodes.get(parent.0)?;
        p.owned_children().find(|id| self.nodes[id.0].name == name)
    }

    /// Ancestor chain from the root down to `id`, both included.
    ///
    /// # Errors
    /// Returns [`Error::UnknownNode`] for handles from another tree.
    pub fn path(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.path_with(id, |_| None)
    }

    /// Like [`Self::path`], but `parent_override` may substitute the parent
    /// of any node on the way up.
    ///
    /// # Errors
    /// Returns [`Error::UnknownNode`] for handles from another tree.
    pub fn path_with<F>(&self, id: NodeId, parent_override: F) -> Result<Vec<NodeId>>
    where
        F: Fn(NodeId) -> Option<NodeId>,
    {
        let mut path = vec![id];
        let mut current = id;
        loop {
            let parent = match parent_override(current) {
                Some(p) => Some(p),
                None => self.node(current)?.parent,
            };
            let Some(parent) = parent else { break };
            if path.len() > self.nodes.len() {
                return Err(Error::UnknownNode(parent.0));
            }
            path.push(parent);
            current = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Slash-separated path of `id` from the file root.
    ///
    /// # Errors
    /// Returns [`Error::UnknownNode`] for handles from another tree.
    pub fn display_path(&self, id: NodeId) -> Result<String> {
        let path = self.path(id)?;
        let mut out = String::new();
        for node in &path[1..] {
            out.push('/');
            out.push_str(&self.nodes[node.0].name);
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}
