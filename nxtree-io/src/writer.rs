//! The file root callers build and commit trees through.

use crate::api::NexusApi;
use crate::config::WriterConfig;
use crate::engine::WriteEngine;
use crate::Result;
use log::{debug, info, warn};
use nxtree_core::{
    ArrayData, ElementType, LinkTable, Node, NodeId, NodeTree, ENTRY_CLASS,
};

/// Name of the top-level entry reused when appending to a file.
pub const ENTRY_NAME: &str = "entry";

/// A writable file and the pending tree that will be committed into it.
///
/// Nodes are created and filled without touching the file; [`Self::write`]
/// commits a node and everything pending below it.
pub struct NexusWriter<A: NexusApi> {
    api: A,
    tree: NodeTree,
    links: LinkTable,
    config: WriterConfig,
    slab_budget: i64,
    entry: Option<NodeId>,
    entry_count: usize,
}

#[cfg(feature = "hdf5")]
impl NexusWriter<crate::hdf5::Hdf5Api> {
    /// Opens `path` for writing, appending when the file already exists.
    ///
    /// # Errors
    /// Returns [`crate::Error::NoSuchFile`] for an empty path, or an error if the
    /// file cannot be opened or created.
    pub fn open<P: AsRef<std::path::Path>>(path: P, config: WriterConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(crate::Error::NoSuchFile(path.display().to_string()));
        }
        let api = crate::hdf5::Hdf5Api::open_or_create(path)?;
        Self::with_api(api, config)
    }
}

impl<A: NexusApi> NexusWriter<A> {
    /// Wraps an already opened file API.
    ///
    /// Counts the `NXentry` groups already at the file root and pre-registers
    /// an existing `entry` so new content is appended to it.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the root cannot
    /// be listed.
    pub fn with_api(mut api: A, config: WriterConfig) -> Result<Self> {
        let slab_budget = config.resolve_slab_budget()?;
        let listing = api.group_dir()?;
        let entry_count = listing
            .iter()
            .filter(|e| e.class_name == ENTRY_CLASS)
            .count();

        let mut tree = NodeTree::new();
        let entry = if listing
            .iter()
            .any(|e| e.name == ENTRY_NAME && e.class_name == ENTRY_CLASS)
        {
            Some(tree.create_child(tree.root(), ENTRY_NAME, ENTRY_CLASS)?)
        } else {
            None
        };
        debug!("opened file with {entry_count} entries, slab budget {slab_budget}");

        Ok(Self {
            api,
            tree,
            links: LinkTable::new(),
            config,
            slab_budget,
            entry,
            entry_count,
        })
    }

    /// The file root pseudo-node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Number of `NXentry` groups at the file root, pre-existing ones included.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Effective slab budget in elements.
    #[must_use]
    pub fn slab_budget(&self) -> i64 {
        self.slab_budget
    }

    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Looks up a node.
    ///
    /// # Errors
    /// Returns an error for handles that do not belong to this writer.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        Ok(self.tree.node(id)?)
    }

    /// The pending tree.
    #[must_use]
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// The underlying file API.
    #[must_use]
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Creates a child node. Class `"SDS"` makes a dataset; anything else a
    /// group.
    ///
    /// Asking for the `entry`/`NXentry` singleton at the root returns the
    /// existing node when there is one.
    ///
    /// # Errors
    /// Returns [`nxtree_core::Error::AlreadyExists`] for a conflicting sibling
    /// name, or an error if `parent` cannot hold children.
    pub fn create_child(&mut self, parent: NodeId, name: &str, class_name: &str) -> Result<NodeId> {
        let at_root = parent == self.tree.root();
        if at_root && name == ENTRY_NAME && class_name == ENTRY_CLASS {
            if let Some(entry) = self.entry {
                return Ok(entry);
            }
        }
        let id = self.tree.create_child(parent, name, class_name)?;
        if at_root && class_name == ENTRY_CLASS {
            self.entry_count += 1;
            if name == ENTRY_NAME {
                self.entry = Some(id);
            }
        }
        Ok(id)
    }

    /// Replaces the pending value of `node`.
    ///
    /// # Errors
    /// Returns [`nxtree_core::Error::ShapeMismatch`] if the shape does not
    /// account for every element, or an error if the node cannot hold a value.
    pub fn set_value(
        &mut self,
        node: NodeId,
        element_type: ElementType,
        shape: &[usize],
        data: impl Into<ArrayData>,
    ) -> Result<()> {
        Ok(self
            .tree
            .set_value(node, element_type, shape, data.into())?)
    }

    /// Appends an attribute to `node`.
    ///
    /// # Errors
    /// Returns [`nxtree_core::Error::ShapeMismatch`] on a bad shape, or an
    /// error if the node was already committed.
    pub fn add_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        element_type: ElementType,
        shape: &[usize],
        data: impl Into<ArrayData>,
    ) -> Result<()> {
        Ok(self
            .tree
            .add_attribute(node, name, element_type, shape, data.into())?)
    }

    /// Convenience for a one-dimensional character attribute.
    ///
    /// # Errors
    /// As [`Self::add_attribute`].
    pub fn add_text_attribute(&mut self, node: NodeId, name: &str, text: &str) -> Result<()> {
        self.add_attribute(node, name, ElementType::Char, &[text.len()], text)
    }

    /// Adds a child of `node` named `link_name` that refers to `target`.
    ///
    /// `target` may be `node` itself and need not be committed yet.
    ///
    /// # Errors
    /// Returns an error if `node` cannot hold children or the name is taken.
    pub fn add_link(&mut self, node: NodeId, link_name: &str, target: NodeId) -> Result<()> {
        let target_node = self.tree.node(target)?;
        let handle = node_handle(target);
        match target_node.identity() {
            Some(identity) => {
                let identity = identity.clone();
                self.links.register_resolved(&handle, target, identity);
            }
            None => self.links.register_pending(&handle, target),
        }
        Ok(self.tree.add_link_child(node, link_name, &handle)?)
    }

    /// Adds a child of `node` named `link_name` that resolves through
    /// `handle`, registered by [`Self::set_link_handle`] now or later.
    ///
    /// A handle nobody registers is reported as
    /// [`crate::Error::LinkNotPaired`] when `node` is written.
    ///
    /// # Errors
    /// Returns an error if `node` cannot hold children or the name is taken.
    pub fn add_link_to_handle(&mut self, node: NodeId, link_name: &str, handle: &str) -> Result<()> {
        Ok(self.tree.add_link_child(node, link_name, handle)?)
    }

    /// Registers `node` itself as the target of `handle`.
    ///
    /// # Errors
    /// Returns an error for unknown nodes.
    pub fn set_link_handle(&mut self, node: NodeId, handle: &str) -> Result<()> {
        let target = self.tree.node(node)?;
        match target.identity() {
            Some(identity) => {
                let identity = identity.clone();
                self.links.register_resolved(handle, node, identity);
            }
            None => self.links.register_pending(handle, node),
        }
        Ok(())
    }

    /// Commits `node` and everything pending below it.
    ///
    /// Failures inside the subtree do not abort the write; they are
    /// collected in [`Self::error_message`] of `node`.
    ///
    /// # Errors
    /// Returns an error only for unknown nodes.
    pub fn write(&mut self, node: NodeId) -> Result<()> {
        let before = self.tree.node(node)?.error_message().len();
        WriteEngine::new(
            &mut self.api,
            &mut self.tree,
            &mut self.links,
            &self.config,
            self.slab_budget,
        )
        .run(node)?;

        let target = self.tree.node(node)?;
        if target.error_message().len() > before {
            warn!("write of {} finished with errors", target.label());
        } else {
            info!("wrote {}", target.label());
        }
        Ok(())
    }

    /// Cumulative error text of `node`; empty when nothing failed.
    ///
    /// # Errors
    /// Returns an error for unknown nodes.
    pub fn error_message(&self, node: NodeId) -> Result<&str> {
        Ok(self.tree.node(node)?.error_message())
    }

    /// Returns the error text of `node` and clears it.
    ///
    /// # Errors
    /// Returns an error for unknown nodes.
    pub fn take_error_message(&mut self, node: NodeId) -> Result<String> {
        Ok(self.tree.node_mut(node)?.errors_mut().take())
    }

    /// Flushes and releases the file, even after earlier errors. Returns the
    /// closed file API.
    ///
    /// # Errors
    /// Returns the first error from flushing or closing.
    pub fn close(mut self) -> Result<A> {
        let flushed = self.api.flush();
        let closed = self.api.close();
        flushed?;
        closed?;
        debug!("closed file");
        Ok(self.api)
    }
}

/// Handle under which [`NexusWriter::add_link`] registers a target node.
fn node_handle(target: NodeId) -> String {
    format!("node:{}", target.index())
}
