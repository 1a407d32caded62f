//! Recursive commit of a node tree through a [`NexusApi`].
//!
//! One [`WriteEngine`] lives for a single `write` call. It owns the
//! [`PositionStack`] for that call and borrows the tree, the link table and
//! the file API from the writer. Failures below the target are recorded on
//! the failing node and concatenated into its parent's trail as the
//! recursion unwinds; only failures to position a node skip its subtree.

use crate::api::NexusApi;
use crate::config::WriterConfig;
use crate::position::{DataLayout, PositionStack};
use crate::slab_writer::write_array;
use crate::{Error, Result};
use log::{debug, warn};
use nxtree_core::{
    element_count, normalize, Child, FileIdentity, LinkState, LinkTable, NodeId, NodeKind,
    NodeTree, Value,
};
use std::collections::HashMap;

pub(crate) struct WriteEngine<'w, A: NexusApi> {
    api: &'w mut A,
    tree: &'w mut NodeTree,
    links: &'w mut LinkTable,
    config: &'w WriterConfig,
    slab_budget: i64,
    stack: PositionStack,
    /// Temporary parents of link targets committed out of order.
    overrides: HashMap<NodeId, NodeId>,
}

impl<'w, A: NexusApi> WriteEngine<'w, A> {
    pub fn new(
        api: &'w mut A,
        tree: &'w mut NodeTree,
        links: &'w mut LinkTable,
        config: &'w WriterConfig,
        slab_budget: i64,
    ) -> Self {
        let stack = PositionStack::new(tree.root());
        Self {
            api,
            tree,
            links,
            config,
            slab_budget,
            stack,
            overrides: HashMap::new(),
        }
    }

    /// Commits `id` and its pending subtree, then closes every context the
    /// commit left open.
    ///
    /// # Errors
    /// Returns an error only if `id` is not part of the tree; everything
    /// else is recorded on the nodes.
    pub fn run(mut self, id: NodeId) -> Result<()> {
        self.tree.node(id)?;
        let committed = self.commit(id);
        let root = self.tree.root();
        let aligned = self.stack.align(self.api, &[root]);
        if let Err(err) = committed {
            self.record(id, &err)?;
        }
        if let Err(err) = aligned {
            self.record(id, &err)?;
        }
        Ok(())
    }

    fn commit(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.node(id)?;
        let kind = node.kind();
        if kind == NodeKind::Root {
            return self.commit_root(id);
        }
        if node.is_committed() {
            if node.is_relocated() && !self.overrides.contains_key(&id) {
                return self.link_in_place(id);
            }
            debug!("{} already committed", node.label());
            return Ok(());
        }

        let path = self.path(id)?;
        let identity = match self.open_path(id, &path) {
            Ok(identity) => identity,
            Err(err) => {
                self.record(id, &err)?;
                return Ok(());
            }
        };
        self.tree.node_mut(id)?.set_identity(identity);

        self.flush_attributes(id)?;
        if kind == NodeKind::Dataset {
            self.write_value(id)?;
        } else {
            self.commit_children(id)?;
        }

        // Nested commits may have moved the cursor; make sure `id` is the
        // context being closed.
        if self.stack.top() != id {
            if let Err(err) = self.ensure_open(id, &path) {
                self.record(id, &err)?;
            }
        }
        if self.stack.top() == id {
            if let Err(err) = self.stack.leave(self.api) {
                self.record(id, &err)?;
            }
        }
        self.tree.node_mut(id)?.mark_committed();
        Ok(())
    }

    /// The root is never opened or closed; its attributes are file-level
    /// and its children are written from the flush cursor onwards.
    fn commit_root(&mut self, root: NodeId) -> Result<()> {
        if let Err(err) = self.stack.align(self.api, &[root]) {
            self.record(root, &err)?;
        }
        self.flush_attributes(root)?;
        self.commit_children(root)?;
        self.tree.node_mut(root)?.mark_committed();
        Ok(())
    }

    fn commit_children(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.node(id)?;
        let mut index = node.children().len() - node.pending_children().len();
        while let Some(child) = self.tree.node(id)?.children().get(index).cloned() {
            match child {
                Child::Node(child) => {
                    let before = self.tree.node(child)?.error_message().len();
                    self.commit(child)?;
                    self.absorb(id, child, before)?;
                }
                Child::Link { name, handle } => self.write_link(id, &name, &handle)?,
            }
            index += 1;
            self.tree.node_mut(id)?.mark_children_flushed(index);
        }
        Ok(())
    }

    fn flush_attributes(&mut self, id: NodeId) -> Result<()> {
        let attributes = self.tree.node(id)?.pending_attributes().to_vec();
        for attribute in attributes {
            let value = &attribute.value;
            let flushed = value
                .data
                .clone()
                .linearize(value.element_type)
                .map_err(Error::from)
                .and_then(|data| {
                    let value = Value {
                        element_type: value.element_type,
                        shape: value.shape.clone(),
                        data,
                    };
                    self.api.put_attr(&attribute.name, &value)
                });
            if let Err(err) = flushed {
                self.record(id, &err)?;
            }
        }
        self.tree.node_mut(id)?.mark_attributes_flushed();
        Ok(())
    }

    fn write_value(&mut self, id: NodeId) -> Result<()> {
        let layout = self.layout(id)?;
        let Some(value) = self.tree.node_mut(id)?.take_value() else {
            debug!("{} left as placeholder", self.tree.node(id)?.label());
            return Ok(());
        };
        let Some(layout) = layout else {
            return Ok(());
        };

        let name = self.tree.display_path(id)?;
        let written = value
            .data
            .linearize(value.element_type)
            .map_err(Error::from)
            .and_then(|data| {
                write_array(
                    &mut *self.api,
                    &name,
                    &data,
                    layout.element_type,
                    &layout.shape,
                    self.slab_budget,
                )
            });
        if let Err(err) = written {
            self.record(id, &err)?;
        }
        Ok(())
    }

    fn write_link(&mut self, id: NodeId, name: &str, handle: &str) -> Result<()> {
        let target = match self.links.lookup(handle) {
            LinkState::Resolved(identity) => {
                let identity = identity.clone();
                return self.make_link(id, name, &identity);
            }
            LinkState::Unknown => {
                return self.record(id, &Error::LinkNotPaired(handle.to_string()));
            }
            LinkState::Pending(target) => target,
        };

        // A pending ancestor cannot be hosted below itself.
        if self.path(id)?.contains(&target) {
            return self.record(
                id,
                &Error::LinkNotPaired(format!("{handle} (target encloses the link)")),
            );
        }

        // Commit the target next to `id`, then come back and link to it.
        let host = self.parent_of(id)?.unwrap_or_else(|| self.tree.root());
        let natural = self.tree.node(target)?.parent();
        debug!(
            "committing link target {} out of order under {}",
            self.tree.node(target)?.label(),
            self.tree.node(host)?.label()
        );
        self.overrides.insert(target, host);
        let before = self.tree.node(target)?.error_message().len();
        let nested = self.commit(target);
        self.overrides.remove(&target);
        if let Err(err) = nested {
            self.record(target, &err)?;
        }
        self.absorb(id, target, before)?;

        let node = self.tree.node_mut(target)?;
        if node.is_committed() && natural != Some(host) {
            node.set_relocated(true);
        }

        match self.links.lookup(handle) {
            LinkState::Resolved(identity) => {
                let identity = identity.clone();
                self.make_link(id, name, &identity)
            }
            _ => self.record(
                id,
                &Error::LinkNotPaired(format!("{handle} (target was not written)")),
            ),
        }
    }

    /// Emits the link a relocated node owes its natural position.
    fn link_in_place(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.node(id)?;
        let name = node.name().to_string();
        let identity = node.identity().cloned();
        let Some(parent) = node.parent() else {
            return Ok(());
        };
        let Some(identity) = identity else {
            return self.record(id, &Error::LinkNotPaired(name));
        };

        let path = self.path(parent)?;
        if let Err(err) = self.ensure_open(id, &path) {
            return self.record(id, &err);
        }
        debug!("link {name} -> {identity} at natural position");
        if let Err(err) = self.api.make_link(&name, &identity) {
            self.record(id, &err)?;
        }
        self.tree.node_mut(id)?.set_relocated(false);
        Ok(())
    }

    /// Makes link `name` inside `id`, reopening `id` first if needed.
    fn make_link(&mut self, id: NodeId, name: &str, target: &FileIdentity) -> Result<()> {
        let path = self.path(id)?;
        if let Err(err) = self.ensure_open(id, &path) {
            return self.record(id, &err);
        }
        debug!("link {name} -> {target}");
        if let Err(err) = self.api.make_link(name, target) {
            self.record(id, &err)?;
        }
        Ok(())
    }

    /// Opens `path` unless it already is the open chain.
    fn ensure_open(&mut self, owner: NodeId, path: &[NodeId]) -> Result<()> {
        if self.stack.depth() == path.len() && self.stack.common_prefix(path) == path.len() {
            return Ok(());
        }
        self.open_path(owner, path).map(|_| ())
    }

    /// Aligns the open chain with `path` and enters what is missing. Close
    /// failures while aligning are recorded on `owner` and do not stop the
    /// walk.
    ///
    /// Every node entered on the way gets its identity and has its pending
    /// handles resolved, so links to enclosing groups pair up even before
    /// those groups are committed.
    fn open_path(&mut self, owner: NodeId, path: &[NodeId]) -> Result<FileIdentity> {
        if let Err(err) = self.stack.align(self.api, path) {
            self.record(owner, &err)?;
        }
        for &id in &path[self.stack.depth().min(path.len())..] {
            let layout = self.layout(id)?;
            let node = self.tree.node(id)?;
            let identity = self.stack.enter(self.api, id, node, layout.as_ref())?;
            let resolved = self.links.resolve_target(id, &identity);
            if resolved > 0 {
                debug!("resolved {resolved} link handle(s) to {identity}");
            }
            let node = self.tree.node_mut(id)?;
            if node.identity().is_none() {
                node.set_identity(identity);
            }
        }
        self.api.current_id()
    }

    /// Creation layout for datasets; `None` for groups.
    fn layout(&self, id: NodeId) -> Result<Option<DataLayout>> {
        let node = self.tree.node(id)?;
        if node.kind() != NodeKind::Dataset {
            return Ok(None);
        }
        let Some(value) = node.value() else {
            return Ok(Some(DataLayout::placeholder()));
        };
        let normalized = normalize(&value.shape);
        let shape = if element_count(&normalized) == value.data.len() {
            normalized
        } else {
            value.shape.clone()
        };
        Ok(Some(DataLayout {
            element_type: value.element_type,
            compression: self.config.compression_for(value.element_type, &shape),
            shape,
        }))
    }

    fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>> {
        match self.overrides.get(&id) {
            Some(parent) => Ok(Some(*parent)),
            None => Ok(self.tree.node(id)?.parent()),
        }
    }

    fn path(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .tree
            .path_with(id, |n| self.overrides.get(&n).copied())?)
    }

    /// Appends what `child` recorded since `before` to `parent`'s trail.
    fn absorb(&mut self, parent: NodeId, child: NodeId, before: usize) -> Result<()> {
        if parent == child {
            return Ok(());
        }
        let message = self.tree.node(child)?.error_message();
        let added = message.get(before..).unwrap_or_default().to_string();
        self.tree.node_mut(parent)?.errors_mut().absorb(&added);
        Ok(())
    }

    fn record(&mut self, id: NodeId, err: &Error) -> Result<()> {
        let node = self.tree.node_mut(id)?;
        let label = node.label();
        warn!("{err} in {label}");
        node.errors_mut().record(err, &label);
        Ok(())
    }
}
