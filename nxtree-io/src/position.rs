//! Keeps the file API's open-context chain in step with the node tree.

use crate::api::NexusApi;
use crate::{Error, Result};
use log::debug;
use nxtree_core::{ElementType, FileIdentity, Node, NodeId, NodeKind, Value, DATASET_CLASS};

/// How a dataset is laid out when it has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataLayout {
    pub element_type: ElementType,
    pub shape: Vec<usize>,
    pub compression: Option<u8>,
}

impl DataLayout {
    /// Layout of a dataset declared without a value.
    pub fn placeholder() -> Self {
        Self {
            element_type: ElementType::UInt8,
            shape: vec![0],
            compression: None,
        }
    }
}

struct Frame {
    node: NodeId,
    kind: NodeKind,
    label: String,
}

/// Chain of contexts currently open in the file, root first.
///
/// The root frame is permanent; it stands for the file itself and is never
/// closed.
pub(crate) struct PositionStack {
    frames: Vec<Frame>,
}

impl PositionStack {
    pub fn new(root: NodeId) -> Self {
        Self {
            frames: vec![Frame {
                node: root,
                kind: NodeKind::Root,
                label: "/".to_string(),
            }],
        }
    }

    /// Number of open contexts, root included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> NodeId {
        self.frames[self.frames.len() - 1].node
    }

    /// Length of the longest common prefix of the open chain and `path`.
    pub fn common_prefix(&self, path: &[NodeId]) -> usize {
        self.frames
            .iter()
            .zip(path)
            .take_while(|(frame, id)| frame.node == **id)
            .count()
    }

    /// Closes every open context beyond the common prefix with `path`.
    ///
    /// Frames are popped even when their close call fails, so the chain
    /// always ends at the common prefix.
    ///
    /// # Errors
    /// Returns [`Error::FileOutOfKilter`] listing every close that failed.
    pub fn align<A: NexusApi>(&mut self, api: &mut A, path: &[NodeId]) -> Result<()> {
        let keep = self.common_prefix(path).max(1);
        let mut failures = Vec::new();
        while self.frames.len() > keep {
            if let Err(err) = self.leave(api) {
                failures.push(err.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::FileOutOfKilter(failures.join(";")))
        }
    }

    /// Opens `node` inside the innermost context, creating it first when the
    /// file does not have it yet, and pushes it.
    ///
    /// # Errors
    /// Returns an error if the node cannot be created or opened. A node that
    /// was opened stays pushed even if a later step fails.
    pub fn enter<A: NexusApi>(
        &mut self,
        api: &mut A,
        id: NodeId,
        node: &Node,
        layout: Option<&DataLayout>,
    ) -> Result<FileIdentity> {
        let name = node.name();
        let exists = api.group_dir()?.iter().any(|entry| entry.name == name);
        let mut tag_class = false;

        match node.kind() {
            NodeKind::Root => {
                return Err(Error::FileOutOfKilter(format!(
                    "root cannot be opened below {}",
                    self.frames[self.frames.len() - 1].label
                )))
            }
            NodeKind::Group => {
                if !exists {
                    debug!("make group {}", node.label());
                    api.make_group(name, node.class_name())?;
                }
                api.open_group(name, node.class_name())?;
            }
            NodeKind::Dataset => {
                if exists {
                    api.open_data(name)?;
                } else {
                    let placeholder;
                    let layout = match layout {
                        Some(layout) => layout,
                        None => {
                            placeholder = DataLayout::placeholder();
                            &placeholder
                        }
                    };
                    debug!(
                        "make data {} {} {:?}",
                        node.label(),
                        layout.element_type,
                        layout.shape
                    );
                    api.make_data(
                        name,
                        layout.element_type,
                        &layout.shape,
                        layout.compression,
                    )?;
                    api.open_data(name)?;
                    tag_class = node.class_name() != DATASET_CLASS;
                }
            }
        }

        self.frames.push(Frame {
            node: id,
            kind: node.kind(),
            label: node.label(),
        });
        if tag_class {
            api.put_attr("NX_class", &Value::text(node.class_name()))?;
        }
        api.current_id()
    }

    /// Closes and pops the innermost context. The root frame stays.
    ///
    /// # Errors
    /// Returns [`Error::FileOutOfKilter`] if the close call fails; the frame
    /// is popped regardless.
    pub fn leave<A: NexusApi>(&mut self, api: &mut A) -> Result<()> {
        if self.frames.len() <= 1 {
            return Ok(());
        }
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        debug!("close {}", frame.label);
        let closed = match frame.kind {
            NodeKind::Dataset => api.close_data(),
            NodeKind::Group => api.close_group(),
            NodeKind::Root => Ok(()),
        };
        closed.map_err(|err| Error::FileOutOfKilter(format!("cannot close {}: {err}", frame.label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryApi;
    use nxtree_core::{NodeTree, ENTRY_CLASS};

    #[test]
    fn test_enter_creates_then_reopens() {
        let mut tree = NodeTree::new();
        let entry = tree.create_child(tree.root(), "entry", ENTRY_CLASS).unwrap();
        let mut api = MemoryApi::new();
        let mut stack = PositionStack::new(tree.root());

        let id = stack
            .enter(&mut api, entry, tree.node(entry).unwrap(), None)
            .unwrap();
        assert_eq!(id.path, "/entry");
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top(), entry);

        stack.align(&mut api, &[tree.root()]).unwrap();
        assert_eq!(stack.depth(), 1);
        assert_eq!(api.open_depth(), 0);

        stack
            .enter(&mut api, entry, tree.node(entry).unwrap(), None)
            .unwrap();
        assert_eq!(api.object("/").unwrap().member_names().count(), 1);
    }

    #[test]
    fn test_align_keeps_common_prefix() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let a = tree.create_child(root, "a", ENTRY_CLASS).unwrap();
        let b = tree.create_child(a, "b", "NXdata").unwrap();
        let c = tree.create_child(a, "c", "NXdata").unwrap();
        let mut api = MemoryApi::new();
        let mut stack = PositionStack::new(root);

        for id in [a, b] {
            stack.enter(&mut api, id, tree.node(id).unwrap(), None).unwrap();
        }
        assert_eq!(stack.common_prefix(&[root, a, c]), 2);
        stack.align(&mut api, &[root, a, c]).unwrap();
        assert_eq!(stack.top(), a);
        assert_eq!(api.open_depth(), 1);
    }

    #[test]
    fn test_promoted_dataset_keeps_class() {
        let mut tree = NodeTree::new();
        let det = tree.create_child(tree.root(), "det", "NXdetector").unwrap();
        tree.set_value(det, ElementType::Int16, &[2], vec![1i16, 2].into())
            .unwrap();
        let layout = DataLayout {
            element_type: ElementType::Int16,
            shape: vec![2],
            compression: None,
        };
        let mut api = MemoryApi::new();
        let mut stack = PositionStack::new(tree.root());
        stack
            .enter(&mut api, det, tree.node(det).unwrap(), Some(&layout))
            .unwrap();

        let object = api.object("/det").unwrap();
        assert_eq!(object.kind(), NodeKind::Dataset);
        assert_eq!(
            object.attribute("NX_class").and_then(Value::as_text),
            Some("NXdetector")
        );
    }
}
