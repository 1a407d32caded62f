//! In-memory implementation of [`NexusApi`].
//!
//! Follows the same single-cursor rules as the HDF5 backend and records
//! every call, which makes it suitable for dry runs and for tests that need
//! to inspect call counts or inject failures.

use crate::api::{DirEntry, NexusApi};
use crate::{Error, Result};
use nxtree_core::{
    element_count, ArrayData, Attribute, ElementType, FileIdentity, NodeKind, Value,
    DATASET_CLASS,
};
use std::collections::{HashMap, HashSet};

/// File API operations, used for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    MakeGroup,
    OpenGroup,
    CloseGroup,
    MakeData,
    OpenData,
    CloseData,
    PutAttr,
    PutData,
    PutSlab,
    MakeLink,
    Flush,
}

/// A group or dataset stored by [`MemoryApi`].
#[derive(Debug, Clone)]
pub struct MemObject {
    path: String,
    kind: NodeKind,
    class_name: String,
    attributes: Vec<Attribute>,
    members: Vec<(String, usize)>,
    element_type: Option<ElementType>,
    shape: Vec<usize>,
    compression: Option<u8>,
    data: Option<ArrayData>,
}

impl MemObject {
    fn new(path: String, kind: NodeKind, class_name: &str) -> Self {
        Self {
            path,
            kind,
            class_name: class_name.to_string(),
            attributes: Vec::new(),
            members: Vec::new(),
            element_type: None,
            shape: Vec::new(),
            compression: None,
            data: None,
        }
    }

    /// Path the object was created at.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
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
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Current value of attribute `name`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// Member names in creation order, links included.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn element_type(&self) -> Option<ElementType> {
        self.element_type
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn compression(&self) -> Option<u8> {
        self.compression
    }

    /// Stored data; `None` until something was written.
    #[must_use]
    pub fn data(&self) -> Option<&ArrayData> {
        self.data.as_ref()
    }
}

/// A hierarchical file held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryApi {
    objects: Vec<MemObject>,
    groups: Vec<usize>,
    dataset: Option<usize>,
    faults: HashSet<(Op, String)>,
    calls: HashMap<Op, usize>,
    closed: bool,
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryApi {
    /// Creates an empty file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: vec![MemObject::new("/".to_string(), NodeKind::Root, "NXroot")],
            groups: Vec::new(),
            dataset: None,
            faults: HashSet::new(),
            calls: HashMap::new(),
            closed: false,
        }
    }

    /// Makes every `op` on an object called `name` fail.
    ///
    /// Names are the created or opened member for make/open calls, the
    /// context being closed or written for close/put calls, and the
    /// attribute name for [`Op::PutAttr`].
    #[must_use]
    pub fn with_fault(mut self, op: Op, name: &str) -> Self {
        self.faults.insert((op, name.to_string()));
        self
    }

    /// Number of times `op` was called, failed calls included.
    #[must_use]
    pub fn calls(&self, op: Op) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    /// Looks up an object by slash-separated path, following links.
    #[must_use]
    pub fn object(&self, path: &str) -> Option<&MemObject> {
        self.resolve(path).map(|index| &self.objects[index])
    }

    /// Number of contexts currently open below the root.
    #[must_use]
    pub fn open_depth(&self) -> usize {
        self.groups.len() + usize::from(self.dataset.is_some())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn resolve(&self, path: &str) -> Option<usize> {
        let mut current = 0;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = self.objects[current]
                .members
                .iter()
                .find(|(name, _)| name == part)
                .map(|(_, index)| *index)?;
        }
        Some(current)
    }

    fn current_group(&self) -> usize {
        self.groups.last().copied().unwrap_or(0)
    }

    fn basename(&self, index: usize) -> &str {
        let path = &self.objects[index].path;
        path.rsplit('/').next().unwrap_or(path)
    }

    fn check(&mut self, op: Op, name: &str) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.closed {
            return Err(Error::Closed);
        }
        if self.faults.contains(&(op, name.to_string())) {
            return Err(Error::Backend(format!("injected {op:?} failure on {name}")));
        }
        Ok(())
    }

    fn require_no_dataset(&self) -> Result<()> {
        match self.dataset {
            Some(index) => Err(Error::Backend(format!(
                "dataset {} is still open",
                self.objects[index].path
            ))),
            None => Ok(()),
        }
    }

    fn open_dataset(&self) -> Result<usize> {
        self.dataset
            .ok_or_else(|| Error::Backend("no dataset is open".to_string()))
    }

    fn member(&self, group: usize, name: &str) -> Option<usize> {
        self.objects[group]
            .members
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, index)| *index)
    }

    fn insert(&mut self, name: &str, object: MemObject) -> Result<()> {
        let group = self.current_group();
        if self.member(group, name).is_some() {
            return Err(Error::Backend(format!(
                "{name} already exists in {}",
                self.objects[group].path
            )));
        }
        let index = self.objects.len();
        self.objects.push(object);
        self.objects[group].members.push((name.to_string(), index));
        Ok(())
    }

    fn child_path(&self, name: &str) -> String {
        let parent = &self.objects[self.current_group()].path;
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

macro_rules! scatter_same {
    ($dst:expr, $src:expr, $positions:expr, $($var:ident),+) => {
        match ($dst, $src) {
            $(
                (ArrayData::$var(d), ArrayData::$var(s)) => {
                    for (&p, x) in $positions.iter().zip(s.iter()) {
                        d[p] = *x;
                    }
                    true
                }
            )+
            _ => false,
        }
    };
}

/// Row-major offsets of every element of the block (`start`, `count`).
fn block_offsets(shape: &[usize], start: &[usize], count: &[usize]) -> Vec<usize> {
    let rank = shape.len();
    let mut strides = vec![1usize; rank];
    for d in (0..rank.saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    let total = element_count(count);
    let mut offsets = Vec::with_capacity(total);
    let mut cursor = vec![0usize; rank];
    for _ in 0..total {
        offsets.push(
            (0..rank)
                .map(|d| (start[d] + cursor[d]) * strides[d])
                .sum(),
        );
        for d in (0..rank).rev() {
            cursor[d] += 1;
            if cursor[d] < count[d] {
                break;
            }
            cursor[d] = 0;
        }
    }
    offsets
}

impl NexusApi for MemoryApi {
    fn group_dir(&mut self) -> Result<Vec<DirEntry>> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.require_no_dataset()?;
        let group = &self.objects[self.current_group()];
        Ok(group
            .members
            .iter()
            .map(|(name, index)| {
                let object = &self.objects[*index];
                let class = match object.kind {
                    NodeKind::Dataset => DATASET_CLASS,
                    _ => object.class_name.as_str(),
                };
                DirEntry::new(name.as_str(), class)
            })
            .collect())
    }

    fn make_group(&mut self, name: &str, class_name: &str) -> Result<()> {
        self.check(Op::MakeGroup, name)?;
        self.require_no_dataset()?;
        let object = MemObject::new(self.child_path(name), NodeKind::Group, class_name);
        self.insert(name, object)
    }

    fn open_group(&mut self, name: &str, _class_name: &str) -> Result<()> {
        self.check(Op::OpenGroup, name)?;
        self.require_no_dataset()?;
        let group = self.current_group();
        match self.member(group, name) {
            Some(index) if self.objects[index].kind == NodeKind::Group => {
                self.groups.push(index);
                Ok(())
            }
            Some(_) => Err(Error::Backend(format!("{name} is not a group"))),
            None => Err(Error::Backend(format!("no group {name}"))),
        }
    }

    fn close_group(&mut self) -> Result<()> {
        self.require_no_dataset()?;
        let Some(index) = self.groups.pop() else {
            return Err(Error::Backend("no group is open".to_string()));
        };
        let name = self.basename(index).to_string();
        self.check(Op::CloseGroup, &name)
    }

    fn make_data(
        &mut self,
        name: &str,
        element_type: ElementType,
        shape: &[usize],
        compression: Option<u8>,
    ) -> Result<()> {
        self.check(Op::MakeData, name)?;
        self.require_no_dataset()?;
        let mut object = MemObject::new(self.child_path(name), NodeKind::Dataset, DATASET_CLASS);
        object.element_type = Some(element_type);
        object.shape = shape.to_vec();
        object.compression = compression;
        self.insert(name, object)
    }

    fn open_data(&mut self, name: &str) -> Result<()> {
        self.check(Op::OpenData, name)?;
        self.require_no_dataset()?;
        let group = self.current_group();
        match self.member(group, name) {
            Some(index) if self.objects[index].kind == NodeKind::Dataset => {
                self.dataset = Some(index);
                Ok(())
            }
            Some(_) => Err(Error::Backend(format!("{name} is not a dataset"))),
            None => Err(Error::Backend(format!("no dataset {name}"))),
        }
    }

    fn close_data(&mut self) -> Result<()> {
        let index = self.open_dataset()?;
        self.dataset = None;
        let name = self.basename(index).to_string();
        self.check(Op::CloseData, &name)
    }

    fn put_attr(&mut self, name: &str, value: &Value) -> Result<()> {
        self.check(Op::PutAttr, name)?;
        let index = self.dataset.unwrap_or_else(|| self.current_group());
        let attributes = &mut self.objects[index].attributes;
        match attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value.clone(),
            None => attributes.push(Attribute {
                name: name.to_string(),
                value: value.clone(),
            }),
        }
        Ok(())
    }

    fn put_data(&mut self, data: &ArrayData) -> Result<()> {
        let index = self.open_dataset()?;
        let name = self.basename(index).to_string();
        self.check(Op::PutData, &name)?;
        let object = &mut self.objects[index];
        if Some(data.element_type()) != object.element_type {
            return Err(Error::Backend(format!(
                "{name}: {} data written to a {:?} dataset",
                data.element_type(),
                object.element_type
            )));
        }
        if data.len() != element_count(&object.shape) {
            return Err(Error::Backend(format!(
                "{name}: {} elements written to shape {:?}",
                data.len(),
                object.shape
            )));
        }
        object.data = Some(data.clone());
        Ok(())
    }

    fn put_slab(&mut self, data: &ArrayData, start: &[usize], count: &[usize]) -> Result<()> {
        let index = self.open_dataset()?;
        let name = self.basename(index).to_string();
        self.check(Op::PutSlab, &name)?;
        let object = &mut self.objects[index];
        let Some(element_type) = object.element_type else {
            return Err(Error::Backend(format!("{name} has no element type")));
        };
        let shape = object.shape.clone();
        let in_bounds = start.len() == shape.len()
            && count.len() == shape.len()
            && (0..shape.len()).all(|d| start[d] + count[d] <= shape[d]);
        if !in_bounds {
            return Err(Error::Backend(format!(
                "{name}: block {start:?}+{count:?} outside shape {shape:?}"
            )));
        }
        if data.len() != element_count(count) {
            return Err(Error::Backend(format!(
                "{name}: {} elements for block {count:?}",
                data.len()
            )));
        }

        let target = object
            .data
            .get_or_insert_with(|| ArrayData::zeros(element_type, element_count(&shape)));
        let offsets = block_offsets(&shape, start, count);
        let copied = scatter_same!(
            target, data, offsets, Int8, UInt8, Int16, UInt16, Int32, UInt32, Int64, UInt64,
            Float32, Float64, Char
        );
        if copied {
            Ok(())
        } else {
            Err(Error::Backend(format!(
                "{name}: {} slab written to a {element_type} dataset",
                data.element_type()
            )))
        }
    }

    fn current_id(&mut self) -> Result<FileIdentity> {
        if self.closed {
            return Err(Error::Closed);
        }
        let index = self.dataset.unwrap_or_else(|| self.current_group());
        let object = &self.objects[index];
        Ok(FileIdentity {
            path: object.path.clone(),
            kind: object.kind,
        })
    }

    fn make_link(&mut self, name: &str, target: &FileIdentity) -> Result<()> {
        self.check(Op::MakeLink, name)?;
        self.require_no_dataset()?;
        let Some(index) = self.resolve(&target.path) else {
            return Err(Error::Backend(format!("link target {target} not found")));
        };
        let group = self.current_group();
        if self.member(group, name).is_some() {
            return Err(Error::Backend(format!(
                "{name} already exists in {}",
                self.objects[group].path
            )));
        }
        self.objects[group].members.push((name.to_string(), index));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check(Op::Flush, "")
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.dataset = None;
        self.groups.clear();
        self.closed = true;
        Ok(())
    }
}
