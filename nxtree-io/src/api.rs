//! The cursor-style file API the commit engine drives.
//!
//! Implementations keep exactly one chain of open groups from the file root,
//! optionally ending in one open dataset. Every call acts on the innermost
//! open context: directories are listed, groups and datasets are created and
//! opened, attributes and data are written, and links are made relative to
//! it.

use crate::Result;
use nxtree_core::{ArrayData, ElementType, FileIdentity, Value};

/// One entry of a group listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Group class, or `"SDS"` for datasets.
    pub class_name: String,
}

impl DirEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
        }
    }
}

/// Single-cursor hierarchical file API.
pub trait NexusApi {
    /// Lists the members of the innermost open group.
    ///
    /// # Errors
    /// Returns an error if a dataset is open or the listing fails.
    fn group_dir(&mut self) -> Result<Vec<DirEntry>>;

    /// Creates a group tagged with `class_name` in the open group. The new
    /// group is not opened.
    ///
    /// # Errors
    /// Returns an error if the name is taken or creation fails.
    fn make_group(&mut self, name: &str, class_name: &str) -> Result<()>;

    /// Opens a member group, making it the innermost context.
    ///
    /// # Errors
    /// Returns an error if the group does not exist.
    fn open_group(&mut self, name: &str, class_name: &str) -> Result<()>;

    /// Closes the innermost open group.
    ///
    /// # Errors
    /// Returns an error if no group is open or a dataset is still open.
    fn close_group(&mut self) -> Result<()>;

    /// Creates a fixed-shape dataset in the open group. The new dataset is
    /// not opened. `compression` is a deflate level.
    ///
    /// # Errors
    /// Returns an error if the name is taken or creation fails.
    fn make_data(
        &mut self,
        name: &str,
        element_type: ElementType,
        shape: &[usize],
        compression: Option<u8>,
    ) -> Result<()>;

    /// Opens a member dataset.
    ///
    /// # Errors
    /// Returns an error if the dataset does not exist or one is already open.
    fn open_data(&mut self, name: &str) -> Result<()>;

    /// Closes the open dataset.
    ///
    /// # Errors
    /// Returns an error if no dataset is open.
    fn close_data(&mut self) -> Result<()>;

    /// Writes an attribute on the open dataset, or on the innermost open
    /// group when no dataset is open.
    ///
    /// # Errors
    /// Returns an error if the attribute cannot be written.
    fn put_attr(&mut self, name: &str, value: &Value) -> Result<()>;

    /// Writes the whole open dataset.
    ///
    /// # Errors
    /// Returns an error if no dataset is open or the data does not fit it.
    fn put_data(&mut self, data: &ArrayData) -> Result<()>;

    /// Writes one hyperslab of the open dataset.
    ///
    /// # Errors
    /// Returns an error if no dataset is open or the block is out of bounds.
    fn put_slab(&mut self, data: &ArrayData, start: &[usize], count: &[usize]) -> Result<()>;

    /// Identity of the innermost open context.
    ///
    /// # Errors
    /// Returns an error if the file is closed.
    fn current_id(&mut self) -> Result<FileIdentity>;

    /// Makes `name` in the open group refer to the object behind `target`.
    ///
    /// # Errors
    /// Returns an error if the name is taken or the target is gone.
    fn make_link(&mut self, name: &str, target: &FileIdentity) -> Result<()>;

    /// Flushes buffered data to storage.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> Result<()>;

    /// Releases the file. Later calls fail.
    ///
    /// # Errors
    /// Returns an error if the file could not be closed cleanly.
    fn close(&mut self) -> Result<()>;
}
