//! HDF5/NeXus backend for the cursor-style file API.
//!
//! HDF5 itself is handle based; [`Hdf5Api`] keeps the chain of open groups
//! and the optional open dataset so the commit engine sees the single-cursor
//! semantics of the NeXus API. Groups carry an `NX_class` string attribute,
//! character attributes and rank-1 character datasets are stored as
//! variable-length UTF-8 scalars, links are hard links, and identities are
//! absolute object paths.

use crate::api::{DirEntry, NexusApi};
use crate::{Error, Result};
use hdf5::types::{FloatSize, H5Type, IntSize, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Dataset, Extents, File, Group, Location};
use ndarray::{ArrayView, IxDyn, SliceInfo, SliceInfoElem};
use nxtree_core::{
    element_count, with_array, ArrayData, ElementType, FileIdentity, NodeKind, Value,
    DATASET_CLASS,
};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const CLASS_ATTR: &str = "NX_class";

/// Target number of elements per chunk of a compressed dataset.
const CHUNK_ELEMENTS: usize = 65_536;

/// Hard links may form cycles; listings stop descending here.
const MAX_DESCRIBE_DEPTH: usize = 32;

/// Runs `$body` with `$t` aliased to the Rust type stored for an element type.
macro_rules! with_h5_type {
    ($element_type:expr, $t:ident => $body:expr) => {
        match $element_type {
            ElementType::Int8 => {
                type $t = i8;
                $body
            }
            ElementType::UInt8 | ElementType::Char => {
                type $t = u8;
                $body
            }
            ElementType::Int16 => {
                type $t = i16;
                $body
            }
            ElementType::UInt16 => {
                type $t = u16;
                $body
            }
            ElementType::Int32 => {
                type $t = i32;
                $body
            }
            ElementType::UInt32 => {
                type $t = u32;
                $body
            }
            ElementType::Int64 => {
                type $t = i64;
                $body
            }
            ElementType::UInt64 => {
                type $t = u64;
                $body
            }
            ElementType::Float32 => {
                type $t = f32;
                $body
            }
            ElementType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

struct OpenDataset {
    dataset: Dataset,
    /// Stored as a variable-length string scalar.
    text: bool,
}

/// [`NexusApi`] over an HDF5 file.
pub struct Hdf5Api {
    file: Option<File>,
    groups: Vec<Group>,
    dataset: Option<OpenDataset>,
}

impl Hdf5Api {
    /// Creates (truncating) a file and tags it with its name and creator.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        set_attr_str(&file, "file_name", &file_name)?;
        set_attr_str(
            &file,
            "creator",
            concat!("nxtree ", env!("CARGO_PKG_VERSION")),
        )?;
        Ok(Self::from_file(file))
    }

    /// Opens an existing file read-write.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_file(File::open_rw(path)?))
    }

    /// Opens `path` for appending when it exists, otherwise creates it.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or created.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            log::debug!("appending to {}", path.display());
            Self::open_rw(path)
        } else {
            Self::create(path)
        }
    }

    fn from_file(file: File) -> Self {
        Self {
            file: Some(file),
            groups: Vec::new(),
            dataset: None,
        }
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(Error::Closed)
    }

    fn current_group(&self) -> Result<&Group> {
        let file = self.file()?;
        Ok(self.groups.last().unwrap_or(file))
    }

    fn require_no_dataset(&self) -> Result<()> {
        match &self.dataset {
            Some(open) => Err(Error::Backend(format!(
                "dataset {} is still open",
                open.dataset.name()
            ))),
            None => Ok(()),
        }
    }

    fn open_dataset(&self) -> Result<&OpenDataset> {
        self.dataset
            .as_ref()
            .ok_or_else(|| Error::Backend("no dataset is open".to_string()))
    }
}

impl NexusApi for Hdf5Api {
    fn group_dir(&mut self) -> Result<Vec<DirEntry>> {
        self.require_no_dataset()?;
        let group = self.current_group()?;
        let mut entries = Vec::new();
        for name in group.member_names()? {
            let class_name = match group.group(&name) {
                Ok(child) => read_attr_opt_string(&child, CLASS_ATTR).unwrap_or_default(),
                Err(_) => DATASET_CLASS.to_string(),
            };
            entries.push(DirEntry::new(name, class_name));
        }
        Ok(entries)
    }

    fn make_group(&mut self, name: &str, class_name: &str) -> Result<()> {
        self.require_no_dataset()?;
        let group = self.current_group()?.create_group(name)?;
        set_attr_str(&group, CLASS_ATTR, class_name)
    }

    fn open_group(&mut self, name: &str, _class_name: &str) -> Result<()> {
        self.require_no_dataset()?;
        let group = self.current_group()?.group(name)?;
        self.groups.push(group);
        Ok(())
    }

    fn close_group(&mut self) -> Result<()> {
        self.require_no_dataset()?;
        self.groups
            .pop()
            .map(|_| ())
            .ok_or_else(|| Error::Backend("no group is open".to_string()))
    }

    fn make_data(
        &mut self,
        name: &str,
        element_type: ElementType,
        shape: &[usize],
        compression: Option<u8>,
    ) -> Result<()> {
        self.require_no_dataset()?;
        let group = self.current_group()?;
        if element_type.is_char() && shape.len() == 1 {
            group.new_dataset::<VarLenUnicode>().shape(()).create(name)?;
            return Ok(());
        }
        with_h5_type!(element_type, T => create_fixed_dataset::<T>(group, name, shape, compression))?;
        Ok(())
    }

    fn open_data(&mut self, name: &str) -> Result<()> {
        self.require_no_dataset()?;
        let dataset = self.current_group()?.dataset(name)?;
        let text = dataset.dtype()?.to_descriptor()? == TypeDescriptor::VarLenUnicode;
        self.dataset = Some(OpenDataset { dataset, text });
        Ok(())
    }

    fn close_data(&mut self) -> Result<()> {
        self.dataset
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Backend("no dataset is open".to_string()))
    }

    fn put_attr(&mut self, name: &str, value: &Value) -> Result<()> {
        match &self.dataset {
            Some(open) => write_attr(&open.dataset, name, value),
            None => write_attr(self.current_group()?, name, value),
        }
    }

    fn put_data(&mut self, data: &ArrayData) -> Result<()> {
        let open = self.open_dataset()?;
        if open.text {
            let ArrayData::Char(bytes) = data else {
                return Err(Error::Backend(format!(
                    "{} data written to text dataset {}",
                    data.element_type(),
                    open.dataset.name()
                )));
            };
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 text: {e}")))?;
            open.dataset.write_scalar(&to_var_len_unicode(text)?)?;
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }
        with_array!(data, v => open.dataset.write_raw(v.as_slice()))?;
        Ok(())
    }

    fn put_slab(&mut self, data: &ArrayData, start: &[usize], count: &[usize]) -> Result<()> {
        let open = self.open_dataset()?;
        let elements = start
            .iter()
            .zip(count)
            .map(|(&s, &c)| {
                let begin = isize::try_from(s);
                let end = isize::try_from(s + c);
                match (begin, end) {
                    (Ok(start), Ok(end)) => Ok(SliceInfoElem::Slice {
                        start,
                        end: Some(end),
                        step: 1,
                    }),
                    _ => Err(Error::Backend(format!("slab offset {s} out of range"))),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let selection = SliceInfo::<Vec<SliceInfoElem>, IxDyn, IxDyn>::try_from(elements)
            .map_err(|e| Error::Backend(format!("invalid slab selection: {e}")))?;

        with_array!(data, v => {
            let view = ArrayView::from_shape(IxDyn(count), v.as_slice())
                .map_err(|e| Error::Backend(format!("slab shape {count:?}: {e}")))?;
            open.dataset.write_slice(view, selection)?;
        });
        Ok(())
    }

    fn current_id(&mut self) -> Result<FileIdentity> {
        if let Some(open) = &self.dataset {
            return Ok(FileIdentity {
                path: open.dataset.name(),
                kind: NodeKind::Dataset,
            });
        }
        match self.groups.last() {
            Some(group) => Ok(FileIdentity {
                path: group.name(),
                kind: NodeKind::Group,
            }),
            None => {
                self.file()?;
                Ok(FileIdentity {
                    path: "/".to_string(),
                    kind: NodeKind::Root,
                })
            }
        }
    }

    fn make_link(&mut self, name: &str, target: &FileIdentity) -> Result<()> {
        self.require_no_dataset()?;
        self.current_group()?.link_hard(&target.path, name)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.dataset = None;
        self.groups.clear();
        match self.file.take() {
            Some(file) => Ok(file.close()?),
            None => Err(Error::Closed),
        }
    }
}

/// One object listed by [`describe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: String,
    pub class_name: String,
    /// Dataset shape; `None` for groups.
    pub shape: Option<Vec<usize>>,
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(f, "{} ({}) {:?}", self.path, self.class_name, shape),
            None => write!(f, "{} ({})", self.path, self.class_name),
        }
    }
}

/// Reads a whole dataset back as a [`Value`].
///
/// # Errors
/// Returns an error if the dataset is missing or its type is unsupported.
pub fn read_dataset<P: AsRef<Path>>(path: P, object: &str) -> Result<Value> {
    let file = File::open(path)?;
    let dataset = file.dataset(object)?;
    read_value(&dataset)
}

/// Reads a string attribute of a group or dataset, `None` when absent.
///
/// # Errors
/// Returns an error if the file or object cannot be opened.
pub fn read_attr_string<P: AsRef<Path>>(path: P, object: &str, name: &str) -> Result<Option<String>> {
    let file = File::open(path)?;
    if let Ok(group) = file.group(object) {
        return Ok(read_attr_opt_string(&group, name));
    }
    let dataset = file.dataset(object)?;
    Ok(read_attr_opt_string(&dataset, name))
}

/// Lists every group and dataset in the file, depth first.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn describe<P: AsRef<Path>>(path: P) -> Result<Vec<ObjectInfo>> {
    let file = File::open(path)?;
    let mut out = Vec::new();
    walk(&file, "/", 0, &mut out)?;
    Ok(out)
}

fn walk(group: &Group, prefix: &str, depth: usize, out: &mut Vec<ObjectInfo>) -> Result<()> {
    if depth > MAX_DESCRIBE_DEPTH {
        return Ok(());
    }
    for name in group.member_names()? {
        let path = if prefix == "/" {
            format!("/{name}")
        } else {
            format!("{prefix}/{name}")
        };
        if let Ok(child) = group.group(&name) {
            out.push(ObjectInfo {
                path: path.clone(),
                class_name: read_attr_opt_string(&child, CLASS_ATTR).unwrap_or_default(),
                shape: None,
            });
            walk(&child, &path, depth + 1, out)?;
        } else if let Ok(dataset) = group.dataset(&name) {
            out.push(ObjectInfo {
                path,
                class_name: read_attr_opt_string(&dataset, CLASS_ATTR)
                    .unwrap_or_else(|| DATASET_CLASS.to_string()),
                shape: Some(dataset.shape()),
            });
        }
    }
    Ok(())
}

fn read_value(dataset: &Dataset) -> Result<Value> {
    let descriptor = dataset.dtype()?.to_descriptor()?;
    if descriptor == TypeDescriptor::VarLenUnicode {
        let text: VarLenUnicode = dataset.read_scalar()?;
        return Ok(Value::text(text.as_str()));
    }
    let element_type = element_type_of(&descriptor).ok_or_else(|| {
        Error::InvalidFormat(format!(
            "unsupported element type {descriptor:?} in {}",
            dataset.name()
        ))
    })?;
    let shape = dataset.shape();
    let data = if element_count(&shape) == 0 {
        ArrayData::zeros(element_type, 0)
    } else {
        with_h5_type!(element_type, T => ArrayData::from(dataset.read_raw::<T>()?))
    };
    Ok(Value::new(element_type, &shape, data)?)
}

fn element_type_of(descriptor: &TypeDescriptor) -> Option<ElementType> {
    Some(match descriptor {
        TypeDescriptor::Integer(IntSize::U1) => ElementType::Int8,
        TypeDescriptor::Integer(IntSize::U2) => ElementType::Int16,
        TypeDescriptor::Integer(IntSize::U4) => ElementType::Int32,
        TypeDescriptor::Integer(IntSize::U8) => ElementType::Int64,
        TypeDescriptor::Unsigned(IntSize::U1) => ElementType::UInt8,
        TypeDescriptor::Unsigned(IntSize::U2) => ElementType::UInt16,
        TypeDescriptor::Unsigned(IntSize::U4) => ElementType::UInt32,
        TypeDescriptor::Unsigned(IntSize::U8) => ElementType::UInt64,
        TypeDescriptor::Float(FloatSize::U4) => ElementType::Float32,
        TypeDescriptor::Float(FloatSize::U8) => ElementType::Float64,
        _ => return None,
    })
}

fn create_fixed_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    shape: &[usize],
    compression: Option<u8>,
) -> Result<Dataset> {
    let mut builder = group.new_dataset::<T>().shape(shape.to_vec());

    if let Some(level) = compression {
        builder = builder.chunk(chunk_for(shape)).deflate(level);
    }

    Ok(builder.create(name)?)
}

/// Chunk shape for a compressed dataset: whole trailing axes, leading axis
/// cut to roughly [`CHUNK_ELEMENTS`] elements.
fn chunk_for(shape: &[usize]) -> Vec<usize> {
    let mut chunk = shape.to_vec();
    if let Some((first, rest)) = chunk.split_first_mut() {
        let inner = rest.iter().product::<usize>().max(1);
        *first = (CHUNK_ELEMENTS / inner).clamp(1, (*first).max(1));
    }
    chunk
}

fn write_attr(location: &Location, name: &str, value: &Value) -> Result<()> {
    if value.element_type.is_char() {
        let text = value
            .as_text()
            .ok_or_else(|| Error::InvalidFormat(format!("attribute {name} is not utf-8")))?;
        let text = to_var_len_unicode(text)?;
        let attr = match location.attr(name) {
            Ok(attr) => attr,
            Err(_) => location.new_attr::<VarLenUnicode>().create(name)?,
        };
        attr.write_scalar(&text)?;
        return Ok(());
    }
    with_array!(&value.data, v => write_numeric_attr(location, name, &value.shape, v))
}

fn write_numeric_attr<T: H5Type>(
    location: &Location,
    name: &str,
    shape: &[usize],
    data: &[T],
) -> Result<()> {
    let attr = match location.attr(name) {
        Ok(attr) => attr,
        Err(_) => {
            let extents = if shape.is_empty() {
                Extents::Scalar
            } else {
                Extents::from(shape.to_vec())
            };
            location.new_attr::<T>().shape(extents).create(name)?
        }
    };
    attr.write_raw(data)?;
    Ok(())
}

fn set_attr_str(location: &Location, name: &str, value: &str) -> Result<()> {
    write_attr(location, name, &Value::text(value))
}

fn read_attr_opt_string(location: &Location, name: &str) -> Option<String> {
    let attr = location.attr(name).ok()?;
    attr.read_scalar::<VarLenUnicode>()
        .map(|v| v.to_string())
        .or_else(|_| attr.read_scalar::<VarLenAscii>().map(|v| v.to_string()))
        .ok()
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_hdf5_cursor_and_readback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.nxs");
        let mut api = Hdf5Api::create(&path).unwrap();

        api.make_group("entry", "NXentry").unwrap();
        api.open_group("entry", "NXentry").unwrap();
        api.put_attr("title", &Value::text("run 7")).unwrap();
        api.make_data("counts", ElementType::Int32, &[3, 4], None).unwrap();
        api.open_data("counts").unwrap();
        assert_eq!(api.current_id().unwrap().path, "/entry/counts");
        api.put_data(&ArrayData::from((0..12).collect::<Vec<i32>>()))
            .unwrap();
        api.close_data().unwrap();
        let dir_listing = api.group_dir().unwrap();
        assert_eq!(dir_listing, vec![DirEntry::new("counts", DATASET_CLASS)]);
        api.close_group().unwrap();
        api.close().unwrap();
        assert!(matches!(api.flush(), Err(Error::Closed)));

        let value = read_dataset(&path, "/entry/counts").unwrap();
        assert_eq!(value.shape, vec![3, 4]);
        assert_eq!(value.data, ArrayData::Int32((0..12).collect()));
        assert_eq!(
            read_attr_string(&path, "/entry", "NX_class").unwrap(),
            Some("NXentry".to_string())
        );
        assert_eq!(
            read_attr_string(&path, "/entry", "title").unwrap(),
            Some("run 7".to_string())
        );
    }

    #[test]
    fn test_hdf5_slab_and_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slab.nxs");
        let mut api = Hdf5Api::create(&path).unwrap();

        api.make_data("grid", ElementType::Float64, &[2, 3], None).unwrap();
        api.open_data("grid").unwrap();
        api.put_slab(&ArrayData::from(vec![1.0f64, 2.0, 3.0]), &[0, 0], &[1, 3])
            .unwrap();
        api.put_slab(&ArrayData::from(vec![4.0f64, 5.0, 6.0]), &[1, 0], &[1, 3])
            .unwrap();
        api.close_data().unwrap();

        api.make_data("name", ElementType::Char, &[5], None).unwrap();
        api.open_data("name").unwrap();
        api.put_data(&ArrayData::from("HRPD1")).unwrap();
        api.close_data().unwrap();
        api.close().unwrap();

        let grid = read_dataset(&path, "/grid").unwrap();
        let ArrayData::Float64(values) = grid.data else {
            panic!("expected float64 data");
        };
        approx::assert_relative_eq!(values[4], 5.0);
        assert_eq!(read_dataset(&path, "/name").unwrap().as_text(), Some("HRPD1"));

        let listing = describe(&path).unwrap();
        assert!(listing.iter().any(|o| o.path == "/grid" && o.shape == Some(vec![2, 3])));
    }

    #[test]
    fn test_chunk_for() {
        assert_eq!(chunk_for(&[1_000_000]), vec![65_536]);
        assert_eq!(chunk_for(&[10, 1_000_000]), vec![1, 1_000_000]);
        assert_eq!(chunk_for(&[4, 8]), vec![4, 8]);
    }
}
