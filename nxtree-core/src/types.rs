//! Element types and typed array payloads.

use crate::shape::element_count;
use crate::tree::NodeKind;
use crate::{Error, Result};
use std::fmt;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Element type tag of a dataset or attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ElementType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// Character data, stored as bytes.
    Char,
}

impl ElementType {
    /// Size of one element in bytes.
    #[must_use]
    pub fn size_of(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 | Self::Char => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Lowercase type name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Char => "char",
        }
    }

    /// Returns true for character data.
    #[must_use]
    pub fn is_char(self) -> bool {
        matches!(self, Self::Char)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A linear, row-major buffer of elements.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Char(Vec<u8>),
}

/// Runs `$body` with `$v` bound to the inner `Vec` of an [`ArrayData`].
#[macro_export]
macro_rules! with_array {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::ArrayData::Int8($v) => $body,
            $crate::ArrayData::UInt8($v) => $body,
            $crate::ArrayData::Int16($v) => $body,
            $crate::ArrayData::UInt16($v) => $body,
            $crate::ArrayData::Int32($v) => $body,
            $crate::ArrayData::UInt32($v) => $body,
            $crate::ArrayData::Int64($v) => $body,
            $crate::ArrayData::UInt64($v) => $body,
            $crate::ArrayData::Float32($v) => $body,
            $crate::ArrayData::Float64($v) => $body,
            $crate::ArrayData::Char($v) => $body,
        }
    };
}

macro_rules! copy_same_variant {
    ($src:expr, $dst:expr, $start:expr, $end:expr, $($var:ident),+) => {
        match ($src, $dst) {
            $(
                (ArrayData::$var(s), ArrayData::$var(d)) => {
                    d.clear();
                    d.extend_from_slice(&s[$start..$end]);
                }
            )+
            (s, d) => *d = s.slice($start..$end),
        }
    };
}

impl ArrayData {
    /// Creates an empty buffer of `element_type` with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity(element_type: ElementType, capacity: usize) -> Self {
        match element_type {
            ElementType::Int8 => Self::Int8(Vec::with_capacity(capacity)),
            ElementType::UInt8 => Self::UInt8(Vec::with_capacity(capacity)),
            ElementType::Int16 => Self::Int16(Vec::with_capacity(capacity)),
            ElementType::UInt16 => Self::UInt16(Vec::with_capacity(capacity)),
            ElementType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            ElementType::UInt32 => Self::UInt32(Vec::with_capacity(capacity)),
            ElementType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            ElementType::UInt64 => Self::UInt64(Vec::with_capacity(capacity)),
            ElementType::Float32 => Self::Float32(Vec::with_capacity(capacity)),
            ElementType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            ElementType::Char => Self::Char(Vec::with_capacity(capacity)),
        }
    }

    /// Creates a zero-filled buffer of `len` elements.
    #[must_use]
    pub fn zeros(element_type: ElementType, len: usize) -> Self {
        match element_type {
            ElementType::Int8 => Self::Int8(vec![0; len]),
            ElementType::UInt8 => Self::UInt8(vec![0; len]),
            ElementType::Int16 => Self::Int16(vec![0; len]),
            ElementType::UInt16 => Self::UInt16(vec![0; len]),
            ElementType::Int32 => Self::Int32(vec![0; len]),
            ElementType::UInt32 => Self::UInt32(vec![0; len]),
            ElementType::Int64 => Self::Int64(vec![0; len]),
            ElementType::UInt64 => Self::UInt64(vec![0; len]),
            ElementType::Float32 => Self::Float32(vec![0.0; len]),
            ElementType::Float64 => Self::Float64(vec![0.0; len]),
            ElementType::Char => Self::Char(vec![0; len]),
        }
    }

    /// Element type of this buffer.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Int8(_) => ElementType::Int8,
            Self::UInt8(_) => ElementType::UInt8,
            Self::Int16(_) => ElementType::Int16,
            Self::UInt16(_) => ElementType::UInt16,
            Self::Int32(_) => ElementType::Int32,
            Self::UInt32(_) => ElementType::UInt32,
            Self::Int64(_) => ElementType::Int64,
            Self::UInt64(_) => ElementType::UInt64,
            Self::Float32(_) => ElementType::Float32,
            Self::Float64(_) => ElementType::Float64,
            Self::Char(_) => ElementType::Char,
        }
    }

    /// Number of elements (bytes for character data).
    #[must_use]
    pub fn len(&self) -> usize {
        with_array!(self, v => v.len())
    }

    /// Returns true when the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `range` into a new buffer of the same type.
    ///
    /// # Panics
    /// Panics if `range` is out of bounds.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Self::Int8(v) => Self::Int8(v[range].to_vec()),
            Self::UInt8(v) => Self::UInt8(v[range].to_vec()),
            Self::Int16(v) => Self::Int16(v[range].to_vec()),
            Self::UInt16(v) => Self::UInt16(v[range].to_vec()),
            Self::Int32(v) => Self::Int32(v[range].to_vec()),
            Self::UInt32(v) => Self::UInt32(v[range].to_vec()),
            Self::Int64(v) => Self::Int64(v[range].to_vec()),
            Self::UInt64(v) => Self::UInt64(v[range].to_vec()),
            Self::Float32(v) => Self::Float32(v[range].to_vec()),
            Self::Float64(v) => Self::Float64(v[range].to_vec()),
            Self::Char(v) => Self::Char(v[range].to_vec()),
        }
    }

    /// Copies `range` into `scratch`, reusing its allocation when the
    /// element types agree.
    ///
    /// # Errors
    /// Returns an error if `range` is out of bounds.
    pub fn copy_range_into(&self, range: Range<usize>, scratch: &mut ArrayData) -> Result<()> {
        if range.start > range.end || range.end > self.len() {
            return Err(Error::LinearizeFailed(format!(
                "range {}..{} outside buffer of {}",
                range.start,
                range.end,
                self.len()
            )));
        }
        copy_same_variant!(
            self, scratch, range.start, range.end, Int8, UInt8, Int16, UInt16, Int32, UInt32,
            Int64, UInt64, Float32, Float64, Char
        );
        Ok(())
    }

    /// Converts the buffer to `target`, element by element.
    ///
    /// Integer conversions must be exact, floats convert to integers only
    /// when they are whole numbers in range, and character data converts
    /// only to and from byte-sized integers.
    ///
    /// # Errors
    /// Returns [`Error::LinearizeFailed`] if any element cannot be represented.
    pub fn linearize(self, target: ElementType) -> Result<ArrayData> {
        let source = self.element_type();
        if source == target {
            return Ok(self);
        }
        let wide = self.widen();
        narrow(wide, target).map_err(|detail| {
            Error::LinearizeFailed(format!("{source} -> {target}: {detail}"))
        })
    }

    fn widen(self) -> Wide {
        match self {
            Self::Int8(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::UInt8(v) | Self::Char(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::Int16(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::UInt16(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::Int32(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::UInt32(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::Int64(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::UInt64(v) => Wide::Int(v.into_iter().map(i128::from).collect()),
            Self::Float32(v) => Wide::Float(v.into_iter().map(f64::from).collect()),
            Self::Float64(v) => Wide::Float(v),
        }
    }
}

enum Wide {
    Int(Vec<i128>),
    Float(Vec<f64>),
}

fn narrow(wide: Wide, target: ElementType) -> std::result::Result<ArrayData, String> {
    Ok(match target {
        ElementType::Int8 => ArrayData::Int8(narrow_int(wide)?),
        ElementType::UInt8 => ArrayData::UInt8(narrow_int(wide)?),
        ElementType::Int16 => ArrayData::Int16(narrow_int(wide)?),
        ElementType::UInt16 => ArrayData::UInt16(narrow_int(wide)?),
        ElementType::Int32 => ArrayData::Int32(narrow_int(wide)?),
        ElementType::UInt32 => ArrayData::UInt32(narrow_int(wide)?),
        ElementType::Int64 => ArrayData::Int64(narrow_int(wide)?),
        ElementType::UInt64 => ArrayData::UInt64(narrow_int(wide)?),
        ElementType::Float32 => ArrayData::Float32(narrow_f32(wide)),
        ElementType::Float64 => ArrayData::Float64(narrow_f64(wide)),
        ElementType::Char => match wide {
            Wide::Int(v) => ArrayData::Char(narrow_int(Wide::Int(v))?),
            Wide::Float(_) => return Err("floating point data is not character data".into()),
        },
    })
}

fn narrow_int<T: TryFrom<i128>>(wide: Wide) -> std::result::Result<Vec<T>, String> {
    match wide {
        Wide::Int(v) => v
            .into_iter()
            .map(|x| T::try_from(x).map_err(|_| format!("{x} out of range")))
            .collect(),
        Wide::Float(v) => v
            .into_iter()
            .map(|x| {
                if !x.is_finite() || x.fract() != 0.0 || x.abs() > 1.0e38 {
                    return Err(format!("{x} is not a representable integer"));
                }
                #[allow(clippy::cast_possible_truncation)]
                let whole = x as i128;
                T::try_from(whole).map_err(|_| format!("{x} out of range"))
            })
            .collect(),
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn narrow_f32(wide: Wide) -> Vec<f32> {
    match wide {
        Wide::Int(v) => v.into_iter().map(|x| x as f32).collect(),
        Wide::Float(v) => v.into_iter().map(|x| x as f32).collect(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn narrow_f64(wide: Wide) -> Vec<f64> {
    match wide {
        Wide::Int(v) => v.into_iter().map(|x| x as f64).collect(),
        Wide::Float(v) => v,
    }
}

macro_rules! impl_from_vec {
    ($($t:ty => $var:ident),+) => {
        $(
            impl From<Vec<$t>> for ArrayData {
                fn from(v: Vec<$t>) -> Self {
                    Self::$var(v)
                }
            }
        )+
    };
}

impl_from_vec!(
    i8 => Int8, u8 => UInt8, i16 => Int16, u16 => UInt16, i32 => Int32, u32 => UInt32,
    i64 => Int64, u64 => UInt64, f32 => Float32, f64 => Float64
);

impl From<&str> for ArrayData {
    fn from(s: &str) -> Self {
        Self::Char(s.as_bytes().to_vec())
    }
}

/// A typed value: element type, shape, and row-major buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub element_type: ElementType,
    pub shape: Vec<usize>,
    pub data: ArrayData,
}

impl Value {
    /// Creates a value, checking that the shape accounts for every element.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `product(shape) != data.len()`.
    pub fn new(element_type: ElementType, shape: &[usize], data: ArrayData) -> Result<Self> {
        let expected = element_count(shape);
        if expected != data.len() {
            return Err(Error::ShapeMismatch {
                shape: shape.to_vec(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            element_type,
            shape: shape.to_vec(),
            data,
        })
    }

    /// One-dimensional character value.
    #[must_use]
    pub fn text(s: &str) -> Self {
        Self {
            element_type: ElementType::Char,
            shape: vec![s.len()],
            data: ArrayData::from(s),
        }
    }

    /// Returns the value's text when it holds valid UTF-8 character data.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            ArrayData::Char(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

/// A named attribute waiting to be flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Value,
}

/// On-disk identity handed out by the file API for an open group or dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    /// Absolute object path inside the file.
    pub path: String,
    pub kind: NodeKind,
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
