//! nxtree-io: Deferred NeXus tree writer.
//!
//! This crate drives a cursor-style hierarchical file API: it keeps the
//! file's open contexts aligned with the node tree, commits pending values
//! in bounded slabs, and resolves links whose targets are written later.
//!

pub mod api;
pub mod config;
mod engine;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod memory;
mod position;
pub mod slab_writer;
mod writer;

pub use api::{DirEntry, NexusApi};
pub use config::{CompressionPolicy, WriterConfig, DEFAULT_SLAB_BUDGET, SLAB_BUDGET_ENV};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{describe, read_attr_string, read_dataset, Hdf5Api, ObjectInfo};
pub use memory::{MemObject, MemoryApi, Op};
pub use slab_writer::write_array;
pub use writer::{NexusWriter, ENTRY_NAME};
