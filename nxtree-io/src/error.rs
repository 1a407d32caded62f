//! I/O error types.

use thiserror::Error;

/// Result type for file API and commit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core library error.
    #[error("{0}")]
    Core(#[from] nxtree_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// The file API rejected an operation.
    #[error("file API error: {0}")]
    Backend(String),

    /// The output path was rejected before anything was opened.
    #[error("no such file {0:?}")]
    NoSuchFile(String),

    /// A link child names a handle nobody registered.
    #[error("linking not paired for {0}")]
    LinkNotPaired(String),

    /// The open-context stack could not be closed or reopened as expected.
    #[error("file out of kilter: {0}")]
    FileOutOfKilter(String),

    /// A bounded array write failed.
    #[error("slab write failed for {dataset}: {source}")]
    SlabWriteFailed {
        dataset: String,
        #[source]
        source: Box<Error>,
    },

    /// Invalid file format or configuration value.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// The file was already closed.
    #[error("file is closed")]
    Closed,
}
