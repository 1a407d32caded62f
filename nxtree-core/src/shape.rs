//! Shape canonicalization.

/// Number of elements described by `shape`.
///
/// An empty shape describes a single scalar element.
#[must_use]
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Canonicalizes a declared shape before a dataset is created.
///
/// Degenerate axes (size 0 or 1) are ambiguous for fixed-size
/// multi-dimensional datasets. When every axis is degenerate the shape
/// collapses to `[1]`; otherwise the degenerate axes are dropped and the
/// remaining ones keep their relative order.
#[must_use]
pub fn normalize(shape: &[usize]) -> Vec<usize> {
    if shape.iter().all(|&dim| dim <= 1) {
        return vec![1];
    }
    shape.iter().copied().filter(|&dim| dim > 1).collect()
}
