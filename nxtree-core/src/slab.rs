//! Slab planning for large fixed-shape datasets.
//!
//! A [`SlabPlan`] splits a row-major array into bounded blocks along one
//! axis. Each [`Slab`] names the hyperslab (`start`, `count`) it covers in
//! the dataset and the contiguous run (`offset`, `len`) it occupies in the
//! linear source buffer, so a writer only ever stages one slab at a time.

/// Arrays whose leading dimension is below this are written in one call.
pub const SLAB_LEADING_THRESHOLD: usize = 50;

/// Slab budgets at or below this disable slabbing.
pub const MIN_SLAB_BUDGET: i64 = 100;

/// A block of the array written by one bounded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slab {
    /// Zero-based slab number.
    pub index: usize,
    /// Start offset per dimension.
    pub start: Vec<usize>,
    /// Extent per dimension.
    pub count: Vec<usize>,
    /// Offset of the block in the linear buffer.
    pub offset: usize,
    /// Number of elements in the block.
    pub len: usize,
}

/// Slab layout for one shape and budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabPlan {
    shape: Vec<usize>,
    axis: usize,
    increment: usize,
    inner: usize,
    slab_count: usize,
}

impl SlabPlan {
    /// Plans slabs for `shape` under `budget` elements per slab.
    ///
    /// Returns `None` when the array should be written in a single call:
    /// rank below 2, a short leading dimension, a budget at or below
    /// [`MIN_SLAB_BUDGET`], or no axis whose trailing product reaches the
    /// budget.
    #[must_use]
    pub fn for_shape(shape: &[usize], budget: i64) -> Option<Self> {
        let rank = shape.len();
        if rank < 2 || shape[0] < SLAB_LEADING_THRESHOLD || budget <= MIN_SLAB_BUDGET {
            return None;
        }
        let budget = usize::try_from(budget).ok()?;

        // Walk from the second-to-last axis toward the first until the
        // trailing product reaches the budget.
        let mut product = shape[rank - 1];
        let mut axis = None;
        for candidate in (0..rank - 1).rev() {
            product = product.saturating_mul(shape[candidate]);
            if product >= budget {
                axis = Some(candidate);
                break;
            }
        }
        let axis = axis?;

        let dim = shape[axis];
        let increment = (budget.saturating_mul(dim) / product).max(1);
        let inner = product / dim;

        let per_axis = dim.div_ceil(increment);
        let outer: usize = shape[..axis].iter().product();
        Some(Self {
            shape: shape.to_vec(),
            axis,
            increment,
            inner,
            slab_count: per_axis * outer,
        })
    }

    /// Axis the slabs advance along.
    #[must_use]
    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Maximum extent of one slab along [`Self::axis`].
    #[must_use]
    pub fn increment(&self) -> usize {
        self.increment
    }

    /// Elements in the largest slab; the size of a reusable scratch buffer.
    #[must_use]
    pub fn slab_capacity(&self) -> usize {
        self.inner * self.increment
    }

    /// Total number of slabs.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slab_count
    }

    /// Iterates the slabs in buffer order.
    #[must_use]
    pub fn iter(&self) -> SlabIter<'_> {
        SlabIter {
            plan: self,
            start: vec![0; self.shape.len()],
            offset: 0,
            index: 0,
            done: self.shape.iter().any(|&d| d == 0),
        }
    }
}

impl<'a> IntoIterator for &'a SlabPlan {
    type Item = Slab;
    type IntoIter = SlabIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Odometer over the slabs of a [`SlabPlan`].
pub struct SlabIter<'a> {
    plan: &'a SlabPlan,
    start: Vec<usize>,
    offset: usize,
    index: usize,
    done: bool,
}

impl Iterator for SlabIter<'_> {
    type Item = Slab;

    fn next(&mut self) -> Option<Slab> {
        if self.done {
            return None;
        }
        let plan = self.plan;
        let axis = plan.axis;

        let mut count = plan.shape.clone();
        for c in &mut count[..axis] {
            *c = 1;
        }
        count[axis] = plan.increment.min(plan.shape[axis] - self.start[axis]);
        let len = plan.inner * count[axis];

        let slab = Slab {
            index: self.index,
            start: self.start.clone(),
            count: count.clone(),
            offset: self.offset,
            len,
        };

        self.index += 1;
        self.offset += len;

        // Advance along the slab axis, carrying into higher dimensions.
        self.start[axis] += count[axis];
        let mut j = axis;
        while self.start[j] >= plan.shape[j] {
            if j == 0 {
                self.done = true;
                break;
            }
            self.start[j] = 0;
            self.start[j - 1] += 1;
            j -= 1;
        }

        Some(slab)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.slab_count.saturating_sub(self.index);
        if self.done {
            (0, Some(0))
        } else {
            (remaining, Some(remaining))
        }
    }
}
