//! Bounded writes of large arrays.

use crate::api::NexusApi;
use crate::{Error, Result};
use log::{debug, info};
use nxtree_core::{ArrayData, ElementType, SlabPlan};

/// Slabs between progress reports.
const PROGRESS_INTERVAL: usize = 10;

/// Writes `data` into the open dataset named `dataset`.
///
/// Arrays that [`SlabPlan::for_shape`] accepts are written one slab at a
/// time through a single reusable scratch buffer; everything else goes out
/// in one call. Returns the number of slabs written, or 0 for a whole write.
///
/// # Errors
/// Returns [`Error::SlabWriteFailed`] wrapping the first failing write.
pub fn write_array<A: NexusApi>(
    api: &mut A,
    dataset: &str,
    data: &ArrayData,
    element_type: ElementType,
    shape: &[usize],
    slab_budget: i64,
) -> Result<usize> {
    let wrap = |source: Error| Error::SlabWriteFailed {
        dataset: dataset.to_string(),
        source: Box::new(source),
    };

    let Some(plan) = SlabPlan::for_shape(shape, slab_budget) else {
        debug!("{dataset}: whole write of {} elements", data.len());
        api.put_data(data).map_err(wrap)?;
        return Ok(0);
    };

    let total = plan.slab_count();
    debug!(
        "{dataset}: {total} slabs along axis {} of {shape:?}",
        plan.axis()
    );
    let mut scratch = ArrayData::with_capacity(element_type, plan.slab_capacity());
    for slab in &plan {
        data.copy_range_into(slab.offset..slab.offset + slab.len, &mut scratch)
            .map_err(|e| wrap(e.into()))?;
        api.put_slab(&scratch, &slab.start, &slab.count)
            .map_err(wrap)?;
        let written = slab.index + 1;
        if written % PROGRESS_INTERVAL == 0 {
            info!("{dataset}: wrote {written} of {total} slabs");
        }
    }
    Ok(total)
}
