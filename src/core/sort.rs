// In-place and out-of-place vector sorting driven by a VectorComparator.
use std::cmp::Ordering;

use crate::core::compare::VectorComparator;
use crate::core::error::Error;
use crate::core::vector::Vector;

/// Sorts `vector` ascending, reusing its own storage.
///
/// Fixed-width vectors are permuted within their buffers; variable-width and
/// list vectors are rebuilt in sorted order since their offsets must stay
/// monotonic.
pub fn sort_in_place<C>(vector: &mut Vector, comparator: &C) -> Result<(), Error>
where
    C: VectorComparator + ?Sized,
{
    let order = sorted_order(vector, comparator)?;
    match vector.fixed_width_mut() {
        Some(fixed) => fixed.permute(&order),
        None => {
            let sorted = vector.take(&order)?;
            *vector = sorted;
            Ok(())
        }
    }
}

/// Returns a sorted copy; `vector` is left untouched.
pub fn sort_out_of_place<C>(vector: &Vector, comparator: &C) -> Result<Vector, Error>
where
    C: VectorComparator + ?Sized,
{
    let order = sorted_order(vector, comparator)?;
    vector.take(&order)
}

/// Source positions in ascending order; the first comparator error wins.
///
/// Runs a bottom-up merge sort so that a failing or inconsistent comparator
/// ends the sort with an error instead of reaching the std sort's panic path.
pub fn sorted_order<C>(vector: &Vector, comparator: &C) -> Result<Vec<usize>, Error>
where
    C: VectorComparator + ?Sized,
{
    let mut order: Vec<usize> = (0..vector.len()).collect();
    let mut scratch = vec![0usize; order.len()];
    let mut width = 1;
    while width < order.len() {
        for start in (0..order.len()).step_by(2 * width) {
            let mid = (start + width).min(order.len());
            let end = (start + 2 * width).min(order.len());
            merge(vector, comparator, &order[start..mid], &order[mid..end], &mut scratch[start..end])?;
        }
        std::mem::swap(&mut order, &mut scratch);
        width *= 2;
    }
    Ok(order)
}

fn merge<C>(
    vector: &Vector,
    comparator: &C,
    left: &[usize],
    right: &[usize],
    out: &mut [usize],
) -> Result<(), Error>
where
    C: VectorComparator + ?Sized,
{
    let (mut l, mut r) = (0, 0);
    for slot in out.iter_mut() {
        let take_left = if l == left.len() {
            false
        } else if r == right.len() {
            true
        } else {
            comparator.compare(vector, left[l], vector, right[r])? != Ordering::Greater
        };
        if take_left {
            *slot = left[l];
            l += 1;
        } else {
            *slot = right[r];
            r += 1;
        }
    }
    Ok(())
}
