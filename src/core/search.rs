// Linear and binary search of a probe value within a target vector.
use std::cmp::Ordering;

use crate::core::compare::VectorComparator;
use crate::core::error::Error;
use crate::core::vector::Vector;

/// First index of `target` equal to `probe[probe_index]`, or `None`.
pub fn linear_search<C>(
    target: &Vector,
    comparator: &C,
    probe: &Vector,
    probe_index: usize,
) -> Result<Option<usize>, Error>
where
    C: VectorComparator + ?Sized,
{
    for index in 0..target.len() {
        if comparator.compare(target, index, probe, probe_index)? == Ordering::Equal {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Some index of `target` equal to `probe[probe_index]`, or `None`.
///
/// `target` must be sorted ascending under `comparator`; otherwise the result
/// is unspecified but still in bounds.
pub fn binary_search<C>(
    target: &Vector,
    comparator: &C,
    probe: &Vector,
    probe_index: usize,
) -> Result<Option<usize>, Error>
where
    C: VectorComparator + ?Sized,
{
    let mut low = 0;
    let mut high = target.len();
    while low < high {
        let mid = low + (high - low) / 2;
        match comparator.compare(target, mid, probe, probe_index)? {
            Ordering::Equal => return Ok(Some(mid)),
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::{binary_search, linear_search};
    use crate::core::buffer::Arena;
    use crate::core::compare::{DefaultComparator, StableComparator};
    use crate::core::error::ErrorKind;
    use crate::core::vector::Vector;

    fn sorted_with_leading_null(arena: &Arena) -> Vector {
        let mut values = vec![None];
        values.extend((1..10).map(Some));
        Vector::from_i32(arena, "raw", &values).expect("raw")
    }

    #[test]
    fn binary_search_hits_and_misses() {
        let arena = Arena::new();
        let target = sorted_with_leading_null(&arena);
        let keys = Vector::from_i32(&arena, "keys", &[Some(5), Some(-333), None, Some(9)])
            .expect("keys");
        let cmp = DefaultComparator::default();
        assert_eq!(binary_search(&target, &cmp, &keys, 0).expect("search"), Some(5));
        assert_eq!(binary_search(&target, &cmp, &keys, 1).expect("search"), None);
        assert_eq!(binary_search(&target, &cmp, &keys, 2).expect("search"), Some(0));
        assert_eq!(binary_search(&target, &cmp, &keys, 3).expect("search"), Some(9));
    }

    #[test]
    fn linear_search_finds_first_match() {
        let arena = Arena::new();
        let target = Vector::from_utf8(&arena, "v", &[Some("b"), Some("a"), Some("a")])
            .expect("target");
        let keys = Vector::from_utf8(&arena, "k", &[Some("a"), Some("zzz")]).expect("keys");
        let cmp = DefaultComparator::default();
        assert_eq!(linear_search(&target, &cmp, &keys, 0).expect("search"), Some(1));
        assert_eq!(linear_search(&target, &cmp, &keys, 1).expect("search"), None);
    }

    #[test]
    fn empty_target_finds_nothing() {
        let arena = Arena::new();
        let target = Vector::from_i32(&arena, "v", &[]).expect("target");
        let keys = Vector::from_i32(&arena, "k", &[Some(1)]).expect("keys");
        let cmp = DefaultComparator::default();
        assert_eq!(binary_search(&target, &cmp, &keys, 0).expect("search"), None);
        assert_eq!(linear_search(&target, &cmp, &keys, 0).expect("search"), None);
    }

    #[test]
    fn stable_comparator_cannot_search_another_vector() {
        let arena = Arena::new();
        let target = sorted_with_leading_null(&arena);
        let keys = Vector::from_i32(&arena, "keys", &[Some(5)]).expect("keys");
        let stable = StableComparator::new(DefaultComparator::default());
        let err = binary_search(&target, &stable, &keys, 0).expect_err("misuse");
        assert_eq!(err.kind(), ErrorKind::ComparatorMisuse);
    }
}
