// Value comparators over (vector, index) pairs with an explicit null policy.
use std::cmp::Ordering;
use std::ptr;

use crate::core::error::{Error, ErrorKind};
use crate::core::vector::{ValueRef, Vector};

/// Where nulls sort relative to present values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NullOrder {
    /// Nulls compare less than every value.
    #[default]
    NullsFirst,
    NullsLast,
}

impl NullOrder {
    fn null_vs_value(self) -> Ordering {
        match self {
            NullOrder::NullsFirst => Ordering::Less,
            NullOrder::NullsLast => Ordering::Greater,
        }
    }

    /// Ordering of two optional values when at least one is null.
    pub fn compare_nulls(self, left_null: bool, right_null: bool) -> Option<Ordering> {
        match (left_null, right_null) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(self.null_vs_value()),
            (false, true) => Some(self.null_vs_value().reverse()),
            (false, false) => None,
        }
    }
}

/// Total order over vector positions.
///
/// Implementors supply `compare_not_null`; null handling follows `null_order`.
pub trait VectorComparator {
    fn compare_not_null(&self, left: ValueRef<'_>, right: ValueRef<'_>) -> Result<Ordering, Error>;

    fn null_order(&self) -> NullOrder {
        NullOrder::NullsFirst
    }

    fn compare(
        &self,
        left: &Vector,
        left_index: usize,
        right: &Vector,
        right_index: usize,
    ) -> Result<Ordering, Error> {
        match (left.get(left_index), right.get(right_index)) {
            (Some(l), Some(r)) => self.compare_not_null(l, r),
            (l, r) => Ok(self
                .null_order()
                .compare_nulls(l.is_none(), r.is_none())
                .unwrap_or(Ordering::Equal)),
        }
    }
}

/// Natural order by type: numbers numerically (floats by IEEE total order),
/// utf8 and binary by bytes, lists element-wise.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultComparator {
    null_order: NullOrder,
}

impl DefaultComparator {
    pub fn new(null_order: NullOrder) -> Self {
        Self { null_order }
    }
}

impl VectorComparator for DefaultComparator {
    fn compare_not_null(&self, left: ValueRef<'_>, right: ValueRef<'_>) -> Result<Ordering, Error> {
        compare_values(left, right, self.null_order)
    }

    fn null_order(&self) -> NullOrder {
        self.null_order
    }
}

fn compare_values(left: ValueRef<'_>, right: ValueRef<'_>, nulls: NullOrder) -> Result<Ordering, Error> {
    let ordering = match (left, right) {
        (ValueRef::Int32(l), ValueRef::Int32(r)) => l.cmp(&r),
        (ValueRef::Int64(l), ValueRef::Int64(r)) => l.cmp(&r),
        (ValueRef::Float32(l), ValueRef::Float32(r)) => l.total_cmp(&r),
        (ValueRef::Float64(l), ValueRef::Float64(r)) => l.total_cmp(&r),
        (ValueRef::Utf8(l), ValueRef::Utf8(r)) => l.as_bytes().cmp(r.as_bytes()),
        (ValueRef::Binary(l), ValueRef::Binary(r)) => l.cmp(r),
        (ValueRef::List(l), ValueRef::List(r)) => {
            for (left_item, right_item) in l.iter().zip(r.iter()) {
                let ordering = match (left_item, right_item) {
                    (Some(a), Some(b)) => compare_values(a, b, nulls)?,
                    (a, b) => nulls
                        .compare_nulls(a.is_none(), b.is_none())
                        .unwrap_or(Ordering::Equal),
                };
                if ordering != Ordering::Equal {
                    return Ok(ordering);
                }
            }
            l.len().cmp(&r.len())
        }
        (l, r) => {
            return Err(Error::new(ErrorKind::ComparatorMisuse).with_message(format!(
                "cannot compare {} with {}",
                variant_name(&l),
                variant_name(&r)
            )));
        }
    };
    Ok(ordering)
}

fn variant_name(value: &ValueRef<'_>) -> &'static str {
    match value {
        ValueRef::Int32(_) => "int32",
        ValueRef::Int64(_) => "int64",
        ValueRef::Float32(_) => "float32",
        ValueRef::Float64(_) => "float64",
        ValueRef::Utf8(_) => "utf8",
        ValueRef::Binary(_) => "binary",
        ValueRef::List(_) => "list",
    }
}

/// Comparator built from a closure over non-null values.
#[derive(Clone, Copy, Debug)]
pub struct FnComparator<F> {
    compare: F,
    null_order: NullOrder,
}

pub fn from_fn<F>(compare: F) -> FnComparator<F>
where
    F: Fn(ValueRef<'_>, ValueRef<'_>) -> Ordering,
{
    FnComparator {
        compare,
        null_order: NullOrder::default(),
    }
}

impl<F> FnComparator<F> {
    pub fn with_null_order(mut self, null_order: NullOrder) -> Self {
        self.null_order = null_order;
        self
    }
}

impl<F> VectorComparator for FnComparator<F>
where
    F: Fn(ValueRef<'_>, ValueRef<'_>) -> Ordering,
{
    fn compare_not_null(&self, left: ValueRef<'_>, right: ValueRef<'_>) -> Result<Ordering, Error> {
        Ok((self.compare)(left, right))
    }

    fn null_order(&self) -> NullOrder {
        self.null_order
    }
}

/// Breaks ties by position so sorting keeps the original order of equal
/// values. Only positions within one vector instance can be compared.
#[derive(Clone, Copy, Debug)]
pub struct StableComparator<C> {
    inner: C,
}

impl<C: VectorComparator> StableComparator<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: VectorComparator> VectorComparator for StableComparator<C> {
    fn compare_not_null(&self, left: ValueRef<'_>, right: ValueRef<'_>) -> Result<Ordering, Error> {
        self.inner.compare_not_null(left, right)
    }

    fn null_order(&self) -> NullOrder {
        self.inner.null_order()
    }

    fn compare(
        &self,
        left: &Vector,
        left_index: usize,
        right: &Vector,
        right_index: usize,
    ) -> Result<Ordering, Error> {
        if !ptr::eq(left, right) {
            return Err(Error::new(ErrorKind::ComparatorMisuse)
                .with_message("stable comparator compares positions of a single vector")
                .with_hint("Sort or search within one vector, or use the inner comparator."));
        }
        let ordering = self.inner.compare(left, left_index, right, right_index)?;
        Ok(ordering.then_with(|| left_index.cmp(&right_index)))
    }
}
