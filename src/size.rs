//! Approximate in-memory footprint of batch items.
//!
//! Estimation walks an item as a tree of kinds (scalar, text, sequence,
//! mapping, reference, record) through a [`SizeVisitor`]. The result is a
//! heuristic for byte-bounded batching, not an allocator-level measurement:
//! sequences are sized from their first element only, and a reference that
//! was already visited during the same call only costs its pointer slot,
//! which also makes cyclic `Rc<RefCell<_>>` graphs terminate.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::mem::size_of;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Fixed cost of a text value before its contents
pub const TEXT_HEADER: usize = size_of::<String>();
/// Fixed cost of an ordered sequence before its elements
pub const SEQUENCE_HEADER: usize = size_of::<Vec<u8>>();
/// Fixed cost of a key-value mapping before its entries
pub const MAPPING_HEADER: usize = size_of::<HashMap<u8, u8>>();
/// Cost of a reference slot, paid whether or not the referent is walked
pub const REFERENCE_SLOT: usize = size_of::<usize>();

/// Types whose footprint can be estimated.
///
/// Implementations describe their shape by calling exactly one
/// [`SizeVisitor`] method and returning its result. Structs usually go
/// through [`impl_estimate_size!`](crate::impl_estimate_size).
pub trait EstimateSize {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize;
}

/// Estimate the footprint of `item` in bytes.
pub fn estimate_size<T: EstimateSize + ?Sized>(item: &T) -> usize {
    let mut visitor = SizeVisitor::new();
    item.estimate_with(&mut visitor)
}

/// Walks one top-level item, remembering which references it has seen.
#[derive(Debug, Default)]
pub struct SizeVisitor {
    visited: HashSet<usize>,
}

impl SizeVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed-size value
    pub fn scalar(&mut self, bytes: usize) -> usize {
        bytes
    }

    /// Text of `len` bytes
    pub fn text(&mut self, len: usize) -> usize {
        TEXT_HEADER + len
    }

    /// Sequence of `len` elements, sized by sampling `first`.
    ///
    /// Each element costs at least one byte, so a longer sequence of
    /// zero-sized elements still estimates larger.
    pub fn sequence<E>(&mut self, len: usize, first: Option<&E>) -> usize
    where
        E: EstimateSize + ?Sized,
    {
        let element = first.map_or(0, |e| e.estimate_with(self).max(1));
        SEQUENCE_HEADER + len.saturating_mul(element)
    }

    /// Mapping; every entry is walked
    pub fn mapping<'a, K, V, I>(&mut self, entries: I) -> usize
    where
        K: EstimateSize + ?Sized + 'a,
        V: EstimateSize + ?Sized + 'a,
        I: IntoIterator<Item = (&'a K, &'a V)>,
    {
        entries.into_iter().fold(MAPPING_HEADER, |acc, (k, v)| {
            acc + k.estimate_with(self) + v.estimate_with(self)
        })
    }

    /// Reference to `target`, or a null reference
    pub fn reference<R>(&mut self, target: Option<&R>) -> usize
    where
        R: EstimateSize + ?Sized,
    {
        let Some(target) = target else {
            return REFERENCE_SLOT;
        };
        let addr = target as *const R as *const () as usize;
        if !self.visited.insert(addr) {
            return REFERENCE_SLOT;
        }
        REFERENCE_SLOT + target.estimate_with(self)
    }

    /// Composite record; the sum of its fields
    pub fn record(&mut self, fields: &[&dyn EstimateSize]) -> usize {
        // fields are walked in place; they share the record's identity
        fields.iter().copied().map(|f| f.estimate_with(self)).sum()
    }
}

/// Implement [`EstimateSize`] for a struct as a record of the listed fields.
///
/// ```ignore
/// struct Event { key: String, tags: Vec<String>, ts: u64 }
/// stream_batcher::impl_estimate_size!(Event { key, tags, ts });
/// ```
#[macro_export]
macro_rules! impl_estimate_size {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::EstimateSize for $ty {
            fn estimate_with(&self, visitor: &mut $crate::SizeVisitor) -> usize {
                visitor.record(&[$(&self.$field as &dyn $crate::EstimateSize),*])
            }
        }
    };
}

macro_rules! scalar_impls {
    ($($ty:ty),* $(,)?) => {
        $(
            impl EstimateSize for $ty {
                fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
                    visitor.scalar(size_of::<$ty>())
                }
            }
        )*
    };
}

scalar_impls!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    Duration,
);

impl EstimateSize for str {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.text(self.len())
    }
}

impl EstimateSize for String {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.text(self.len())
    }
}

impl<T: EstimateSize> EstimateSize for [T] {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.sequence(self.len(), self.first())
    }
}

impl<T: EstimateSize, const N: usize> EstimateSize for [T; N] {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.sequence(N, self.first())
    }
}

impl<T: EstimateSize> EstimateSize for Vec<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.sequence(self.len(), self.first())
    }
}

impl<T: EstimateSize> EstimateSize for VecDeque<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.sequence(self.len(), self.front())
    }
}

impl<T: EstimateSize, S> EstimateSize for HashSet<T, S> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.sequence(self.len(), self.iter().next())
    }
}

impl<T: EstimateSize + Ord> EstimateSize for BTreeSet<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.sequence(self.len(), self.first())
    }
}

impl<K: EstimateSize, V: EstimateSize, S> EstimateSize for HashMap<K, V, S> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.mapping(self.iter())
    }
}

impl<K: EstimateSize, V: EstimateSize> EstimateSize for BTreeMap<K, V> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.mapping(self.iter())
    }
}

impl<T: EstimateSize> EstimateSize for Option<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        match self {
            Some(value) => value.estimate_with(visitor),
            None => visitor.scalar(size_of::<Self>()),
        }
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for &T {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.reference(Some(*self))
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Box<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.reference(Some(&**self))
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Rc<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.reference(Some(&**self))
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Arc<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        visitor.reference(Some(&**self))
    }
}

impl<T: EstimateSize> EstimateSize for RefCell<T> {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        match self.try_borrow() {
            Ok(inner) => inner.estimate_with(visitor),
            // Mutably borrowed elsewhere; fall back to the inline size.
            Err(_) => visitor.scalar(size_of::<Self>()),
        }
    }
}

macro_rules! tuple_impls {
    ($(($($name:ident),+)),* $(,)?) => {
        $(
            impl<$($name: EstimateSize),+> EstimateSize for ($($name,)+) {
                #[allow(non_snake_case)]
                fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
                    let ($($name,)+) = self;
                    visitor.record(&[$($name as &dyn EstimateSize),+])
                }
            }
        )*
    };
}

tuple_impls!((A), (A, B), (A, B, C), (A, B, C, D));

impl EstimateSize for serde_json::Value {
    fn estimate_with(&self, visitor: &mut SizeVisitor) -> usize {
        use serde_json::Value;
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) => visitor.scalar(size_of::<Value>()),
            Value::String(s) => visitor.text(s.len()),
            Value::Array(items) => visitor.sequence(items.len(), items.first()),
            Value::Object(map) => visitor.mapping(map.iter()),
        }
    }
}
