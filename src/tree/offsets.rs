use std::fmt;

use smallvec::SmallVec;

/// Sorted, deduplicated set of row offsets attached to one token.
///
/// Most tokens carry one or two offsets, so the set stays inline up to four
/// entries before spilling to the heap.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct OffsetSet {
    offsets: SmallVec<[u64; 4]>,
}

impl OffsetSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding a single offset.
    pub fn single(offset: u64) -> Self {
        let mut offsets = SmallVec::new();
        offsets.push(offset);
        Self { offsets }
    }

    /// Builds a set from offsets already in strictly ascending order.
    pub(crate) fn from_sorted(offsets: SmallVec<[u64; 4]>) -> Self {
        debug_assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        Self { offsets }
    }

    /// Inserts `offset`, returning false if it was already present.
    pub fn add(&mut self, offset: u64) -> bool {
        match self.offsets.binary_search(&offset) {
            Ok(_) => false,
            Err(pos) => {
                self.offsets.insert(pos, offset);
                true
            }
        }
    }

    /// Merges every offset of `other` into `self`.
    pub fn union(&mut self, other: &OffsetSet) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.offsets = other.offsets.clone();
            return;
        }
        if other.offsets.len() == 1 {
            self.add(other.offsets[0]);
            return;
        }
        let mut merged = SmallVec::with_capacity(self.offsets.len() + other.offsets.len());
        let (mut i, mut j) = (0, 0);
        let (left, right) = (&self.offsets, &other.offsets);
        while i < left.len() && j < right.len() {
            let (l, r) = (left[i], right[j]);
            if l < r {
                merged.push(l);
                i += 1;
            } else if r < l {
                merged.push(r);
                j += 1;
            } else {
                merged.push(l);
                i += 1;
                j += 1;
            }
        }
        merged.extend_from_slice(&left[i..]);
        merged.extend_from_slice(&right[j..]);
        self.offsets = merged;
    }

    /// Number of distinct offsets.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true when no offsets are held.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Returns true when `offset` is a member.
    pub fn contains(&self, offset: u64) -> bool {
        self.offsets.binary_search(&offset).is_ok()
    }

    /// Smallest offset, if any.
    pub fn min(&self) -> Option<u64> {
        self.offsets.first().copied()
    }

    /// Largest offset, if any.
    pub fn max(&self) -> Option<u64> {
        self.offsets.last().copied()
    }

    /// Offsets in ascending order.
    pub fn as_slice(&self) -> &[u64] {
        &self.offsets
    }

    /// Iterates offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.offsets.iter().copied()
    }
}

impl fmt::Debug for OffsetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.offsets.iter()).finish()
    }
}

impl FromIterator<u64> for OffsetSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut offsets: SmallVec<[u64; 4]> = iter.into_iter().collect();
        offsets.sort_unstable();
        offsets.dedup();
        Self { offsets }
    }
}

impl Extend<u64> for OffsetSet {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for offset in iter {
            self.add(offset);
        }
    }
}

impl<const N: usize> From<[u64; N]> for OffsetSet {
    fn from(values: [u64; N]) -> Self {
        values.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a OffsetSet {
    type Item = u64;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, u64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.offsets.iter().copied()
    }
}
