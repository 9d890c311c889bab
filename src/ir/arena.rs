//! Arena storage for IR nodes.
//!
//! All nodes of one compilation live in a single arena and are addressed by
//! stable indices. Index-based references sidestep ownership cycles entirely
//! (Phi <-> Merge, LoopBegin <-> LoopEnd): an `Id` is a weak reference
//! resolved through the arena and never implies ownership. Deletion is
//! monotonic - slots are marked dead, never reused within a compilation.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A type-safe index into an arena.
///
/// The generic parameter ensures IDs from different arenas cannot be mixed.
/// Traits are implemented manually so `Id<T>` is Copy/Eq/Hash regardless of
/// whether `T` is.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Create an ID from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// Raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Index as usize.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// In-band null. Edge lists store this instead of `Option`.
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    /// Whether this ID refers to a node at all.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#-")
        }
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Bump-allocated homogeneous storage addressed by `Id`.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    /// Create an empty arena.
    #[inline]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    /// Create an arena with preallocated capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Allocate an item, returning its ID.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Id::new(index)
    }

    /// Look up an item.
    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    /// Look up an item mutably.
    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.items.get_mut(id.as_usize())
    }

    /// Number of slots ever allocated (dead slots included).
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing has been allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate all slots with their IDs.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    /// Iterate all IDs.
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> {
        (0..self.items.len() as u32).map(Id::new)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Side table keyed by arena IDs.
///
/// Used for data that is not part of the node itself (use lists, control
/// edges) so the node struct stays small.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Get a value, if the slot has ever been written or grown to.
    #[inline]
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    /// Get a value mutably, growing the table as needed.
    #[inline]
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        &mut self.values[idx]
    }

    /// Set a value, growing the table as needed.
    #[inline]
    pub fn set(&mut self, id: Id<K>, value: V) {
        *self.entry(id) = value;
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Node Bit Map
// =============================================================================

/// Identity bitmap over a fixed node universe.
///
/// O(1) membership tests for node sets (fragment contents, worklist dedup).
/// Grows on demand so nodes created after the map can still be marked.
#[derive(Debug, Clone, Default)]
pub struct NodeBitMap<T> {
    bits: Vec<u64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> NodeBitMap<T> {
    /// Create an empty map.
    pub fn new() -> Self {
        NodeBitMap {
            bits: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create a map sized for a universe of `n` nodes.
    pub fn with_capacity(n: usize) -> Self {
        NodeBitMap {
            bits: vec![0; n.div_ceil(64)],
            _marker: PhantomData,
        }
    }

    fn grow(&mut self, index: usize) {
        let words = index / 64 + 1;
        if words > self.bits.len() {
            self.bits.resize(words, 0);
        }
    }

    /// Mark a node as a member.
    #[inline]
    pub fn mark(&mut self, id: Id<T>) {
        let idx = id.as_usize();
        self.grow(idx);
        self.bits[idx / 64] |= 1 << (idx % 64);
    }

    /// Remove a node from the set.
    #[inline]
    pub fn clear(&mut self, id: Id<T>) {
        let idx = id.as_usize();
        if idx / 64 < self.bits.len() {
            self.bits[idx / 64] &= !(1 << (idx % 64));
        }
    }

    /// Membership test.
    #[inline]
    pub fn is_marked(&self, id: Id<T>) -> bool {
        if !id.is_valid() {
            return false;
        }
        let idx = id.as_usize();
        idx / 64 < self.bits.len() && (self.bits[idx / 64] >> (idx % 64)) & 1 != 0
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate members in index order.
    pub fn iter(&self) -> impl Iterator<Item = Id<T>> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64).filter_map(move |bit| {
                if (word >> bit) & 1 != 0 {
                    Some(Id::new((word_idx * 64 + bit) as u32))
                } else {
                    None
                }
            })
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot {
        value: i32,
    }

    #[test]
    fn test_arena_alloc_and_index() {
        let mut arena: Arena<Slot> = Arena::new();

        let a = arena.alloc(Slot { value: 10 });
        let b = arena.alloc(Slot { value: 20 });

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[a].value, 10);

        arena[b].value = 200;
        assert_eq!(arena[b].value, 200);
    }

    #[test]
    fn test_id_invalid() {
        let id: Id<Slot> = Id::INVALID;
        assert!(!id.is_valid());
        assert!(Id::<Slot>::new(0).is_valid());
    }

    #[test]
    fn test_secondary_map_grows() {
        let mut map: SecondaryMap<Slot, Vec<u32>> = SecondaryMap::new();
        let id = Id::new(7);

        assert!(map.get(id).is_none());
        map.entry(id).push(3);
        assert_eq!(map.get(id), Some(&vec![3]));
        assert_eq!(map.get(Id::new(2)), Some(&Vec::new()));
    }

    #[test]
    fn test_bitmap_mark_clear() {
        let mut map: NodeBitMap<Slot> = NodeBitMap::with_capacity(4);

        map.mark(Id::new(0));
        map.mark(Id::new(63));
        map.mark(Id::new(100)); // past initial capacity

        assert!(map.is_marked(Id::new(0)));
        assert!(map.is_marked(Id::new(63)));
        assert!(map.is_marked(Id::new(100)));
        assert!(!map.is_marked(Id::new(1)));
        assert!(!map.is_marked(Id::INVALID));
        assert_eq!(map.count(), 3);

        map.clear(Id::new(63));
        assert!(!map.is_marked(Id::new(63)));

        let members: Vec<u32> = map.iter().map(Id::index).collect();
        assert_eq!(members, vec![0, 100]);
    }
}
