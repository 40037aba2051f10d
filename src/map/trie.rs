use std::alloc::Layout;
use std::mem;
use std::ptr;
use std::ptr::NonNull;

use crate::alloc::Allocator;
use crate::alloc::OutOfMemory;

use super::growth;
use super::growth::MAX_CAPACITY;
use super::node::Node;

/// A 32-way trie node compressed by an occupancy bitmap.
///
/// Bit `i` of `bitmap` is set iff logical slot `i` is occupied; only the
/// occupied slots are stored, packed in logical order, in the heap array
/// `base`. The physical position of logical slot `i` is the popcount of
/// the bitmap below bit `i`.
///
/// `base` is null only while `capacity` is zero. The struct does not own a
/// destructor; slot contents and the array are torn down by the container's
/// deep-destroy walk.
#[repr(C)]
pub(crate) struct BitmapTrie<K, V> {
    bitmap: u32,
    capacity: u32,
    base: *mut Node<K, V>,
}

impl<K, V> BitmapTrie<K, V> {
    fn layout(capacity: u32) -> Layout {
        // SAFETY: the alignment is that of `Node` and the size is at most
        // 32 nodes, so the rounded size cannot overflow `isize`.
        unsafe {
            Layout::from_size_align_unchecked(
                mem::size_of::<Node<K, V>>() * capacity as usize,
                mem::align_of::<Node<K, V>>(),
            )
        }
    }

    /// A trie with no slot array at all.
    pub(crate) fn empty() -> Self {
        Self {
            bitmap: 0,
            capacity: 0,
            base: ptr::null_mut(),
        }
    }

    /// Allocates an unoccupied trie with room for `capacity` slots.
    pub(crate) fn allocate<A: Allocator>(alloc: &A, capacity: u32) -> Result<Self, OutOfMemory> {
        debug_assert!(capacity <= MAX_CAPACITY);
        if capacity == 0 {
            return Ok(Self::empty());
        }
        let base = alloc.allocate(Self::layout(capacity))?.cast().as_ptr();
        Ok(Self {
            bitmap: 0,
            capacity,
            base,
        })
    }

    /// Frees the slot array. Slot contents must already be torn down.
    ///
    /// # Safety
    /// `alloc` must be the allocator the array came from; no slot may be
    /// read afterwards.
    pub(crate) unsafe fn deallocate<A: Allocator>(&mut self, alloc: &A) {
        if let Some(base) = NonNull::new(self.base) {
            alloc.deallocate(base.cast(), Self::layout(self.capacity));
            self.base = ptr::null_mut();
            self.capacity = 0;
            self.bitmap = 0;
        }
    }

    #[inline]
    pub(crate) fn bitmap(&self) -> u32 {
        self.bitmap
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of occupied slots.
    #[inline]
    pub(crate) fn occupied(&self) -> u32 {
        self.bitmap.count_ones()
    }

    #[inline]
    pub(crate) fn slot_taken(&self, i: u32) -> bool {
        debug_assert!(i < MAX_CAPACITY);
        (self.bitmap >> i) & 1 != 0
    }

    /// Physical position of logical slot `i`: the popcount below bit `i`.
    #[inline]
    pub(crate) fn physical_index(&self, i: u32) -> u32 {
        debug_assert!(i < MAX_CAPACITY);
        (self.bitmap & ((1u32 << i) - 1)).count_ones()
    }

    /// # Safety
    /// `j` must be below the occupied count.
    #[inline]
    pub(crate) unsafe fn physical_get(&self, j: u32) -> *mut Node<K, V> {
        debug_assert!(j < self.occupied());
        self.base.add(j as usize)
    }

    /// # Safety
    /// Logical slot `i` must be occupied.
    #[inline]
    pub(crate) unsafe fn logical_get(&self, i: u32) -> *mut Node<K, V> {
        debug_assert!(self.slot_taken(i));
        self.base.add(self.physical_index(i) as usize)
    }

    /// Physical position of a node residing in this trie's slot array.
    ///
    /// # Safety
    /// `node` must point into the occupied prefix of `base`.
    #[inline]
    pub(crate) unsafe fn physical_index_of(&self, node: *const Node<K, V>) -> u32 {
        let j = node.offset_from(self.base);
        debug_assert!(0 <= j && (j as u32) < self.occupied());
        j as u32
    }

    /// Raw slot address without an occupancy check; for building a trie
    /// whose bitmap is filled in as slots become live.
    ///
    /// # Safety
    /// `j` must be below `capacity`.
    #[inline]
    pub(crate) unsafe fn physical_slot(&self, j: u32) -> *mut Node<K, V> {
        debug_assert!(j < self.capacity);
        self.base.add(j as usize)
    }

    /// Marks logical slot `i` occupied. The matching physical slot must
    /// already hold a live node.
    #[inline]
    pub(crate) fn set_slot_bit(&mut self, i: u32) {
        debug_assert!(!self.slot_taken(i));
        self.bitmap |= 1 << i;
    }

    /// Reserves empty logical slot `i`, shifting the packed occupants
    /// after it one position right and growing the slot array through the
    /// capacity oracle when it is full. The reserved node is tagged as an
    /// entry of `owner`; the caller constructs the key/value in place.
    ///
    /// On `Err` the bitmap and slot array are unchanged.
    ///
    /// # Safety
    /// `owner` must be the node holding this trie, and `alloc` the
    /// allocator of its slot array.
    pub(crate) unsafe fn insert_entry<A: Allocator>(
        &mut self,
        i: u32,
        owner: *mut Node<K, V>,
        expected_total: usize,
        depth: u32,
        alloc: &A,
    ) -> Result<*mut Node<K, V>, OutOfMemory> {
        debug_assert!(!self.slot_taken(i));
        let occupied = self.occupied();
        debug_assert!(occupied < MAX_CAPACITY);
        let at = self.physical_index(i) as usize;

        if occupied + 1 > self.capacity {
            let capacity = growth::alloc_capacity(occupied + 1, expected_total, depth);
            let base: *mut Node<K, V> = alloc.allocate(Self::layout(capacity))?.cast().as_ptr();
            if let Some(old) = NonNull::new(self.base) {
                ptr::copy_nonoverlapping(old.as_ptr(), base, at);
                ptr::copy_nonoverlapping(
                    old.as_ptr().add(at),
                    base.add(at + 1),
                    occupied as usize - at,
                );
                alloc.deallocate(old.cast(), Self::layout(self.capacity));
            }
            self.base = base;
            self.capacity = capacity;
        } else if at < occupied as usize {
            ptr::copy(
                self.base.add(at),
                self.base.add(at + 1),
                occupied as usize - at,
            );
        }
        self.bitmap |= 1 << i;

        // Residents may have moved; their own children still point at the
        // old addresses.
        for j in 0..occupied as usize + 1 {
            if j != at {
                Node::reparent_children(self.base.add(j));
            }
        }

        let slot = self.base.add(at);
        Node::tag_entry(slot, owner);
        Ok(slot)
    }

    /// Checks this trie's local structural invariants: occupancy within
    /// capacity, capacity within the branching factor, slot array presence,
    /// and every child's back-pointer aimed at `owner`.
    ///
    /// # Safety
    /// All occupied slots must hold initialized nodes.
    #[cfg(debug_assertions)]
    pub(crate) unsafe fn debug_local_invariants(&self, owner: *const Node<K, V>) {
        debug_assert!(self.occupied() <= self.capacity);
        debug_assert!(self.capacity <= MAX_CAPACITY);
        debug_assert!(self.capacity == 0 || !self.base.is_null());
        debug_assert!(!self.base.is_null() || self.capacity == 0);
        for j in 0..self.occupied() {
            debug_assert_eq!((*self.physical_get(j)).parent(), owner as *mut Node<K, V>);
        }
    }
}
