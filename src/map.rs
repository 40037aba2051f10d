//! A mutable hash array mapped trie, after Bagwell's "Ideal Hash Trees".

mod growth;
mod iter;
mod node;
mod trie;

pub use iter::Iter;
pub use iter::Keys;
pub use iter::Values;

use std::alloc::Layout;
use std::collections::VecDeque;
use std::fmt;
use std::fmt::Debug;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::ptr::NonNull;

use rand::thread_rng;
use rand::RngCore;
use siphasher::sip::SipHasher24;

use crate::alloc::Allocator;
use crate::alloc::Global;
use crate::alloc::OutOfMemory;

use growth::MAX_CAPACITY;
use node::Entry;
use node::Node;
use trie::BitmapTrie;

/// Bits of hash consumed per trie level.
const SLICE_BITS: u32 = 5;
const SLICE_MASK: u32 = (1 << SLICE_BITS) - 1;
const HASH_BITS: u32 = 32;
/// Last shift at which a hash slice still distinguishes keys; a trie found
/// past it is a flat collision bucket.
const LAST_SLICE_SHIFT: u32 = HASH_BITS - SLICE_BITS;

const GOLDEN32: u32 = 0x9E37_79B9;

/// Folds the per-container seed into a key hash, so two containers holding
/// the same keys disagree about slot placement and a crafted key set cannot
/// degenerate every instance at once.
fn mix_hash(seed: u32, hash: u32) -> u32 {
    seed ^ hash
        .wrapping_add(GOLDEN32)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// `BuildHasher` keying [`SipHasher24`] from process randomness.
#[derive(Clone, Debug)]
pub struct SipRandomState {
    k0: u64,
    k1: u64,
}

impl SipRandomState {
    /// A state with fixed keys, for deterministic hashing.
    pub fn with_keys(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }
}

impl Default for SipRandomState {
    fn default() -> Self {
        let mut rng = thread_rng();
        Self {
            k0: rng.next_u64(),
            k1: rng.next_u64(),
        }
    }
}

impl BuildHasher for SipRandomState {
    type Hasher = SipHasher24;

    fn build_hasher(&self) -> SipHasher24 {
        SipHasher24::new_with_keys(self.k0, self.k1)
    }
}

/// What the insertion walk did with the supplied pair.
enum Insertion<K, V> {
    Fresh(*mut Node<K, V>),
    /// The key was already present; the supplied value comes back to the
    /// caller, which decides whether to overwrite.
    Existing(*mut Node<K, V>, V),
}

/// A map from `K` to `V` backed by a hash array mapped trie.
///
/// The trie branches 32 ways on successive 5-bit slices of a seeded 32-bit
/// key hash; each node stores only its occupied slots behind a popcount
/// bitmap. Lookup and insertion touch at most ⌈32/5⌉ nodes, growth happens
/// a node at a time, and iteration walks entries in a canonical order via
/// parent back-pointers with no auxiliary state.
///
/// A `HashTrieMap` may be shared freely between threads for reads; any
/// mutation requires exclusive access, which the borrow checker enforces.
/// References into the map are invalidated by every mutating call.
pub struct HashTrieMap<K, V, H = SipRandomState, A: Allocator = Global> {
    root: NonNull<Node<K, V>>,
    len: usize,
    expected: usize,
    seed: u32,
    hasher: H,
    alloc: A,
    marker: PhantomData<(K, V)>,
}

unsafe impl<K: Send, V: Send, H: Send, A: Allocator + Send> Send for HashTrieMap<K, V, H, A> {}
unsafe impl<K: Sync, V: Sync, H: Sync, A: Allocator + Sync> Sync for HashTrieMap<K, V, H, A> {}

impl<K, V> HashTrieMap<K, V> {
    /// An empty map with the default hasher and allocator.
    pub fn new() -> Self {
        Self::with_expected_size(1)
    }

    /// An empty map pre-sized for roughly `expected_size` eventual entries.
    ///
    /// The estimate only steers how generously trie nodes are allocated;
    /// the map grows past it without complaint.
    pub fn with_expected_size(expected_size: usize) -> Self {
        Self::with_hasher(expected_size, SipRandomState::default())
    }
}

impl<K, V, H> HashTrieMap<K, V, H> {
    /// An empty map hashing keys with `hasher`.
    pub fn with_hasher(expected_size: usize, hasher: H) -> Self {
        Self::with_hasher_in(expected_size, hasher, Global)
    }
}

impl<K, V, H, A: Allocator> HashTrieMap<K, V, H, A> {
    /// An empty map hashing with `hasher` and allocating from `alloc`.
    pub fn with_hasher_in(expected_size: usize, hasher: H, alloc: A) -> Self {
        let seed = thread_rng().next_u32();
        match Self::build(expected_size, seed, hasher, alloc) {
            Ok(map) => map,
            Err(oom) => oom.handle(),
        }
    }

    /// Deterministic twin of [`with_hasher_in`](Self::with_hasher_in): the
    /// hash seed is taken verbatim instead of drawn from process
    /// randomness, pinning the trie shape for a given insertion sequence.
    pub fn with_seed_in(expected_size: usize, seed: u32, hasher: H, alloc: A) -> Self {
        match Self::build(expected_size, seed, hasher, alloc) {
            Ok(map) => map,
            Err(oom) => oom.handle(),
        }
    }

    fn build(expected_size: usize, seed: u32, hasher: H, alloc: A) -> Result<Self, OutOfMemory> {
        let expected = expected_size.max(1);
        let capacity = growth::alloc_capacity(1, expected, 0);
        let root = unsafe { Self::alloc_root_node(&alloc, capacity)? };
        Ok(Self {
            root,
            len: 0,
            expected,
            seed,
            hasher,
            alloc,
            marker: PhantomData,
        })
    }

    /// Heap-allocates the root node so that moving the map value never
    /// moves the node its children point back at.
    unsafe fn alloc_root_node(alloc: &A, capacity: u32) -> Result<NonNull<Node<K, V>>, OutOfMemory> {
        let layout = Layout::new::<Node<K, V>>();
        let root = alloc.allocate(layout)?.cast::<Node<K, V>>();
        match BitmapTrie::allocate(alloc, capacity) {
            Ok(trie) => {
                Node::write_trie(root.as_ptr(), ptr::null_mut(), trie);
                Ok(root)
            }
            Err(oom) => {
                alloc.deallocate(root.cast(), layout);
                Err(oom)
            }
        }
    }

    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates entries in canonical trie order. The order is
    /// deterministic for a given seed and insertion sequence; it is not
    /// key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.root.as_ptr(), self.len)
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Exchanges the entire contents of two maps, seeds and hashers
    /// included. Constant time: the trees stay where they are.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Destroys every entry, resets the root to an empty one-slot trie and
    /// draws a fresh hash seed.
    pub fn clear(&mut self) {
        unsafe {
            self.destroy_subtree(self.root.as_ptr());
            let trie = match BitmapTrie::allocate(&self.alloc, 1) {
                Ok(trie) => trie,
                Err(oom) => oom.handle(),
            };
            Node::write_trie(self.root.as_ptr(), ptr::null_mut(), trie);
        }
        self.len = 0;
        self.seed = thread_rng().next_u32();
    }

    /// Tears the subtree under `node` down without recursing: trie structs
    /// are lifted off their slot arrays onto an explicit stack before the
    /// arrays are freed, bounding native stack use however deep a
    /// pathological hash stretches the trie.
    ///
    /// # Safety
    /// `node` must be an initialized trie node; its payload is left
    /// unconstructed.
    unsafe fn destroy_subtree(&mut self, node: *mut Node<K, V>) {
        let mut stack: Vec<BitmapTrie<K, V>> = vec![Node::take_trie(node)];
        while let Some(mut trie) = stack.pop() {
            for j in (0..trie.occupied()).rev() {
                let slot = trie.physical_get(j);
                if (*slot).is_entry() {
                    Node::drop_entry(slot);
                } else {
                    stack.push(Node::take_trie(slot));
                }
            }
            trie.deallocate(&self.alloc);
        }
    }
}

impl<K, V, H, A> HashTrieMap<K, V, H, A>
where
    K: Hash + Eq,
    H: BuildHasher,
    A: Allocator,
{
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        mix_hash(self.seed, hasher.finish() as u32)
    }

    /// Looks the key up, returning a reference to its value.
    pub fn get(&self, key: &K) -> Option<&V> {
        unsafe { self.find_node(key).map(|node| &(*node).entry().value) }
    }

    /// Looks the key up, returning a mutable reference to its value.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        unsafe { self.find_node(key).map(|node| &mut (*node).entry_mut().value) }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_node(key).is_some()
    }

    fn find_node(&self, key: &K) -> Option<*mut Node<K, V>> {
        let h = self.hash_key(key);
        let mut node = self.root.as_ptr();
        let mut shift = 0;
        unsafe {
            loop {
                let trie = (*node).trie();
                let t = (h >> shift) & SLICE_MASK;
                if !trie.slot_taken(t) {
                    return None;
                }
                let slot = trie.logical_get(t);
                if (*slot).is_entry() {
                    if (*slot).entry().key == *key {
                        return Some(slot);
                    }
                    return None;
                }
                if shift >= LAST_SLICE_SHIFT {
                    // The hash is spent; slot positions below here encode
                    // nothing, so the subtree is searched exhaustively.
                    return Self::find_in_bucket(slot, key);
                }
                node = slot;
                shift += SLICE_BITS;
            }
        }
    }

    unsafe fn find_in_bucket(bucket: *mut Node<K, V>, key: &K) -> Option<*mut Node<K, V>> {
        let mut stack = vec![bucket];
        while let Some(node) = stack.pop() {
            let trie = (*node).trie();
            for j in 0..trie.occupied() {
                let slot = trie.physical_get(j);
                if (*slot).is_entry() {
                    if (*slot).entry().key == *key {
                        return Some(slot);
                    }
                } else {
                    stack.push(slot);
                }
            }
        }
        None
    }

    /// Inserts `key → value` if the key is absent. Returns a reference to
    /// the mapped value and whether the pair went in; a present entry is
    /// left untouched and the supplied value dropped.
    pub fn get_or_insert(&mut self, key: K, value: V) -> Result<(&mut V, bool), OutOfMemory> {
        let h = self.hash_key(&key);
        match unsafe { self.insert_walk(self.root.as_ptr(), key, value, h, 0, 0)? } {
            Insertion::Fresh(node) => Ok((unsafe { &mut (*node).entry_mut().value }, true)),
            Insertion::Existing(node, _value) => {
                Ok((unsafe { &mut (*node).entry_mut().value }, false))
            }
        }
    }

    /// Inserts `key → value` if the key is absent, computing the value
    /// only when it is needed.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> Result<(&mut V, bool), OutOfMemory>
    where
        F: FnOnce() -> V,
    {
        if let Some(node) = self.find_node(&key) {
            return Ok((unsafe { &mut (*node).entry_mut().value }, false));
        }
        let value = make();
        self.get_or_insert(key, value)
    }

    /// Returns the value for `key`, inserting a defaulted one first if the
    /// key is absent.
    pub fn get_or_insert_default(&mut self, key: K) -> Result<&mut V, OutOfMemory>
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default).map(|(value, _)| value)
    }

    /// Maps `key` to `value` unconditionally. Returns whether the key was
    /// already present (and its value overwritten).
    pub fn put(&mut self, key: K, value: V) -> Result<bool, OutOfMemory> {
        let h = self.hash_key(&key);
        match unsafe { self.insert_walk(self.root.as_ptr(), key, value, h, 0, 0)? } {
            Insertion::Fresh(_) => Ok(false),
            Insertion::Existing(node, value) => {
                unsafe { (*node).entry_mut().value = value };
                Ok(true)
            }
        }
    }

    /// One level of the insertion walk over the trie node at `node`.
    ///
    /// On `Err` no key has been added and the map still holds exactly the
    /// entries it held before, though an entry displaced by a slot split
    /// may now live one level deeper.
    unsafe fn insert_walk(
        &mut self,
        node: *mut Node<K, V>,
        key: K,
        value: V,
        h: u32,
        shift: u32,
        depth: u32,
    ) -> Result<Insertion<K, V>, OutOfMemory> {
        if shift >= HASH_BITS {
            return self.insert_into_bucket(node, key, value, depth);
        }
        let trie = (*node).trie_mut();
        let t = (h >> shift) & SLICE_MASK;
        if !trie.slot_taken(t) {
            let expected = self.expected.max(self.len + 1);
            let slot = trie.insert_entry(t, node, expected, depth, &self.alloc)?;
            Node::write_entry_payload(slot, key, value);
            #[cfg(debug_assertions)]
            (*node).trie().debug_local_invariants(node);
            self.len += 1;
            return Ok(Insertion::Fresh(slot));
        }
        let slot = trie.logical_get(t);
        if (*slot).is_entry() {
            if (*slot).entry().key == key {
                return Ok(Insertion::Existing(slot, value));
            }
            // Slice collision between distinct keys: the entry gives way
            // to a child trie holding it one level down, then the walk
            // continues into that trie.
            self.split_entry_slot(slot, shift, depth)?;
        }
        self.insert_walk(slot, key, value, h, shift + SLICE_BITS, depth + 1)
    }

    /// Replaces an entry slot by a two-slot trie and relocates the
    /// displaced entry into it under its next hash slice. Fails without a
    /// trace if the trie allocation fails.
    unsafe fn split_entry_slot(
        &mut self,
        slot: *mut Node<K, V>,
        shift: u32,
        depth: u32,
    ) -> Result<(), OutOfMemory> {
        let subtrie = BitmapTrie::allocate(&self.alloc, 2)?;
        let Entry { key, value } = Node::read_entry(slot);
        let h = self.hash_key(&key);
        Node::retag_trie(slot, subtrie);
        // The fresh trie has room, so relocation cannot fail.
        self.place_entry(slot, key, value, h, shift + SLICE_BITS, depth + 1)
            .map(|_| ())
    }

    /// Places an entry into a trie that cannot already contain its key;
    /// the entry count is not touched.
    unsafe fn place_entry(
        &mut self,
        node: *mut Node<K, V>,
        key: K,
        value: V,
        h: u32,
        shift: u32,
        depth: u32,
    ) -> Result<*mut Node<K, V>, OutOfMemory> {
        let trie = (*node).trie_mut();
        let t = if shift >= HASH_BITS {
            trie.occupied()
        } else {
            (h >> shift) & SLICE_MASK
        };
        let expected = self.expected.max(self.len + 1);
        let slot = trie.insert_entry(t, node, expected, depth, &self.alloc)?;
        Node::write_entry_payload(slot, key, value);
        Ok(slot)
    }

    /// Insertion once the hash is spent: the subtree under `bucket` is a
    /// flat collision region whose tries fill their slots in order. The
    /// breadth-first membership walk runs to completion before anything is
    /// appended, so a present key is always found first.
    unsafe fn insert_into_bucket(
        &mut self,
        bucket: *mut Node<K, V>,
        key: K,
        value: V,
        depth: u32,
    ) -> Result<Insertion<K, V>, OutOfMemory> {
        let mut queue = VecDeque::new();
        queue.push_back(bucket);
        let mut first_entry = None;
        let mut open_trie = None;
        while let Some(node) = queue.pop_front() {
            let trie = (*node).trie();
            if open_trie.is_none() && trie.occupied() < MAX_CAPACITY {
                open_trie = Some(node);
            }
            for j in 0..trie.occupied() {
                let slot = trie.physical_get(j);
                if (*slot).is_entry() {
                    if (*slot).entry().key == key {
                        return Ok(Insertion::Existing(slot, value));
                    }
                    if first_entry.is_none() {
                        first_entry = Some(slot);
                    }
                } else {
                    queue.push_back(slot);
                }
            }
        }

        if let Some(node) = open_trie {
            let slot = self.place_entry(node, key, value, 0, HASH_BITS, depth)?;
            self.len += 1;
            return Ok(Insertion::Fresh(slot));
        }

        // Every trie in the bucket is full: the first entry seen gives way
        // to a fresh trie holding it and the newcomer.
        let Some(slot) = first_entry else {
            unreachable!("collision bucket without entries");
        };
        let subtrie = BitmapTrie::allocate(&self.alloc, 2)?;
        let displaced = Node::read_entry(slot);
        Node::retag_trie(slot, subtrie);
        self.place_entry(slot, displaced.key, displaced.value, 0, HASH_BITS, depth + 1)?;
        let placed = self.place_entry(slot, key, value, 0, HASH_BITS, depth + 1)?;
        self.len += 1;
        Ok(Insertion::Fresh(placed))
    }
}

impl<K, V, H, A> HashTrieMap<K, V, H, A>
where
    K: Clone,
    V: Clone,
    H: Clone,
    A: Allocator + Clone,
{
    /// Deep copy: a structurally identical map over freshly allocated
    /// nodes, sharing nothing with the source. Seed and hasher carry over,
    /// so the copy resolves and iterates keys exactly like the source.
    pub fn try_clone(&self) -> Result<Self, OutOfMemory> {
        let alloc = self.alloc.clone();
        let root = unsafe { Self::alloc_root_node(&alloc, 0)? };
        let mut copy = Self {
            root,
            len: 0,
            expected: self.expected,
            seed: self.seed,
            hasher: self.hasher.clone(),
            alloc,
            marker: PhantomData,
        };
        unsafe { copy.clone_subtree_from(self.root.as_ptr())? };
        copy.len = self.len;
        Ok(copy)
    }

    /// Iterative pair-stack walk cloning `src_root`'s subtree into this
    /// map's root. Destination bits are set only once the matching slot
    /// holds a live node, so an unwinding clone or a failed allocation
    /// leaves a tree the destructor can walk.
    unsafe fn clone_subtree_from(&mut self, src_root: *const Node<K, V>) -> Result<(), OutOfMemory> {
        let mut stack: Vec<(*const Node<K, V>, *mut Node<K, V>)> =
            vec![(src_root, self.root.as_ptr())];
        while let Some((src, dst)) = stack.pop() {
            let src_trie = (*src).trie();
            *(*dst).trie_mut() = BitmapTrie::allocate(&self.alloc, src_trie.capacity())?;
            let dst_trie = (*dst).trie_mut();
            let mut j = 0;
            for i in 0..MAX_CAPACITY {
                if !src_trie.slot_taken(i) {
                    continue;
                }
                let src_child = src_trie.physical_get(j);
                let dst_slot = dst_trie.physical_slot(j);
                if (*src_child).is_entry() {
                    let entry = (*src_child).entry();
                    Node::tag_entry(dst_slot, dst);
                    Node::write_entry_payload(dst_slot, entry.key.clone(), entry.value.clone());
                } else {
                    Node::write_trie(dst_slot, dst, BitmapTrie::empty());
                    stack.push((src_child, dst_slot));
                }
                dst_trie.set_slot_bit(i);
                j += 1;
            }
        }
        Ok(())
    }
}

impl<K, V, H, A: Allocator> HashTrieMap<K, V, H, A> {
    /// Walks the whole trie asserting the structural invariants: popcounts
    /// against capacities, back-pointers against owning nodes, and the
    /// reachable entry count against `len`. A debugging probe; quadratic
    /// use (per insert) will dominate a workload.
    pub fn debug_check_invariants(&self) {
        let mut entries = 0usize;
        let mut stack = vec![self.root.as_ptr()];
        unsafe {
            assert!((*self.root.as_ptr()).parent().is_null());
            while let Some(node) = stack.pop() {
                let trie = (*node).trie();
                assert!(trie.occupied() <= trie.capacity());
                assert!(trie.capacity() <= MAX_CAPACITY);
                assert!(trie.capacity() > 0 || trie.occupied() == 0);
                for j in 0..trie.occupied() {
                    let slot = trie.physical_get(j);
                    assert_eq!((*slot).parent(), node);
                    if (*slot).is_entry() {
                        entries += 1;
                    } else {
                        assert!((*slot).trie().occupied() > 0);
                        stack.push(slot);
                    }
                }
                for i in 0..MAX_CAPACITY {
                    if trie.slot_taken(i) {
                        assert_eq!(trie.logical_get(i), trie.physical_get(trie.physical_index(i)));
                    }
                }
            }
        }
        assert_eq!(entries, self.len);
    }

    /// Mean number of parent hops from an entry to the root. Zero for an
    /// empty map.
    pub fn debug_average_depth(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        let mut total = 0u64;
        let mut stack = vec![(self.root.as_ptr(), 1u64)];
        unsafe {
            while let Some((node, height)) = stack.pop() {
                let trie = (*node).trie();
                for j in 0..trie.occupied() {
                    let slot = trie.physical_get(j);
                    if (*slot).is_entry() {
                        total += height;
                    } else {
                        stack.push((slot, height + 1));
                    }
                }
            }
        }
        total as f64 / self.len as f64
    }
}

impl<K, V, H, A: Allocator> Drop for HashTrieMap<K, V, H, A> {
    fn drop(&mut self) {
        unsafe {
            self.destroy_subtree(self.root.as_ptr());
            self.alloc
                .deallocate(self.root.cast(), Layout::new::<Node<K, V>>());
        }
    }
}

impl<K, V, H, A> Clone for HashTrieMap<K, V, H, A>
where
    K: Clone,
    V: Clone,
    H: Clone,
    A: Allocator + Clone,
{
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(copy) => copy,
            Err(oom) => oom.handle(),
        }
    }
}

impl<K, V, H, A> Default for HashTrieMap<K, V, H, A>
where
    H: Default,
    A: Allocator + Default,
{
    fn default() -> Self {
        Self::with_hasher_in(1, H::default(), A::default())
    }
}

impl<K, V, H, A> Debug for HashTrieMap<K, V, H, A>
where
    K: Debug,
    V: Debug,
    A: Allocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, H, A: Allocator> IntoIterator for &'a HashTrieMap<K, V, H, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<K, V, H, A> PartialEq for HashTrieMap<K, V, H, A>
where
    K: Hash + Eq,
    V: PartialEq,
    H: BuildHasher,
    A: Allocator,
{
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, H, A> Eq for HashTrieMap<K, V, H, A>
where
    K: Hash + Eq,
    V: Eq,
    H: BuildHasher,
    A: Allocator,
{
}

impl<K, V> FromIterator<(K, V)> for HashTrieMap<K, V>
where
    K: Hash + Eq,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_expected_size(iter.size_hint().0);
        for (key, value) in iter {
            if let Err(oom) = map.put(key, value) {
                oom.handle();
            }
        }
        map
    }
}

impl<K, V, H, A> Extend<(K, V)> for HashTrieMap<K, V, H, A>
where
    K: Hash + Eq,
    H: BuildHasher,
    A: Allocator,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            if let Err(oom) = self.put(key, value) {
                oom.handle();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn seeded(expected: usize, seed: u32) -> HashTrieMap<u64, u64> {
        HashTrieMap::with_seed_in(expected, seed, SipRandomState::with_keys(7, 11), Global)
    }

    #[test]
    fn starts_empty() {
        let map: HashTrieMap<u64, u64> = HashTrieMap::new();
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
        assert_eq!(map.get(&1), None);
        assert_eq!(map.iter().count(), 0);
        map.debug_check_invariants();
    }

    #[test]
    fn insert_then_get() {
        let mut map = HashTrieMap::new();
        let (value, inserted) = map.get_or_insert(42u64, "answer").unwrap();
        assert_eq!(*value, "answer");
        assert!(inserted);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&42), Some(&"answer"));
        assert_eq!(map.get(&43), None);
        assert!(map.contains_key(&42));
    }

    #[test]
    fn get_or_insert_keeps_the_existing_entry() {
        let mut map = HashTrieMap::new();
        map.get_or_insert(1u64, 10u64).unwrap();
        let (value, inserted) = map.get_or_insert(1u64, 99).unwrap();
        assert_eq!(*value, 10);
        assert!(!inserted);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn put_overwrites() {
        let mut map = HashTrieMap::new();
        assert!(!map.put(1u64, 10u64).unwrap());
        assert!(map.put(1u64, 20).unwrap());
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some(&20));
    }

    #[test]
    fn get_or_insert_default_roundtrip() {
        let mut map: HashTrieMap<u64, u64> = HashTrieMap::new();
        *map.get_or_insert_default(5).unwrap() += 3;
        *map.get_or_insert_default(5).unwrap() += 4;
        assert_eq!(map.get(&5), Some(&7));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut map = HashTrieMap::new();
        map.put(3u64, 30u64).unwrap();
        *map.get_mut(&3).unwrap() = 31;
        assert_eq!(map.get(&3), Some(&31));
        assert_eq!(map.get_mut(&4), None);
    }

    #[test]
    fn clear_resets_and_stays_usable() {
        let mut map = seeded(64, 3);
        for k in 0..64u64 {
            map.put(k, k).unwrap();
        }
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.iter().count(), 0);
        assert_eq!(map.get(&7), None);
        map.debug_check_invariants();
        map.put(7, 70).unwrap();
        assert_eq!(map.get(&7), Some(&70));
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut left = seeded(4, 1);
        let mut right = seeded(4, 2);
        left.put(1, 100).unwrap();
        right.put(2, 200).unwrap();
        right.put(3, 300).unwrap();
        left.swap(&mut right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.get(&2), Some(&200));
        assert_eq!(right.len(), 1);
        assert_eq!(right.get(&1), Some(&100));
    }

    #[test]
    fn same_seed_same_iteration_order() {
        let mut left = seeded(256, 99);
        let mut right = seeded(256, 99);
        for k in 0..256u64 {
            left.put(k, k).unwrap();
            right.put(k, k).unwrap();
        }
        itertools::assert_equal(left.iter(), right.iter());
    }

    #[test]
    fn debug_formats_as_a_map() {
        let mut map = HashTrieMap::new();
        map.put(1u64, 2u64).unwrap();
        assert_eq!(format!("{map:?}"), "{1: 2}");
    }

    proptest! {
        #[test]
        fn matches_a_hashmap_model(pairs in prop::collection::vec((0u64..512, any::<u32>()), 0..512)) {
            let mut map = HashTrieMap::new();
            let mut model = HashMap::new();
            for (k, v) in pairs {
                let replaced = map.put(k, v).unwrap();
                prop_assert_eq!(replaced, model.insert(k, v).is_some());
            }
            prop_assert_eq!(map.len(), model.len());
            for (k, v) in &model {
                prop_assert_eq!(map.get(k), Some(v));
            }
            map.debug_check_invariants();
        }

        #[test]
        fn iteration_visits_each_entry_once(keys in prop::collection::vec(any::<u32>(), 0..512)) {
            let mut map = HashTrieMap::new();
            let mut model = HashMap::new();
            for k in keys {
                map.put(k, u64::from(k) + 1).unwrap();
                model.insert(k, u64::from(k) + 1);
            }
            let mut seen = HashMap::new();
            for (k, v) in &map {
                prop_assert!(seen.insert(*k, *v).is_none(), "entry visited twice");
            }
            prop_assert_eq!(seen, model);
        }

        #[test]
        fn cloned_maps_agree(pairs in prop::collection::vec((any::<u16>(), any::<u32>()), 0..256)) {
            let mut map = HashTrieMap::new();
            for (k, v) in pairs {
                map.put(k, v).unwrap();
            }
            let copy = map.clone();
            prop_assert_eq!(copy.len(), map.len());
            copy.debug_check_invariants();
            for (k, v) in &map {
                prop_assert_eq!(copy.get(k), Some(v));
            }
            itertools::assert_equal(map.iter(), copy.iter());
        }
    }
}
