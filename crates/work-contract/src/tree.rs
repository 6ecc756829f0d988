use crate::invariants::{debug_assert_claimed_bit, debug_assert_interior_nonzero};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// COUNTING SIGNAL TREE
// =============================================================================
//
// A lock-free multiset over `[0, capacity)` leaves. The leaf population is
// tracked twice:
//
// - one 64-bit atomic **bitmap** per block of 64 leaves (bit = leaf pending);
// - a forest of complete binary trees of 64-bit atomic **counter nodes**, each
//   packed as `(right_count:32 << 32) | left_count:32`, where the two halves
//   count the set leaves under the node's left and right subtrees.
//
// The forest is split into `sub_trees` equal sub-trees so that root traffic is
// divided across independent cache lines. Counter-tree leaf positions are the
// 32-leaf *halves* of the bitmap blocks, which gives every sub-tree the same
// node shape down to a single-block sub-tree: the bottom counter level always
// chooses a 32-bit half, and the final step claims one bit inside it.
//
// ## Synchronization protocol
//
// `set(leaf)`:
//   1. `fetch_or` the leaf bit (AcqRel). Already set => redundant, stop.
//   2. Climb from the half's parent to the sub-tree root, `fetch_add`ing the
//      left or right addend (AcqRel) one level at a time.
//
// `select(bias)`:
//   1. Probe sub-trees round-robin from the bias-chosen start.
//   2. CAS-decrement descent from the sub-tree root: each committed CAS
//      consumes one unit of the cardinality and commits to a side. Both sides
//      zero at the root => the sub-tree is (advisorily) empty.
//   3. At the bitmap, claim a set bit of the chosen half with `fetch_and`.
//
// Because `set` publishes bottom-up (bit first, root last) and `select`
// consumes top-down, a unit visible at the root always has a fully published
// path below it: a descent that decremented the root finds a non-zero side at
// every level, and a set bit in the half it arrives at. The inverse skews are
// benign — a freshly set leaf may be invisible at the root for a moment, which
// only makes `is_empty` advisory.
//
// The counter RMWs use acquire/release; the bitmap RMWs use AcqRel so that
// writes made before `set(leaf)` happen-before whatever follows the `select`
// that claims `leaf` (the availability tree relies on this to publish slot
// teardown to the next reservation).
// =============================================================================

const LEFT_ADDEND: u64 = 0x0000_0000_0000_0001;
const LEFT_MASK: u64 = 0x0000_0000_ffff_ffff;
const RIGHT_ADDEND: u64 = 0x0000_0001_0000_0000;

const LOW_HALF: u64 = 0x0000_0000_ffff_ffff;
const HIGH_HALF: u64 = 0xffff_ffff_0000_0000;

/// Hierarchical counting signal tree over `[0, capacity)` leaves.
///
/// Supports concurrent `set` and `select` with lock-free semantics. `select`
/// is available in two flavors: bias-directed (spreads worker traversals) and
/// balance-aware (keeps the populated side large; used for slot allocation).
pub struct SignalTree {
    capacity: u64,
    sub_trees: usize,
    leaves_per_sub_tree: u64,
    blocks_per_sub_tree: usize,
    /// Heap-indexed counter nodes per sub-tree: indices `[1, 2 * blocks)`
    /// are internal nodes, index 0 is unused. `2 * blocks` is also the count
    /// of virtual leaf positions (the 32-leaf halves).
    nodes_per_sub_tree: usize,
    nodes: Box<[CachePadded<AtomicU64>]>,
    bitmaps: Box<[CachePadded<AtomicU64>]>,
}

impl SignalTree {
    /// Creates an empty tree.
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a power of two >= 64, `sub_trees` is a
    /// power of two, and each sub-tree holds at least 64 leaves.
    pub fn new(capacity: u64, sub_trees: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 64,
            "capacity must be a power of two >= 64"
        );
        assert!(sub_trees.is_power_of_two(), "sub_trees must be a power of two");
        let leaves_per_sub_tree = capacity / sub_trees as u64;
        assert!(
            leaves_per_sub_tree >= 64,
            "each sub-tree must hold at least 64 leaves"
        );

        let blocks_per_sub_tree = (leaves_per_sub_tree / 64) as usize;
        let nodes_per_sub_tree = blocks_per_sub_tree * 2;

        let mut nodes = Vec::with_capacity(sub_trees * nodes_per_sub_tree);
        nodes.resize_with(sub_trees * nodes_per_sub_tree, || {
            CachePadded::new(AtomicU64::new(0))
        });
        let mut bitmaps = Vec::with_capacity(sub_trees * blocks_per_sub_tree);
        bitmaps.resize_with(sub_trees * blocks_per_sub_tree, || {
            CachePadded::new(AtomicU64::new(0))
        });

        Self {
            capacity,
            sub_trees,
            leaves_per_sub_tree,
            blocks_per_sub_tree,
            nodes_per_sub_tree,
            nodes: nodes.into_boxed_slice(),
            bitmaps: bitmaps.into_boxed_slice(),
        }
    }

    /// Creates a tree with every leaf set (availability-tree initial state).
    pub fn new_full(capacity: u64, sub_trees: usize) -> Self {
        let mut tree = Self::new(capacity, sub_trees);
        for bm in &mut tree.bitmaps {
            *bm.get_mut() = u64::MAX;
        }
        // A node at heap depth d covers `leaves_per_sub_tree >> d` leaves,
        // half of them on each side.
        for t in 0..tree.sub_trees {
            let base = t * tree.nodes_per_sub_tree;
            for i in 1..tree.nodes_per_sub_tree {
                let depth = i.ilog2();
                let side = tree.leaves_per_sub_tree >> (depth + 1);
                *tree.nodes[base + i].get_mut() = (side << 32) | side;
            }
        }
        tree
    }

    /// Total number of leaves.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Advisory: true when every sub-tree root counts zero set leaves.
    ///
    /// A concurrent `set` whose climb has not reached the root yet is not
    /// observed; adequate for the sleep/wake protocol, not a linearizable
    /// emptiness test.
    pub fn is_empty(&self) -> bool {
        (0..self.sub_trees).all(|t| self.nodes[t * self.nodes_per_sub_tree + 1].load(Ordering::Acquire) == 0)
    }

    /// Advisory cardinality: sum of the sub-tree root totals.
    pub fn count(&self) -> u64 {
        (0..self.sub_trees)
            .map(|t| {
                let v = self.nodes[t * self.nodes_per_sub_tree + 1].load(Ordering::Acquire);
                (v >> 32) + (v & LEFT_MASK)
            })
            .sum()
    }

    /// Marks `leaf` as set.
    ///
    /// Returns `true` if the bit transitioned 0 -> 1 (the counter path ran),
    /// `false` for a redundant set (no counter traffic, so a leaf can never
    /// be over-counted).
    pub fn set(&self, leaf: u64) -> bool {
        debug_assert!(leaf < self.capacity);
        let t = (leaf / self.leaves_per_sub_tree) as usize;
        let j = leaf % self.leaves_per_sub_tree;
        let block = (j / 64) as usize;
        let bit = j % 64;

        let bitmap = &self.bitmaps[t * self.blocks_per_sub_tree + block];
        let prev = bitmap.fetch_or(1 << bit, Ordering::AcqRel);
        if prev & (1 << bit) != 0 {
            return false;
        }

        // Publish bottom-up: the unit becomes selectable only once the root
        // increment lands.
        let base = t * self.nodes_per_sub_tree;
        let mut child = self.nodes_per_sub_tree + (j / 32) as usize;
        while child > 1 {
            let parent = child >> 1;
            let addend = if child & 1 == 0 { LEFT_ADDEND } else { RIGHT_ADDEND };
            self.nodes[base + parent].fetch_add(addend, Ordering::AcqRel);
            child = parent;
        }
        true
    }

    /// Finds and claims a set leaf, preferring the traversal encoded in
    /// `bias`. Returns `None` when every sub-tree is empty.
    ///
    /// `bias` is a pure hint: its high leaf bits pick the starting sub-tree
    /// and the per-level side preference, its low bits the preferred bit
    /// within the final 32-leaf half. Distinct biases steer concurrent
    /// callers toward distinct cache lines.
    #[inline]
    pub fn select(&self, bias: u64) -> Option<u64> {
        self.select_impl(bias, false)
    }

    /// Like [`select`](Self::select), but at each node takes the side with
    /// the larger count, keeping the remaining population balanced. Used by
    /// the availability tree so slot handout spreads across the index space.
    #[inline]
    pub fn select_balanced(&self, bias: u64) -> Option<u64> {
        self.select_impl(bias, true)
    }

    fn select_impl(&self, bias: u64, balanced: bool) -> Option<u64> {
        let start = ((bias & (self.capacity - 1)) / self.leaves_per_sub_tree) as usize;
        for probe in 0..self.sub_trees {
            let t = (start + probe) & (self.sub_trees - 1);
            if let Some(leaf) = self.select_in_sub_tree(t, bias, balanced) {
                return Some(leaf);
            }
        }
        None
    }

    fn select_in_sub_tree(&self, t: usize, bias: u64, balanced: bool) -> Option<u64> {
        let base = t * self.nodes_per_sub_tree;
        let hint = bias & (self.leaves_per_sub_tree - 1);

        'restart: loop {
            let mut index = 1usize;
            // The root splits the sub-tree's leaf space in half; each level
            // below halves again, consuming one hint bit.
            let mut level_bit = self.leaves_per_sub_tree >> 1;

            while index < self.nodes_per_sub_tree {
                let node = &self.nodes[base + index];
                let mut current = node.load(Ordering::Acquire);
                let went_right = loop {
                    let left = current & LEFT_MASK;
                    let right = current >> 32;
                    if left | right == 0 {
                        if index == 1 {
                            // Sub-tree is empty; let the caller probe the next one.
                            return None;
                        }
                        // A unit reserved at the parent is always published
                        // here first; an empty interior node means a lost
                        // unit elsewhere. Restart rather than spin.
                        debug_assert_interior_nonzero!(index);
                        continue 'restart;
                    }
                    let prefer_right = if balanced { right > left } else { hint & level_bit != 0 };
                    let go_right = if prefer_right { right != 0 } else { left == 0 };
                    let addend = if go_right { RIGHT_ADDEND } else { LEFT_ADDEND };
                    match node.compare_exchange_weak(
                        current,
                        current - addend,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break go_right,
                        Err(observed) => current = observed,
                    }
                };
                index = (index << 1) | usize::from(went_right);
                level_bit >>= 1;
            }

            // `index` now names a 32-leaf half; claim one of its set bits.
            let half = index - self.nodes_per_sub_tree;
            let block = half >> 1;
            let half_mask = if half & 1 == 0 { LOW_HALF } else { HIGH_HALF };
            let bitmap = &self.bitmaps[t * self.blocks_per_sub_tree + block];

            let mut bits = bitmap.load(Ordering::Acquire) & half_mask;
            loop {
                if bits == 0 {
                    // Raced to exhaustion; the counters have already moved on.
                    continue 'restart;
                }
                let bit = pick_bit(bits, (bias & 63) as u32);
                debug_assert_claimed_bit!(1u64 << bit, half_mask);
                let prev = bitmap.fetch_and(!(1u64 << bit), Ordering::AcqRel);
                if prev & (1 << bit) != 0 {
                    return Some(
                        t as u64 * self.leaves_per_sub_tree + block as u64 * 64 + u64::from(bit),
                    );
                }
                bits = prev & half_mask & !(1u64 << bit);
            }
        }
    }
}

/// Picks the first set bit at or (cyclically) after `hint`.
#[inline]
fn pick_bit(bits: u64, hint: u32) -> u32 {
    debug_assert!(bits != 0);
    let rotated = bits.rotate_right(hint);
    (rotated.trailing_zeros() + hint) & 63
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_select() {
        let tree = SignalTree::new(256, 4);
        assert!(tree.is_empty());
        assert!(tree.set(17));
        assert!(!tree.is_empty());
        assert_eq!(tree.count(), 1);
        assert_eq!(tree.select(0), Some(17));
        assert!(tree.is_empty());
        assert_eq!(tree.select(0), None);
    }

    #[test]
    fn test_redundant_set_does_not_over_count() {
        let tree = SignalTree::new(64, 1);
        assert!(tree.set(5));
        assert!(!tree.set(5));
        assert_eq!(tree.count(), 1);
        assert_eq!(tree.select(0), Some(5));
        assert_eq!(tree.select(0), None);
    }

    #[test]
    fn test_select_drains_every_leaf() {
        let tree = SignalTree::new(512, 8);
        for leaf in 0..512 {
            assert!(tree.set(leaf));
        }
        assert_eq!(tree.count(), 512);

        let mut seen = vec![false; 512];
        for i in 0..512u64 {
            let leaf = tree.select(i * 31).expect("leaf available");
            assert!(!seen[leaf as usize], "leaf {leaf} claimed twice");
            seen[leaf as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_bias_steers_toward_leaf() {
        let tree = SignalTree::new(256, 1);
        tree.set(3);
        tree.set(200);
        // A bias pointing into the upper range should claim the upper leaf.
        assert_eq!(tree.select(200), Some(200));
        assert_eq!(tree.select(200), Some(3));
    }

    #[test]
    fn test_bias_picks_starting_sub_tree() {
        let tree = SignalTree::new(256, 4);
        // One leaf in each 64-leaf sub-tree.
        for t in 0..4u64 {
            tree.set(t * 64 + 10);
        }
        assert_eq!(tree.select(2 * 64), Some(2 * 64 + 10));
        assert_eq!(tree.select(0), Some(10));
    }

    #[test]
    fn test_new_full_hands_out_all_leaves() {
        let tree = SignalTree::new_full(256, 4);
        assert_eq!(tree.count(), 256);
        let mut seen = vec![false; 256];
        for i in 0..256u64 {
            let leaf = tree.select_balanced(i).expect("free leaf");
            assert!(!seen[leaf as usize]);
            seen[leaf as usize] = true;
        }
        assert_eq!(tree.select_balanced(0), None);
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_balanced_select_spreads_handout() {
        let tree = SignalTree::new_full(128, 1);
        let first = tree.select_balanced(0).unwrap();
        let second = tree.select_balanced(0).unwrap();
        // Consecutive balanced picks land in opposite halves of the space.
        assert_ne!(first < 64, second < 64);
    }

    #[test]
    fn test_single_block_sub_trees() {
        // 64 leaves per sub-tree exercises the half-split root shape.
        let tree = SignalTree::new(128, 2);
        tree.set(63);
        tree.set(64);
        assert_eq!(tree.count(), 2);
        let a = tree.select(0).unwrap();
        let b = tree.select(0).unwrap();
        assert_eq!(a.min(b), 63);
        assert_eq!(a.max(b), 64);
    }

    #[test]
    fn test_set_select_interleaved_reuse() {
        let tree = SignalTree::new(64, 1);
        for round in 0..100u64 {
            let leaf = round % 64;
            assert!(tree.set(leaf));
            assert_eq!(tree.select(round), Some(leaf));
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_concurrent_set_select_conservation() {
        use std::sync::Arc;
        use std::thread;

        let tree = Arc::new(SignalTree::new(1024, 16));
        let claimed = Arc::new(AtomicU64::new(0));
        const PER_SETTER: u64 = 256;

        let mut handles = vec![];
        for s in 0..4u64 {
            let tree = Arc::clone(&tree);
            handles.push(thread::spawn(move || {
                // Disjoint leaf ranges: every set is a 0 -> 1 transition.
                for i in 0..PER_SETTER {
                    assert!(tree.set(s * PER_SETTER + i));
                }
            }));
        }
        for w in 0..4u64 {
            let tree = Arc::clone(&tree);
            let claimed = Arc::clone(&claimed);
            handles.push(thread::spawn(move || {
                let mut bias = w.wrapping_mul(0x9e37_79b9_7f4a_7c15);
                let mut misses = 0u32;
                while misses < 1_000 {
                    bias = bias.wrapping_add(0x9e37_79b9_7f4a_7c15);
                    if tree.select(bias).is_some() {
                        claimed.fetch_add(1, Ordering::Relaxed);
                        misses = 0;
                    } else {
                        misses += 1;
                        thread::yield_now();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(claimed.load(Ordering::Relaxed) + tree.count(), 4 * PER_SETTER);
    }
}
