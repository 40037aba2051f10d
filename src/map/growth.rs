//! Capacity oracle for trie slot arrays.
//!
//! In a well-spread trie shallow nodes end up wide (close to all 32 slots
//! occupied) while deep nodes stay narrow. Pre-sizing a node's slot array to
//! its likely final width avoids reallocating a hot branch on every few
//! insertions without handing 32 slots to nodes that will never fill them.

/// Branching factor of the trie, and the widest a slot array can get.
pub(crate) const MAX_CAPACITY: u32 = 32;

const MAX_LEVEL: usize = 4;
const MAX_GENERATION: usize = 22;

/// Expected final width of a node, indexed by trie level and container
/// generation (⌈log₂ expected_total⌉). Every guess is a rung of [`LADDER`],
/// which keeps the oracle monotone in the expected total: a rung at or
/// above `required` can never undercut the rounded-up width a smaller
/// guess would have produced.
#[rustfmt::skip]
const WIDTH_GUESS: [[u8; MAX_GENERATION + 1]; MAX_LEVEL + 1] = [
    [1, 2, 3, 5, 8, 13, 21, 29, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32],
    [2, 2, 2, 2, 2,  2,  3,  5,  8, 13, 21, 29, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32],
    [2, 2, 2, 2, 2,  2,  2,  2,  2,  2,  2,  3,  5,  8, 13, 21, 29, 32, 32, 32, 32, 32, 32],
    [2, 2, 2, 2, 2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  3,  5,  8, 13, 21, 29, 32],
    [2, 2, 2, 2, 2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  2,  3,  5],
];

/// Round-up ladder for nodes that outgrow their guess, indexed by the
/// required slot count. Fibonacci-like steps keep the reallocation count
/// logarithmic in the final width.
#[rustfmt::skip]
const LADDER: [u8; MAX_CAPACITY as usize + 1] = [
     1,  1,  2,  3,  5,  5,  8,  8,  8, 13, 13, 13, 13, 13, 21, 21, 21,
    21, 21, 21, 21, 21, 29, 29, 29, 29, 29, 29, 29, 29, 32, 32, 32,
];

/// ⌈log₂ expected_total⌉ clamped to the table width.
fn generation(expected_total: usize) -> usize {
    let ceil = match expected_total {
        0 | 1 => 0,
        n => (n - 1).ilog2() as usize + 1,
    };
    ceil.min(MAX_GENERATION)
}

/// Capacity to allocate for a slot array that must hold `required` nodes,
/// in a container expected to reach `expected_total` entries, at trie level
/// `depth`. Always in `[required, 32]`. Levels past the bottom of the table
/// behave as the bottom level at generation zero.
pub(crate) fn alloc_capacity(required: u32, expected_total: usize, depth: u32) -> u32 {
    debug_assert!(required <= MAX_CAPACITY);
    let guess = if depth as usize > MAX_LEVEL {
        WIDTH_GUESS[MAX_LEVEL][0]
    } else {
        WIDTH_GUESS[depth as usize][generation(expected_total)]
    } as u32;
    if required > guess {
        LADDER[required as usize] as u32
    } else {
        guess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ladder_covers_every_required_count() {
        for required in 0..=MAX_CAPACITY {
            let rounded = LADDER[required as usize] as u32;
            assert!(rounded >= required.max(1));
            assert!(rounded <= MAX_CAPACITY);
        }
    }

    #[test]
    fn guesses_shrink_with_depth() {
        for generation in 0..=MAX_GENERATION {
            for level in 1..=MAX_LEVEL {
                assert!(WIDTH_GUESS[level][generation] <= WIDTH_GUESS[level - 1][generation].max(2));
            }
        }
    }

    #[test]
    fn guesses_grow_with_generation() {
        for level in 0..=MAX_LEVEL {
            for generation in 1..=MAX_GENERATION {
                assert!(WIDTH_GUESS[level][generation] >= WIDTH_GUESS[level][generation - 1]);
            }
        }
    }

    #[test]
    fn deep_levels_collapse_to_the_bottom_row() {
        assert_eq!(alloc_capacity(1, 1 << 20, 9), alloc_capacity(1, 1, 4));
        assert_eq!(alloc_capacity(2, 1 << 20, 40), 2);
    }

    #[test]
    fn root_of_a_small_container_gets_one_slot() {
        assert_eq!(alloc_capacity(1, 1, 0), 1);
    }

    #[test]
    fn root_of_a_large_container_gets_full_width() {
        assert_eq!(alloc_capacity(1, 1 << 17, 0), 32);
    }

    proptest! {
        #[test]
        fn capacity_stays_in_contract_bounds(
            required in 0u32..=32,
            expected in 0usize..=1 << 24,
            depth in 0u32..=12,
        ) {
            let capacity = alloc_capacity(required, expected, depth);
            prop_assert!(capacity >= required);
            prop_assert!(capacity <= MAX_CAPACITY);
        }

        #[test]
        fn capacity_is_monotone_in_required(
            required in 1u32..=32,
            expected in 0usize..=1 << 24,
            depth in 0u32..=12,
        ) {
            prop_assert!(
                alloc_capacity(required, expected, depth)
                    >= alloc_capacity(required - 1, expected, depth)
            );
        }

        #[test]
        fn capacity_is_monotone_in_expected_total(
            required in 0u32..=32,
            expected in 1usize..=1 << 24,
            depth in 0u32..=12,
        ) {
            prop_assert!(
                alloc_capacity(required, expected, depth)
                    >= alloc_capacity(required, expected / 2, depth)
            );
        }
    }
}
