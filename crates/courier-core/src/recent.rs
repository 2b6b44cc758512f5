//! Loop detection: a bounded set of recently-seen message nonces
//!
//! The buffer is a ring of [`GENERATIONS`] nonce sets with per-generation
//! capacity [`GENERATION_CAPACITY`]. Expiry is generational: when the
//! current generation fills up, writes move to the next slot in the ring
//! and its old contents are dropped wholesale, so no per-entry timestamps
//! or LRU bookkeeping are needed. A
//! long-quiescent nonce can be re-admitted after a full ring rotation;
//! replays that old are rejected elsewhere by stale cursors.
//!
//! The whole check-evict-insert sequence runs under one mutex so that two
//! racing calls with the same nonce serialize and the second one sees it.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::frame::NONCE_SIZE;

/// Number of generations in the ring.
pub const GENERATIONS: usize = 8;

/// Total nonce capacity across the ring.
pub const CACHE_SIZE: usize = 256;

/// Nonces held per generation before wholesale eviction.
pub const GENERATION_CAPACITY: usize = CACHE_SIZE / GENERATIONS;

type NonceVal = [u8; NONCE_SIZE];

struct Ring {
    generations: [HashSet<NonceVal>; GENERATIONS],
    current: usize,
}

/// Bounded-memory "have I seen this nonce recently?" set.
pub struct RecentBuffer {
    ring: Mutex<Ring>,
}

impl RecentBuffer {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                generations: std::array::from_fn(|_| {
                    HashSet::with_capacity(GENERATION_CAPACITY)
                }),
                current: 0,
            }),
        }
    }

    /// Returns true iff the nonce was already present somewhere in the
    /// ring. On a miss the nonce is inserted; if the current generation is
    /// full, the index advances and the next generation is vacated before
    /// the insertion, evicting the oldest entries wholesale.
    pub fn seen_recently(&self, nonce: &[u8]) -> bool {
        let mut val = [0u8; NONCE_SIZE];
        let len = nonce.len().min(NONCE_SIZE);
        val[..len].copy_from_slice(&nonce[..len]);

        let mut ring = self.ring.lock().expect("recent buffer lock poisoned");
        let seen = ring.generations.iter().any(|g| g.contains(&val));

        if ring.generations[ring.current].len() >= GENERATION_CAPACITY {
            let idx = (ring.current + 1) % GENERATIONS;
            ring.generations[idx].clear();
            ring.current = idx;
        }

        if !seen {
            let idx = ring.current;
            ring.generations[idx].insert(val);
        }
        seen
    }
}

impl Default for RecentBuffer {
    fn default() -> Self {
        Self::new()
    }
}
