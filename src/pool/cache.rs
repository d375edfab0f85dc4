/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A bounded record of block hashes that have already left a pool.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::CryptoHash;

/// Remembers the hashes of blocks a pool has moved past, whether because the chain layer committed
/// them, a height sweep removed them, or fork resolution evicted them. Pools consult this before
/// admitting a block, so a late redelivery of a block that already left is refused as old rather
/// than buffered again.
///
/// The record is an LRU over hashes. Once a hash ages out, a redelivery of that block is
/// indistinguishable from a never-seen block, which is safe: by then its height is far below the
/// pool's watermark and the height check refuses it anyway.
pub(crate) struct SeenCache {
    hashes: LruCache<CryptoHash, ()>,
}

impl SeenCache {
    pub(crate) fn new(capacity: usize) -> SeenCache {
        SeenCache {
            hashes: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
        }
    }

    pub(crate) fn put(&mut self, hash: CryptoHash) {
        self.hashes.put(hash, ());
    }

    pub(crate) fn contains(&self, hash: &CryptoHash) -> bool {
        self.hashes.contains(hash)
    }
}
