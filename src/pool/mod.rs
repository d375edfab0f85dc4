/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block pools: bounded buffers that accept blocks arriving in any order and release them as
//! contiguous, hash-linked sequences.
//!
//! A node keeps one [BeaconPool] for beacon blocks, one [ShardPool] per shard chain it follows, one
//! [CrossShardPool] per shard for blocks shipped to it from other shards, and a single
//! [ShardToBeaconPool] for the shard blocks the beacon chain folds in. All four variants share the
//! same skeleton: a contiguous *valid* sequence ready for the chain layer to consume, a *pending*
//! map of blocks that arrived out of order, and a bounded [record](cache) of blocks that have
//! already left. They differ in how a block earns its way from pending to valid, which is each
//! variant's own business.
//!
//! Every pool takes care of its own locking. Methods take `&self`, may be called from any thread,
//! and never call back into the chain layer, so holding several pools and calling them from
//! consensus actors, the sweeper, and RPC handlers at once is fine.

pub mod beacon;
pub mod cross_shard;
pub mod error;
pub mod registry;
pub mod shard;
pub mod shard_to_beacon;

pub(crate) mod cache;

pub use beacon::BeaconPool;
pub use cross_shard::{CrossShardBlock, CrossShardPool, NextCrossShardHeight};
pub use error::BlockPoolError;
pub use registry::{start_sweeper, PoolRegistry, Sweeper};
pub use shard::ShardPool;
pub use shard_to_beacon::{ShardBlock, ShardToBeaconPool};

/// Capacity limits applied by every pool variant. For the per-shard pool variants the limits apply
/// to each shard's buffer separately.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub max_valid_blocks: usize,
    pub max_pending_blocks: usize,

    /// Number of departed-block hashes to remember. See [cache].
    pub cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            max_valid_blocks: 1000,
            max_pending_blocks: 1000,
            cache_capacity: 2000,
        }
    }
}

impl PoolConfig {
    /// The combined valid-plus-pending block count a pool refuses to grow past.
    pub fn capacity(&self) -> usize {
        self.max_valid_blocks + self.max_pending_blocks
    }
}
