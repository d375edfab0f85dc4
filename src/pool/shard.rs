/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pool that buffers one shard chain's blocks, including the bookkeeping needed to survive
//! short forks near the tip.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::logging;
use crate::types::{Block, BlockHeight, CryptoHash, ShardId};

use super::cache::SeenCache;
use super::error::BlockPoolError;
use super::PoolConfig;

/// How far below the watermark a refused block is still stashed as a possible fork sibling.
const CONFLICT_WINDOW: u64 = 2;

/// Buffers one shard chain's blocks the same way [BeaconPool](super::BeaconPool) buffers beacon
/// blocks, with one addition: fork handling.
///
/// Shard committees can briefly produce competing blocks at the same height, so a block refused as
/// old is not always useless. If it is within [CONFLICT_WINDOW] of the watermark it is stashed in a
/// conflict map keyed by hash. When a later block claims the next height but does not link onto the
/// valid tail, the tail is evicted as a probable orphan and the newcomer's parent is pulled out of
/// the stash, letting the pool hop onto the branch the committee actually extended without waiting
/// for redeliveries.
pub struct ShardPool<B: Block> {
    shard_id: ShardId,
    config: PoolConfig,
    inner: RwLock<Inner<B>>,
}

struct Inner<B: Block> {
    label: String,
    valid: Vec<B>,
    pending: BTreeMap<BlockHeight, B>,
    conflicted: HashMap<CryptoHash, B>,
    latest_valid_height: BlockHeight,
    seen: SeenCache,
}

impl<B: Block> ShardPool<B> {
    /// Create the pool for shard `shard_id`, with its watermark starting at `chain_height`, the
    /// height of the last block of that shard the chain layer has committed.
    pub fn new(shard_id: ShardId, chain_height: BlockHeight, config: PoolConfig) -> ShardPool<B> {
        ShardPool {
            shard_id,
            config,
            inner: RwLock::new(Inner {
                label: format!("shard-{}", shard_id),
                valid: Vec::new(),
                pending: BTreeMap::new(),
                conflicted: HashMap::new(),
                latest_valid_height: chain_height,
                seen: SeenCache::new(config.cache_capacity),
            }),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Offer a block to the pool. A refused block may still leave a trace: old blocks near the
    /// watermark are stashed as possible fork siblings.
    pub fn add_block(&self, block: B) -> Result<(), BlockPoolError> {
        let mut inner = self.inner.write().unwrap();
        inner.add_block(block, &self.config)
    }

    /// Drop every valid block at or below `height`, remembering their hashes so redeliveries are
    /// refused. Called when the chain layer has committed up to `height`.
    pub fn remove_to(&self, height: BlockHeight) {
        let mut inner = self.inner.write().unwrap();
        inner.remove_to(height);
    }

    pub fn latest_valid_height(&self) -> BlockHeight {
        self.inner.read().unwrap().latest_valid_height
    }

    pub fn valid_blocks(&self) -> Vec<B> {
        self.inner.read().unwrap().valid.clone()
    }

    pub fn valid_block_hashes(&self) -> Vec<CryptoHash> {
        let inner = self.inner.read().unwrap();
        inner.valid.iter().map(|block| block.hash()).collect()
    }

    pub fn valid_block_heights(&self) -> Vec<BlockHeight> {
        let inner = self.inner.read().unwrap();
        inner.valid.iter().map(|block| block.height()).collect()
    }

    pub fn pending_block_heights(&self) -> Vec<BlockHeight> {
        let inner = self.inner.read().unwrap();
        inner.pending.keys().copied().collect()
    }

    pub fn conflicted_block_heights(&self) -> Vec<BlockHeight> {
        let inner = self.inner.read().unwrap();
        inner.conflicted.values().map(|block| block.height()).collect()
    }

    /// The valid run, or, for committee members only, the single pending block right above the
    /// watermark when the valid run is empty.
    pub fn valid_or_next_pending(&self, is_committee_member: bool) -> Vec<B> {
        let inner = self.inner.read().unwrap();
        if !inner.valid.is_empty() {
            return inner.valid.clone();
        }
        if is_committee_member {
            if let Some(block) = inner.pending.get(&(inner.latest_valid_height + 1)) {
                return vec![block.clone()];
            }
        }
        Vec::new()
    }
}

impl<B: Block> Inner<B> {
    fn add_block(&mut self, block: B, config: &PoolConfig) -> Result<(), BlockPoolError> {
        let height = block.height();
        let hash = block.hash();

        if self.seen.contains(&hash) {
            return Err(BlockPoolError::OldBlock {
                height,
                latest: self.latest_valid_height,
            });
        }
        if self.valid_hash_at(height) == Some(hash) {
            return Err(BlockPoolError::Duplicate { height });
        }
        if height <= self.latest_valid_height {
            // Old, but possibly the sibling a fork is about to switch to.
            if self.latest_valid_height - height <= CONFLICT_WINDOW {
                logging::debug::conflict_cached(&self.label, &hash, height);
                self.conflicted.insert(hash, block);
                self.prune_conflicted();
            }
            return Err(BlockPoolError::OldBlock {
                height,
                latest: self.latest_valid_height,
            });
        }
        if self.pending.contains_key(&height) {
            return Err(BlockPoolError::Duplicate { height });
        }
        if self.valid.len() + self.pending.len() >= config.capacity() {
            return Err(BlockPoolError::PoolCapacityExceeded {
                capacity: config.capacity(),
            });
        }

        self.insert(block, config);
        self.promote_pending();

        Ok(())
    }

    fn insert(&mut self, block: B, config: &PoolConfig) {
        let height = block.height();
        if height != self.latest_valid_height + 1 {
            self.pending.insert(height, block);
            return;
        }
        let tail_conflicts = self
            .valid
            .last()
            .map_or(false, |tail| tail.hash() != block.previous_hash());
        if tail_conflicts {
            self.resolve_fork(block, config);
        } else {
            self.latest_valid_height = height;
            self.valid.push(block);
        }
    }

    /// The incoming block claims the next height but extends a branch other than the one the valid
    /// tail is on, so the tail is probably orphaned. Evict the tail, park the incoming block, and
    /// re-admit its parent from the conflict stash if it is there. One level of lookback per
    /// incoming block is enough: each re-admitted parent repeats this same check against the new
    /// tail.
    fn resolve_fork(&mut self, successor: B, config: &PoolConfig) {
        let tail = match self.valid.pop() {
            Some(tail) => tail,
            None => return,
        };
        logging::info::fork_tail_evicted(&self.label, &tail.hash(), tail.height());
        self.seen.put(tail.hash());
        self.latest_valid_height = self
            .valid
            .last()
            .map_or(self.latest_valid_height - 1, |new_tail| new_tail.height());

        let parent = self.conflicted.remove(&successor.previous_hash());
        self.pending.insert(successor.height(), successor);
        if let Some(parent) = parent {
            // Already inside the lock; re-admission goes through the lock-free path.
            let _ = self.add_block(parent, config);
        }
    }

    fn promote_pending(&mut self) {
        loop {
            let next_height = self.latest_valid_height + 1;
            let links = match self.pending.get(&next_height) {
                Some(block) => self
                    .valid
                    .last()
                    .map_or(true, |tail| tail.hash() == block.previous_hash()),
                None => break,
            };
            if !links {
                break;
            }
            let block = self.pending.remove(&next_height).unwrap();
            logging::debug::promoted(&self.label, next_height);
            self.latest_valid_height = next_height;
            self.valid.push(block);
        }
    }

    fn remove_to(&mut self, height: BlockHeight) {
        let mut removed = 0;
        for block in &self.valid {
            if block.height() > height {
                break;
            }
            self.seen.put(block.hash());
            removed += 1;
        }
        self.valid.drain(..removed);
        self.pending.retain(|pending_height, _| *pending_height > height);
        self.latest_valid_height = match self.valid.last() {
            Some(tail) => tail.height(),
            None => self.latest_valid_height.max(height),
        };
        self.prune_conflicted();
        if removed > 0 {
            logging::debug::removed(&self.label, removed, height);
        }
    }

    /// Conflict stash entries that have fallen out of the lookback window can no longer be switched
    /// to.
    fn prune_conflicted(&mut self) {
        let watermark = self.latest_valid_height;
        self.conflicted
            .retain(|_, block| block.height() + CONFLICT_WINDOW >= watermark);
    }

    fn valid_hash_at(&self, height: BlockHeight) -> Option<CryptoHash> {
        let first = self.valid.first()?.height();
        if height < first {
            return None;
        }
        self.valid
            .get((height - first) as usize)
            .map(|block| block.hash())
    }
}
