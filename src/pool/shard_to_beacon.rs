/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pool that buffers shard blocks on their way into the beacon chain.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::logging;
use crate::types::{Block, BlockHeight, CryptoHash, ShardId};

use super::cache::SeenCache;
use super::error::BlockPoolError;
use super::PoolConfig;

/// A block that knows which shard chain produced it. Implemented by the chain layer's shard block
/// type so the per-shard pools can route blocks without looking inside them.
pub trait ShardBlock: Block {
    fn shard_id(&self) -> ShardId;
}

/// Buffers the shard blocks that beacon committee members fold into beacon blocks, one independent
/// buffer per source shard.
///
/// Each shard's buffer works like the [BeaconPool](super::BeaconPool): a contiguous valid run plus
/// a pending map, with the same swap-for-better behavior when full. On top of that, a pending slot
/// can be retaken by a block at the same height from a higher round: when a shard committee times
/// out and re-proposes a height, the re-proposal supersedes the stale attempt that is already
/// buffered.
pub struct ShardToBeaconPool<B: ShardBlock> {
    config: PoolConfig,
    inner: RwLock<Inner<B>>,
}

struct Inner<B: ShardBlock> {
    shards: Vec<ShardSlot<B>>,
    seen: SeenCache,
}

struct ShardSlot<B> {
    label: String,
    valid: Vec<B>,
    pending: BTreeMap<BlockHeight, B>,
    latest_valid_height: BlockHeight,
}

impl<B: ShardBlock> ShardToBeaconPool<B> {
    pub fn new(shard_count: usize, config: PoolConfig) -> ShardToBeaconPool<B> {
        ShardToBeaconPool {
            config,
            inner: RwLock::new(Inner {
                shards: (0..shard_count)
                    .map(|shard| ShardSlot {
                        label: format!("shard-to-beacon-{}", shard),
                        valid: Vec::new(),
                        pending: BTreeMap::new(),
                        latest_valid_height: 0,
                    })
                    .collect(),
                seen: SeenCache::new(config.cache_capacity),
            }),
        }
    }

    pub fn add_block(&self, block: B) -> Result<(), BlockPoolError> {
        let mut inner = self.inner.write().unwrap();
        inner.add_block(block, &self.config)
    }

    /// Raise each shard's watermark to the height the beacon chain has folded in, dropping
    /// everything at or below it. `heights` is indexed by shard ID; shards beyond its length are
    /// left alone.
    pub fn set_shard_state(&self, heights: &[BlockHeight]) {
        let mut guard = self.inner.write().unwrap();
        let Inner { shards, seen } = &mut *guard;
        for (shard, height) in heights.iter().enumerate() {
            match shards.get_mut(shard) {
                Some(slot) => slot.remove_to(*height, seen),
                None => break,
            }
        }
    }

    /// The watermark for one shard, or None if the pool does not track that shard.
    pub fn shard_state(&self, shard: ShardId) -> Option<BlockHeight> {
        let inner = self.inner.read().unwrap();
        inner
            .shards
            .get(usize::from(shard))
            .map(|slot| slot.latest_valid_height)
    }

    /// Every shard's valid run, keyed by shard ID.
    pub fn valid_blocks(&self) -> HashMap<ShardId, Vec<B>> {
        let inner = self.inner.read().unwrap();
        inner
            .shards
            .iter()
            .enumerate()
            .map(|(shard, slot)| (shard as ShardId, slot.valid.clone()))
            .collect()
    }

    pub fn valid_block_heights_for(&self, shard: ShardId) -> Vec<BlockHeight> {
        let inner = self.inner.read().unwrap();
        match inner.shards.get(usize::from(shard)) {
            Some(slot) => slot.valid.iter().map(|block| block.height()).collect(),
            None => Vec::new(),
        }
    }

    pub fn valid_block_hashes_for(&self, shard: ShardId) -> Vec<CryptoHash> {
        let inner = self.inner.read().unwrap();
        match inner.shards.get(usize::from(shard)) {
            Some(slot) => slot.valid.iter().map(|block| block.hash()).collect(),
            None => Vec::new(),
        }
    }

    pub fn pending_block_heights_for(&self, shard: ShardId) -> Vec<BlockHeight> {
        let inner = self.inner.read().unwrap();
        match inner.shards.get(usize::from(shard)) {
            Some(slot) => slot.pending.keys().copied().collect(),
            None => Vec::new(),
        }
    }
}

impl<B: ShardBlock> Inner<B> {
    fn add_block(&mut self, block: B, config: &PoolConfig) -> Result<(), BlockPoolError> {
        let shard = block.shard_id();
        let height = block.height();
        let hash = block.hash();

        if usize::from(shard) >= self.shards.len() {
            return Err(BlockPoolError::WrongShard {
                expected: self.shards.len().saturating_sub(1) as ShardId,
                got: shard,
            });
        }
        if self.seen.contains(&hash) {
            return Err(BlockPoolError::OldBlock {
                height,
                latest: self.shards[usize::from(shard)].latest_valid_height,
            });
        }

        let slot = &mut self.shards[usize::from(shard)];
        if slot.valid_hash_at(height) == Some(hash) {
            return Err(BlockPoolError::Duplicate { height });
        }
        if height <= slot.latest_valid_height {
            return Err(BlockPoolError::OldBlock {
                height,
                latest: slot.latest_valid_height,
            });
        }
        match slot.pending.get(&height) {
            // A re-proposal from a later round supersedes the buffered attempt.
            Some(buffered) if block.round() > buffered.round() => {
                slot.pending.insert(height, block);
                slot.promote_pending();
                return Ok(());
            }
            Some(_) => return Err(BlockPoolError::Duplicate { height }),
            None => (),
        }
        if slot.valid.len() + slot.pending.len() >= config.capacity() {
            slot.swap_for_better(&block, config)?;
        }

        slot.insert(block);
        slot.promote_pending();

        Ok(())
    }
}

impl<B: ShardBlock> ShardSlot<B> {
    fn insert(&mut self, block: B) {
        let height = block.height();
        let links = self
            .valid
            .last()
            .map_or(true, |tail| tail.hash() == block.previous_hash());
        if height == self.latest_valid_height + 1 && links {
            self.latest_valid_height = height;
            self.valid.push(block);
        } else {
            self.pending.insert(height, block);
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

    fn swap_for_better(&mut self, incoming: &B, config: &PoolConfig) -> Result<(), BlockPoolError> {
        let worst = self
            .pending
            .iter()
            .max_by_key(|(height, block)| (**height, block.round()))
            .map(|(height, block)| (*height, block.round()));
        match worst {
            Some((height, round)) if (incoming.height(), incoming.round()) < (height, round) => {
                self.pending.remove(&height);
                logging::debug::swapped_pending(&self.label, height, incoming.height());
                Ok(())
            }
            _ => Err(BlockPoolError::PoolCapacityExceeded {
                capacity: config.capacity(),
            }),
        }
    }

    fn remove_to(&mut self, height: BlockHeight, seen: &mut SeenCache) {
        let mut removed = 0;
        for block in &self.valid {
            if block.height() > height {
                break;
            }
            seen.put(block.hash());
            removed += 1;
        }
        self.valid.drain(..removed);
        self.pending.retain(|pending_height, _| *pending_height > height);
        self.latest_valid_height = match self.valid.last() {
            Some(tail) => tail.height(),
            None => self.latest_valid_height.max(height),
        };
        if removed > 0 {
            logging::debug::removed(&self.label, removed, height);
        }
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
