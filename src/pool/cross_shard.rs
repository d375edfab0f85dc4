/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pool that buffers blocks shipped from other shards, gated by beacon confirmations instead of
//! hash linkage.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::logging;
use crate::types::{Block, BlockHeight, ShardId};

use super::cache::SeenCache;
use super::error::BlockPoolError;
use super::PoolConfig;

/// A block that carries data from one shard to another. Implemented by the chain layer's
/// cross-shard block type.
pub trait CrossShardBlock: Block {
    /// The shard that produced the block.
    fn from_shard(&self) -> ShardId;

    /// The shard the block's cross-shard data is destined for.
    fn to_shard(&self) -> ShardId;
}

/// Answers, from beacon chain records, which source-shard heights actually carry cross-shard data
/// for a destination shard. Implemented by the chain layer over its view of the beacon chain.
pub trait NextCrossShardHeight: Send + Sync + 'static {
    /// The first height strictly greater than `after` at which `from_shard` committed a block
    /// carrying cross-shard data for `to_shard`, or None if the beacon chain has not confirmed one
    /// yet.
    fn next_cross_shard_height(
        &self,
        from_shard: ShardId,
        to_shard: ShardId,
        after: BlockHeight,
    ) -> Option<BlockHeight>;
}

/// Buffers blocks shipped to one destination shard from every other shard, one independent buffer
/// per source.
///
/// Cross-shard blocks are not hash-linked to each other, so contiguity means nothing here. What
/// orders them instead is the beacon chain: a source shard only ships cross-shard data at the
/// heights the beacon chain confirms, and the pool's [oracle](NextCrossShardHeight) exposes that
/// confirmed height sequence. Incoming blocks always park in pending; admission to valid walks the
/// confirmed sequence in order, moving each pending block across as its height comes up and
/// stopping at the first confirmed height that has not arrived yet.
///
/// Pending blocks below the first height the walk expects are dropped when the walk runs: the
/// beacon chain has provably confirmed past them. Pending blocks that sit in a gap further along
/// the sequence are kept for now and cleared by a later walk, once the watermark has moved past
/// them.
pub struct CrossShardPool<B: CrossShardBlock, O: NextCrossShardHeight> {
    to_shard: ShardId,
    config: PoolConfig,
    oracle: O,
    inner: RwLock<Inner<B>>,
}

struct Inner<B> {
    sources: Vec<SourceSlot<B>>,
    seen: SeenCache,
}

struct SourceSlot<B> {
    label: String,
    valid: Vec<B>,
    pending: BTreeMap<BlockHeight, B>,

    /// The last source-shard height admitted to valid (or reported committed by the chain layer).
    confirmed_height: BlockHeight,
}

impl<B: CrossShardBlock, O: NextCrossShardHeight> CrossShardPool<B, O> {
    /// Create the pool for blocks destined for shard `to_shard`, accepting blocks from
    /// `shard_count` source shards.
    pub fn new(to_shard: ShardId, shard_count: usize, oracle: O, config: PoolConfig) -> CrossShardPool<B, O> {
        CrossShardPool {
            to_shard,
            config,
            oracle,
            inner: RwLock::new(Inner {
                sources: (0..shard_count)
                    .map(|from| SourceSlot {
                        label: format!("cross-shard-{}-{}", from, to_shard),
                        valid: Vec::new(),
                        pending: BTreeMap::new(),
                        confirmed_height: 0,
                    })
                    .collect(),
                seen: SeenCache::new(config.cache_capacity),
            }),
        }
    }

    pub fn to_shard(&self) -> ShardId {
        self.to_shard
    }

    /// Offer a block to the pool. The block parks in its source shard's pending buffer; if it turns
    /// out to be the next confirmed height, the admission walk moves it (and anything queued up
    /// behind it) to valid right away.
    pub fn add_cross_shard_block(&self, block: B) -> Result<(), BlockPoolError> {
        if block.to_shard() != self.to_shard {
            return Err(BlockPoolError::WrongShard {
                expected: self.to_shard,
                got: block.to_shard(),
            });
        }
        let from_shard = block.from_shard();
        let height = block.height();
        let hash = block.hash();

        let mut guard = self.inner.write().unwrap();
        let Inner { sources, seen } = &mut *guard;
        let slot = sources
            .get_mut(usize::from(from_shard))
            .ok_or(BlockPoolError::WrongShard {
                expected: self.to_shard,
                got: from_shard,
            })?;

        if seen.contains(&hash) {
            return Err(BlockPoolError::OldBlock {
                height,
                latest: slot.confirmed_height,
            });
        }
        if slot.valid.iter().any(|valid| valid.hash() == hash) {
            return Err(BlockPoolError::Duplicate { height });
        }
        if height <= slot.confirmed_height {
            return Err(BlockPoolError::OldBlock {
                height,
                latest: slot.confirmed_height,
            });
        }
        if slot.pending.contains_key(&height) {
            return Err(BlockPoolError::Duplicate { height });
        }
        if slot.valid.len() + slot.pending.len() >= self.config.capacity() {
            return Err(BlockPoolError::PoolCapacityExceeded {
                capacity: self.config.capacity(),
            });
        }

        slot.pending.insert(height, block);
        Self::admit_confirmed(slot, seen, &self.oracle, from_shard, self.to_shard);

        Ok(())
    }

    /// Run the admission walk for every source shard, returning how many blocks moved to valid.
    /// Called periodically by the sweeper: beacon confirmations can land after the blocks they
    /// confirm.
    pub fn update_pool(&self) -> usize {
        let mut guard = self.inner.write().unwrap();
        let Inner { sources, seen } = &mut *guard;
        let mut admitted = 0;
        for (from_shard, slot) in sources.iter_mut().enumerate() {
            admitted += Self::admit_confirmed(slot, seen, &self.oracle, from_shard as ShardId, self.to_shard);
        }
        admitted
    }

    /// Raise one source shard's watermark to `height`, dropping everything at or below it. Called
    /// when the chain layer has consumed that shard's cross-shard data up to `height`.
    pub fn set_shard_state(&self, from_shard: ShardId, height: BlockHeight) {
        let mut guard = self.inner.write().unwrap();
        let Inner { sources, seen } = &mut *guard;
        let slot = match sources.get_mut(usize::from(from_shard)) {
            Some(slot) => slot,
            None => return,
        };
        let mut removed = 0;
        for block in &slot.valid {
            if block.height() > height {
                break;
            }
            seen.put(block.hash());
            removed += 1;
        }
        slot.valid.drain(..removed);
        slot.pending.retain(|pending_height, _| *pending_height > height);
        slot.confirmed_height = slot.confirmed_height.max(height);
        if removed > 0 {
            logging::debug::removed(&slot.label, removed, height);
        }
        Self::admit_confirmed(slot, seen, &self.oracle, from_shard, self.to_shard);
    }

    /// The watermark for one source shard, or None if the pool does not track that shard.
    pub fn shard_state(&self, from_shard: ShardId) -> Option<BlockHeight> {
        let inner = self.inner.read().unwrap();
        inner
            .sources
            .get(usize::from(from_shard))
            .map(|slot| slot.confirmed_height)
    }

    /// The next height the beacon chain has confirmed for `from_shard` past the watermark. Errs
    /// with [BlockPoolError::MissingCrossShardConfirmation] when the beacon chain has not confirmed
    /// one, which callers assembling a block use to tell "all cross-shard data is in" apart from
    /// "still waiting".
    pub fn next_confirmed_height(&self, from_shard: ShardId) -> Result<BlockHeight, BlockPoolError> {
        let inner = self.inner.read().unwrap();
        let slot = inner
            .sources
            .get(usize::from(from_shard))
            .ok_or(BlockPoolError::WrongShard {
                expected: self.to_shard,
                got: from_shard,
            })?;
        self.oracle
            .next_cross_shard_height(from_shard, self.to_shard, slot.confirmed_height)
            .ok_or(BlockPoolError::MissingCrossShardConfirmation {
                shard: from_shard,
                height: slot.confirmed_height,
            })
    }

    /// Every source shard's valid run, keyed by source shard ID.
    pub fn valid_blocks(&self) -> HashMap<ShardId, Vec<B>> {
        let inner = self.inner.read().unwrap();
        inner
            .sources
            .iter()
            .enumerate()
            .map(|(from_shard, slot)| (from_shard as ShardId, slot.valid.clone()))
            .collect()
    }

    pub fn valid_block_heights_from(&self, from_shard: ShardId) -> Vec<BlockHeight> {
        let inner = self.inner.read().unwrap();
        match inner.sources.get(usize::from(from_shard)) {
            Some(slot) => slot.valid.iter().map(|block| block.height()).collect(),
            None => Vec::new(),
        }
    }

    pub fn pending_block_heights_from(&self, from_shard: ShardId) -> Vec<BlockHeight> {
        let inner = self.inner.read().unwrap();
        match inner.sources.get(usize::from(from_shard)) {
            Some(slot) => slot.pending.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Walk the beacon-confirmed height sequence from the watermark, admitting pending blocks in
    /// order. Returns how many were admitted.
    fn admit_confirmed(
        slot: &mut SourceSlot<B>,
        seen: &mut SeenCache,
        oracle: &O,
        from_shard: ShardId,
        to_shard: ShardId,
    ) -> usize {
        let mut expected = match oracle.next_cross_shard_height(from_shard, to_shard, slot.confirmed_height) {
            Some(height) => height,
            None => return 0,
        };

        // Everything below the first expected height has been confirmed past and can never become
        // valid.
        let stale: Vec<BlockHeight> = slot.pending.range(..expected).map(|(height, _)| *height).collect();
        for height in stale {
            if let Some(block) = slot.pending.remove(&height) {
                seen.put(block.hash());
                logging::debug::cross_shard_dropped(&slot.label, from_shard, height);
            }
        }

        let mut admitted = 0;
        loop {
            let head = match slot.pending.keys().next() {
                Some(height) => *height,
                None => break,
            };
            if head != expected {
                break;
            }
            let block = slot.pending.remove(&head).unwrap();
            slot.confirmed_height = head;
            logging::debug::cross_shard_admitted(&slot.label, from_shard, head);
            slot.valid.push(block);
            admitted += 1;
            expected = match oracle.next_cross_shard_height(from_shard, to_shard, slot.confirmed_height) {
                Some(height) => height,
                None => break,
            };
        }
        admitted
    }
}
