/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pool that buffers beacon blocks until the chain layer is ready to commit them in order.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::logging;
use crate::types::{Block, BlockHeight, CryptoHash};

use super::cache::SeenCache;
use super::error::BlockPoolError;
use super::PoolConfig;

const POOL_LABEL: &str = "beacon";

/// Buffers beacon blocks that arrive from the network in any order, and keeps the longest
/// contiguous, hash-linked run of them ready for the chain layer to consume.
///
/// The pool tracks a `latest_valid_height`: the height of the tail of the contiguous run. A block
/// exactly one above it that links onto the tail joins the run immediately; blocks further ahead
/// wait in a pending map, one slot per height, and are promoted as the run reaches them. Old blocks
/// and duplicates are refused outright: the beacon committee does not fork near the tip the way
/// shard committees can, so there is no conflict stash here. That bookkeeping lives in
/// [ShardPool](super::ShardPool).
///
/// When the pool is full, an incoming block can still displace the worst pending block (highest
/// height, then highest round) if it is better than it, so a burst of far-future blocks cannot
/// starve out the blocks the chain actually needs next.
pub struct BeaconPool<B: Block> {
    config: PoolConfig,
    inner: RwLock<Inner<B>>,
}

struct Inner<B: Block> {
    valid: Vec<B>,
    pending: BTreeMap<BlockHeight, B>,
    latest_valid_height: BlockHeight,
    seen: SeenCache,
}

impl<B: Block> BeaconPool<B> {
    /// Create a pool whose watermark starts at `chain_height`, the height of the last beacon block
    /// the chain layer has committed.
    pub fn new(chain_height: BlockHeight, config: PoolConfig) -> BeaconPool<B> {
        BeaconPool {
            config,
            inner: RwLock::new(Inner {
                valid: Vec::new(),
                pending: BTreeMap::new(),
                latest_valid_height: chain_height,
                seen: SeenCache::new(config.cache_capacity),
            }),
        }
    }

    /// Offer a block to the pool. On success the block is either part of the contiguous valid run
    /// or parked pending; on error the pool is unchanged (up to the departed-block record).
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

    /// The valid run, or, for committee members only, the single pending block right above the
    /// watermark when the valid run is empty. A committee member can use that block to restart a
    /// pool that emptied while out-of-order deliveries piled up; everyone else just sees an empty
    /// pool.
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
            return Err(BlockPoolError::OldBlock {
                height,
                latest: self.latest_valid_height,
            });
        }
        if self.pending.contains_key(&height) {
            return Err(BlockPoolError::Duplicate { height });
        }
        if self.valid.len() + self.pending.len() >= config.capacity() {
            self.swap_for_better(&block, config)?;
        }

        self.insert(block);
        self.promote_pending();

        Ok(())
    }

    /// Place a newly admitted block: onto the valid run if it is the next height and links onto the
    /// tail, into pending otherwise.
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

    /// Move pending blocks onto the valid run for as long as the next height is present and links
    /// onto the tail. A pending block at the right height with the wrong previous-hash stays
    /// pending.
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
            logging::debug::promoted(POOL_LABEL, next_height);
            self.latest_valid_height = next_height;
            self.valid.push(block);
        }
    }

    /// Make room for `incoming` by evicting the worst pending block, or fail with
    /// [BlockPoolError::PoolCapacityExceeded] if `incoming` is no better than anything pending.
    /// Blocks are ranked by height first and round second; lower is better.
    fn swap_for_better(&mut self, incoming: &B, config: &PoolConfig) -> Result<(), BlockPoolError> {
        let worst = self
            .pending
            .iter()
            .max_by_key(|(height, block)| (**height, block.round()))
            .map(|(height, block)| (*height, block.round()));
        match worst {
            Some((height, round)) if (incoming.height(), incoming.round()) < (height, round) => {
                self.pending.remove(&height);
                logging::debug::swapped_pending(POOL_LABEL, height, incoming.height());
                Ok(())
            }
            _ => Err(BlockPoolError::PoolCapacityExceeded {
                capacity: config.capacity(),
            }),
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
        if removed > 0 {
            logging::debug::removed(POOL_LABEL, removed, height);
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
