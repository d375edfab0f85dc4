/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The reasons a pool refuses to admit a block.
//!
//! None of these errors is fatal to the caller. A refused block is simply dropped; if it turns out
//! to be needed after all, the network layer's redelivery brings it back when the pool is in a
//! state to accept it.

use thiserror::Error;

use crate::types::{BlockHeight, ShardId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockPoolError {
    /// The block is at or below a height the pool has already moved past.
    #[error("block at height {height} is old, pool has moved past height {latest}")]
    OldBlock { height: BlockHeight, latest: BlockHeight },

    /// A block at this height is already buffered.
    #[error("a block at height {height} is already in the pool")]
    Duplicate { height: BlockHeight },

    /// Admitting the block would push the pool past its combined valid-plus-pending capacity.
    #[error("pool is at its capacity of {capacity} blocks")]
    PoolCapacityExceeded { capacity: usize },

    /// The block was routed to a pool that does not handle its shard.
    #[error("misrouted block: shard {got} does not match pool shard {expected}")]
    WrongShard { expected: ShardId, got: ShardId },

    /// The beacon chain has not confirmed any cross-shard height past the pool's watermark for this
    /// source shard.
    #[error("no beacon confirmation for shard {shard} past height {height}")]
    MissingCrossShardConfirmation { shard: ShardId, height: BlockHeight },
}
