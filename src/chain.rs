/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Chain) for the interface between a consensus actor and the chain layer it
//! decides blocks for.
//!
//! A consensus actor does not keep its own copy of the chain. Every tick, it asks the chain layer
//! where the chain currently stands, and when a round concludes it hands the decided block straight
//! back. The chain layer remains the single authority on heights, committees, and block contents;
//! the actor only sequences proposals and votes. One implementor instance backs exactly one chain
//! (the beacon chain or a single shard chain), so implementors of this trait do not see
//! [ChainKey](crate::types::ChainKey)s.

use std::time::Duration;

use crate::types::{Block, BlockHeight, Round, SignatureBytes};

pub trait Chain<B: Block>: Send + 'static {
    /// Whether this node is synced close enough to the tip of the chain to take part in consensus.
    /// While this returns false, the consensus actor idles in its new-round phase.
    fn is_ready(&self) -> bool;

    /// Height of the last block committed into the chain.
    fn height(&self) -> BlockHeight;

    /// Unix timestamp, in seconds, of the last block committed into the chain. Round numbers are
    /// computed from the time elapsed since this instant.
    fn last_block_timestamp(&self) -> u64;

    /// The minimum interval between two consecutive blocks. A leader holds off proposing until this
    /// much time has passed since the last block.
    fn min_block_interval(&self) -> Duration;

    /// The number of members in the committee that decides blocks on this chain.
    fn committee_size(&self) -> usize;

    /// This node's index in the committee, or None if it is not a committee member. Non-members
    /// never propose or vote.
    fn node_index(&self) -> Option<usize>;

    /// Committee index of the member that produced the last committed block. Leadership rotates
    /// starting from the seat after this one.
    fn last_proposer_index(&self) -> usize;

    /// Build a block to propose in the given round. Returning None is not an error: the chain layer
    /// may have nothing to build on right now, and the actor simply retries on its next tick.
    fn create_block(&mut self, round: Round) -> Option<B>;

    /// Whether a block received in a proposal is valid on top of the current chain state.
    fn validate_block(&self, block: &B) -> bool;

    /// Whether the producer signature a proposal carries is valid for the block. Producer signature
    /// schemes are the chain layer's concern; this library never implements one.
    fn validate_block_signature(&self, block: &B, signature: &SignatureBytes) -> bool;

    /// Hand a decided block to the chain layer. `committed` is true if the committee approved the
    /// block, and false if it explicitly rejected it.
    fn insert_block(&mut self, block: &B, committed: bool);
}
