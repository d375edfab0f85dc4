/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for 'inert' types, i.e., those that are sent around and inspected, but have no active
//! behavior.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};

pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
pub use sha2::Sha256 as CryptoHasher;

pub type BlockHeight = u64;
pub type Round = u64;
pub type ShardId = u8;
pub type CryptoHash = [u8; 32];
pub type PublicKeyBytes = [u8; 32];
pub type SignatureBytes = [u8; 64];

/// Identifies the chain a block, a message, or a consensus actor belongs to: either the beacon chain
/// or one of the shard chains.
///
/// Chain keys format themselves as `beacon` and `shard-{id}` in log output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub enum ChainKey {
    Beacon,
    Shard(ShardId),
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKey::Beacon => write!(f, "beacon"),
            ChainKey::Shard(shard) => write!(f, "shard-{}", shard),
        }
    }
}

/// Identifies one consensus attempt on one chain: the height being decided, and the number of rounds
/// that have already timed out at that height.
///
/// Proposals and votes carry a round key, and a consensus actor only tallies those whose round key
/// matches the attempt it is currently working on. Round keys format themselves as
/// `{height}_{round}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, BorshSerialize, BorshDeserialize)]
pub struct RoundKey {
    pub height: BlockHeight,
    pub round: Round,
}

impl RoundKey {
    pub fn new(height: BlockHeight, round: Round) -> RoundKey {
        RoundKey { height, round }
    }
}

impl fmt::Display for RoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.height, self.round)
    }
}

/// Capability interface implemented by every concrete block type that flows through the pools and
/// the consensus actors.
///
/// This library never looks inside a block's payload. It orders blocks by [height](Block::height),
/// links them by [previous hash](Block::previous_hash), and tie-breaks competing blocks at the same
/// height by [round](Block::round). Everything else about a block is the chain layer's business.
pub trait Block: Clone + Send + Sync + BorshSerialize + BorshDeserialize + 'static {
    fn height(&self) -> BlockHeight;
    fn hash(&self) -> CryptoHash;
    fn previous_hash(&self) -> CryptoHash;

    /// The round the block was proposed in. Blocks produced in earlier rounds are preferred over
    /// late re-proposals at the same height.
    fn round(&self) -> Round;
}

/// The heights the chain layer has committed up to, one entry per chain. Produced by the chain layer
/// and consumed by the pool sweeper to clear committed blocks out of the pools.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainHeights {
    pub beacon: BlockHeight,

    /// Indexed by shard ID.
    pub shards: Vec<BlockHeight>,
}
