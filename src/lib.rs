/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A round-based BFT consensus engine and the block pools that feed it, for nodes of a sharded
//! blockchain.
//!
//! The library has two halves that share types but can be used independently:
//! - The consensus half ([engine], [bft]) runs one round state machine per chain the node takes
//!   part in: a leader proposes a block, the committee votes, and a strict supermajority commits or
//!   rejects it, with timed-out rounds rotating leadership until a decision lands.
//! - The pool half ([pool]) buffers blocks that arrive from the network in any order (beacon
//!   blocks, shard blocks, shard blocks bound for the beacon chain, and cross-shard blocks) and
//!   releases them to the chain layer as contiguous, verified sequences.
//!
//! Both halves stay out of the chain layer's way: what blocks contain, how they are validated, and
//! who sits in a committee are answered through the [Chain](chain::Chain) trait and the block
//! capability traits ([Block](types::Block), [ShardBlock](pool::ShardBlock),
//! [CrossShardBlock](pool::CrossShardBlock)), and all networking goes through the
//! [Network](networking::Network) trait.

pub mod bft;
pub mod chain;
pub mod engine;
pub mod logging;
pub mod messages;
pub mod networking;
pub mod pool;
pub mod ticker;
pub mod types;
