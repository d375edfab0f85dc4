/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The full set of pools a node runs, and the background thread that sweeps them.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::ticker::{Ticker, TickerStatus};
use crate::types::{Block, ChainHeights, ShardId};

use super::beacon::BeaconPool;
use super::cross_shard::{CrossShardBlock, CrossShardPool, NextCrossShardHeight};
use super::shard::ShardPool;
use super::shard_to_beacon::{ShardBlock, ShardToBeaconPool};
use super::PoolConfig;

/// Every pool a node needs, constructed together so nothing has to be looked up by name at runtime:
/// the beacon pool, one shard pool and one cross-shard pool per shard (indexed by shard ID, sized
/// once at construction), and the shard-to-beacon pool.
///
/// The registry is plain data over self-locking pools. Clone an `Arc` of it into as many threads as
/// needed; there is no registry-wide lock to contend on.
///
/// `BB` is the beacon chain's block type, `SB` the shard chains' block type (which also flows
/// through the shard-to-beacon pool), and `CB` the cross-shard block type.
pub struct PoolRegistry<BB, SB, CB, O>
where
    BB: Block,
    SB: ShardBlock,
    CB: CrossShardBlock,
    O: NextCrossShardHeight,
{
    beacon: BeaconPool<BB>,
    shards: Vec<ShardPool<SB>>,
    cross_shard: Vec<CrossShardPool<CB, O>>,
    shard_to_beacon: ShardToBeaconPool<SB>,
}

impl<BB, SB, CB, O> PoolRegistry<BB, SB, CB, O>
where
    BB: Block,
    SB: ShardBlock,
    CB: CrossShardBlock,
    O: NextCrossShardHeight,
{
    /// Build the registry for `heights.shards.len()` shards, seeding each pool's watermark from the
    /// heights the chain layer has already committed.
    pub fn new(heights: &ChainHeights, oracle: O, config: PoolConfig) -> PoolRegistry<BB, SB, CB, O>
    where
        O: Clone,
    {
        let shard_count = heights.shards.len();
        PoolRegistry {
            beacon: BeaconPool::new(heights.beacon, config),
            shards: heights
                .shards
                .iter()
                .enumerate()
                .map(|(shard, height)| ShardPool::new(shard as ShardId, *height, config))
                .collect(),
            cross_shard: (0..shard_count)
                .map(|shard| CrossShardPool::new(shard as ShardId, shard_count, oracle.clone(), config))
                .collect(),
            shard_to_beacon: ShardToBeaconPool::new(shard_count, config),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn beacon(&self) -> &BeaconPool<BB> {
        &self.beacon
    }

    pub fn shard(&self, shard: ShardId) -> Option<&ShardPool<SB>> {
        self.shards.get(usize::from(shard))
    }

    /// The pool for cross-shard blocks destined for `shard`.
    pub fn cross_shard(&self, shard: ShardId) -> Option<&CrossShardPool<CB, O>> {
        self.cross_shard.get(usize::from(shard))
    }

    pub fn shard_to_beacon(&self) -> &ShardToBeaconPool<SB> {
        &self.shard_to_beacon
    }

    /// One sweep over every pool: clear out what the chain layer has committed, and re-run
    /// cross-shard admission in case confirmations landed after their blocks.
    pub fn sweep(&self, heights: &ChainHeights) {
        self.beacon.remove_to(heights.beacon);
        for (pool, height) in self.shards.iter().zip(heights.shards.iter()) {
            pool.remove_to(*height);
        }
        self.shard_to_beacon.set_shard_state(&heights.shards);
        for pool in &self.cross_shard {
            pool.update_pool();
        }
    }
}

/// Start the thread that [sweeps](PoolRegistry::sweep) `registry` every `interval`, asking
/// `chain_heights` for the chain layer's committed heights each pass.
pub fn start_sweeper<BB, SB, CB, O, F>(
    registry: Arc<PoolRegistry<BB, SB, CB, O>>,
    interval: Duration,
    chain_heights: F,
) -> Sweeper
where
    BB: Block,
    SB: ShardBlock,
    CB: CrossShardBlock,
    O: NextCrossShardHeight,
    F: Fn() -> ChainHeights + Send + 'static,
{
    let (shutdown, shutdown_receiver) = mpsc::channel();
    let mut ticker = Ticker::new(interval, shutdown_receiver);
    let thread = thread::spawn(move || loop {
        registry.sweep(&chain_heights());
        match ticker.wait() {
            TickerStatus::Tick => (),
            TickerStatus::Stop => return,
        }
    });
    Sweeper {
        thread: Some(thread),
        shutdown,
    }
}

/// A handle to a running sweep thread. When this value is dropped, the thread is told to stop and
/// is joined.
pub struct Sweeper {
    thread: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown.send(()).unwrap();
        self.thread.take().unwrap().join().unwrap();
    }
}
