/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! End-to-end tests for the engine: real actor threads, a real poller, and committees wired
//! together over channel-backed network stubs. The chain layer here is a ledger shared by every
//! node in the committee, so a commit by any node is immediately visible to the rest and the
//! engine's liveness can be observed as plain height growth. The fine-grained quorum mechanics are
//! covered synchronously in the state machine's own test suite; what these tests pin down is that
//! the threads drive real commits, route messages by chain key, and shut down cleanly.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::LevelFilter;
use rand_core::OsRng;

use shardbft::chain::Chain;
use shardbft::engine::{EngineConfig, EngineSpec};
use shardbft::messages::{ConsensusMessage, PrepareMessage};
use shardbft::networking::Network;
use shardbft::ticker::{Ticker, TickerStatus};
use shardbft::types::{
    Block, BlockHeight, ChainKey, Round, RoundKey, SignatureBytes, SigningKey,
};

mod common;

use common::{
    blocks::TestBlock,
    logging::{secs_since_unix_epoch, setup_logger},
    network::mock_network,
};

/// One chain's committed history, shared by every committee member in a test.
struct Ledger {
    label: Vec<u8>,
    blocks: Vec<TestBlock>,
    last_block_timestamp: u64,
}

fn new_ledger(label: &[u8]) -> Arc<Mutex<Ledger>> {
    Arc::new(Mutex::new(Ledger {
        label: label.to_vec(),
        blocks: Vec::new(),
        last_block_timestamp: secs_since_unix_epoch(SystemTime::now()),
    }))
}

fn tip_height(ledger: &Arc<Mutex<Ledger>>) -> BlockHeight {
    ledger.lock().unwrap().blocks.len() as BlockHeight
}

fn assert_hash_linked(ledger: &Arc<Mutex<Ledger>>) {
    let blocks = ledger.lock().unwrap().blocks.clone();
    assert!(!blocks.is_empty());
    assert_eq!(blocks[0].height(), 1);
    assert_eq!(blocks[0].previous_hash(), [0u8; 32]);
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].height(), pair[0].height() + 1);
        assert_eq!(pair[1].previous_hash(), pair[0].hash());
    }
}

/// A functioning chain layer over a shared [Ledger]. Each committee member holds its own
/// `LiveChain` (with its own seat number) over the same ledger.
#[derive(Clone)]
struct LiveChain {
    ledger: Arc<Mutex<Ledger>>,
    committee_size: usize,
    node_index: Option<usize>,
}

impl Chain<TestBlock> for LiveChain {
    fn is_ready(&self) -> bool {
        true
    }

    fn height(&self) -> BlockHeight {
        self.ledger.lock().unwrap().blocks.len() as BlockHeight
    }

    fn last_block_timestamp(&self) -> u64 {
        self.ledger.lock().unwrap().last_block_timestamp
    }

    fn min_block_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn committee_size(&self) -> usize {
        self.committee_size
    }

    fn node_index(&self) -> Option<usize> {
        self.node_index
    }

    fn last_proposer_index(&self) -> usize {
        self.ledger.lock().unwrap().blocks.len() % self.committee_size
    }

    fn create_block(&mut self, round: Round) -> Option<TestBlock> {
        let ledger = self.ledger.lock().unwrap();
        let height = ledger.blocks.len() as BlockHeight + 1;
        let previous_hash = ledger.blocks.last().map_or([0u8; 32], |tip| tip.hash());
        Some(TestBlock::new(
            height,
            round,
            previous_hash,
            0,
            0,
            ledger.label.clone(),
        ))
    }

    fn validate_block(&self, block: &TestBlock) -> bool {
        let ledger = self.ledger.lock().unwrap();
        let next_height = ledger.blocks.len() as BlockHeight + 1;
        let tip_hash = ledger.blocks.last().map_or([0u8; 32], |tip| tip.hash());
        block.height() == next_height && block.previous_hash() == tip_hash
    }

    fn validate_block_signature(&self, _block: &TestBlock, _signature: &SignatureBytes) -> bool {
        true
    }

    fn insert_block(&mut self, block: &TestBlock, committed: bool) {
        let mut ledger = self.ledger.lock().unwrap();
        // Every member hands back the decided block; only the first at each height lands.
        if committed && block.height() == ledger.blocks.len() as BlockHeight + 1 {
            ledger.blocks.push(block.clone());
            ledger.last_block_timestamp = secs_since_unix_epoch(SystemTime::now());
        }
    }
}

fn keypairs(count: usize) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    (0..count).map(|_| SigningKey::generate(&mut csprg)).collect()
}

#[test]
fn ticker_paces_ticks_and_honors_shutdown() {
    let (_shutdown, shutdown_receiver) = mpsc::channel();
    let mut ticker = Ticker::new(Duration::from_millis(50), shutdown_receiver);
    let started = Instant::now();
    assert_eq!(ticker.wait(), TickerStatus::Tick);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(ticker.wait(), TickerStatus::Tick);
    assert!(started.elapsed() >= Duration::from_millis(100));

    // A pending shutdown signal cuts the wait short no matter how long the interval.
    let (shutdown, shutdown_receiver) = mpsc::channel();
    let mut slow = Ticker::new(Duration::from_secs(60), shutdown_receiver);
    shutdown.send(()).unwrap();
    let started = Instant::now();
    assert_eq!(slow.wait(), TickerStatus::Stop);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[test]
fn committee_of_four_drives_two_chains() {
    setup_logger(LevelFilter::Trace);

    // 1. Four nodes, each running a consensus actor for the beacon chain and one for shard 0,
    //    all over one fully connected network and two shared ledgers.
    let stubs = mock_network(4);
    let beacon_ledger = new_ledger(b"beacon");
    let shard_ledger = new_ledger(b"shard-0");
    let keys = keypairs(4);

    let mut engines = Vec::new();
    for (node, key) in keys.into_iter().enumerate() {
        let configuration = EngineConfig::builder()
            .me(key)
            .round_timeout(Duration::from_secs(2))
            .tick_interval(Duration::from_millis(20))
            .build();
        let engine = EngineSpec::builder()
            .configuration(configuration)
            .network(stubs[node].clone())
            .chains(vec![
                (
                    ChainKey::Beacon,
                    LiveChain {
                        ledger: beacon_ledger.clone(),
                        committee_size: 4,
                        node_index: Some(node),
                    },
                ),
                (
                    ChainKey::Shard(0),
                    LiveChain {
                        ledger: shard_ledger.clone(),
                        committee_size: 4,
                        node_index: Some(node),
                    },
                ),
            ])
            .build()
            .start();
        assert!(engine.is_running(&ChainKey::Beacon));
        assert!(engine.is_running(&ChainKey::Shard(0)));
        assert_eq!(engine.chain_keys().len(), 2);
        engines.push(engine);
    }

    // 2. Leave the committee running until both chains have committed three blocks.
    log::debug!("Waiting for the beacon chain and shard 0 to reach height 3.");
    while tip_height(&beacon_ledger) < 3 || tip_height(&shard_ledger) < 3 {
        thread::sleep(Duration::from_millis(100));
    }

    // 3. Both histories are contiguous and hash-linked from genesis.
    assert_hash_linked(&beacon_ledger);
    assert_hash_linked(&shard_ledger);
}

#[test]
fn single_member_committee_commits_alone_and_stops_cleanly() {
    setup_logger(LevelFilter::Trace);

    let stubs = mock_network(1);
    let ledger = new_ledger(b"solo");
    let mut csprg = OsRng {};
    let configuration = EngineConfig::builder()
        .me(SigningKey::generate(&mut csprg))
        .round_timeout(Duration::from_secs(1))
        .tick_interval(Duration::from_millis(10))
        .build();
    let mut engine = EngineSpec::builder()
        .configuration(configuration)
        .network(stubs[0].clone())
        .chains(vec![(
            ChainKey::Beacon,
            LiveChain {
                ledger: ledger.clone(),
                committee_size: 1,
                node_index: Some(0),
            },
        )])
        .build()
        .start();

    // 1. Alone on the committee, the node's own vote is a supermajority.
    log::debug!("Waiting for the single-member committee to commit twice.");
    while tip_height(&ledger) < 2 {
        thread::sleep(Duration::from_millis(10));
    }
    assert_hash_linked(&ledger);

    // 2. Stopping the chain joins its actor and freezes the ledger.
    engine.stop(&ChainKey::Beacon);
    assert!(!engine.is_running(&ChainKey::Beacon));
    assert!(engine.chain_keys().is_empty());
    let frozen = tip_height(&ledger);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(tip_height(&ledger), frozen);

    // 3. Stopping a chain that is not running does nothing.
    engine.stop(&ChainKey::Beacon);
}

#[test]
fn messages_for_chains_without_an_actor_are_dropped() {
    setup_logger(LevelFilter::Trace);

    // 1. One node runs the beacon chain only; a second stub stands in for the rest of the network.
    let stubs = mock_network(2);
    let ledger = new_ledger(b"routed");
    let mut csprg = OsRng {};
    let configuration = EngineConfig::builder()
        .me(SigningKey::generate(&mut csprg))
        .round_timeout(Duration::from_secs(1))
        .tick_interval(Duration::from_millis(10))
        .build();
    let engine = EngineSpec::builder()
        .configuration(configuration)
        .network(stubs[0].clone())
        .chains(vec![(
            ChainKey::Beacon,
            LiveChain {
                ledger: ledger.clone(),
                committee_size: 1,
                node_index: Some(0),
            },
        )])
        .build()
        .start();
    while tip_height(&ledger) < 1 {
        thread::sleep(Duration::from_millis(10));
    }

    // 2. A well-signed vote arrives for a shard this node runs no actor for.
    let mut outsider = stubs[1].clone();
    let stray = PrepareMessage::new(
        &SigningKey::generate(&mut csprg),
        ChainKey::Shard(7),
        RoundKey::new(1, 0),
        [8u8; 32],
        true,
    );
    outsider.push_to_shard(7, ConsensusMessage::Prepare(stray));

    // 3. The poller drops it and the node keeps committing as if nothing happened.
    let before = tip_height(&ledger);
    log::debug!("Waiting for two more commits after the stray message.");
    while tip_height(&ledger) < before + 2 {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(engine.is_running(&ChainKey::Beacon));
    assert!(!engine.is_running(&ChainKey::Shard(7)));
}
