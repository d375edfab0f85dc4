/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to start and stop a node's consensus engine.
//!
//! The engine is the library's top-level object on the consensus side. It runs one
//! [consensus actor](crate::bft::BftCore) thread per chain the node takes part in, plus a single
//! poller thread that distributes inbound network messages to them by chain key.
//!
//! Startup happens in two steps. First, an [EngineSpec] is built up with the builder pattern:
//! the node's configuration, its networking provider, and one [Chain] implementor per chain. Then,
//! [EngineSpec::start] spawns the threads and returns an [Engine], a handle from which individual
//! chains can be [stopped](Engine::stop) early. Dropping the [Engine] stops everything and joins
//! the threads.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::bft::{start_bft_actor, BftCore};
use crate::chain::Chain;
use crate::networking::{start_polling, Network};
use crate::ticker::Ticker;
use crate::types::{Block, ChainKey, SigningKey};

/// Settings shared by every consensus actor the engine runs.
#[derive(TypedBuilder, Clone)]
#[builder(builder_method(doc = "Start building an [EngineConfig]. The builder has one method per
field; all of them must be called before [build](EngineConfigBuilder::build)."))]
pub struct EngineConfig {
    /// The node's signing key. Its public half is the node's identity in every committee.
    #[builder(setter(doc = "Set the node's Ed25519 signing key. Required."))]
    pub me: SigningKey,

    /// How long one round lasts. Until a block is committed at the height being worked on, a fresh
    /// round (with the leadership rotated one seat) begins every `round_timeout`.
    #[builder(setter(doc = "Set the duration of one consensus round. Required."))]
    pub round_timeout: Duration,

    /// The polling cadence of every consensus actor. Each tick drains inbound messages and advances
    /// the round state machine once.
    #[builder(setter(doc = "Set the consensus actors' polling interval. Required."))]
    pub tick_interval: Duration,
}

/// Everything the engine needs to start: configuration, networking, and the chains to run
/// consensus on. Construct it with [EngineSpec::builder], then call [start](EngineSpec::start).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "Start building an [EngineSpec]. The builder has one method per
field; all of them must be called before [build](EngineSpecBuilder::build)."))]
pub struct EngineSpec<B: Block, C: Chain<B>, N: Network<B> + 'static> {
    #[builder(setter(doc = "Set the engine's [EngineConfig]. Required."))]
    configuration: EngineConfig,

    #[builder(setter(doc = "Set the engine's networking provider. Required."))]
    network: N,

    #[builder(setter(doc = "Set the chains to run consensus on: one [Chain] implementor per chain
key, each backing exactly the chain its key names. Required."))]
    chains: Vec<(ChainKey, C)>,

    #[builder(default, setter(skip))]
    _block: PhantomData<fn() -> B>,
}

impl<B: Block, C: Chain<B>, N: Network<B> + 'static> EngineSpec<B, C, N> {
    /// Spawn one consensus actor thread per chain and the poller thread, returning the handle that
    /// owns them.
    pub fn start(self) -> Engine {
        let mut routes = HashMap::new();
        let mut actors = HashMap::new();
        for (chain_key, chain) in self.chains {
            let (to_actor, inbox) = mpsc::channel();
            routes.insert(chain_key, to_actor);

            let (shutdown, shutdown_receiver) = mpsc::channel();
            let core = BftCore::new(
                chain_key,
                chain,
                self.network.clone(),
                self.configuration.me.clone(),
                self.configuration.round_timeout,
            );
            let ticker = Ticker::new(self.configuration.tick_interval, shutdown_receiver);
            let thread = start_bft_actor(core, inbox, ticker);
            actors.insert(
                chain_key,
                BftHandle {
                    thread: Some(thread),
                    shutdown,
                },
            );
        }

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.network, routes, poller_shutdown_receiver);

        Engine {
            actors,
            poller: Some(poller),
            poller_shutdown,
        }
    }
}

/// A handle to the threads of a running engine. When this value is dropped, every consensus actor
/// is told to stop and joined, then the poller.
pub struct Engine {
    actors: HashMap<ChainKey, BftHandle>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
}

struct BftHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
}

impl Engine {
    /// Whether the consensus actor for `chain_key` is still running.
    pub fn is_running(&self, chain_key: &ChainKey) -> bool {
        self.actors.contains_key(chain_key)
    }

    /// The chains with a running consensus actor.
    pub fn chain_keys(&self) -> Vec<ChainKey> {
        self.actors.keys().copied().collect()
    }

    /// Stop the consensus actor for one chain and join its thread. The poller keeps running and
    /// from now on drops that chain's messages. Stopping a chain that is not running does nothing.
    pub fn stop(&mut self, chain_key: &ChainKey) {
        if let Some(mut handle) = self.actors.remove(chain_key) {
            handle.shutdown.send(()).unwrap();
            handle.thread.take().unwrap().join().unwrap();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown here is important. The consensus actors assume the
        // poller outlives them (they panic if their inbox disconnects), so every actor stops before
        // the poller does.
        let chain_keys: Vec<ChainKey> = self.actors.keys().copied().collect();
        for chain_key in &chain_keys {
            self.stop(chain_key);
        }
        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();
    }
}
