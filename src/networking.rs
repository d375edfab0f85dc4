/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, and the poller thread that
//! distributes inbound messages to the consensus actors.
//!
//! This library is generic over the networking stack. Implementations only need to fan a message
//! out to a chain's committee and hand back whatever arrives; who the committee members are and how
//! bytes move is entirely their business.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::logging;
use crate::messages::ConsensusMessage;
use crate::types::{Block, ChainKey, ShardId};

pub trait Network<B: Block>: Clone + Send {
    /// Deliver a message to every member of the beacon chain's committee, including this node.
    /// Delivery is best effort: failures are not reported, and the consensus layer never waits on
    /// them. A message that mattered and was lost is made up for by round timeouts and redelivery.
    fn push_to_beacon(&mut self, message: ConsensusMessage<B>);

    /// Deliver a message to every member of the given shard chain's committee, including this node.
    /// Best effort, like [push_to_beacon](Network::push_to_beacon).
    fn push_to_shard(&mut self, shard: ShardId, message: ConsensusMessage<B>);

    /// The next message addressed to this node, or None if nothing is waiting. Must not block.
    fn recv(&mut self) -> Option<ConsensusMessage<B>>;
}

/// Spawn the poller thread: it takes messages off `network` and passes them to the consensus actor
/// registered for their chain key in `routes`. Messages for chains this node runs no actor for are
/// logged and dropped.
pub(crate) fn start_polling<B, N>(
    mut network: N,
    routes: HashMap<ChainKey, Sender<ConsensusMessage<B>>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()>
where
    B: Block,
    N: Network<B> + 'static,
{
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => panic!("Poller thread disconnected from main thread"),
        }

        if let Some(message) = network.recv() {
            match routes.get(&message.chain_key()) {
                // Sends fail only if the actor has already been stopped, in which case dropping
                // the message is exactly right.
                Some(actor) => {
                    let _ = actor.send(message);
                }
                None => logging::debug::unknown_chain(&message.chain_key()),
            }
        } else {
            thread::yield_now()
        }
    })
}
