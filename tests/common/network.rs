use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

use shardbft::messages::ConsensusMessage;
use shardbft::networking::Network;
use shardbft::types::ShardId;

use super::blocks::TestBlock;

/// A mock network stub which passes messages from and to threads using channels. Every push is a
/// broadcast to all peers, including the pushing peer itself.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    all_peers: Vec<Sender<ConsensusMessage<TestBlock>>>,
    inbox: Arc<Mutex<Receiver<ConsensusMessage<TestBlock>>>>,
}

impl Network<TestBlock> for NetworkStub {
    fn push_to_beacon(&mut self, message: ConsensusMessage<TestBlock>) {
        for peer in &self.all_peers {
            let _ = peer.send(message.clone());
        }
    }

    fn push_to_shard(&mut self, _shard: ShardId, message: ConsensusMessage<TestBlock>) {
        for peer in &self.all_peers {
            let _ = peer.send(message.clone());
        }
    }

    fn recv(&mut self) -> Option<ConsensusMessage<TestBlock>> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// Create a fully connected mock network of `peers` stubs.
pub(crate) fn mock_network(peers: usize) -> Vec<NetworkStub> {
    let mut all_peers = Vec::new();
    let mut inboxes = Vec::new();
    for _ in 0..peers {
        let (sender, receiver) = mpsc::channel();
        all_peers.push(sender);
        inboxes.push(receiver);
    }

    inboxes
        .into_iter()
        .map(|inbox| NetworkStub {
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}

/// A network that records everything a single consensus actor sends and never delivers anything to
/// it. Used to inspect one actor's outbound traffic while its votes are injected directly.
#[derive(Clone)]
pub(crate) struct CollectorNetwork {
    sent: Arc<Mutex<Vec<ConsensusMessage<TestBlock>>>>,
}

impl CollectorNetwork {
    pub(crate) fn new() -> CollectorNetwork {
        CollectorNetwork {
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn sent(&self) -> Vec<ConsensusMessage<TestBlock>> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Network<TestBlock> for CollectorNetwork {
    fn push_to_beacon(&mut self, message: ConsensusMessage<TestBlock>) {
        self.sent.lock().unwrap().push(message);
    }

    fn push_to_shard(&mut self, _shard: ShardId, message: ConsensusMessage<TestBlock>) {
        self.sent.lock().unwrap().push(message);
    }

    fn recv(&mut self) -> Option<ConsensusMessage<TestBlock>> {
        None
    }
}
