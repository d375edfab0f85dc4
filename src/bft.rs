/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round state machine that decides one chain's blocks, and the thread that drives it.
//!
//! One [BftCore] runs per chain the node takes part in. Everything it does happens on a polling
//! tick:
//! 1. In the new-round phase it waits for the chain layer to be ready, computes the round number
//!    from the time elapsed since the last block, and works out the round's leader by rotating one
//!    seat past the last proposer per round. The leader moves to the propose phase, every other
//!    committee member moves to the listen phase.
//! 2. In the propose phase the leader asks the chain layer for a block, broadcasts it in a signed
//!    [ProposeMessage], and moves straight to the prepare phase without waiting for the network.
//! 3. In the listen phase a member adopts the buffered proposal for the current round key once the
//!    chain layer validates the block and its producer signature. Proposals that fail validation
//!    are never adopted; the round times out instead.
//! 4. In the prepare phase a member broadcasts its own signed [PrepareMessage] up front, then
//!    tallies the votes buffered for the current round key on every tick. A strict supermajority of
//!    approvals commits the block into the chain layer, a strict supermajority of explicit
//!    rejections inserts it as rejected, and anything short of either keeps waiting.
//!
//! Two checks run across all phases. If the chain's height moves (someone else committed) or the
//! computed round overtakes the one being worked on, the attempt is abandoned and the machine
//! returns to the new-round phase. And inbound messages are buffered keyed by [RoundKey] the moment
//! they arrive, whatever the current phase, so a vote arriving before its proposal is never lost.
//!
//! There is deliberately no error type here. Anything that goes wrong in a round (an unavailable
//! block template, a bad proposal, lost messages) is logged and resolved by the same mechanism:
//! the round times out and the next one retries.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::chain::Chain;
use crate::logging;
use crate::messages::{ConsensusMessage, PrepareMessage, ProposeMessage, SignedMessage};
use crate::networking::Network;
use crate::ticker::{Ticker, TickerStatus};
use crate::types::{Block, BlockHeight, ChainKey, PublicKeyBytes, Round, RoundKey, SigningKey};

/// The phase a [BftCore] is in. See the [module documentation](self) for what each phase does.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    NewRound,
    Propose,
    Listen,
    Prepare,
}

/// The outcome of [tallying](majority_vote) the votes collected for one round key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MajorityVote {
    Approve,
    Reject,
    Pending,
}

/// Tally a round's votes against a committee of `committee_size` members. Approve requires strictly
/// more than two thirds (by integer division) of the committee to have voted true; Reject requires
/// strictly more than two thirds to have voted an explicit false. Committee members that have not
/// voted count toward neither side, so a tally can stay Pending forever and leave the round to time
/// out.
pub fn majority_vote(votes: &HashMap<PublicKeyBytes, bool>, committee_size: usize) -> MajorityVote {
    let threshold = (2 * committee_size) / 3;
    let approvals = votes.values().filter(|is_ok| **is_ok).count();
    let rejections = votes.len() - approvals;
    if approvals > threshold {
        MajorityVote::Approve
    } else if rejections > threshold {
        MajorityVote::Reject
    } else {
        MajorityVote::Pending
    }
}

/// The round state machine for one chain. [step](BftCore::step) advances it by one polling tick and
/// [on_message](BftCore::on_message) feeds it an inbound message; the two never run concurrently
/// (the actor thread alternates them), which is what makes the machine simple enough to test
/// synchronously.
pub struct BftCore<B: Block, C: Chain<B>, N: Network<B>> {
    chain_key: ChainKey,
    chain: C,
    network: N,
    me: SigningKey,
    round_timeout: Duration,

    phase: Phase,
    round: Round,
    next_height: BlockHeight,
    block: Option<B>,

    propose_msgs: HashMap<RoundKey, ProposeMessage<B>>,
    prepare_msgs: HashMap<RoundKey, HashMap<PublicKeyBytes, bool>>,
}

impl<B: Block, C: Chain<B>, N: Network<B>> BftCore<B, C, N> {
    /// Create the state machine for `chain_key`, initially in the new-round phase. `round_timeout`
    /// is how long one round lasts before the machine gives up on it and recomputes.
    pub fn new(
        chain_key: ChainKey,
        chain: C,
        network: N,
        me: SigningKey,
        round_timeout: Duration,
    ) -> BftCore<B, C, N> {
        BftCore {
            chain_key,
            chain,
            network,
            me,
            round_timeout,
            phase: Phase::NewRound,
            round: 0,
            next_height: 0,
            block: None,
            propose_msgs: HashMap::new(),
            prepare_msgs: HashMap::new(),
        }
    }

    pub fn chain_key(&self) -> ChainKey {
        self.chain_key
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// The height the machine is currently trying to decide.
    pub fn next_height(&self) -> BlockHeight {
        self.next_height
    }

    /// Advance the machine by one tick.
    pub fn step(&mut self) {
        if self.phase != Phase::NewRound && !self.in_time_frame() {
            logging::debug::out_of_time_frame(&self.chain_key, self.next_height, self.chain.height() + 1);
            self.enter_new_round();
        }
        match self.phase {
            Phase::NewRound => self.new_round(),
            Phase::Propose => self.propose(),
            Phase::Listen => self.listen(),
            Phase::Prepare => self.prepare(),
        }
    }

    /// Buffer an inbound message, keyed by its round key. Messages failing their signature check,
    /// and messages for other chains, are dropped.
    pub fn on_message(&mut self, message: ConsensusMessage<B>) {
        match message {
            ConsensusMessage::Propose(propose) => self.on_propose_msg(propose),
            ConsensusMessage::Prepare(prepare) => self.on_prepare_msg(prepare),
        }
    }

    pub fn on_propose_msg(&mut self, message: ProposeMessage<B>) {
        if message.chain_key != self.chain_key || !message.is_correct() {
            return;
        }
        logging::debug::received_propose(
            &self.chain_key,
            &message.signer,
            &message.block.hash(),
            message.round_key.height,
        );
        // First proposal per round key wins.
        self.propose_msgs.entry(message.round_key).or_insert(message);
    }

    pub fn on_prepare_msg(&mut self, message: PrepareMessage) {
        if message.chain_key != self.chain_key || !message.is_correct() {
            return;
        }
        logging::debug::received_prepare(&self.chain_key, &message.signer, message.is_ok);
        self.record_prepare_vote(&message);
    }

    fn new_round(&mut self) {
        if !self.chain.is_ready() {
            return;
        }
        let committee_size = self.chain.committee_size();
        if committee_size == 0 {
            return;
        }
        self.round = self.current_round();
        self.next_height = self.chain.height() + 1;
        self.block = None;
        logging::debug::entered_new_round(&self.chain_key, self.next_height, self.round);

        let leader =
            ((self.chain.last_proposer_index() as u64 + 1 + self.round) % committee_size as u64) as usize;
        match self.chain.node_index() {
            Some(index) if index == leader => self.phase = Phase::Propose,
            Some(_) => self.phase = Phase::Listen,
            // Not a committee member: nothing to propose or vote on this round.
            None => (),
        }
    }

    fn propose(&mut self) {
        if self.elapsed_since_last_block() < self.chain.min_block_interval() {
            return;
        }
        let block = match self.chain.create_block(self.round) {
            Some(block) => block,
            // Nothing to build a block from yet; retried next tick.
            None => return,
        };
        logging::info::proposing(&self.chain_key, &block.hash(), block.height(), self.round);
        let message = ProposeMessage::new(&self.me, self.chain_key, self.round_key(), block.clone());
        self.broadcast(ConsensusMessage::Propose(message));
        self.block = Some(block);
        self.enter_prepare();
    }

    fn listen(&mut self) {
        let round_key = self.round_key();
        let proposal = match self.propose_msgs.get(&round_key) {
            Some(proposal) => proposal.clone(),
            None => return,
        };
        let valid = self.chain.validate_block(&proposal.block)
            && self
                .chain
                .validate_block_signature(&proposal.block, &proposal.signature);
        if !valid {
            // Free the slot for a redelivery; otherwise the round simply times out.
            self.propose_msgs.remove(&round_key);
            return;
        }
        logging::debug::adopted_proposal(&self.chain_key, &proposal.block.hash(), proposal.block.height());
        self.block = Some(proposal.block);
        self.enter_prepare();
    }

    fn prepare(&mut self) {
        let block = match &self.block {
            Some(block) => block.clone(),
            None => {
                self.enter_new_round();
                return;
            }
        };
        let votes = match self.prepare_msgs.get(&self.round_key()) {
            Some(votes) => votes,
            None => return,
        };
        match majority_vote(votes, self.chain.committee_size()) {
            MajorityVote::Approve => {
                logging::info::committed(&self.chain_key, &block.hash(), block.height());
                self.chain.insert_block(&block, true);
                self.enter_new_round();
            }
            MajorityVote::Reject => {
                logging::info::rejected(&self.chain_key, &block.hash(), block.height());
                self.chain.insert_block(&block, false);
                self.enter_new_round();
            }
            MajorityVote::Pending => (),
        }
    }

    /// Broadcast own vote, then wait in the prepare phase for the tally.
    fn enter_prepare(&mut self) {
        self.phase = Phase::Prepare;
        let block_hash = match &self.block {
            Some(block) => block.hash(),
            None => return,
        };
        let vote = PrepareMessage::new(&self.me, self.chain_key, self.round_key(), block_hash, true);
        logging::info::voted(&self.chain_key, &block_hash, self.next_height, true);
        self.record_prepare_vote(&vote);
        self.broadcast(ConsensusMessage::Prepare(vote));
    }

    fn enter_new_round(&mut self) {
        self.phase = Phase::NewRound;
        self.block = None;
        // Buffered messages for heights the chain has moved past can never be tallied again.
        let height = self.chain.height();
        self.propose_msgs.retain(|round_key, _| round_key.height > height);
        self.prepare_msgs.retain(|round_key, _| round_key.height > height);
    }

    fn record_prepare_vote(&mut self, vote: &PrepareMessage) {
        // First vote per signer wins.
        self.prepare_msgs
            .entry(vote.round_key)
            .or_default()
            .entry(vote.signer)
            .or_insert(vote.is_ok);
    }

    fn broadcast(&mut self, message: ConsensusMessage<B>) {
        match self.chain_key {
            ChainKey::Beacon => self.network.push_to_beacon(message),
            ChainKey::Shard(shard) => self.network.push_to_shard(shard, message),
        }
    }

    /// Whether the attempt the machine is working on still matches reality: nobody else has
    /// committed the height, and the round has not timed out under us.
    fn in_time_frame(&self) -> bool {
        self.chain.height() + 1 == self.next_height && self.current_round() <= self.round
    }

    fn round_key(&self) -> RoundKey {
        RoundKey::new(self.next_height, self.round)
    }

    /// Rounds at the current height tick over every `round_timeout` since the last block.
    fn current_round(&self) -> Round {
        let timeout = self.round_timeout.as_millis().max(1);
        (self.elapsed_since_last_block().as_millis() / timeout) as Round
    }

    fn elapsed_since_last_block(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        Duration::from_secs(now.saturating_sub(self.chain.last_block_timestamp()))
    }
}

/// Spawn the thread that owns `core`: drain the inbox, step the machine, wait a tick, repeat.
pub(crate) fn start_bft_actor<B, C, N>(
    mut core: BftCore<B, C, N>,
    inbox: Receiver<ConsensusMessage<B>>,
    mut ticker: Ticker,
) -> JoinHandle<()>
where
    B: Block,
    C: Chain<B>,
    N: Network<B> + 'static,
{
    thread::spawn(move || loop {
        loop {
            match inbox.try_recv() {
                Ok(message) => core.on_message(message),
                Err(TryRecvError::Empty) => break,

                // Safety: the poller thread outlives every consensus actor, so the sending half of
                // the inbox cannot have been dropped while this loop runs.
                Err(TryRecvError::Disconnected) => {
                    panic!("Consensus actor disconnected from the poller thread")
                }
            }
        }
        core.step();
        match ticker.wait() {
            TickerStatus::Tick => (),
            TickerStatus::Stop => return,
        }
    })
}
