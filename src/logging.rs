/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! shardbft logs using the [log](https://docs.rs/log/latest/log/) crate. To get log messages printed
//! onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! Every message is a comma-separated list starting with the name of the event in PascalCase,
//! followed by the chain or pool the event happened on, followed by the event's particulars. Hashes
//! and public keys are printed as the first seven characters of their Base64 encoding.
//!
//! Events that mark progress (proposing, committing, evicting a fork) are logged at Info. Events
//! that merely trace message flow are logged at Debug.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

pub const ENTER_NEW_ROUND: &str = "EnterNewRound";
pub const PROPOSE: &str = "Propose";
pub const RECEIVE_PROPOSE: &str = "ReceivePropose";
pub const ADOPT_PROPOSAL: &str = "AdoptProposal";
pub const PREPARE: &str = "Prepare";
pub const RECEIVE_PREPARE: &str = "ReceivePrepare";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const REJECT_BLOCK: &str = "RejectBlock";
pub const OUT_OF_TIME_FRAME: &str = "OutOfTimeFrame";
pub const UNKNOWN_CHAIN: &str = "UnknownChain";
pub const CONFLICT_CACHED: &str = "ConflictCached";
pub const EVICT_FORK_TAIL: &str = "EvictForkTail";
pub const PROMOTE_BLOCK: &str = "PromoteBlock";
pub const REMOVE_BLOCKS: &str = "RemoveBlocks";
pub const SWAP_PENDING: &str = "SwapPending";
pub const CROSS_SHARD_ADMIT: &str = "CrossShardAdmit";
pub const CROSS_SHARD_DROP: &str = "CrossShardDrop";

pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes).chars().take(7).collect()
}

pub(crate) mod info {
    use super::*;
    use crate::types::{BlockHeight, ChainKey, CryptoHash, Round};

    pub(crate) fn proposing(chain: &ChainKey, block_hash: &CryptoHash, height: BlockHeight, round: Round) {
        log::info!(
            "{}, {}, {}, {}, {}",
            PROPOSE,
            chain,
            first_seven_base64_chars(block_hash),
            height,
            round
        );
    }

    pub(crate) fn voted(chain: &ChainKey, block_hash: &CryptoHash, height: BlockHeight, is_ok: bool) {
        log::info!(
            "{}, {}, {}, {}, {}",
            PREPARE,
            chain,
            first_seven_base64_chars(block_hash),
            height,
            is_ok
        );
    }

    pub(crate) fn committed(chain: &ChainKey, block_hash: &CryptoHash, height: BlockHeight) {
        log::info!(
            "{}, {}, {}, {}",
            COMMIT_BLOCK,
            chain,
            first_seven_base64_chars(block_hash),
            height
        );
    }

    pub(crate) fn rejected(chain: &ChainKey, block_hash: &CryptoHash, height: BlockHeight) {
        log::info!(
            "{}, {}, {}, {}",
            REJECT_BLOCK,
            chain,
            first_seven_base64_chars(block_hash),
            height
        );
    }

    pub(crate) fn fork_tail_evicted(pool: &str, block_hash: &CryptoHash, height: BlockHeight) {
        log::info!(
            "{}, {}, {}, {}",
            EVICT_FORK_TAIL,
            pool,
            first_seven_base64_chars(block_hash),
            height
        );
    }
}

pub(crate) mod debug {
    use super::*;
    use crate::types::{BlockHeight, ChainKey, CryptoHash, PublicKeyBytes, Round, ShardId};

    pub(crate) fn entered_new_round(chain: &ChainKey, height: BlockHeight, round: Round) {
        log::debug!("{}, {}, {}, {}", ENTER_NEW_ROUND, chain, height, round);
    }

    pub(crate) fn received_propose(
        chain: &ChainKey,
        origin: &PublicKeyBytes,
        block_hash: &CryptoHash,
        height: BlockHeight,
    ) {
        log::debug!(
            "{}, {}, {}, {}, {}",
            RECEIVE_PROPOSE,
            chain,
            first_seven_base64_chars(origin),
            first_seven_base64_chars(block_hash),
            height
        );
    }

    pub(crate) fn adopted_proposal(chain: &ChainKey, block_hash: &CryptoHash, height: BlockHeight) {
        log::debug!(
            "{}, {}, {}, {}",
            ADOPT_PROPOSAL,
            chain,
            first_seven_base64_chars(block_hash),
            height
        );
    }

    pub(crate) fn received_prepare(chain: &ChainKey, origin: &PublicKeyBytes, is_ok: bool) {
        log::debug!(
            "{}, {}, {}, {}",
            RECEIVE_PREPARE,
            chain,
            first_seven_base64_chars(origin),
            is_ok
        );
    }

    pub(crate) fn out_of_time_frame(chain: &ChainKey, expected_height: BlockHeight, next_height: BlockHeight) {
        log::debug!(
            "{}, {}, {}, {}",
            OUT_OF_TIME_FRAME,
            chain,
            expected_height,
            next_height
        );
    }

    pub(crate) fn unknown_chain(chain: &ChainKey) {
        log::debug!("{}, {}", UNKNOWN_CHAIN, chain);
    }

    pub(crate) fn conflict_cached(pool: &str, block_hash: &CryptoHash, height: BlockHeight) {
        log::debug!(
            "{}, {}, {}, {}",
            CONFLICT_CACHED,
            pool,
            first_seven_base64_chars(block_hash),
            height
        );
    }

    pub(crate) fn promoted(pool: &str, height: BlockHeight) {
        log::debug!("{}, {}, {}", PROMOTE_BLOCK, pool, height);
    }

    pub(crate) fn removed(pool: &str, count: usize, up_to: BlockHeight) {
        log::debug!("{}, {}, {}, {}", REMOVE_BLOCKS, pool, count, up_to);
    }

    pub(crate) fn swapped_pending(pool: &str, evicted_height: BlockHeight, admitted_height: BlockHeight) {
        log::debug!(
            "{}, {}, {}, {}",
            SWAP_PENDING,
            pool,
            evicted_height,
            admitted_height
        );
    }

    pub(crate) fn cross_shard_admitted(pool: &str, from_shard: ShardId, height: BlockHeight) {
        log::debug!("{}, {}, {}, {}", CROSS_SHARD_ADMIT, pool, from_shard, height);
    }

    pub(crate) fn cross_shard_dropped(pool: &str, from_shard: ShardId, height: BlockHeight) {
        log::debug!("{}, {}, {}, {}", CROSS_SHARD_DROP, pool, from_shard, height);
    }
}
