//! [`TestBlock`], the block type used across the test suite, and helpers for building linked runs,
//! children, and forks of it.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use shardbft::pool::{CrossShardBlock, ShardBlock};
use shardbft::types::{Block, BlockHeight, CryptoHash, CryptoHasher, Round, ShardId};

/// A block whose hash commits to every one of its fields, so that any two blocks built differently
/// are guaranteed to collide nowhere.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub(crate) struct TestBlock {
    pub(crate) height: BlockHeight,
    pub(crate) round: Round,
    pub(crate) previous_hash: CryptoHash,
    pub(crate) from_shard: ShardId,
    pub(crate) to_shard: ShardId,
    pub(crate) data: Vec<u8>,
    pub(crate) hash: CryptoHash,
}

impl TestBlock {
    pub(crate) fn new(
        height: BlockHeight,
        round: Round,
        previous_hash: CryptoHash,
        from_shard: ShardId,
        to_shard: ShardId,
        data: Vec<u8>,
    ) -> TestBlock {
        let hash = {
            let mut hasher = CryptoHasher::new();
            hasher.update(height.to_le_bytes());
            hasher.update(round.to_le_bytes());
            hasher.update(previous_hash);
            hasher.update([from_shard, to_shard]);
            hasher.update(&data);
            hasher.finalize().into()
        };
        TestBlock {
            height,
            round,
            previous_hash,
            from_shard,
            to_shard,
            data,
            hash,
        }
    }
}

impl Block for TestBlock {
    fn height(&self) -> BlockHeight {
        self.height
    }

    fn hash(&self) -> CryptoHash {
        self.hash
    }

    fn previous_hash(&self) -> CryptoHash {
        self.previous_hash
    }

    fn round(&self) -> Round {
        self.round
    }
}

impl ShardBlock for TestBlock {
    fn shard_id(&self) -> ShardId {
        self.from_shard
    }
}

impl CrossShardBlock for TestBlock {
    fn from_shard(&self) -> ShardId {
        self.from_shard
    }

    fn to_shard(&self) -> ShardId {
        self.to_shard
    }
}

/// A hash-linked run of blocks at heights `from..=to` on shard 0.
pub(crate) fn chain_of(from: BlockHeight, to: BlockHeight) -> Vec<TestBlock> {
    shard_chain_of(0, from, to)
}

/// A hash-linked run of blocks at heights `from..=to` on the given shard.
pub(crate) fn shard_chain_of(shard: ShardId, from: BlockHeight, to: BlockHeight) -> Vec<TestBlock> {
    let mut blocks = Vec::new();
    let mut previous_hash = [0u8; 32];
    for height in from..=to {
        let block = TestBlock::new(
            height,
            0,
            previous_hash,
            shard,
            0,
            height.to_le_bytes().to_vec(),
        );
        previous_hash = block.hash;
        blocks.push(block);
    }
    blocks
}

/// The next block on `parent`'s branch.
pub(crate) fn child(parent: &TestBlock) -> TestBlock {
    TestBlock::new(
        parent.height + 1,
        0,
        parent.hash,
        parent.from_shard,
        parent.to_shard,
        (parent.height + 1).to_le_bytes().to_vec(),
    )
}

/// A competing block at `block`'s height on the same parent, produced one round later.
pub(crate) fn fork_of(block: &TestBlock) -> TestBlock {
    TestBlock::new(
        block.height,
        block.round + 1,
        block.previous_hash,
        block.from_shard,
        block.to_shard,
        b"fork".to_vec(),
    )
}

/// A block shipped from `from_shard` to `to_shard`. Cross-shard blocks are ordered by beacon
/// confirmations rather than hash linkage, so their previous hash is left zeroed.
pub(crate) fn cross_block(from_shard: ShardId, to_shard: ShardId, height: BlockHeight) -> TestBlock {
    TestBlock::new(height, 0, [0u8; 32], from_shard, to_shard, b"xs".to_vec())
}
