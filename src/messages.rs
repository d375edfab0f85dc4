/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between committee members.
//!
//! Every message names the chain it belongs to, the [round key](RoundKey) of the consensus attempt
//! it is part of, and the public key of its signer, and carries an Ed25519 signature over its
//! contents. A message whose signature does not verify against its named signer is dropped on
//! receipt without further processing.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, Verifier};

use crate::types::{
    Block, ChainKey, CryptoHash, PublicKeyBytes, RoundKey, Signature, SignatureBytes, SigningKey,
    VerifyingKey,
};

/// A message emitted or consumed by a consensus actor: either a leader's proposal, or a committee
/// member's vote on one.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage<B: Block> {
    Propose(ProposeMessage<B>),
    Prepare(PrepareMessage),
}

impl<B: Block> ConsensusMessage<B> {
    pub fn chain_key(&self) -> ChainKey {
        match self {
            ConsensusMessage::Propose(propose) => propose.chain_key,
            ConsensusMessage::Prepare(prepare) => prepare.chain_key,
        }
    }

    pub fn round_key(&self) -> RoundKey {
        match self {
            ConsensusMessage::Propose(propose) => propose.round_key,
            ConsensusMessage::Prepare(prepare) => prepare.round_key,
        }
    }
}

/// Broadcast by the leader of a round to put a block up for a vote.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct ProposeMessage<B: Block> {
    pub chain_key: ChainKey,
    pub round_key: RoundKey,
    pub block: B,
    pub signer: PublicKeyBytes,
    pub signature: SignatureBytes,
}

impl<B: Block> ProposeMessage<B> {
    /// Build and sign a proposal putting `block` up for a vote in the round identified by
    /// `round_key`.
    pub fn new(
        me: &SigningKey,
        chain_key: ChainKey,
        round_key: RoundKey,
        block: B,
    ) -> ProposeMessage<B> {
        let message_bytes = (&chain_key, &round_key, &block).try_to_vec().unwrap();
        let signature = me.sign(&message_bytes).to_bytes();
        ProposeMessage {
            chain_key,
            round_key,
            block,
            signer: me.verifying_key().to_bytes(),
            signature,
        }
    }
}

impl<B: Block> SignedMessage for ProposeMessage<B> {
    fn message_bytes(&self) -> Vec<u8> {
        (&self.chain_key, &self.round_key, &self.block)
            .try_to_vec()
            .unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer_bytes(&self) -> PublicKeyBytes {
        self.signer
    }
}

/// Broadcast by a committee member to vote on the block proposed in a round. `is_ok` is true if the
/// member found the block valid and wants it committed.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct PrepareMessage {
    pub chain_key: ChainKey,
    pub round_key: RoundKey,
    pub block_hash: CryptoHash,
    pub is_ok: bool,
    pub signer: PublicKeyBytes,
    pub signature: SignatureBytes,
}

impl PrepareMessage {
    /// Build and sign a vote on the block with hash `block_hash` in the round identified by
    /// `round_key`.
    pub fn new(
        me: &SigningKey,
        chain_key: ChainKey,
        round_key: RoundKey,
        block_hash: CryptoHash,
        is_ok: bool,
    ) -> PrepareMessage {
        let message_bytes = (&chain_key, &round_key, &block_hash, &is_ok)
            .try_to_vec()
            .unwrap();
        let signature = me.sign(&message_bytes).to_bytes();
        PrepareMessage {
            chain_key,
            round_key,
            block_hash,
            is_ok,
            signer: me.verifying_key().to_bytes(),
            signature,
        }
    }
}

impl SignedMessage for PrepareMessage {
    fn message_bytes(&self) -> Vec<u8> {
        (&self.chain_key, &self.round_key, &self.block_hash, &self.is_ok)
            .try_to_vec()
            .unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer_bytes(&self) -> PublicKeyBytes {
        self.signer
    }
}

pub(crate) trait SignedMessage {
    fn message_bytes(&self) -> Vec<u8>;
    fn signature_bytes(&self) -> SignatureBytes;
    fn signer_bytes(&self) -> PublicKeyBytes;

    /// Whether the message really was signed by the keypair it names as its signer.
    fn is_correct(&self) -> bool {
        let signer = match VerifyingKey::from_bytes(&self.signer_bytes()) {
            Ok(signer) => signer,
            Err(_) => return false,
        };
        let signature = Signature::from_bytes(&self.signature_bytes());
        signer.verify(&self.message_bytes(), &signature).is_ok()
    }
}
