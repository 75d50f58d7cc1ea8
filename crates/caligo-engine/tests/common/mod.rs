//! shared fixtures: mock capabilities and event builders
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ruint::aliases::U256;

use caligo_engine::contract::{PoolContract, ShieldInput, UnsignedTx};
use caligo_engine::error::Result;
use caligo_engine::events::{
    CommitmentBatchEvent, CommitmentData, CommitmentPayload, NullifierEvent, SyncedEventData,
    UnshieldEvent,
};
use caligo_engine::prover::{
    ArtifactGetter, ArtifactId, Artifacts, Groth16Proof, Prover, PublicInputs, Witness,
};
use caligo_engine::transaction::SerializedTransaction;
use caligo_engine::wallet::Wallet;
use caligo_engine::{Chain, EngineError};
use caligo_pool::{NoteCiphertext, ShieldNote, TokenData};

pub const MNEMONIC_1: &str = "test test test test test test test test test test test junk";
pub const MNEMONIC_2: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const ENCRYPTION_KEY: [u8; 32] = [7u8; 32];

pub fn chain() -> Chain {
    Chain::evm(1)
}

pub fn erc20() -> TokenData {
    TokenData::Erc20([0xee; 20])
}

/// prover that emits a deterministic proof without doing any work
pub struct MockProver;

#[async_trait]
impl Prover for MockProver {
    async fn prove(
        &self,
        artifact: ArtifactId,
        public_inputs: &PublicInputs,
        _witness: &Witness,
    ) -> Result<Groth16Proof> {
        Ok(Groth16Proof {
            a: [
                U256::from(artifact.nullifiers as u64),
                U256::from(artifact.outputs as u64),
            ],
            b: [
                [public_inputs.merkle_root, public_inputs.bound_params_hash],
                [U256::from(1u64), U256::from(2u64)],
            ],
            c: [U256::from(3u64), U256::from(4u64)],
        })
    }
}

/// hands out empty artifacts for every legal circuit shape
pub struct MockArtifacts;

#[async_trait]
impl ArtifactGetter for MockArtifacts {
    async fn get_artifacts(&self, nullifiers: usize, outputs: usize) -> Result<Artifacts> {
        let legal_inputs = [1usize, 2, 8].contains(&nullifiers);
        let legal_outputs = (2..=3).contains(&outputs);
        if !legal_inputs || !legal_outputs {
            return Err(EngineError::ArtifactUnavailable(format!(
                "{nullifiers}x{outputs}"
            )));
        }
        Ok(Artifacts {
            vkey: vec![],
            wasm: vec![],
            zkey: vec![],
        })
    }
}

/// contract adapter whose root validator can be flipped to reject
pub struct MockContract {
    pub reject_roots: AtomicBool,
}

impl MockContract {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reject_roots: AtomicBool::new(false),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject_roots: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl PoolContract for MockContract {
    async fn generate_shield(&self, _shields: Vec<ShieldInput>) -> Result<UnsignedTx> {
        Ok(UnsignedTx {
            to: [0u8; 20],
            data: vec![],
            value: U256::ZERO,
        })
    }

    async fn transact(&self, _transactions: Vec<SerializedTransaction>) -> Result<UnsignedTx> {
        Ok(UnsignedTx {
            to: [0u8; 20],
            data: vec![],
            value: U256::ZERO,
        })
    }

    async fn tree_number(&self) -> Result<u64> {
        Ok(0)
    }

    async fn merkle_root(&self, _tree: u64) -> Result<U256> {
        Ok(U256::ZERO)
    }

    async fn validate_merkle_root(&self, _tree: u64, _root: U256) -> Result<bool> {
        Ok(!self.reject_roots.load(Ordering::SeqCst))
    }

    async fn nullifier_events(&self, _from: u64, _to: u64) -> Result<Vec<NullifierEvent>> {
        Ok(vec![])
    }

    async fn commitment_events(&self, _from: u64, _to: u64) -> Result<Vec<CommitmentBatchEvent>> {
        Ok(vec![])
    }

    async fn unshield_events(&self, _from: u64, _to: u64) -> Result<Vec<UnshieldEvent>> {
        Ok(vec![])
    }
}

/// build a shield note to a wallet plus its sealed random
pub fn make_shield(wallet: &Wallet, token: &TokenData, value: u128) -> (ShieldNote, NoteCiphertext) {
    let mut rng = rand::thread_rng();
    let note = ShieldNote::new(
        wallet.keys().master_public_key().unwrap(),
        token.clone(),
        value,
        &mut rng,
    )
    .unwrap();
    let sealed = note
        .seal(&wallet.keys().viewing_public_key().unwrap(), &mut rng)
        .unwrap();
    (note, sealed)
}

/// wrap shield notes into one commitment batch event
pub fn shield_event(
    tree: u64,
    start_index: u64,
    txid: u64,
    block: u64,
    shields: &[(ShieldNote, NoteCiphertext)],
) -> CommitmentBatchEvent {
    CommitmentBatchEvent {
        tree_number: tree,
        start_index,
        txid: U256::from(txid),
        block_number: block,
        commitments: shields
            .iter()
            .map(|(note, sealed)| CommitmentData {
                hash: note.hash().unwrap(),
                payload: CommitmentPayload::Shield {
                    preimage: note.preimage().unwrap(),
                    ciphertext: sealed.clone(),
                },
            })
            .collect(),
    }
}

/// replay a proved transaction the way the contract would emit it: inserted
/// commitments (the unshield preimage hash never enters the tree) plus the
/// spent nullifiers
pub fn transact_events(
    tree: u64,
    start_index: u64,
    txid: u64,
    block: u64,
    transactions: &[SerializedTransaction],
) -> SyncedEventData {
    let mut data = SyncedEventData::default();
    let mut index = start_index;
    for tx in transactions {
        let inserted = if tx.unshield_preimage.is_some() {
            &tx.commitments[..tx.commitments.len() - 1]
        } else {
            &tx.commitments[..]
        };
        assert_eq!(inserted.len(), tx.bound_params.commitment_ciphertexts.len());

        data.commitments.push(CommitmentBatchEvent {
            tree_number: tree,
            start_index: index,
            txid: U256::from(txid),
            block_number: block,
            commitments: inserted
                .iter()
                .zip(&tx.bound_params.commitment_ciphertexts)
                .map(|(hash, ciphertext)| CommitmentData {
                    hash: *hash,
                    payload: CommitmentPayload::Transact {
                        ciphertext: ciphertext.clone(),
                    },
                })
                .collect(),
        });
        index += inserted.len() as u64;

        for nullifier in &tx.nullifiers {
            data.nullifiers.push(NullifierEvent {
                nullifier: *nullifier,
                txid: U256::from(txid),
                block_number: block,
            });
        }
    }
    data
}

/// contract-side unshield receipt for the same transaction
pub fn unshield_event(
    txid: u64,
    block: u64,
    token: &TokenData,
    to: [u8; 20],
    value: u128,
    fee: u128,
) -> UnshieldEvent {
    UnshieldEvent {
        txid: U256::from(txid),
        block_number: block,
        token: token.clone(),
        to,
        value,
        fee,
    }
}
