//! normalized on-chain events
//!
//! adapters translate raw logs into these types; the engine is the only
//! writer that applies them. a shield's cleartext preimage doubles as the
//! chain-wide token registry entry, which is how transact ciphertexts (which
//! carry only the token hash) get resolved back to concrete token data.

use async_trait::async_trait;
use caligo_pool::{NoteCiphertext, ShieldPreimage};
use caligo_pool::TokenData;
use ruint::aliases::U256;
use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::Result;

/// published ciphertext of one transact output: the note sealed toward the
/// receiver plus an annotation sealed back toward the sender (sender-side
/// history needs it; change notes skip it since the sender can already
/// decrypt those)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactCiphertext {
    pub note: NoteCiphertext,
    pub annotation: Option<NoteCiphertext>,
}

/// scan-relevant payload stored next to each leaf
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentPayload {
    Shield {
        preimage: ShieldPreimage,
        ciphertext: NoteCiphertext,
    },
    Transact {
        ciphertext: TransactCiphertext,
    },
}

/// one commitment inside a batch event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentData {
    pub hash: U256,
    pub payload: CommitmentPayload,
}

/// persisted per-leaf record: the commitment plus its receipt coordinates
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub hash: U256,
    pub txid: U256,
    pub block_number: u64,
    pub payload: CommitmentPayload,
}

/// a contiguous run of new leaves announced by the contract
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentBatchEvent {
    pub tree_number: u64,
    pub start_index: u64,
    pub txid: U256,
    pub block_number: u64,
    pub commitments: Vec<CommitmentData>,
}

impl CommitmentBatchEvent {
    pub fn records(&self) -> Vec<CommitmentRecord> {
        self.commitments
            .iter()
            .map(|c| CommitmentRecord {
                hash: c.hash,
                txid: self.txid,
                block_number: self.block_number,
                payload: c.payload.clone(),
            })
            .collect()
    }
}

/// a spent-note tag observed on-chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NullifierEvent {
    pub nullifier: U256,
    pub txid: U256,
    pub block_number: u64,
}

/// what gets stored under `nullifiers/<chainKey>/<nullifier>`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierRecord {
    pub txid: U256,
    pub block_number: u64,
}

/// an exit to a public address; chain-side values (fee included) are
/// authoritative and never re-derived
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnshieldEvent {
    pub txid: U256,
    pub block_number: u64,
    pub token: TokenData,
    pub to: [u8; 20],
    pub value: u128,
    pub fee: u128,
}

/// one backfill response
#[derive(Clone, Debug, Default)]
pub struct SyncedEventData {
    pub commitments: Vec<CommitmentBatchEvent>,
    pub nullifiers: Vec<NullifierEvent>,
    pub unshields: Vec<UnshieldEvent>,
}

impl SyncedEventData {
    /// highest block seen across all contained events
    pub fn max_block(&self) -> Option<u64> {
        let blocks = self
            .commitments
            .iter()
            .map(|c| c.block_number)
            .chain(self.nullifiers.iter().map(|n| n.block_number))
            .chain(self.unshields.iter().map(|u| u.block_number));
        blocks.max()
    }
}

/// injected backfill source ("quick sync")
#[async_trait]
pub trait QuickSync: Send + Sync {
    async fn fetch(&self, chain: Chain, start_block: u64) -> Result<SyncedEventData>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_block_spans_event_kinds() {
        let data = SyncedEventData {
            commitments: vec![CommitmentBatchEvent {
                tree_number: 0,
                start_index: 0,
                txid: U256::from(1u64),
                block_number: 5,
                commitments: vec![],
            }],
            nullifiers: vec![NullifierEvent {
                nullifier: U256::from(2u64),
                txid: U256::from(3u64),
                block_number: 9,
            }],
            unshields: vec![],
        };
        assert_eq!(data.max_block(), Some(9));
        assert_eq!(SyncedEventData::default().max_block(), None);
    }
}
