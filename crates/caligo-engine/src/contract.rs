//! smart-contract and provider capabilities
//!
//! the engine never talks JSON-RPC itself; hosts hand in adapters for the
//! pool contract and (for adapters that need it) the underlying provider.
//! everything returns normalized event types, and the contract's
//! `validate_merkle_root` doubles as the forest's root validator.

use async_trait::async_trait;
use caligo_pool::{NoteCiphertext, ShieldPreimage};
use ruint::aliases::U256;
use std::sync::Arc;

use crate::error::Result;
use crate::events::{CommitmentBatchEvent, NullifierEvent, UnshieldEvent};
use crate::merkle::RootValidator;
use crate::transaction::SerializedTransaction;

/// calldata the host signs and submits; the engine never broadcasts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTx {
    pub to: [u8; 20],
    pub data: Vec<u8>,
    pub value: U256,
}

/// one shield request: cleartext preimage plus the sealed random
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShieldInput {
    pub preimage: ShieldPreimage,
    pub ciphertext: NoteCiphertext,
}

/// minimal EVM provider surface, consumed only by adapters
#[async_trait]
pub trait Provider: Send + Sync {
    async fn block_number(&self) -> Result<u64>;
    async fn chain_id(&self) -> Result<u64>;
}

/// the shielded-pool contract adapter
#[async_trait]
pub trait PoolContract: Send + Sync {
    async fn generate_shield(&self, shields: Vec<ShieldInput>) -> Result<UnsignedTx>;
    async fn transact(&self, transactions: Vec<SerializedTransaction>) -> Result<UnsignedTx>;
    async fn tree_number(&self) -> Result<u64>;
    async fn merkle_root(&self, tree: u64) -> Result<U256>;
    async fn validate_merkle_root(&self, tree: u64, root: U256) -> Result<bool>;
    async fn nullifier_events(&self, from_block: u64, to_block: u64)
        -> Result<Vec<NullifierEvent>>;
    async fn commitment_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<CommitmentBatchEvent>>;
    async fn unshield_events(&self, from_block: u64, to_block: u64) -> Result<Vec<UnshieldEvent>>;
}

/// adapts a contract into the forest's root validator
pub struct ContractRootValidator(pub Arc<dyn PoolContract>);

#[async_trait]
impl RootValidator for ContractRootValidator {
    async fn validate(&self, tree: u64, root: U256) -> Result<bool> {
        self.0.validate_merkle_root(tree, root).await
    }
}
