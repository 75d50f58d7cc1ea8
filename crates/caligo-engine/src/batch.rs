//! transaction batching
//!
//! collects outputs and unshield requests across tokens, runs the solutions
//! engine per token, and proves the resulting groups sequentially so no two
//! groups ever spend the same UTXO. building is all-or-nothing: the first
//! failing token aborts the batch and its error names the token.

use std::collections::BTreeMap;

use caligo_pool::bytes::{u256_to_hex, ByteLength};
use caligo_pool::{TransactNote, UnshieldNote};
use ruint::aliases::U256;
use tracing::info;

use crate::chain::Chain;
use crate::error::{EngineError, Result};
use crate::merkle::TreeReader;
use crate::prover::{ArtifactGetter, Prover};
use crate::solutions::create_spending_solution_groups;
use crate::transaction::{AdaptId, SerializedTransaction, Transaction};
use crate::wallet::{ProgressCallback, Wallet};

pub struct TransactionBatch {
    chain: Chain,
    min_gas_price: u128,
    outputs: Vec<TransactNote>,
    unshields: BTreeMap<U256, UnshieldNote>,
    adapt: AdaptId,
}

impl TransactionBatch {
    pub fn new(chain: Chain, min_gas_price: u128) -> Self {
        Self {
            chain,
            min_gas_price,
            outputs: Vec::new(),
            unshields: BTreeMap::new(),
            adapt: AdaptId::default(),
        }
    }

    pub fn add_output(&mut self, note: TransactNote) {
        self.outputs.push(note);
    }

    /// at most one unshield per token, and it must move value
    pub fn add_unshield_data(&mut self, note: UnshieldNote) -> Result<()> {
        if note.value == 0 {
            return Err(EngineError::InvalidUnshieldValue);
        }
        let token_hash = note.token.hash()?;
        if self.unshields.contains_key(&token_hash) {
            return Err(EngineError::DuplicateUnshield(u256_to_hex(
                token_hash,
                ByteLength::Uint256,
            )));
        }
        self.unshields.insert(token_hash, note);
        Ok(())
    }

    pub fn set_adapt_id(&mut self, adapt: AdaptId) {
        self.adapt = adapt;
    }

    /// solve, assemble, and prove every group. progress is the average of
    /// per-group completion (groups prove sequentially, so that is the
    /// completed fraction).
    pub async fn generate_transactions<R: rand::RngCore>(
        &self,
        prover: &dyn Prover,
        artifacts: &dyn ArtifactGetter,
        wallet: &Wallet,
        reader: &dyn TreeReader,
        progress: Option<ProgressCallback<'_>>,
        rng: &mut R,
    ) -> Result<Vec<SerializedTransaction>> {
        let balances = wallet.balances_by_tree(self.chain).await?;

        // outputs grouped per token hash, deterministic order
        let mut per_token: BTreeMap<U256, Vec<TransactNote>> = BTreeMap::new();
        for output in &self.outputs {
            per_token
                .entry(output.token.hash()?)
                .or_default()
                .push(output.clone());
        }
        for token_hash in self.unshields.keys() {
            per_token.entry(*token_hash).or_default();
        }

        let mut groups = Vec::new();
        for (token_hash, outputs) in per_token {
            let unshield = self.unshields.get(&token_hash).cloned();
            let token = outputs
                .first()
                .map(|o| o.token.clone())
                .or_else(|| unshield.as_ref().map(|u| u.token.clone()))
                .ok_or(EngineError::TokenMismatch)?;
            let tree_balances = balances.get(&token_hash).cloned().unwrap_or_default();
            groups.extend(create_spending_solution_groups(
                &token,
                &tree_balances,
                outputs,
                unshield,
                rng,
            )?);
        }

        info!(chain = %self.chain, groups = groups.len(), "proving transaction batch");
        let total = groups.len();
        let mut transactions = Vec::with_capacity(total);
        for (done, group) in groups.into_iter().enumerate() {
            let transaction =
                Transaction::new(self.chain, group, self.adapt.clone(), self.min_gas_price);
            transactions.push(
                transaction
                    .prove(prover, artifacts, wallet.keys(), reader, rng)
                    .await?,
            );
            if let Some(callback) = progress {
                callback((done + 1) as f64 / total as f64);
            }
        }
        Ok(transactions)
    }
}
