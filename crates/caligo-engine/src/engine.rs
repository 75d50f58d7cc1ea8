//! engine facade
//!
//! owns the per-chain registries (merkle forest, contract adapter), the
//! wallet map, and the last-synced-block checkpoints. every external
//! capability (store, prover, artifact getter, quick-sync backfill) is
//! injected at construction; the engine itself holds no globals and never
//! submits anything on-chain.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::chain::Chain;
use crate::contract::{ContractRootValidator, PoolContract};
use crate::error::{EngineError, Result};
use crate::events::{QuickSync, SyncedEventData};
use crate::merkle::MerkleForest;
use crate::prover::{ArtifactGetter, Prover};
use crate::storage::{encode, ns, BatchOp, Database};
use crate::wallet::Wallet;
use caligo_pool::bytes::{u256_to_hex, ByteLength};

#[derive(Clone)]
struct LoadedChain {
    forest: Arc<RwLock<MerkleForest>>,
    contract: Arc<dyn PoolContract>,
    deployment_block: u64,
}

pub struct Engine {
    db: Arc<dyn Database>,
    prover: Arc<dyn Prover>,
    artifact_getter: Arc<dyn ArtifactGetter>,
    quick_sync: Option<Arc<dyn QuickSync>>,
    chains: RwLock<HashMap<Chain, LoadedChain>>,
    wallets: RwLock<HashMap<String, Arc<Wallet>>>,
}

impl Engine {
    pub fn new(
        db: Arc<dyn Database>,
        prover: Arc<dyn Prover>,
        artifact_getter: Arc<dyn ArtifactGetter>,
        quick_sync: Option<Arc<dyn QuickSync>>,
    ) -> Self {
        Self {
            db,
            prover,
            artifact_getter,
            quick_sync,
            chains: RwLock::new(HashMap::new()),
            wallets: RwLock::new(HashMap::new()),
        }
    }

    pub fn prover(&self) -> Arc<dyn Prover> {
        self.prover.clone()
    }

    pub fn artifact_getter(&self) -> Arc<dyn ArtifactGetter> {
        self.artifact_getter.clone()
    }

    pub fn db(&self) -> Arc<dyn Database> {
        self.db.clone()
    }

    /// instantiate or resume a chain's tree state, then backfill through the
    /// injected quick-sync source from the last checkpoint
    pub async fn load_network(
        &self,
        chain: Chain,
        contract: Arc<dyn PoolContract>,
        deployment_block: u64,
    ) -> Result<()> {
        let forest = MerkleForest::load(chain, self.db.clone()).await?;
        self.chains.write().await.insert(
            chain,
            LoadedChain {
                forest: Arc::new(RwLock::new(forest)),
                contract,
                deployment_block,
            },
        );
        info!(chain = %chain, deployment_block, "network loaded");

        self.quick_sync_backfill(chain).await
    }

    pub async fn unload_network(&self, chain: Chain) {
        self.chains.write().await.remove(&chain);
    }

    async fn loaded(&self, chain: Chain) -> Result<LoadedChain> {
        self.chains
            .read()
            .await
            .get(&chain)
            .cloned()
            .ok_or_else(|| EngineError::ChainNotLoaded(chain.key()))
    }

    pub async fn forest(&self, chain: Chain) -> Result<Arc<RwLock<MerkleForest>>> {
        Ok(self.loaded(chain).await?.forest)
    }

    pub async fn contract(&self, chain: Chain) -> Result<Arc<dyn PoolContract>> {
        Ok(self.loaded(chain).await?.contract)
    }

    /// apply one normalized event batch: token registry entries and
    /// nullifier/unshield records land first, then commitments flow through
    /// the forest with the contract validating each new root
    pub async fn ingest_events(&self, chain: Chain, data: SyncedEventData) -> Result<()> {
        let loaded = self.loaded(chain).await?;
        let chain_key = chain.key();

        let mut ops = Vec::new();
        for batch in &data.commitments {
            for commitment in &batch.commitments {
                if let crate::events::CommitmentPayload::Shield { preimage, .. } =
                    &commitment.payload
                {
                    let token_hash = preimage.token.hash()?;
                    ops.push(BatchOp::Put {
                        key: ns::token(&u256_to_hex(token_hash, ByteLength::Uint256)),
                        value: encode(&preimage.token)?,
                    });
                }
            }
        }
        for event in &data.nullifiers {
            ops.push(BatchOp::Put {
                key: ns::nullifier(
                    &chain_key,
                    &u256_to_hex(event.nullifier, ByteLength::Uint256),
                ),
                value: encode(&crate::events::NullifierRecord {
                    txid: event.txid,
                    block_number: event.block_number,
                })?,
            });
        }
        let mut unshield_seq: HashMap<ruint::aliases::U256, usize> = HashMap::new();
        for event in &data.unshields {
            let seq = unshield_seq.entry(event.txid).or_insert(0);
            ops.push(BatchOp::Put {
                key: ns::unshield(
                    &chain_key,
                    &u256_to_hex(event.txid, ByteLength::Uint256),
                    *seq,
                ),
                value: encode(event)?,
            });
            *seq += 1;
        }
        if !ops.is_empty() {
            self.db.batch(ops).await?;
        }

        let validator = ContractRootValidator(loaded.contract.clone());
        {
            let mut forest = loaded.forest.write().await;
            for batch in &data.commitments {
                forest.queue_leaves(batch.tree_number, batch.start_index, batch.records())?;
            }
            forest.update_trees(&validator).await?;
        }

        if let Some(block) = data.max_block() {
            let current = self.get_last_synced_block(chain).await?.unwrap_or(0);
            if block > current {
                self.set_last_synced_block(block, chain).await?;
            }
        }
        Ok(())
    }

    async fn quick_sync_backfill(&self, chain: Chain) -> Result<()> {
        let Some(quick_sync) = &self.quick_sync else {
            return Ok(());
        };
        let loaded = self.loaded(chain).await?;
        let start = match self.get_last_synced_block(chain).await? {
            Some(block) => block + 1,
            None => loaded.deployment_block,
        };
        info!(chain = %chain, start, "quick sync backfill");
        let data = quick_sync.fetch(chain, start).await?;
        self.ingest_events(chain, data).await
    }

    /// backfill, then bring every loaded wallet up to date
    pub async fn scan_history(&self, chain: Chain) -> Result<()> {
        self.quick_sync_backfill(chain).await?;

        let loaded = self.loaded(chain).await?;
        let forest = loaded.forest.read().await;
        let wallets: Vec<Arc<Wallet>> = self.wallets.read().await.values().cloned().collect();
        for wallet in wallets {
            if let Err(e) = wallet.scan_balances(chain, &*forest, None).await {
                warn!(wallet = %wallet.id(), chain = %chain, error = %e, "wallet scan failed");
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn create_wallet(
        &self,
        mnemonic: &str,
        index: u32,
        encryption_key: &[u8; 32],
    ) -> Result<Arc<Wallet>> {
        let wallet = Arc::new(
            Wallet::create(self.db.clone(), mnemonic, index, encryption_key).await?,
        );
        self.wallets
            .write()
            .await
            .insert(wallet.id().to_string(), wallet.clone());
        Ok(wallet)
    }

    pub async fn load_wallet(&self, id: &str, encryption_key: &[u8; 32]) -> Result<Arc<Wallet>> {
        let wallet = Arc::new(Wallet::load(self.db.clone(), id, encryption_key).await?);
        self.wallets
            .write()
            .await
            .insert(wallet.id().to_string(), wallet.clone());
        Ok(wallet)
    }

    pub async fn wallet(&self, id: &str) -> Option<Arc<Wallet>> {
        self.wallets.read().await.get(id).cloned()
    }

    /// forget the wallet in memory; persisted state stays
    pub async fn unload_wallet(&self, id: &str) {
        self.wallets.write().await.remove(id);
    }

    /// remove the wallet and everything it ever persisted
    pub async fn delete_wallet(&self, id: &str) -> Result<()> {
        self.unload_wallet(id).await;
        let prefix = format!("wallet/{id}/").into_bytes();
        let mut ops = Vec::new();
        let mut stream = self.db.iter_prefix(&prefix).await?;
        while let Some((key, _)) = stream.next().await {
            ops.push(BatchOp::Del { key });
        }
        if !ops.is_empty() {
            self.db.batch(ops).await?;
        }
        info!(wallet = %id, "wallet deleted");
        Ok(())
    }

    /// persisted checkpoint; reads of an unset chain return `None`
    pub async fn get_last_synced_block(&self, chain: Chain) -> Result<Option<u64>> {
        match self.db.get(&ns::last_synced_block(&chain.key())).await? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| EngineError::corrupt("last synced block width"))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    pub async fn set_last_synced_block(&self, block: u64, chain: Chain) -> Result<()> {
        self.db
            .put(&ns::last_synced_block(&chain.key()), &block.to_be_bytes())
            .await
    }
}
