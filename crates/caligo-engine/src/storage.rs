//! key-value store capability
//!
//! the engine owns its store exclusively for its lifetime but never picks the
//! backend; hosts inject anything satisfying [`Database`]. writes that must
//! land together (a merkle batch: leaves, internal nodes, meta) go through
//! `batch` so the backend can make them atomic. `MemoryDatabase` backs tests
//! and ephemeral hosts.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{EngineError, Result};

/// one operation of an atomic write batch
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    async fn del(&self, key: &[u8]) -> Result<()>;
    /// apply all ops or none
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<()>;
    /// lazy key-ordered sequence of every `(key, value)` under a prefix
    async fn iter_prefix(&self, prefix: &[u8]) -> Result<BoxStream<'static, (Vec<u8>, Vec<u8>)>>;
}

/// in-memory backend
#[derive(Default)]
pub struct MemoryDatabase {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> EngineError {
        EngineError::StoreIo("memory store lock poisoned".into())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.map.read().map_err(|_| Self::lock_poisoned())?;
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut map = self.map.write().map_err(|_| Self::lock_poisoned())?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn del(&self, key: &[u8]) -> Result<()> {
        let mut map = self.map.write().map_err(|_| Self::lock_poisoned())?;
        map.remove(key);
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut map = self.map.write().map_err(|_| Self::lock_poisoned())?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Del { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn iter_prefix(&self, prefix: &[u8]) -> Result<BoxStream<'static, (Vec<u8>, Vec<u8>)>> {
        let map = self.map.read().map_err(|_| Self::lock_poisoned())?;
        let items: Vec<(Vec<u8>, Vec<u8>)> = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// bincode wrappers for persisted records
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| EngineError::Corrupt(e.to_string()))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], context: &str) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| EngineError::Corrupt(format!("{context}: {e}")))
}

/// namespaced key builders; the single source of truth for the persisted
/// layout
pub mod ns {
    pub fn merkle_node(chain_key: &str, tree: u64, level: usize, index: u64) -> Vec<u8> {
        format!("merkle/{chain_key}/{tree}/{level}/{index}").into_bytes()
    }

    pub fn merkle_level_prefix(chain_key: &str, tree: u64, level: usize) -> Vec<u8> {
        format!("merkle/{chain_key}/{tree}/{level}/").into_bytes()
    }

    pub fn merkle_data(chain_key: &str, tree: u64, index: u64) -> Vec<u8> {
        format!("merkle/{chain_key}/{tree}/data/{index}").into_bytes()
    }

    pub fn merkle_meta(chain_key: &str, tree: u64) -> Vec<u8> {
        format!("merkle/{chain_key}/{tree}/meta").into_bytes()
    }

    pub fn wallet_meta(wallet_id: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/meta").into_bytes()
    }

    pub fn wallet_details(wallet_id: &str, chain_key: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/details/{chain_key}").into_bytes()
    }

    pub fn wallet_txo(wallet_id: &str, chain_key: &str, tree: u64, index: u64) -> Vec<u8> {
        format!("wallet/{wallet_id}/txo/{chain_key}/{tree}/{index}").into_bytes()
    }

    pub fn wallet_txo_prefix(wallet_id: &str, chain_key: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/txo/{chain_key}/").into_bytes()
    }

    pub fn wallet_sent(wallet_id: &str, chain_key: &str, tree: u64, index: u64) -> Vec<u8> {
        format!("wallet/{wallet_id}/sent/{chain_key}/{tree}/{index}").into_bytes()
    }

    pub fn wallet_sent_prefix(wallet_id: &str, chain_key: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/sent/{chain_key}/").into_bytes()
    }

    pub fn last_synced_block(chain_key: &str) -> Vec<u8> {
        format!("engine/lastSyncedBlock/{chain_key}").into_bytes()
    }

    pub fn nullifier(chain_key: &str, nullifier: &str) -> Vec<u8> {
        format!("nullifiers/{chain_key}/{nullifier}").into_bytes()
    }

    pub fn token(token_hash: &str) -> Vec<u8> {
        format!("token/{token_hash}").into_bytes()
    }

    pub fn unshield(chain_key: &str, txid: &str, n: usize) -> Vec<u8> {
        format!("unshields/{chain_key}/{txid}/{n}").into_bytes()
    }

    pub fn unshield_prefix(chain_key: &str) -> Vec<u8> {
        format!("unshields/{chain_key}/").into_bytes()
    }
}
