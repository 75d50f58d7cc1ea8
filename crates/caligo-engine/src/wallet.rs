//! wallet scanning and balance derivation
//!
//! a wallet walks freshly committed leaves through the narrow [`TreeReader`]
//! capability and trial-decrypts every payload: shield randoms unseal
//! against the viewing key and authenticate via the preimage npk, transact
//! envelopes decrypt outright, and sender annotations on foreign notes
//! become sent-note records for history. decryption failures are the normal
//! case and stay silent.
//!
//! scanned state is persisted per `(chain, tree, leaf)`; scans resume from
//! `tree_scanned_heights` and are idempotent. a TXO's spent flag is
//! monotonic: it flips once when the matching nullifier shows up and only a
//! full rescan can rebuild it.

use std::collections::HashMap;
use std::sync::Arc;

use caligo_pool::bytes::{u256_to_hex, ByteLength};
use caligo_pool::{
    encode_address, envelope, AddressData, MemoField, OutputType, PoolError, ShieldNote,
    TokenData, TransactNote, WalletKeys,
};
use futures::StreamExt;
use ruint::aliases::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::Chain;
use crate::error::{EngineError, Result};
use crate::events::{CommitmentPayload, CommitmentRecord, NullifierRecord, UnshieldEvent};
use crate::merkle::TreeReader;
use crate::storage::{decode, encode, ns, BatchOp, Database};

pub type ProgressCallback<'a> = &'a (dyn Fn(f64) + Send + Sync);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxoOrigin {
    Shield,
    Transact,
}

/// how a TXO left the wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentInfo {
    pub nullifier: U256,
    pub txid: U256,
    pub block_number: u64,
}

/// a decrypted note the wallet owns, pinned to its tree position.
/// unique per `(chain, tree_number, leaf_index)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txo {
    pub tree_number: u64,
    pub leaf_index: u64,
    pub commitment: U256,
    pub token: TokenData,
    pub value: u128,
    pub random: [u8; 16],
    pub memo: Option<MemoField>,
    pub sender_viewing_pub: Option<[u8; 32]>,
    pub origin: TxoOrigin,
    pub txid: U256,
    pub block_number: u64,
    pub spent: Option<SpentInfo>,
}

impl Txo {
    pub fn id(&self) -> String {
        format!("{}:{}", self.tree_number, self.leaf_index)
    }

    pub fn is_spent(&self) -> bool {
        self.spent.is_some()
    }

    pub fn output_type(&self) -> Option<OutputType> {
        self.memo.as_ref().map(|m| m.output_type)
    }
}

/// a note this wallet sent to someone else, recovered from the annotation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentNote {
    pub tree_number: u64,
    pub leaf_index: u64,
    pub token: TokenData,
    pub value: u128,
    pub output_type: OutputType,
    pub txid: U256,
    pub block_number: u64,
}

/// per-chain scan bookkeeping
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDetails {
    pub tree_scanned_heights: Vec<u64>,
    pub creation_tree: Option<u64>,
    pub creation_tree_height: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct WalletSecrets {
    mnemonic: String,
    index: u32,
}

/// unspent value in one tree, the solver's working unit
#[derive(Clone, Debug, Default)]
pub struct TreeBalance {
    pub tree_number: u64,
    pub balance: u128,
    pub utxos: Vec<Txo>,
}

pub struct Wallet {
    id: String,
    keys: WalletKeys,
    db: Arc<dyn Database>,
}

impl Wallet {
    /// derive keys, encrypt the secrets under the caller's key, persist
    pub async fn create(
        db: Arc<dyn Database>,
        mnemonic: &str,
        index: u32,
        encryption_key: &[u8; 32],
    ) -> Result<Self> {
        let keys = WalletKeys::from_mnemonic(mnemonic, index)?;
        let id = wallet_id(&keys)?;
        let secrets = encode(&WalletSecrets {
            mnemonic: mnemonic.to_string(),
            index,
        })?;
        let sealed = envelope::encrypt_with_key(encryption_key, &secrets, &mut rand::thread_rng())?;
        db.put(&ns::wallet_meta(&id), &sealed).await?;
        info!(wallet = %id, "created wallet");
        Ok(Self { id, keys, db })
    }

    /// unlock a persisted wallet; a missing record or wrong key is
    /// indistinguishable on purpose
    pub async fn load(db: Arc<dyn Database>, id: &str, encryption_key: &[u8; 32]) -> Result<Self> {
        let sealed = db
            .get(&ns::wallet_meta(id))
            .await?
            .ok_or(EngineError::WalletLocked)?;
        let secrets = envelope::decrypt_with_key(encryption_key, &sealed)
            .map_err(|_| EngineError::WalletLocked)?;
        let secrets: WalletSecrets = decode(&secrets, "wallet secrets")?;
        let keys = WalletKeys::from_mnemonic(&secrets.mnemonic, secrets.index)?;
        if wallet_id(&keys)? != id {
            return Err(EngineError::WalletLocked);
        }
        Ok(Self {
            id: id.to_string(),
            keys,
            db,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn keys(&self) -> &WalletKeys {
        &self.keys
    }

    pub fn address(&self, chain: Chain) -> Result<String> {
        let data = AddressData::from_keys(&self.keys, chain.chain_type.as_byte(), chain.id)?;
        Ok(encode_address(&data)?)
    }

    pub async fn details(&self, chain: Chain) -> Result<WalletDetails> {
        match self.db.get(&ns::wallet_details(&self.id, &chain.key())).await? {
            Some(bytes) => decode(&bytes, "wallet details"),
            None => Ok(WalletDetails::default()),
        }
    }

    async fn save_details(&self, chain: Chain, details: &WalletDetails) -> Result<()> {
        self.db
            .put(&ns::wallet_details(&self.id, &chain.key()), &encode(details)?)
            .await
    }

    /// record where this wallet came into existence; scans preserve it
    pub async fn mark_creation_point(&self, chain: Chain, tree: u64, height: u64) -> Result<()> {
        let mut details = self.details(chain).await?;
        details.creation_tree = Some(tree);
        details.creation_tree_height = Some(height);
        self.save_details(chain, &details).await
    }

    /// walk new leaves, decrypt what is ours, then cross-reference
    /// nullifiers. resumable and idempotent.
    pub async fn scan_balances(
        &self,
        chain: Chain,
        reader: &dyn TreeReader,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<()> {
        let chain_key = chain.key();
        let mut details = self.details(chain).await?;
        let tree_count = reader.tree_count();
        while details.tree_scanned_heights.len() < tree_count as usize {
            details.tree_scanned_heights.push(0);
        }

        let total_new: u64 = (0..tree_count)
            .map(|t| reader.next_index(t) - details.tree_scanned_heights[t as usize].min(reader.next_index(t)))
            .sum();
        let mut walked = 0u64;
        let mut found = 0usize;

        for tree in 0..tree_count {
            let start = details.tree_scanned_heights[tree as usize];
            let end = reader.next_index(tree);
            let mut ops = Vec::new();
            for index in start..end {
                if let Some(record) = reader.commitment(tree, index).await? {
                    found += self
                        .classify_leaf(&chain_key, tree, index, &record, &mut ops)
                        .await?;
                }
                walked += 1;
                if let Some(callback) = progress {
                    callback(walked as f64 / total_new as f64);
                }
            }
            if !ops.is_empty() {
                self.db.batch(ops).await?;
            }
            details.tree_scanned_heights[tree as usize] = end;
        }
        self.save_details(chain, &details).await?;
        self.mark_spent_txos(chain).await?;

        debug!(wallet = %self.id, chain = %chain, walked, found, "scan complete");
        Ok(())
    }

    /// trial-decrypt one leaf; returns how many records it produced
    async fn classify_leaf(
        &self,
        chain_key: &str,
        tree: u64,
        index: u64,
        record: &CommitmentRecord,
        ops: &mut Vec<BatchOp>,
    ) -> Result<usize> {
        match &record.payload {
            CommitmentPayload::Shield {
                preimage,
                ciphertext,
            } => match ShieldNote::unseal(&self.keys, preimage, ciphertext) {
                Ok(note) => {
                    let txo = Txo {
                        tree_number: tree,
                        leaf_index: index,
                        commitment: record.hash,
                        token: note.token,
                        value: note.value,
                        random: note.random,
                        memo: None,
                        sender_viewing_pub: None,
                        origin: TxoOrigin::Shield,
                        txid: record.txid,
                        block_number: record.block_number,
                        spent: None,
                    };
                    ops.push(BatchOp::Put {
                        key: ns::wallet_txo(&self.id, chain_key, tree, index),
                        value: encode(&txo)?,
                    });
                    Ok(1)
                }
                Err(PoolError::DecryptionFailed) => Ok(0),
                Err(e) => Err(e.into()),
            },
            CommitmentPayload::Transact { ciphertext } => {
                match TransactNote::decrypt(&self.keys, &ciphertext.note) {
                    Ok(payload) => {
                        let Some(token) = self.resolve_token(payload.token_hash).await? else {
                            debug!(tree, index, "own note references unknown token, skipped");
                            return Ok(0);
                        };
                        let note = TransactNote::from_decrypted(&self.keys, token, &payload)?;
                        if note.hash()? != record.hash {
                            debug!(tree, index, "decrypted note does not match its leaf");
                            return Ok(0);
                        }
                        let txo = Txo {
                            tree_number: tree,
                            leaf_index: index,
                            commitment: record.hash,
                            token: note.token,
                            value: note.value,
                            random: note.random,
                            memo: Some(payload.memo),
                            sender_viewing_pub: payload.sender_viewing_pub,
                            origin: TxoOrigin::Transact,
                            txid: record.txid,
                            block_number: record.block_number,
                            spent: None,
                        };
                        ops.push(BatchOp::Put {
                            key: ns::wallet_txo(&self.id, chain_key, tree, index),
                            value: encode(&txo)?,
                        });
                        Ok(1)
                    }
                    Err(PoolError::DecryptionFailed) => {
                        self.classify_annotation(chain_key, tree, index, record, ops)
                            .await
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// a note we could not decrypt may still be one we sent; the annotation
    /// is sealed back toward our own viewing key
    async fn classify_annotation(
        &self,
        chain_key: &str,
        tree: u64,
        index: u64,
        record: &CommitmentRecord,
        ops: &mut Vec<BatchOp>,
    ) -> Result<usize> {
        let CommitmentPayload::Transact { ciphertext } = &record.payload else {
            return Ok(0);
        };
        let Some(annotation) = &ciphertext.annotation else {
            return Ok(0);
        };
        match envelope::open(self.keys.viewing_key(), annotation) {
            Ok(plain) => {
                if plain.len() != 49 {
                    return Ok(0);
                }
                let output_type = match OutputType::from_byte(plain[0]) {
                    Ok(t) => t,
                    Err(_) => return Ok(0),
                };
                let mut value_bytes = [0u8; 16];
                value_bytes.copy_from_slice(&plain[1..17]);
                let token_hash = U256::from_be_slice(&plain[17..49]);
                let Some(token) = self.resolve_token(token_hash).await? else {
                    return Ok(0);
                };
                let sent = SentNote {
                    tree_number: tree,
                    leaf_index: index,
                    token,
                    value: u128::from_be_bytes(value_bytes),
                    output_type,
                    txid: record.txid,
                    block_number: record.block_number,
                };
                ops.push(BatchOp::Put {
                    key: ns::wallet_sent(&self.id, chain_key, tree, index),
                    value: encode(&sent)?,
                });
                Ok(1)
            }
            Err(PoolError::DecryptionFailed) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// look up concrete token data for a hash seen in a transact envelope;
    /// the registry is fed by shield preimages
    async fn resolve_token(&self, token_hash: U256) -> Result<Option<TokenData>> {
        let key = ns::token(&u256_to_hex(token_hash, ByteLength::Uint256));
        match self.db.get(&key).await? {
            Some(bytes) => Ok(Some(decode(&bytes, "token registry entry")?)),
            None => Ok(None),
        }
    }

    /// flip the spent flag on every own TXO whose nullifier has been
    /// observed. monotonic; re-running writes identical bytes.
    async fn mark_spent_txos(&self, chain: Chain) -> Result<()> {
        let chain_key = chain.key();
        let mut ops = Vec::new();
        for mut txo in self.txos(chain).await? {
            if txo.is_spent() {
                continue;
            }
            let nullifier = self.keys.nullifier(txo.leaf_index)?;
            let key = ns::nullifier(&chain_key, &u256_to_hex(nullifier, ByteLength::Uint256));
            if let Some(bytes) = self.db.get(&key).await? {
                let record: NullifierRecord = decode(&bytes, "nullifier record")?;
                txo.spent = Some(SpentInfo {
                    nullifier,
                    txid: record.txid,
                    block_number: record.block_number,
                });
                ops.push(BatchOp::Put {
                    key: ns::wallet_txo(&self.id, &chain_key, txo.tree_number, txo.leaf_index),
                    value: encode(&txo)?,
                });
            }
        }
        if !ops.is_empty() {
            self.db.batch(ops).await?;
        }
        Ok(())
    }

    pub async fn txos(&self, chain: Chain) -> Result<Vec<Txo>> {
        let mut txos = Vec::new();
        let mut stream = self
            .db
            .iter_prefix(&ns::wallet_txo_prefix(&self.id, &chain.key()))
            .await?;
        while let Some((_, bytes)) = stream.next().await {
            txos.push(decode(&bytes, "txo")?);
        }
        txos.sort_by_key(|t: &Txo| (t.tree_number, t.leaf_index));
        Ok(txos)
    }

    pub async fn sent_notes(&self, chain: Chain) -> Result<Vec<SentNote>> {
        let mut notes = Vec::new();
        let mut stream = self
            .db
            .iter_prefix(&ns::wallet_sent_prefix(&self.id, &chain.key()))
            .await?;
        while let Some((_, bytes)) = stream.next().await {
            notes.push(decode(&bytes, "sent note")?);
        }
        notes.sort_by_key(|n: &SentNote| (n.tree_number, n.leaf_index));
        Ok(notes)
    }

    /// unshield records for transactions this wallet spent in
    pub async fn unshields(&self, chain: Chain) -> Result<Vec<UnshieldEvent>> {
        let mut unshields = Vec::new();
        let mut stream = self
            .db
            .iter_prefix(&ns::unshield_prefix(&chain.key()))
            .await?;
        while let Some((_, bytes)) = stream.next().await {
            unshields.push(decode(&bytes, "unshield record")?);
        }
        Ok(unshields)
    }

    /// total unspent value per token hash
    pub async fn balances(&self, chain: Chain) -> Result<HashMap<U256, u128>> {
        let mut balances = HashMap::new();
        for txo in self.txos(chain).await? {
            if txo.is_spent() {
                continue;
            }
            *balances.entry(txo.token.hash()?).or_insert(0u128) += txo.value;
        }
        Ok(balances)
    }

    pub async fn balance(&self, chain: Chain, token: &TokenData) -> Result<u128> {
        Ok(self
            .balances(chain)
            .await?
            .get(&token.hash()?)
            .copied()
            .unwrap_or(0))
    }

    /// unspent value per token per tree, sorted by tree number; what the
    /// solutions engine consumes
    pub async fn balances_by_tree(&self, chain: Chain) -> Result<HashMap<U256, Vec<TreeBalance>>> {
        let mut per_token: HashMap<U256, Vec<TreeBalance>> = HashMap::new();
        for txo in self.txos(chain).await? {
            if txo.is_spent() {
                continue;
            }
            let token_hash = txo.token.hash()?;
            let trees = per_token.entry(token_hash).or_default();
            match trees.iter_mut().find(|t| t.tree_number == txo.tree_number) {
                Some(tree) => {
                    tree.balance += txo.value;
                    tree.utxos.push(txo);
                }
                None => trees.push(TreeBalance {
                    tree_number: txo.tree_number,
                    balance: txo.value,
                    utxos: vec![txo],
                }),
            }
        }
        for trees in per_token.values_mut() {
            trees.sort_by_key(|t| t.tree_number);
        }
        Ok(per_token)
    }

    /// drop all scanned state but keep the creation point
    pub async fn clear_scanned_balances(&self, chain: Chain) -> Result<()> {
        let chain_key = chain.key();
        let mut ops = Vec::new();
        for prefix in [
            ns::wallet_txo_prefix(&self.id, &chain_key),
            ns::wallet_sent_prefix(&self.id, &chain_key),
        ] {
            let mut stream = self.db.iter_prefix(&prefix).await?;
            while let Some((key, _)) = stream.next().await {
                ops.push(BatchOp::Del { key });
            }
        }
        if !ops.is_empty() {
            self.db.batch(ops).await?;
        }

        let details = self.details(chain).await?;
        self.save_details(
            chain,
            &WalletDetails {
                tree_scanned_heights: Vec::new(),
                creation_tree: details.creation_tree,
                creation_tree_height: details.creation_tree_height,
            },
        )
        .await
    }

    /// rebuild everything from leaf zero
    pub async fn full_rescan_balances(&self, chain: Chain, reader: &dyn TreeReader) -> Result<()> {
        info!(wallet = %self.id, chain = %chain, "full rescan");
        self.clear_scanned_balances(chain).await?;
        self.scan_balances(chain, reader, None).await
    }
}

/// wallet ids are public: a hash of the master public key
fn wallet_id(keys: &WalletKeys) -> Result<String> {
    let mpk = keys.master_public_key()?;
    let digest = blake3::hash(&mpk.to_be_bytes::<32>());
    Ok(hex::encode(&digest.as_bytes()[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDatabase;

    const MNEMONIC: &str = "test test test test test test test test test test test junk";

    #[tokio::test]
    async fn create_then_load_round_trip() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let key = [9u8; 32];
        let wallet = Wallet::create(db.clone(), MNEMONIC, 0, &key).await.unwrap();
        let id = wallet.id().to_string();

        let reloaded = Wallet::load(db.clone(), &id, &key).await.unwrap();
        assert_eq!(
            reloaded.keys().master_public_key().unwrap(),
            wallet.keys().master_public_key().unwrap()
        );
    }

    #[tokio::test]
    async fn wrong_encryption_key_is_locked() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let wallet = Wallet::create(db.clone(), MNEMONIC, 0, &[1u8; 32])
            .await
            .unwrap();
        let id = wallet.id().to_string();
        assert!(matches!(
            Wallet::load(db.clone(), &id, &[2u8; 32]).await,
            Err(EngineError::WalletLocked)
        ));
        assert!(matches!(
            Wallet::load(db, "unknown", &[1u8; 32]).await,
            Err(EngineError::WalletLocked)
        ));
    }

    #[tokio::test]
    async fn details_default_and_creation_point() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let wallet = Wallet::create(db, MNEMONIC, 0, &[1u8; 32]).await.unwrap();
        let chain = Chain::evm(1);

        assert_eq!(wallet.details(chain).await.unwrap(), WalletDetails::default());

        wallet.mark_creation_point(chain, 2, 17).await.unwrap();
        let details = wallet.details(chain).await.unwrap();
        assert_eq!(details.creation_tree, Some(2));
        assert_eq!(details.creation_tree_height, Some(17));

        // clearing keeps the creation point
        wallet.clear_scanned_balances(chain).await.unwrap();
        let details = wallet.details(chain).await.unwrap();
        assert_eq!(details.creation_tree, Some(2));
        assert!(details.tree_scanned_heights.is_empty());
    }

    #[tokio::test]
    async fn addresses_encode_the_chain() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let wallet = Wallet::create(db, MNEMONIC, 0, &[1u8; 32]).await.unwrap();
        let address = wallet.address(Chain::evm(137)).unwrap();
        let decoded = caligo_pool::decode_address(&address).unwrap();
        assert_eq!(decoded.chain_id, 137);
        assert_eq!(
            decoded.master_public_key,
            wallet.keys().master_public_key().unwrap()
        );
    }
}
