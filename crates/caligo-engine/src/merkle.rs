//! append-only poseidon commitment forest
//!
//! mirrors the contract's commitment trees. leaves arrive from event
//! ingestion in whatever order the log filters deliver them; they are queued
//! per `(tree, index)` and only contiguous prefixes starting at `next_index`
//! are ever written. a write recomputes the affected internal nodes
//! bottom-up, asks the injected root validator to confirm the new root
//! against the contract, and lands leaves + nodes + meta in a single store
//! batch — a rejected root therefore persists nothing.
//!
//! trees are bounded at `2^depth` leaves. a batch that would overflow rolls
//! into the next tree at index 0. written nodes are immutable: leaves older
//! than `next_index` drop silently on rescans, while duplicate still-pending
//! leaves must match what is already queued.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use caligo_pool::poseidon_hash;
use futures::StreamExt;
use ruint::aliases::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::error::{EngineError, Result};
use crate::events::CommitmentRecord;
use crate::storage::{decode, encode, ns, BatchOp, Database};

pub const DEFAULT_TREE_DEPTH: usize = 16;

/// contract-side confirmation that a locally computed root is canonical
#[async_trait]
pub trait RootValidator: Send + Sync {
    async fn validate(&self, tree: u64, root: U256) -> Result<bool>;
}

/// closure adapter, mostly for tests
pub struct FnRootValidator<F>(pub F);

#[async_trait]
impl<F> RootValidator for FnRootValidator<F>
where
    F: Fn(u64, U256) -> bool + Send + Sync,
{
    async fn validate(&self, tree: u64, root: U256) -> Result<bool> {
        Ok((self.0)(tree, root))
    }
}

/// narrow read capability the wallet holds on the forest
#[async_trait]
pub trait TreeReader: Send + Sync {
    fn tree_count(&self) -> u64;
    fn next_index(&self, tree: u64) -> u64;
    fn root(&self, tree: u64) -> Result<U256>;
    fn has_historical_root(&self, tree: u64, root: U256) -> bool;
    fn proof(&self, tree: u64, leaf_index: u64) -> Result<MerkleProof>;
    async fn commitment(&self, tree: u64, index: u64) -> Result<Option<CommitmentRecord>>;
}

/// authentication path for one leaf
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: U256,
    pub elements: Vec<U256>,
    /// bit per level, true when the path node is a right child
    pub indices: Vec<bool>,
    pub root: U256,
}

impl MerkleProof {
    pub fn verify(&self) -> Result<bool> {
        let mut current = self.leaf;
        for (element, is_right) in self.elements.iter().zip(&self.indices) {
            current = if *is_right {
                poseidon_hash(&[*element, current])?
            } else {
                poseidon_hash(&[current, *element])?
            };
        }
        Ok(current == self.root)
    }
}

#[derive(Serialize, Deserialize)]
struct TreeMeta {
    next_index: u64,
    sealed: bool,
    historical_roots: Vec<U256>,
}

struct TreeState {
    next_index: u64,
    sealed: bool,
    historical_roots: Vec<U256>,
    /// every written node, keyed by (level, index); absent means zero subtree
    nodes: HashMap<(usize, u64), U256>,
}

impl TreeState {
    fn new() -> Self {
        Self {
            next_index: 0,
            sealed: false,
            historical_roots: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    fn node(&self, zeros: &[U256], level: usize, index: u64) -> U256 {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(zeros[level])
    }
}

pub struct MerkleForest {
    chain: Chain,
    db: Arc<dyn Database>,
    depth: usize,
    capacity: u64,
    /// zeros[l] is the root of an all-zero subtree of height l
    zeros: Vec<U256>,
    trees: Vec<TreeState>,
    /// buffered out-of-order leaves per tree
    pending: BTreeMap<u64, BTreeMap<u64, CommitmentRecord>>,
}

impl MerkleForest {
    pub async fn load(chain: Chain, db: Arc<dyn Database>) -> Result<Self> {
        Self::load_with_depth(chain, db, DEFAULT_TREE_DEPTH).await
    }

    /// smaller depths exist for tests that exercise rollover
    pub async fn load_with_depth(chain: Chain, db: Arc<dyn Database>, depth: usize) -> Result<Self> {
        let mut zeros = vec![U256::ZERO];
        for level in 0..depth {
            let z = zeros[level];
            zeros.push(poseidon_hash(&[z, z])?);
        }

        let mut forest = Self {
            chain,
            db,
            depth,
            capacity: 1u64 << depth,
            zeros,
            trees: Vec::new(),
            pending: BTreeMap::new(),
        };
        forest.resume().await?;
        Ok(forest)
    }

    /// reload persisted trees, if any
    async fn resume(&mut self) -> Result<()> {
        let chain_key = self.chain.key();
        let mut tree = 0u64;
        while let Some(bytes) = self.db.get(&ns::merkle_meta(&chain_key, tree)).await? {
            let meta: TreeMeta = decode(&bytes, "tree meta")?;
            let mut state = TreeState::new();
            state.next_index = meta.next_index;
            state.sealed = meta.sealed;
            state.historical_roots = meta.historical_roots;

            for level in 0..=self.depth {
                let prefix = ns::merkle_level_prefix(&chain_key, tree, level);
                let mut stream = self.db.iter_prefix(&prefix).await?;
                while let Some((key, value)) = stream.next().await {
                    let index = parse_trailing_index(&key, prefix.len())?;
                    if value.len() != 32 {
                        return Err(EngineError::corrupt("merkle node width"));
                    }
                    state.nodes.insert((level, index), U256::from_be_slice(&value));
                }
            }
            self.trees.push(state);
            tree += 1;
        }

        if self.trees.is_empty() {
            self.trees.push(TreeState::new());
        } else {
            info!(chain = %self.chain, trees = self.trees.len(), "resumed merkle forest");
        }
        Ok(())
    }

    fn ensure_tree(&mut self, tree: u64) {
        while (self.trees.len() as u64) <= tree {
            self.trees.push(TreeState::new());
        }
    }

    /// record pending leaves. nothing is committed until [`update_trees`]
    /// runs. batches beyond a tree's capacity spill into the next tree.
    pub fn queue_leaves(
        &mut self,
        tree: u64,
        start_index: u64,
        records: Vec<CommitmentRecord>,
    ) -> Result<()> {
        if records.iter().any(|r| r.hash == U256::ZERO) {
            return Err(EngineError::InvalidLeaf);
        }

        let mut tree = tree + start_index / self.capacity;
        let mut start = start_index % self.capacity;
        let mut remaining = records.as_slice();
        while !remaining.is_empty() {
            let space = (self.capacity - start) as usize;
            let take = remaining.len().min(space);
            self.queue_within_tree(tree, start, &remaining[..take])?;
            remaining = &remaining[take..];
            tree += 1;
            start = 0;
        }
        Ok(())
    }

    fn queue_within_tree(&mut self, tree: u64, start: u64, records: &[CommitmentRecord]) -> Result<()> {
        self.ensure_tree(tree);
        let next_index = self.trees[tree as usize].next_index;

        for (offset, record) in records.iter().enumerate() {
            let index = start + offset as u64;
            if index < next_index {
                // already written: idempotent rescans drop these silently
                continue;
            }
            let slot = self.pending.entry(tree).or_default();
            match slot.get(&index) {
                Some(existing) if existing.hash != record.hash => {
                    return Err(EngineError::ConflictingLeaf { tree, index });
                }
                Some(_) => {}
                None => {
                    slot.insert(index, record.clone());
                }
            }
        }
        debug!(tree, start, count = records.len(), "queued leaves");
        Ok(())
    }

    /// flush every contiguous pending prefix, validating each new root.
    /// a rejected root discards the batch and surfaces
    /// [`EngineError::RootValidationFailed`]; the store is untouched.
    pub async fn update_trees(&mut self, validator: &dyn RootValidator) -> Result<()> {
        let trees_with_pending: Vec<u64> = self.pending.keys().copied().collect();
        for tree in trees_with_pending {
            self.flush_tree(tree, validator).await?;
        }
        Ok(())
    }

    async fn flush_tree(&mut self, tree: u64, validator: &dyn RootValidator) -> Result<()> {
        self.ensure_tree(tree);
        let chain_key = self.chain.key();

        // collect the contiguous run starting at next_index
        let run: Vec<(u64, CommitmentRecord)> = {
            let state = &self.trees[tree as usize];
            let Some(slot) = self.pending.get(&tree) else {
                return Ok(());
            };
            let mut run = Vec::new();
            let mut index = state.next_index;
            while index < self.capacity {
                match slot.get(&index) {
                    Some(record) => run.push((index, record.clone())),
                    None => break,
                }
                index += 1;
            }
            run
        };
        if run.is_empty() {
            return Ok(());
        }

        // the batch is consumed whether or not the root validates
        if let Some(slot) = self.pending.get_mut(&tree) {
            for (index, _) in &run {
                slot.remove(index);
            }
            if slot.is_empty() {
                self.pending.remove(&tree);
            }
        }

        // recompute affected nodes bottom-up into an overlay
        let state = &self.trees[tree as usize];
        let mut overlay: HashMap<(usize, u64), U256> = HashMap::new();
        for (index, record) in &run {
            overlay.insert((0, *index), record.hash);
        }
        let (mut lo, mut hi) = (run[0].0, run[run.len() - 1].0);
        for level in 0..self.depth {
            let (parent_lo, parent_hi) = (lo / 2, hi / 2);
            for parent in parent_lo..=parent_hi {
                let left = node_or(&overlay, state, &self.zeros, level, 2 * parent);
                let right = node_or(&overlay, state, &self.zeros, level, 2 * parent + 1);
                overlay.insert((level + 1, parent), poseidon_hash(&[left, right])?);
            }
            lo = parent_lo;
            hi = parent_hi;
        }
        let new_root = overlay[&(self.depth, 0)];

        if !validator.validate(tree, new_root).await? {
            warn!(chain = %self.chain, tree, "root validation failed, batch rolled back");
            return Err(EngineError::RootValidationFailed { tree });
        }

        // leaves + internal nodes + meta in one batch so the persisted root
        // is never ahead of or behind its nodes
        let last_index = run[run.len() - 1].0;
        let mut ops: Vec<BatchOp> = Vec::with_capacity(overlay.len() + run.len() + 1);
        for ((level, index), value) in &overlay {
            ops.push(BatchOp::Put {
                key: ns::merkle_node(&chain_key, tree, *level, *index),
                value: value.to_be_bytes::<32>().to_vec(),
            });
        }
        for (index, record) in &run {
            ops.push(BatchOp::Put {
                key: ns::merkle_data(&chain_key, tree, *index),
                value: encode(record)?,
            });
        }

        let new_next_index = last_index + 1;
        let sealed = new_next_index == self.capacity;
        let mut historical_roots = self.trees[tree as usize].historical_roots.clone();
        historical_roots.push(new_root);
        ops.push(BatchOp::Put {
            key: ns::merkle_meta(&chain_key, tree),
            value: encode(&TreeMeta {
                next_index: new_next_index,
                sealed,
                historical_roots: historical_roots.clone(),
            })?,
        });

        self.db.batch(ops).await?;

        let state = &mut self.trees[tree as usize];
        state.next_index = new_next_index;
        state.sealed = sealed;
        state.historical_roots = historical_roots;
        state.nodes.extend(overlay);

        info!(
            chain = %self.chain,
            tree,
            leaves = run.len(),
            next_index = new_next_index,
            "committed leaf batch"
        );
        if sealed {
            self.ensure_tree(tree + 1);
        }
        Ok(())
    }
}

fn node_or(
    overlay: &HashMap<(usize, u64), U256>,
    state: &TreeState,
    zeros: &[U256],
    level: usize,
    index: u64,
) -> U256 {
    overlay
        .get(&(level, index))
        .copied()
        .unwrap_or_else(|| state.node(zeros, level, index))
}

fn parse_trailing_index(key: &[u8], prefix_len: usize) -> Result<u64> {
    core::str::from_utf8(&key[prefix_len..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::corrupt("merkle node key"))
}

#[async_trait]
impl TreeReader for MerkleForest {
    fn tree_count(&self) -> u64 {
        self.trees.len() as u64
    }

    fn next_index(&self, tree: u64) -> u64 {
        self.trees
            .get(tree as usize)
            .map(|t| t.next_index)
            .unwrap_or(0)
    }

    fn root(&self, tree: u64) -> Result<U256> {
        let state = self
            .trees
            .get(tree as usize)
            .ok_or(EngineError::LeafNotPresent { tree, index: 0 })?;
        Ok(state.node(&self.zeros, self.depth, 0))
    }

    fn has_historical_root(&self, tree: u64, root: U256) -> bool {
        self.trees
            .get(tree as usize)
            .map(|t| t.historical_roots.contains(&root))
            .unwrap_or(false)
    }

    fn proof(&self, tree: u64, leaf_index: u64) -> Result<MerkleProof> {
        let state = self
            .trees
            .get(tree as usize)
            .ok_or(EngineError::LeafNotPresent {
                tree,
                index: leaf_index,
            })?;
        if leaf_index >= state.next_index {
            return Err(EngineError::LeafNotPresent {
                tree,
                index: leaf_index,
            });
        }

        let mut elements = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);
        let mut index = leaf_index;
        for level in 0..self.depth {
            elements.push(state.node(&self.zeros, level, index ^ 1));
            indices.push(index & 1 == 1);
            index >>= 1;
        }

        Ok(MerkleProof {
            leaf: state.node(&self.zeros, 0, leaf_index),
            elements,
            indices,
            root: state.node(&self.zeros, self.depth, 0),
        })
    }

    async fn commitment(&self, tree: u64, index: u64) -> Result<Option<CommitmentRecord>> {
        let key = ns::merkle_data(&self.chain.key(), tree, index);
        match self.db.get(&key).await? {
            Some(bytes) => Ok(Some(decode(&bytes, "commitment record")?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CommitmentPayload;
    use crate::storage::MemoryDatabase;
    use caligo_pool::{ShieldPreimage, TokenData};

    fn record(hash: u64) -> CommitmentRecord {
        CommitmentRecord {
            hash: U256::from(hash),
            txid: U256::from(0xabcd_u64),
            block_number: 1,
            payload: CommitmentPayload::Shield {
                preimage: ShieldPreimage {
                    npk: U256::from(hash),
                    token: TokenData::Erc20([0x22; 20]),
                    value: hash as u128,
                },
                ciphertext: caligo_pool::NoteCiphertext {
                    ephemeral_pub: [0u8; 32],
                    ciphertext: vec![],
                },
            },
        }
    }

    fn accept_all() -> FnRootValidator<fn(u64, U256) -> bool> {
        FnRootValidator(|_, _| true)
    }

    async fn forest(db: Arc<dyn Database>) -> MerkleForest {
        MerkleForest::load_with_depth(Chain::evm(1), db, 4)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn proofs_recompute_the_root() {
        let db = Arc::new(MemoryDatabase::new());
        let mut forest = forest(db).await;
        forest
            .queue_leaves(0, 0, (1..=5).map(record).collect())
            .unwrap();
        forest.update_trees(&accept_all()).await.unwrap();

        for index in 0..5 {
            let proof = forest.proof(0, index).unwrap();
            assert!(proof.verify().unwrap(), "leaf {index}");
            assert_eq!(proof.root, forest.root(0).unwrap());
        }
        assert!(matches!(
            forest.proof(0, 5),
            Err(EngineError::LeafNotPresent { .. })
        ));
    }

    #[tokio::test]
    async fn out_of_order_batches_buffer_until_the_prefix_closes() {
        let db = Arc::new(MemoryDatabase::new());
        let mut forest = forest(db).await;

        forest
            .queue_leaves(0, 2, vec![record(3), record(4)])
            .unwrap();
        forest.update_trees(&accept_all()).await.unwrap();
        assert_eq!(forest.next_index(0), 0);

        forest
            .queue_leaves(0, 0, vec![record(1), record(2)])
            .unwrap();
        forest.update_trees(&accept_all()).await.unwrap();
        assert_eq!(forest.next_index(0), 4);
    }

    #[tokio::test]
    async fn stale_leaves_drop_silently() {
        let db = Arc::new(MemoryDatabase::new());
        let mut forest = forest(db).await;
        forest
            .queue_leaves(0, 0, vec![record(1), record(2)])
            .unwrap();
        forest.update_trees(&accept_all()).await.unwrap();
        let root = forest.root(0).unwrap();

        // identical replay is a no-op
        forest
            .queue_leaves(0, 0, vec![record(1), record(2)])
            .unwrap();
        forest.update_trees(&accept_all()).await.unwrap();
        assert_eq!(forest.next_index(0), 2);

        // so is an older leaf carrying a different value: written nodes are
        // immutable and rescans never rewrite them
        forest.queue_leaves(0, 1, vec![record(9)]).unwrap();
        forest.update_trees(&accept_all()).await.unwrap();
        assert_eq!(forest.next_index(0), 2);
        assert_eq!(forest.root(0).unwrap(), root);
        assert_eq!(forest.proof(0, 1).unwrap().leaf, U256::from(2u64));
    }

    #[tokio::test]
    async fn conflicting_pending_leaves_are_rejected() {
        let db = Arc::new(MemoryDatabase::new());
        let mut forest = forest(db).await;
        forest.queue_leaves(0, 3, vec![record(7)]).unwrap();
        assert!(matches!(
            forest.queue_leaves(0, 3, vec![record(8)]),
            Err(EngineError::ConflictingLeaf { tree: 0, index: 3 })
        ));
    }

    #[tokio::test]
    async fn zero_commitments_are_rejected() {
        let db = Arc::new(MemoryDatabase::new());
        let mut forest = forest(db).await;
        assert!(matches!(
            forest.queue_leaves(0, 0, vec![record(0)]),
            Err(EngineError::InvalidLeaf)
        ));
    }

    #[tokio::test]
    async fn rejected_root_rolls_back_the_batch() {
        let db = Arc::new(MemoryDatabase::new());
        let mut forest = forest(db).await;
        forest
            .queue_leaves(0, 0, vec![record(1), record(2)])
            .unwrap();

        let reject = FnRootValidator(|_, _| false);
        assert!(matches!(
            forest.update_trees(&reject).await,
            Err(EngineError::RootValidationFailed { tree: 0 })
        ));
        assert_eq!(forest.next_index(0), 0);
        assert!(matches!(
            forest.proof(0, 0),
            Err(EngineError::LeafNotPresent { .. })
        ));
        assert!(forest.commitment(0, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capacity_rolls_over_into_a_fresh_tree() {
        let db = Arc::new(MemoryDatabase::new());
        let mut forest = forest(db).await; // capacity 16
        forest
            .queue_leaves(0, 0, (1..=18).map(record).collect())
            .unwrap();
        forest.update_trees(&accept_all()).await.unwrap();

        assert_eq!(forest.tree_count(), 2);
        assert_eq!(forest.next_index(0), 16);
        assert_eq!(forest.next_index(1), 2);
        assert!(forest.proof(0, 15).unwrap().verify().unwrap());
        assert!(forest.proof(1, 1).unwrap().verify().unwrap());
    }

    #[tokio::test]
    async fn immutability_survives_reload() {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let root = {
            let mut forest = forest(db.clone()).await;
            forest
                .queue_leaves(0, 0, vec![record(1), record(2), record(3)])
                .unwrap();
            forest.update_trees(&accept_all()).await.unwrap();
            forest.root(0).unwrap()
        };

        let resumed = forest(db).await;
        assert_eq!(resumed.next_index(0), 3);
        assert_eq!(resumed.root(0).unwrap(), root);
        assert!(resumed.has_historical_root(0, root));
        assert!(resumed.proof(0, 2).unwrap().verify().unwrap());
        assert!(resumed.commitment(0, 1).await.unwrap().is_some());
    }
}
