//! caligo engine
//!
//! privacy-preserving transaction engine for shielded-pool contracts on EVM
//! chains. the engine mirrors the pool's poseidon commitment forest,
//! trial-decrypts incoming notes toward wallet viewing keys, selects UTXOs
//! under the circuits' arity rules, and drives an injected groth16 prover.
//! it never talks to the chain or the disk itself: the store, contract
//! adapter, prover, artifact source, and backfill are all capabilities
//! handed to [`Engine::new`] and [`Engine::load_network`].
//!
//! dataflow: event ingestion pushes commitments into the merkle forest and
//! nullifiers into the per-chain store → wallets scan newly committed
//! leaves and keep per-token per-tree balances → a [`TransactionBatch`]
//! solves those balances into spending groups and proves each one.

pub mod batch;
pub mod chain;
pub mod contract;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod merkle;
pub mod prover;
pub mod solutions;
pub mod storage;
pub mod transaction;
pub mod wallet;

pub use batch::TransactionBatch;
pub use chain::{Chain, ChainType};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use merkle::{MerkleForest, MerkleProof, RootValidator, TreeReader};
pub use storage::{Database, MemoryDatabase};
pub use wallet::{Txo, Wallet, WalletDetails};
