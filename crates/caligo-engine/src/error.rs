//! engine error taxonomy
//!
//! every kind a caller may want to branch on gets its own variant. solver
//! failures surface directly so the caller can consolidate; store and prover
//! errors pass through untouched and retry policy stays with the caller.

use caligo_pool::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient balance for token {token}: have {available}, need {required}")]
    InsufficientBalance {
        token: String,
        available: u128,
        required: u128,
    },

    /// aggregate balance covers the request but no valid group assignment
    /// exists; the wallet needs a consolidating self-transfer first
    #[error("balance requires consolidation for token {0}")]
    ConsolidateBalanceRequired(String),

    #[error("duplicate unshield for token {0}")]
    DuplicateUnshield(String),

    #[error("unshield value must be nonzero")]
    InvalidUnshieldValue,

    #[error("token mismatch in spending group")]
    TokenMismatch,

    #[error("merkle root rejected for tree {tree}")]
    RootValidationFailed { tree: u64 },

    #[error("conflicting leaf at tree {tree} index {index}")]
    ConflictingLeaf { tree: u64, index: u64 },

    #[error("zero-hash commitment rejected")]
    InvalidLeaf,

    #[error("no leaf at tree {tree} index {index}")]
    LeafNotPresent { tree: u64, index: u64 },

    #[error("wallet is locked or the encryption key is wrong")]
    WalletLocked,

    #[error("proving artifact unavailable: {0}")]
    ArtifactUnavailable(String),

    #[error("prover: {0}")]
    ProverFailed(String),

    #[error("store: {0}")]
    StoreIo(String),

    #[error("chain {0} not loaded")]
    ChainNotLoaded(String),

    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl EngineError {
    pub(crate) fn corrupt(context: impl Into<String>) -> Self {
        EngineError::Corrupt(context.into())
    }
}

pub type Result<T> = core::result::Result<T, EngineError>;
