//! error types for the note primitives

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("address decode: {0}")]
    AddressDecode(String),

    /// a ciphertext was not addressed to the key that tried to open it.
    /// expected during scans, never logged above debug.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid length for {context}: expected {expected}, got {actual}")]
    InvalidLength {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("value exceeds the 120-bit range")]
    ValueOverflow,

    #[error("malformed memo field")]
    MalformedMemo,

    #[error("poseidon: {0}")]
    Poseidon(#[from] light_poseidon::PoseidonError),

    #[error("curve: {0}")]
    Curve(String),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("mnemonic: {0}")]
    Mnemonic(String),
}

impl PoolError {
    /// babyjubjub-rs surfaces plain strings; keep them but tag the origin
    pub(crate) fn curve(e: impl Into<String>) -> Self {
        PoolError::Curve(e.into())
    }
}

pub type Result<T> = core::result::Result<T, PoolError>;
