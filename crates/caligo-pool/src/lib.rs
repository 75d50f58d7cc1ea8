//! caligo note primitives
//!
//! everything the shielded-pool engine needs that is pure computation:
//! fixed-width byte codecs, poseidon hashing over BN254, the wallet key
//! hierarchy, the bech32m address codec, the token model, and the shielded
//! note variants with their encrypted envelope. nothing here does I/O.

pub mod address;
pub mod bytes;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod note;
pub mod poseidon;
pub mod token;

pub use address::{decode_address, encode_address, AddressData};
pub use envelope::NoteCiphertext;
pub use error::{PoolError, Result};
pub use keys::{SecretKey, SpendSignature, WalletKeys};
pub use note::{
    DecryptedTransact, MemoField, Note, OutputType, ShieldNote, ShieldPreimage, TransactNote,
    UnshieldNote, MEMO_SENDER_RANDOM_NULL,
};
pub use poseidon::poseidon_hash;
pub use token::TokenData;
