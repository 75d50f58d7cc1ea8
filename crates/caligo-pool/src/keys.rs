//! wallet key hierarchy
//!
//! a wallet is rooted in a BIP39 mnemonic plus an account index. from the
//! 64-byte seed we derive two independent babyjubjub keys with
//! domain-separated blake3:
//!
//! - the spending key signs circuit inputs; its public key feeds the master
//!   public key
//! - the viewing key decrypts note envelopes; its scalar feeds the
//!   nullifying key, so a scan-only holder of the viewing branch can still
//!   mark notes spent
//!
//! curve points enter poseidon as their 32-byte compressed encoding reduced
//! into the field.

use babyjubjub_rs::{decompress_point, Point, PrivateKey};
use num_bigint::{BigInt, Sign};
use ruint::aliases::U256;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{PoolError, Result};
use crate::poseidon::{field_from_bytes, poseidon_hash};

const SPENDING_KEY_DOMAIN: &str = "caligo.spending-key.v1";
const VIEWING_KEY_DOMAIN: &str = "caligo.viewing-key.v1";

/// one babyjubjub secret, stored as the 32 seed bytes the curve library
/// expands into a scalar
#[derive(Clone)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// fresh random secret (ephemeral envelope keys, shield keys)
    pub fn random<R: rand::RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn private_key(&self) -> Result<PrivateKey> {
        PrivateKey::import(self.0.to_vec()).map_err(PoolError::curve)
    }

    /// expanded scalar, for poseidon-domain key material
    pub fn scalar(&self) -> Result<U256> {
        Ok(bigint_to_u256(&self.private_key()?.scalar_key()))
    }

    /// compressed public point
    pub fn public(&self) -> Result<[u8; 32]> {
        Ok(self.private_key()?.public().compress())
    }

    /// ECDH: this scalar times the other side's public point, compressed.
    /// both directions of an exchange land on the same bytes.
    pub fn shared_point(&self, other_public: &[u8; 32]) -> Result<[u8; 32]> {
        let point = decompress_point(*other_public).map_err(PoolError::curve)?;
        let scalar = self.private_key()?.scalar_key();
        Ok(point.mul_scalar(&scalar).compress())
    }

    /// EdDSA-style signature over a field element message
    pub fn sign(&self, message: U256) -> Result<SpendSignature> {
        let msg = BigInt::from_bytes_be(Sign::Plus, &message.to_be_bytes::<32>());
        let sig = self.private_key()?.sign(msg).map_err(PoolError::curve)?;
        Ok(SpendSignature {
            r8: sig.r_b8.compress(),
            s: bigint_to_u256(&sig.s),
        })
    }
}

/// signature carried in the proof witness
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendSignature {
    pub r8: [u8; 32],
    pub s: U256,
}

impl SpendSignature {
    pub fn verify(&self, public: &[u8; 32], message: U256) -> bool {
        let Ok(pk) = decompress_point(*public) else {
            return false;
        };
        let Ok(r_b8) = decompress_point(self.r8) else {
            return false;
        };
        let sig = babyjubjub_rs::Signature {
            r_b8,
            s: BigInt::from_bytes_be(Sign::Plus, &self.s.to_be_bytes::<32>()),
        };
        let msg = BigInt::from_bytes_be(Sign::Plus, &message.to_be_bytes::<32>());
        babyjubjub_rs::verify(pk, sig, msg)
    }
}

/// the spending + viewing key pair for one wallet account
#[derive(Clone)]
pub struct WalletKeys {
    spending: SecretKey,
    viewing: SecretKey,
    index: u32,
}

impl WalletKeys {
    pub fn from_mnemonic(phrase: &str, index: u32) -> Result<Self> {
        let mnemonic =
            bip39::Mnemonic::parse(phrase).map_err(|e| PoolError::Mnemonic(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));
        Ok(Self {
            spending: derive_secret(SPENDING_KEY_DOMAIN, &seed[..], index),
            viewing: derive_secret(VIEWING_KEY_DOMAIN, &seed[..], index),
            index,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn spending_public_key(&self) -> Result<[u8; 32]> {
        self.spending.public()
    }

    pub fn viewing_public_key(&self) -> Result<[u8; 32]> {
        self.viewing.public()
    }

    pub fn viewing_key(&self) -> &SecretKey {
        &self.viewing
    }

    /// Poseidon(viewing scalar); derivable without the spending branch
    pub fn nullifying_key(&self) -> Result<U256> {
        poseidon_hash(&[self.viewing.scalar()?])
    }

    /// Poseidon(spending public key, nullifying key); the npk root and the
    /// first half of the address payload
    pub fn master_public_key(&self) -> Result<U256> {
        let spend_pub = field_from_bytes(&self.spending.public()?);
        poseidon_hash(&[spend_pub, self.nullifying_key()?])
    }

    /// Poseidon(nullifying key, leaf index); published when the note at
    /// `leaf_index` is spent
    pub fn nullifier(&self, leaf_index: u64) -> Result<U256> {
        poseidon_hash(&[self.nullifying_key()?, U256::from(leaf_index)])
    }

    /// sign circuit inputs with the spending key
    pub fn sign(&self, message: U256) -> Result<SpendSignature> {
        self.spending.sign(message)
    }
}

fn derive_secret(domain: &str, seed: &[u8], index: u32) -> SecretKey {
    let mut hasher = blake3::Hasher::new_derive_key(domain);
    hasher.update(seed);
    hasher.update(&index.to_le_bytes());
    SecretKey(*hasher.finalize().as_bytes())
}

fn bigint_to_u256(value: &BigInt) -> U256 {
    let (_, bytes) = value.to_bytes_be();
    U256::from_be_slice(&bytes)
}

/// reduce a compressed point into the field; used wherever a point feeds
/// poseidon
pub fn point_to_field(compressed: &[u8; 32]) -> U256 {
    field_from_bytes(compressed)
}

#[cfg(test)]
pub(crate) const TEST_MNEMONIC: &str =
    "test test test test test test test test test test test junk";
