//! encrypted note envelope
//!
//! notes travel to the receiver sealed under an ECDH shared point on
//! babyjubjub: the sender picks an ephemeral key, multiplies it into the
//! receiver's viewing public key, and derives the AES-256-GCM key and nonce
//! from the compressed shared point. the receiver repeats the exchange with
//! the published ephemeral key. a failed GCM tag means "not ours" and stays
//! silent at scan time.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::keys::SecretKey;

const ENVELOPE_KEY_DOMAIN: &str = "caligo.envelope.key.v1";
const ENVELOPE_IV_DOMAIN: &str = "caligo.envelope.iv.v1";

/// what gets published next to a commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCiphertext {
    pub ephemeral_pub: [u8; 32],
    /// AES-256-GCM output, tag appended
    pub ciphertext: Vec<u8>,
}

/// seal plaintext toward a viewing public key
pub fn seal(
    ephemeral: &SecretKey,
    receiver_viewing_pub: &[u8; 32],
    plaintext: &[u8],
) -> Result<NoteCiphertext> {
    let shared = ephemeral.shared_point(receiver_viewing_pub)?;
    let (key, iv) = derive_key_iv(&shared);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| PoolError::DecryptionFailed)?;
    Ok(NoteCiphertext {
        ephemeral_pub: ephemeral.public()?,
        ciphertext,
    })
}

/// attempt to open an envelope with a viewing secret
pub fn open(viewing: &SecretKey, envelope: &NoteCiphertext) -> Result<Vec<u8>> {
    let shared = viewing.shared_point(&envelope.ephemeral_pub)?;
    let (key, iv) = derive_key_iv(&shared);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(&iv), envelope.ciphertext.as_slice())
        .map_err(|_| PoolError::DecryptionFailed)
}

/// symmetric encryption under a caller-held 32-byte key (wallet secrets at
/// rest); output is `iv(12) || ciphertext+tag`
pub fn encrypt_with_key<R: rand::RngCore>(
    key: &[u8; 32],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut iv = [0u8; 12];
    rng.fill_bytes(&mut iv);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| PoolError::DecryptionFailed)?;
    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt_with_key(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(PoolError::DecryptionFailed);
    }
    let (iv, ciphertext) = data.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| PoolError::DecryptionFailed)
}

fn derive_key_iv(shared: &[u8; 32]) -> ([u8; 32], [u8; 12]) {
    let key = blake3::Hasher::new_derive_key(ENVELOPE_KEY_DOMAIN)
        .update(shared)
        .finalize();
    let iv_full = blake3::Hasher::new_derive_key(ENVELOPE_IV_DOMAIN)
        .update(shared)
        .finalize();
    let mut iv = [0u8; 12];
    iv.copy_from_slice(&iv_full.as_bytes()[..12]);
    (*key.as_bytes(), iv)
}
