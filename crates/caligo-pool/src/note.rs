//! shielded notes
//!
//! a note is a claim on `value` of `token`, owned by whoever can derive the
//! note public key `npk = Poseidon(master_public_key, random)`. the on-chain
//! commitment is `Poseidon(npk, token_hash, value)`. three variants exist:
//!
//! - shield: minted from a public balance; the cleartext preimage rides in
//!   the shield event, only `random` travels sealed
//! - transact: private-to-private output, fully sealed toward the receiver's
//!   viewing key
//! - unshield: exits to a public address; its npk is the recipient address
//!   itself

use ruint::aliases::U256;
use serde::{Deserialize, Serialize};

use crate::bytes::{address_to_u256, check_note_value};
use crate::envelope::{self, NoteCiphertext};
use crate::error::{PoolError, Result};
use crate::keys::{SecretKey, WalletKeys};
use crate::poseidon::poseidon_hash;
use crate::token::TokenData;

/// sender_random sentinel: all zeroes means the sender is revealed
pub const MEMO_SENDER_RANDOM_NULL: [u8; 15] = [0u8; 15];

/// memo prefix width: output_type(1) || sender_random(15) || wallet_source(16)
const MEMO_PREFIX_LEN: usize = 32;
const WALLET_SOURCE_LEN: usize = 16;

/// transact plaintext prefix: random(16) || value(16) || token_hash(32)
const TRANSACT_PLAINTEXT_LEN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    Transfer,
    RelayerFee,
    Change,
}

impl OutputType {
    pub fn to_byte(self) -> u8 {
        match self {
            OutputType::Transfer => 0,
            OutputType::RelayerFee => 1,
            OutputType::Change => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(OutputType::Transfer),
            1 => Ok(OutputType::RelayerFee),
            2 => Ok(OutputType::Change),
            _ => Err(PoolError::MalformedMemo),
        }
    }
}

/// decrypted memo payload carried inside a transact envelope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoField {
    pub output_type: OutputType,
    /// all-zero reveals the sender; anything else hides them
    pub sender_random: [u8; 15],
    /// optional originating-wallet tag, at most 16 utf-8 bytes
    pub wallet_source: Option<String>,
    /// present exactly when the sender is revealed
    pub sender_mpk: Option<U256>,
    /// optional free-form memo text
    pub text: Option<String>,
}

impl MemoField {
    /// memo for a hidden sender; `sender_random` drawn fresh
    pub fn hidden<R: rand::RngCore>(output_type: OutputType, rng: &mut R) -> Self {
        let mut sender_random = MEMO_SENDER_RANDOM_NULL;
        while sender_random == MEMO_SENDER_RANDOM_NULL {
            rng.fill_bytes(&mut sender_random);
        }
        Self {
            output_type,
            sender_random,
            wallet_source: None,
            sender_mpk: None,
            text: None,
        }
    }

    /// memo revealing the sender's master public key
    pub fn revealed(output_type: OutputType, sender_mpk: U256) -> Self {
        Self {
            output_type,
            sender_random: MEMO_SENDER_RANDOM_NULL,
            wallet_source: None,
            sender_mpk: Some(sender_mpk),
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_wallet_source(mut self, source: impl Into<String>) -> Self {
        self.wallet_source = Some(source.into());
        self
    }

    pub fn reveals_sender(&self) -> bool {
        self.sender_random == MEMO_SENDER_RANDOM_NULL
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(MEMO_PREFIX_LEN + 34);
        out.push(self.output_type.to_byte());
        out.extend_from_slice(&self.sender_random);

        let mut source = [0u8; WALLET_SOURCE_LEN];
        if let Some(tag) = &self.wallet_source {
            let bytes = tag.as_bytes();
            if bytes.len() > WALLET_SOURCE_LEN {
                return Err(PoolError::MalformedMemo);
            }
            source[..bytes.len()].copy_from_slice(bytes);
        }
        out.extend_from_slice(&source);

        if self.reveals_sender() {
            let mpk = self.sender_mpk.ok_or(PoolError::MalformedMemo)?;
            out.extend_from_slice(&mpk.to_be_bytes::<32>());
        }

        if let Some(text) = &self.text {
            let bytes = text.as_bytes();
            let len = u16::try_from(bytes.len()).map_err(|_| PoolError::MalformedMemo)?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < MEMO_PREFIX_LEN {
            return Err(PoolError::MalformedMemo);
        }
        let output_type = OutputType::from_byte(input[0])?;
        let mut sender_random = [0u8; 15];
        sender_random.copy_from_slice(&input[1..16]);

        let source_bytes = &input[16..32];
        let source_len = source_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(WALLET_SOURCE_LEN);
        let wallet_source = if source_len == 0 {
            None
        } else {
            Some(
                core::str::from_utf8(&source_bytes[..source_len])
                    .map_err(|_| PoolError::MalformedMemo)?
                    .to_string(),
            )
        };

        let mut rest = &input[MEMO_PREFIX_LEN..];
        let sender_mpk = if sender_random == MEMO_SENDER_RANDOM_NULL {
            if rest.len() < 32 {
                return Err(PoolError::MalformedMemo);
            }
            let mpk = U256::from_be_slice(&rest[..32]);
            rest = &rest[32..];
            Some(mpk)
        } else {
            None
        };

        let text = if rest.is_empty() {
            None
        } else {
            if rest.len() < 2 {
                return Err(PoolError::MalformedMemo);
            }
            let len = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
            if rest.len() != 2 + len {
                return Err(PoolError::MalformedMemo);
            }
            Some(
                core::str::from_utf8(&rest[2..])
                    .map_err(|_| PoolError::MalformedMemo)?
                    .to_string(),
            )
        };

        Ok(Self {
            output_type,
            sender_random,
            wallet_source,
            sender_mpk,
            text,
        })
    }
}

/// private-to-private output, sealed toward the receiver
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactNote {
    pub receiver_mpk: U256,
    pub receiver_viewing_pub: [u8; 32],
    pub token: TokenData,
    pub value: u128,
    pub random: [u8; 16],
    pub memo: MemoField,
}

impl TransactNote {
    pub fn new<R: rand::RngCore>(
        receiver_mpk: U256,
        receiver_viewing_pub: [u8; 32],
        token: TokenData,
        value: u128,
        memo: MemoField,
        rng: &mut R,
    ) -> Result<Self> {
        check_note_value(value)?;
        let mut random = [0u8; 16];
        rng.fill_bytes(&mut random);
        Ok(Self {
            receiver_mpk,
            receiver_viewing_pub,
            token,
            value,
            random,
            memo,
        })
    }

    /// rebuild a note from a decrypted payload once the token hash has been
    /// resolved to concrete token data
    pub fn from_decrypted(
        keys: &WalletKeys,
        token: TokenData,
        payload: &DecryptedTransact,
    ) -> Result<Self> {
        Ok(Self {
            receiver_mpk: keys.master_public_key()?,
            receiver_viewing_pub: keys.viewing_public_key()?,
            token,
            value: payload.value,
            random: payload.random,
            memo: payload.memo.clone(),
        })
    }

    pub fn npk(&self) -> Result<U256> {
        poseidon_hash(&[self.receiver_mpk, U256::from_be_slice(&self.random)])
    }

    /// on-chain commitment
    pub fn hash(&self) -> Result<U256> {
        poseidon_hash(&[self.npk()?, self.token.hash()?, U256::from(self.value)])
    }

    /// seal toward the receiver. a revealed sender must pass their viewing
    /// secret so the envelope's ephemeral key doubles as their identity;
    /// hidden senders get a throwaway key.
    pub fn encrypt<R: rand::RngCore>(
        &self,
        sender_viewing: Option<&SecretKey>,
        rng: &mut R,
    ) -> Result<NoteCiphertext> {
        let mut plaintext = Vec::with_capacity(TRANSACT_PLAINTEXT_LEN + MEMO_PREFIX_LEN);
        plaintext.extend_from_slice(&self.random);
        plaintext.extend_from_slice(&self.value.to_be_bytes());
        plaintext.extend_from_slice(&self.token.hash()?.to_be_bytes::<32>());
        plaintext.extend_from_slice(&self.memo.encode()?);

        let ephemeral = match sender_viewing {
            Some(viewing) if self.memo.reveals_sender() => viewing.clone(),
            _ => SecretKey::random(rng),
        };
        envelope::seal(&ephemeral, &self.receiver_viewing_pub, &plaintext)
    }

    /// trial-decrypt an envelope; `DecryptionFailed` means "not ours"
    pub fn decrypt(keys: &WalletKeys, ciphertext: &NoteCiphertext) -> Result<DecryptedTransact> {
        let plaintext = envelope::open(keys.viewing_key(), ciphertext)?;
        if plaintext.len() < TRANSACT_PLAINTEXT_LEN + MEMO_PREFIX_LEN {
            return Err(PoolError::DecryptionFailed);
        }
        let mut random = [0u8; 16];
        random.copy_from_slice(&plaintext[..16]);
        let mut value_bytes = [0u8; 16];
        value_bytes.copy_from_slice(&plaintext[16..32]);
        let value = u128::from_be_bytes(value_bytes);
        let token_hash = U256::from_be_slice(&plaintext[32..64]);
        let memo = MemoField::decode(&plaintext[TRANSACT_PLAINTEXT_LEN..])?;

        // a revealed sender's viewing key is the envelope's ephemeral key
        let sender_viewing_pub = memo.reveals_sender().then_some(ciphertext.ephemeral_pub);

        Ok(DecryptedTransact {
            random,
            value,
            token_hash,
            memo,
            sender_viewing_pub,
        })
    }
}

/// what falls out of a successful transact decryption; the token hash still
/// needs resolving against the chain's token registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedTransact {
    pub random: [u8; 16],
    pub value: u128,
    pub token_hash: U256,
    pub memo: MemoField,
    pub sender_viewing_pub: Option<[u8; 32]>,
}

/// cleartext half of a shield event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldPreimage {
    pub npk: U256,
    pub token: TokenData,
    pub value: u128,
}

/// freshly minted note entering the pool from a public balance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldNote {
    pub receiver_mpk: U256,
    pub token: TokenData,
    pub value: u128,
    pub random: [u8; 16],
}

impl ShieldNote {
    pub fn new<R: rand::RngCore>(
        receiver_mpk: U256,
        token: TokenData,
        value: u128,
        rng: &mut R,
    ) -> Result<Self> {
        check_note_value(value)?;
        let mut random = [0u8; 16];
        rng.fill_bytes(&mut random);
        Ok(Self {
            receiver_mpk,
            token,
            value,
            random,
        })
    }

    pub fn npk(&self) -> Result<U256> {
        poseidon_hash(&[self.receiver_mpk, U256::from_be_slice(&self.random)])
    }

    pub fn hash(&self) -> Result<U256> {
        poseidon_hash(&[self.npk()?, self.token.hash()?, U256::from(self.value)])
    }

    pub fn preimage(&self) -> Result<ShieldPreimage> {
        Ok(ShieldPreimage {
            npk: self.npk()?,
            token: self.token.clone(),
            value: self.value,
        })
    }

    /// seal `random` toward the receiver with a fresh shield key
    pub fn seal<R: rand::RngCore>(
        &self,
        receiver_viewing_pub: &[u8; 32],
        rng: &mut R,
    ) -> Result<NoteCiphertext> {
        let shield_key = SecretKey::random(rng);
        envelope::seal(&shield_key, receiver_viewing_pub, &self.random)
    }

    /// trial-unseal a shield event. recomputing the npk from our own master
    /// public key and comparing against the preimage is what proves the note
    /// is ours.
    pub fn unseal(
        keys: &WalletKeys,
        preimage: &ShieldPreimage,
        ciphertext: &NoteCiphertext,
    ) -> Result<ShieldNote> {
        let plaintext = envelope::open(keys.viewing_key(), ciphertext)?;
        if plaintext.len() != 16 {
            return Err(PoolError::DecryptionFailed);
        }
        let mut random = [0u8; 16];
        random.copy_from_slice(&plaintext);

        let receiver_mpk = keys.master_public_key()?;
        let note = ShieldNote {
            receiver_mpk,
            token: preimage.token.clone(),
            value: preimage.value,
            random,
        };
        if note.npk()? != preimage.npk {
            return Err(PoolError::DecryptionFailed);
        }
        Ok(note)
    }
}

/// exit from the pool to a public address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnshieldNote {
    pub to: [u8; 20],
    pub token: TokenData,
    pub value: u128,
}

impl UnshieldNote {
    pub fn new(to: [u8; 20], token: TokenData, value: u128) -> Result<Self> {
        check_note_value(value)?;
        Ok(Self { to, token, value })
    }

    /// the npk of an unshield commitment is the recipient address itself
    pub fn npk(&self) -> U256 {
        address_to_u256(&self.to)
    }

    pub fn hash(&self) -> Result<U256> {
        poseidon_hash(&[self.npk(), self.token.hash()?, U256::from(self.value)])
    }
}

/// tagged note; common accessors dispatch on the variant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Note {
    Shield(ShieldNote),
    Transact(TransactNote),
    Unshield(UnshieldNote),
}

impl Note {
    pub fn token(&self) -> &TokenData {
        match self {
            Note::Shield(n) => &n.token,
            Note::Transact(n) => &n.token,
            Note::Unshield(n) => &n.token,
        }
    }

    pub fn value(&self) -> u128 {
        match self {
            Note::Shield(n) => n.value,
            Note::Transact(n) => n.value,
            Note::Unshield(n) => n.value,
        }
    }

    pub fn npk(&self) -> Result<U256> {
        match self {
            Note::Shield(n) => n.npk(),
            Note::Transact(n) => n.npk(),
            Note::Unshield(n) => Ok(n.npk()),
        }
    }

    pub fn hash(&self) -> Result<U256> {
        match self {
            Note::Shield(n) => n.hash(),
            Note::Transact(n) => n.hash(),
            Note::Unshield(n) => n.hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::TEST_MNEMONIC;

    fn wallets() -> (WalletKeys, WalletKeys) {
        (
            WalletKeys::from_mnemonic(TEST_MNEMONIC, 0).unwrap(),
            WalletKeys::from_mnemonic(TEST_MNEMONIC, 1).unwrap(),
        )
    }

    fn token() -> TokenData {
        TokenData::Erc20([0xaa; 20])
    }

    #[test]
    fn memo_round_trip_hidden() {
        let mut rng = rand::thread_rng();
        let memo = MemoField::hidden(OutputType::RelayerFee, &mut rng).with_wallet_source("cli");
        let decoded = MemoField::decode(&memo.encode().unwrap()).unwrap();
        assert_eq!(decoded, memo);
        assert!(!decoded.reveals_sender());
    }

    #[test]
    fn memo_round_trip_revealed_with_text() {
        let memo = MemoField::revealed(OutputType::Transfer, U256::from(99u64))
            .with_text("lunch money");
        let decoded = MemoField::decode(&memo.encode().unwrap()).unwrap();
        assert_eq!(decoded.sender_mpk, Some(U256::from(99u64)));
        assert_eq!(decoded.text.as_deref(), Some("lunch money"));
    }

    #[test]
    fn memo_rejects_oversized_wallet_source() {
        let mut rng = rand::thread_rng();
        let memo =
            MemoField::hidden(OutputType::Transfer, &mut rng).with_wallet_source("a".repeat(17));
        assert!(memo.encode().is_err());
    }

    #[test]
    fn memo_rejects_truncated_text() {
        let memo = MemoField::revealed(OutputType::Transfer, U256::from(1u64)).with_text("hi");
        let mut encoded = memo.encode().unwrap();
        encoded.pop();
        assert!(MemoField::decode(&encoded).is_err());
    }

    #[test]
    fn transact_round_trip_hidden_sender() {
        let mut rng = rand::thread_rng();
        let (sender, receiver) = wallets();
        let memo = MemoField::hidden(OutputType::Transfer, &mut rng);
        let note = TransactNote::new(
            receiver.master_public_key().unwrap(),
            receiver.viewing_public_key().unwrap(),
            token(),
            1234,
            memo,
            &mut rng,
        )
        .unwrap();

        let ciphertext = note
            .encrypt(Some(sender.viewing_key()), &mut rng)
            .unwrap();
        let decrypted = TransactNote::decrypt(&receiver, &ciphertext).unwrap();
        assert_eq!(decrypted.value, 1234);
        assert_eq!(decrypted.token_hash, token().hash().unwrap());
        assert_eq!(decrypted.random, note.random);
        assert!(decrypted.sender_viewing_pub.is_none());

        // rebuilt note recomputes the same commitment
        let rebuilt = TransactNote::from_decrypted(&receiver, token(), &decrypted).unwrap();
        assert_eq!(rebuilt.hash().unwrap(), note.hash().unwrap());
    }

    #[test]
    fn transact_revealed_sender_is_recoverable() {
        let mut rng = rand::thread_rng();
        let (sender, receiver) = wallets();
        let memo = MemoField::revealed(
            OutputType::Transfer,
            sender.master_public_key().unwrap(),
        );
        let note = TransactNote::new(
            receiver.master_public_key().unwrap(),
            receiver.viewing_public_key().unwrap(),
            token(),
            10,
            memo,
            &mut rng,
        )
        .unwrap();

        let ciphertext = note
            .encrypt(Some(sender.viewing_key()), &mut rng)
            .unwrap();
        let decrypted = TransactNote::decrypt(&receiver, &ciphertext).unwrap();
        assert_eq!(
            decrypted.sender_viewing_pub,
            Some(sender.viewing_public_key().unwrap())
        );
        assert_eq!(
            decrypted.memo.sender_mpk,
            Some(sender.master_public_key().unwrap())
        );
    }

    #[test]
    fn transact_wrong_wallet_cannot_decrypt() {
        let mut rng = rand::thread_rng();
        let (sender, receiver) = wallets();
        let memo = MemoField::hidden(OutputType::Transfer, &mut rng);
        let note = TransactNote::new(
            receiver.master_public_key().unwrap(),
            receiver.viewing_public_key().unwrap(),
            token(),
            5,
            memo,
            &mut rng,
        )
        .unwrap();
        let ciphertext = note.encrypt(None, &mut rng).unwrap();
        assert!(matches!(
            TransactNote::decrypt(&sender, &ciphertext),
            Err(PoolError::DecryptionFailed)
        ));
    }

    #[test]
    fn shield_seal_unseal() {
        let mut rng = rand::thread_rng();
        let (stranger, receiver) = wallets();
        let note = ShieldNote::new(
            receiver.master_public_key().unwrap(),
            token(),
            777,
            &mut rng,
        )
        .unwrap();
        let preimage = note.preimage().unwrap();
        let sealed = note
            .seal(&receiver.viewing_public_key().unwrap(), &mut rng)
            .unwrap();

        let unsealed = ShieldNote::unseal(&receiver, &preimage, &sealed).unwrap();
        assert_eq!(unsealed, note);
        assert!(ShieldNote::unseal(&stranger, &preimage, &sealed).is_err());
    }

    #[test]
    fn unshield_npk_is_recipient_address() {
        let note = UnshieldNote::new([0x42; 20], token(), 1).unwrap();
        assert_eq!(note.npk(), address_to_u256(&[0x42; 20]));
        assert_ne!(note.hash().unwrap(), U256::ZERO);
    }

    #[test]
    fn note_value_overflow_rejected() {
        let mut rng = rand::thread_rng();
        let (_, receiver) = wallets();
        let over = (1u128 << 120) + 1;
        assert!(ShieldNote::new(
            receiver.master_public_key().unwrap(),
            token(),
            over,
            &mut rng
        )
        .is_err());
        assert!(UnshieldNote::new([0u8; 20], token(), over).is_err());
    }

    #[test]
    fn commitment_depends_on_all_fields() {
        let mut rng = rand::thread_rng();
        let (_, receiver) = wallets();
        let a = ShieldNote::new(receiver.master_public_key().unwrap(), token(), 1, &mut rng)
            .unwrap();
        let mut b = a.clone();
        b.value = 2;
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }
}
