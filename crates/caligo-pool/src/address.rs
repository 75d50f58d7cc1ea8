//! shielded address codec
//!
//! bech32m strings with the `0zk` prefix over the payload
//! `master_public_key(32) || viewing_public_key(32) || chain_type(1) ||
//! chain_id(varint)`. the chain fields pin an address to the network it was
//! issued for; decode rejects anything it cannot round-trip.

use bech32::{Bech32m, Hrp};
use ruint::aliases::U256;

use crate::bytes::{read_varint, write_varint};
use crate::error::{PoolError, Result};
use crate::keys::WalletKeys;

const ADDRESS_HRP: &str = "0zk";

/// decoded address payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressData {
    pub master_public_key: U256,
    pub viewing_public_key: [u8; 32],
    pub chain_type: u8,
    pub chain_id: u64,
}

impl AddressData {
    pub fn from_keys(keys: &WalletKeys, chain_type: u8, chain_id: u64) -> Result<Self> {
        Ok(Self {
            master_public_key: keys.master_public_key()?,
            viewing_public_key: keys.viewing_public_key()?,
            chain_type,
            chain_id,
        })
    }
}

pub fn encode_address(data: &AddressData) -> Result<String> {
    let mut payload = Vec::with_capacity(32 + 32 + 1 + 10);
    payload.extend_from_slice(&data.master_public_key.to_be_bytes::<32>());
    payload.extend_from_slice(&data.viewing_public_key);
    payload.push(data.chain_type);
    write_varint(&mut payload, data.chain_id);

    let hrp = Hrp::parse(ADDRESS_HRP).map_err(|e| PoolError::AddressDecode(e.to_string()))?;
    bech32::encode::<Bech32m>(hrp, &payload).map_err(|e| PoolError::AddressDecode(e.to_string()))
}

pub fn decode_address(address: &str) -> Result<AddressData> {
    let (hrp, payload) =
        bech32::decode(address).map_err(|e| PoolError::AddressDecode(e.to_string()))?;
    if hrp.to_lowercase() != ADDRESS_HRP {
        return Err(PoolError::AddressDecode(format!("unexpected prefix {hrp}")));
    }
    if payload.len() < 32 + 32 + 1 + 1 {
        return Err(PoolError::AddressDecode("payload too short".into()));
    }

    let master_public_key = U256::from_be_slice(&payload[..32]);
    let mut viewing_public_key = [0u8; 32];
    viewing_public_key.copy_from_slice(&payload[32..64]);
    let chain_type = payload[64];
    let (chain_id, used) = read_varint(&payload[65..])?;
    if 65 + used != payload.len() {
        return Err(PoolError::AddressDecode("trailing bytes".into()));
    }

    Ok(AddressData {
        master_public_key,
        viewing_public_key,
        chain_type,
        chain_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::TEST_MNEMONIC;

    fn test_data() -> AddressData {
        let keys = WalletKeys::from_mnemonic(TEST_MNEMONIC, 0).unwrap();
        AddressData::from_keys(&keys, 0, 1).unwrap()
    }

    #[test]
    fn round_trip() {
        let data = test_data();
        let encoded = encode_address(&data).unwrap();
        assert!(encoded.starts_with("0zk1"));
        assert_eq!(decode_address(&encoded).unwrap(), data);
    }

    #[test]
    fn round_trip_large_chain_id() {
        let mut data = test_data();
        data.chain_id = 56010;
        let encoded = encode_address(&data).unwrap();
        assert_eq!(decode_address(&encoded).unwrap().chain_id, 56010);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_address("not an address").is_err());
        assert!(decode_address("0zk1qqqqqq").is_err());
    }

    #[test]
    fn rejects_wrong_prefix() {
        let data = test_data();
        let encoded = encode_address(&data).unwrap();
        // re-encode the same payload under a different hrp
        let (_, payload) = bech32::decode(&encoded).unwrap();
        let other = bech32::encode::<Bech32m>(Hrp::parse("0xx").unwrap(), &payload).unwrap();
        assert!(decode_address(&other).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let data = test_data();
        let mut encoded = encode_address(&data).unwrap();
        let flipped = if encoded.ends_with('q') { 'p' } else { 'q' };
        encoded.pop();
        encoded.push(flipped);
        assert!(decode_address(&encoded).is_err());
    }
}
