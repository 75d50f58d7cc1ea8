//! poseidon hashing over the BN254 scalar field
//!
//! circom-parameterized poseidon, the hash the pool contract and the circuits
//! agree on. inputs are reduced into the field at this boundary so callers
//! can hand in arbitrary 256-bit quantities (token sub ids, compressed
//! curve points).

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonHasher};
use ruint::aliases::U256;

use crate::error::Result;

/// reduce a 256-bit quantity into the scalar field
pub fn fr_from_u256(value: U256) -> Fr {
    Fr::from_be_bytes_mod_order(&value.to_be_bytes::<32>())
}

/// widen a field element back to 256 bits
pub fn fr_to_u256(value: Fr) -> U256 {
    U256::from_be_slice(&value.into_bigint().to_bytes_be())
}

/// reduce arbitrary bytes into the scalar field
pub fn field_from_bytes(bytes: &[u8]) -> U256 {
    fr_to_u256(Fr::from_be_bytes_mod_order(bytes))
}

/// poseidon hash of 1..=12 field elements
pub fn poseidon_hash(inputs: &[U256]) -> Result<U256> {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())?;
    let frs: Vec<Fr> = inputs.iter().map(|v| fr_from_u256(*v)).collect();
    Ok(fr_to_u256(hasher.hash(&frs)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = poseidon_hash(&[U256::from(1u64), U256::from(2u64)]).unwrap();
        let b = poseidon_hash(&[U256::from(1u64), U256::from(2u64)]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, U256::ZERO);
    }

    #[test]
    fn input_order_matters() {
        let ab = poseidon_hash(&[U256::from(1u64), U256::from(2u64)]).unwrap();
        let ba = poseidon_hash(&[U256::from(2u64), U256::from(1u64)]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn arity_is_domain_separating() {
        let two = poseidon_hash(&[U256::from(7u64), U256::from(0u64)]).unwrap();
        let one = poseidon_hash(&[U256::from(7u64)]).unwrap();
        assert_ne!(two, one);
    }

    #[test]
    fn field_round_trip() {
        let v = U256::from(123456789u64);
        assert_eq!(fr_to_u256(fr_from_u256(v)), v);
    }
}
