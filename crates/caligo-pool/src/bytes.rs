//! fixed-width byte and hex conversions
//!
//! all wire encodings are big-endian. values entering from hex strings are
//! validated here, once, so the rest of the crate can assume well-formed
//! widths.

use ruint::aliases::U256;

use crate::error::{PoolError, Result};

/// fixed field widths used by the wire encodings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteLength {
    Uint8,
    Uint120,
    Uint256,
    Address,
}

impl ByteLength {
    pub const fn len(self) -> usize {
        match self {
            ByteLength::Uint8 => 1,
            ByteLength::Uint120 => 15,
            ByteLength::Uint256 => 32,
            ByteLength::Address => 20,
        }
    }
}

/// note values are 120-bit field values; anything wider is rejected at ingress
pub const MAX_NOTE_VALUE: u128 = (1u128 << 120) - 1;

/// reject values outside the circuit's 120-bit range
pub fn check_note_value(value: u128) -> Result<u128> {
    if value > MAX_NOTE_VALUE {
        return Err(PoolError::ValueOverflow);
    }
    Ok(value)
}

/// parse a hex string (with or without 0x prefix) into a U256
pub fn hex_to_u256(s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let mut padded = String::new();
    let s = if s.len() % 2 == 1 {
        padded.push('0');
        padded.push_str(s);
        &padded
    } else {
        s
    };
    let bytes = hex::decode(s)?;
    if bytes.len() > 32 {
        return Err(PoolError::InvalidLength {
            context: "u256 hex",
            expected: 32,
            actual: bytes.len(),
        });
    }
    Ok(U256::from_be_slice(&bytes))
}

/// fixed-width big-endian hex encoding, no prefix
pub fn u256_to_hex(value: U256, width: ByteLength) -> String {
    let bytes = value.to_be_bytes::<32>();
    hex::encode(&bytes[32 - width.len()..])
}

/// decode hex into an exact-width byte array
pub fn hex_to_array<const N: usize>(s: &str, context: &'static str) -> Result<[u8; N]> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| PoolError::InvalidLength {
        context,
        expected: N,
        actual,
    })
}

/// widen a 20-byte address into a field element
pub fn address_to_u256(address: &[u8; 20]) -> U256 {
    U256::from_be_slice(address)
}

/// LEB128 varint, used by the address payload's chain id
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// decode a LEB128 varint, returning the value and bytes consumed
pub fn read_varint(input: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, byte) in input.iter().enumerate() {
        if shift >= 64 {
            return Err(PoolError::AddressDecode("varint overflow".into()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(PoolError::AddressDecode("truncated varint".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let v = hex_to_u256("0x9138822709a9fc231cba6").unwrap();
        assert_eq!(
            u256_to_hex(v, ByteLength::Uint256),
            "00000000000000000000000000000000000000000009138822709a9fc231cba6"
        );
        assert_eq!(hex_to_u256(&u256_to_hex(v, ByteLength::Uint256)).unwrap(), v);
    }

    #[test]
    fn odd_length_hex_is_left_padded() {
        assert_eq!(hex_to_u256("f").unwrap(), U256::from(0xf_u64));
    }

    #[test]
    fn overwide_hex_rejected() {
        let wide = "ff".repeat(33);
        assert!(hex_to_u256(&wide).is_err());
    }

    #[test]
    fn note_value_bounds() {
        assert!(check_note_value(MAX_NOTE_VALUE).is_ok());
        assert!(check_note_value(MAX_NOTE_VALUE + 1).is_err());
    }

    #[test]
    fn varint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, 56010, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let (decoded, used) = read_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn truncated_varint_rejected() {
        assert!(read_varint(&[0x80]).is_err());
    }
}
