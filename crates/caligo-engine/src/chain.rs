//! chain identifiers
//!
//! every per-chain registry is indexed by chain type first, then id. the
//! string form feeds the storage key namespaces.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainType {
    Evm,
}

impl ChainType {
    pub fn as_byte(self) -> u8 {
        match self {
            ChainType::Evm => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Chain {
    pub chain_type: ChainType,
    pub id: u64,
}

impl Chain {
    pub fn evm(id: u64) -> Self {
        Self {
            chain_type: ChainType::Evm,
            id,
        }
    }

    /// storage namespace component, `<type>:<id>`
    pub fn key(&self) -> String {
        format!("{}:{}", self.chain_type.as_byte(), self.id)
    }
}

impl core::fmt::Display for Chain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        assert_eq!(Chain::evm(1).key(), "0:1");
        assert_eq!(Chain::evm(10010).key(), "0:10010");
    }
}
