//! token model
//!
//! the pool shields ERC20 balances and ERC721/ERC1155 holdings. every
//! per-token map in the engine is keyed by the poseidon token hash, not the
//! raw token data.

use ruint::aliases::U256;
use serde::{Deserialize, Serialize};

use crate::bytes::address_to_u256;
use crate::error::Result;
use crate::poseidon::poseidon_hash;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenData {
    Erc20([u8; 20]),
    Erc721([u8; 20], U256),
    Erc1155([u8; 20], U256),
}

impl TokenData {
    /// variant tag as committed inside the token hash
    pub fn tag(&self) -> u8 {
        match self {
            TokenData::Erc20(..) => 0,
            TokenData::Erc721(..) => 1,
            TokenData::Erc1155(..) => 2,
        }
    }

    pub fn address(&self) -> &[u8; 20] {
        match self {
            TokenData::Erc20(addr) | TokenData::Erc721(addr, _) | TokenData::Erc1155(addr, _) => {
                addr
            }
        }
    }

    /// sub id is zero for fungibles
    pub fn sub_id(&self) -> U256 {
        match self {
            TokenData::Erc20(..) => U256::ZERO,
            TokenData::Erc721(_, sub_id) | TokenData::Erc1155(_, sub_id) => *sub_id,
        }
    }

    /// Poseidon(tag, address, sub_id), the key for all per-token storage
    pub fn hash(&self) -> Result<U256> {
        poseidon_hash(&[
            U256::from(self.tag()),
            address_to_u256(self.address()),
            self.sub_id(),
        ])
    }

    /// NFTs are indivisible; their notes always carry value 1
    pub fn is_fungible(&self) -> bool {
        matches!(self, TokenData::Erc20(..))
    }
}
