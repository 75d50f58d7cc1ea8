//! prover and artifact capabilities
//!
//! the engine assembles circuit inputs and drives an injected groth16
//! prover; it never proves anything itself. artifacts are keyed by the
//! circuit shape `(nullifier_count, output_count)`.

use async_trait::async_trait;
use caligo_pool::SpendSignature;
use ruint::aliases::U256;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// circuit shape identifier, e.g. `02x03`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    pub nullifiers: usize,
    pub outputs: usize,
}

impl core::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02}x{:02}", self.nullifiers, self.outputs)
    }
}

/// proving artifact bundle
#[derive(Clone, Debug)]
pub struct Artifacts {
    pub vkey: Vec<u8>,
    pub wasm: Vec<u8>,
    pub zkey: Vec<u8>,
}

#[async_trait]
pub trait ArtifactGetter: Send + Sync {
    async fn get_artifacts(&self, nullifiers: usize, outputs: usize) -> Result<Artifacts>;
}

/// groth16 proof as the contract expects it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groth16Proof {
    pub a: [U256; 2],
    pub b: [[U256; 2]; 2],
    pub c: [U256; 2],
}

/// statement half of the circuit inputs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicInputs {
    pub merkle_root: U256,
    pub bound_params_hash: U256,
    pub nullifiers: Vec<U256>,
    pub commitments_out: Vec<U256>,
}

/// witness half; never leaves the process
#[derive(Clone, Debug)]
pub struct Witness {
    pub token_hash: U256,
    pub spending_public_key: [u8; 32],
    pub signature: SpendSignature,
    pub nullifying_key: U256,
    pub random_in: Vec<[u8; 16]>,
    pub value_in: Vec<u128>,
    pub path_elements: Vec<Vec<U256>>,
    pub leaves_indices: Vec<u64>,
    pub npk_out: Vec<U256>,
    pub value_out: Vec<u128>,
}

#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(
        &self,
        artifact: ArtifactId,
        public_inputs: &PublicInputs,
        witness: &Witness,
    ) -> Result<Groth16Proof>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_id_display() {
        let id = ArtifactId {
            nullifiers: 2,
            outputs: 3,
        };
        assert_eq!(id.to_string(), "02x03");
    }
}
