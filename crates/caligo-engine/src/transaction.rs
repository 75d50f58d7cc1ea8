//! per-group transaction assembly and proving
//!
//! a [`Transaction`] takes one spending-solution group and turns it into a
//! proof-carrying bundle the contract accepts: nullifiers for the inputs,
//! output commitments (token outputs, change back to the spender, the
//! optional unshield), the spending tree's root with a path per input, the
//! bound parameters that pin the proof to this chain and calldata, and the
//! spending-key signature the circuit checks.

use caligo_pool::bytes::address_to_u256;
use caligo_pool::poseidon::field_from_bytes;
use caligo_pool::{
    envelope, poseidon_hash, MemoField, OutputType, SecretKey, TokenData, TransactNote,
    WalletKeys,
};
use ruint::aliases::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::chain::Chain;
use crate::error::{EngineError, Result};
use crate::events::TransactCiphertext;
use crate::merkle::TreeReader;
use crate::prover::{ArtifactGetter, ArtifactId, Groth16Proof, Prover, PublicInputs, Witness};
use crate::solutions::{is_valid_for_3_outputs, is_valid_nullifier_count, SpendingSolutionGroup};
use crate::storage::encode;

/// optional binding to an external composing contract
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptId {
    pub contract: [u8; 20],
    pub parameters: [u8; 32],
}

/// parameters the proof is bound to; the contract recomputes their hash
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundParams {
    pub tree_number: u64,
    pub min_gas_price: u128,
    pub unshield: bool,
    pub chain_id: u64,
    pub adapt_contract: [u8; 20],
    pub adapt_parameters: [u8; 32],
    pub commitment_ciphertexts: Vec<TransactCiphertext>,
}

impl BoundParams {
    /// SHA-256 of the canonical encoding, reduced into the field
    pub fn hash(&self) -> Result<U256> {
        let digest = Sha256::digest(encode(self)?);
        Ok(field_from_bytes(&digest))
    }
}

/// cleartext the contract needs to release unshielded funds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnshieldPreimage {
    pub npk: U256,
    pub token: TokenData,
    pub value: u128,
}

/// a proved sub-transaction, ready for the contract adapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTransaction {
    pub proof: Groth16Proof,
    pub merkle_root: U256,
    pub nullifiers: Vec<U256>,
    pub commitments: Vec<U256>,
    pub bound_params: BoundParams,
    pub unshield_preimage: Option<UnshieldPreimage>,
}

pub struct Transaction {
    chain: Chain,
    group: SpendingSolutionGroup,
    adapt: AdaptId,
    min_gas_price: u128,
}

impl Transaction {
    pub fn new(
        chain: Chain,
        group: SpendingSolutionGroup,
        adapt: AdaptId,
        min_gas_price: u128,
    ) -> Self {
        Self {
            chain,
            group,
            adapt,
            min_gas_price,
        }
    }

    /// assemble circuit inputs and drive the injected prover
    pub async fn prove<R: rand::RngCore>(
        self,
        prover: &dyn Prover,
        artifacts: &dyn ArtifactGetter,
        keys: &WalletKeys,
        reader: &dyn TreeReader,
        rng: &mut R,
    ) -> Result<SerializedTransaction> {
        self.group.validate()?;
        let token_hash = self.group.token.hash()?;

        // change closes the value balance; a group with a single commitment
        // pads with a zero-value change note to reach the 2-output floor
        let change_value = self.group.input_value() - self.group.required_value();
        let mut outputs: Vec<TransactNote> = self.group.token_outputs.clone();
        if change_value > 0 {
            outputs.push(change_note(keys, &self.group.token, change_value, rng)?);
        }
        if outputs.len() + usize::from(self.group.unshield.is_some()) < 2 {
            outputs.push(change_note(keys, &self.group.token, 0, rng)?);
        }

        let output_count = outputs.len() + usize::from(self.group.unshield.is_some());
        let input_count = self.group.utxos.len();
        if !(2..=3).contains(&output_count)
            || !is_valid_nullifier_count(input_count)
            || (output_count == 3 && !is_valid_for_3_outputs(input_count))
        {
            return Err(EngineError::corrupt(format!(
                "illegal wire counts {input_count}x{output_count}"
            )));
        }

        // inputs: nullifiers plus an inclusion path per utxo, all against
        // the same root
        let merkle_root = reader.root(self.group.spending_tree)?;
        let mut nullifiers = Vec::with_capacity(input_count);
        let mut path_elements = Vec::with_capacity(input_count);
        let mut leaves_indices = Vec::with_capacity(input_count);
        for utxo in &self.group.utxos {
            let proof = reader.proof(self.group.spending_tree, utxo.leaf_index)?;
            if proof.root != merkle_root {
                return Err(EngineError::corrupt("stale merkle path"));
            }
            nullifiers.push(keys.nullifier(utxo.leaf_index)?);
            path_elements.push(proof.elements);
            leaves_indices.push(utxo.leaf_index);
        }

        // output commitments; the unshield commitment comes last
        let own_mpk = keys.master_public_key()?;
        let mut commitments = Vec::with_capacity(output_count);
        let mut npk_out = Vec::with_capacity(output_count);
        let mut value_out = Vec::with_capacity(output_count);
        let mut ciphertexts = Vec::with_capacity(outputs.len());
        for note in &outputs {
            commitments.push(note.hash()?);
            npk_out.push(note.npk()?);
            value_out.push(note.value);
            ciphertexts.push(seal_output(keys, own_mpk, note, rng)?);
        }
        let unshield_preimage = match &self.group.unshield {
            Some(unshield) => {
                commitments.push(unshield.hash()?);
                npk_out.push(unshield.npk());
                value_out.push(unshield.value);
                Some(UnshieldPreimage {
                    npk: address_to_u256(&unshield.to),
                    token: unshield.token.clone(),
                    value: unshield.value,
                })
            }
            None => None,
        };

        let bound_params = BoundParams {
            tree_number: self.group.spending_tree,
            min_gas_price: self.min_gas_price,
            unshield: self.group.unshield.is_some(),
            chain_id: self.chain.id,
            adapt_contract: self.adapt.contract,
            adapt_parameters: self.adapt.parameters,
            commitment_ciphertexts: ciphertexts,
        };
        let bound_params_hash = bound_params.hash()?;

        // the circuit checks this signature against the spending public key
        let message = poseidon_hash(&[
            merkle_root,
            bound_params_hash,
            poseidon_hash(&nullifiers)?,
            poseidon_hash(&commitments)?,
        ])?;
        let signature = keys.sign(message)?;

        let public_inputs = PublicInputs {
            merkle_root,
            bound_params_hash,
            nullifiers: nullifiers.clone(),
            commitments_out: commitments.clone(),
        };
        let witness = Witness {
            token_hash,
            spending_public_key: keys.spending_public_key()?,
            signature,
            nullifying_key: keys.nullifying_key()?,
            random_in: self.group.utxos.iter().map(|u| u.random).collect(),
            value_in: self.group.utxos.iter().map(|u| u.value).collect(),
            path_elements,
            leaves_indices,
            npk_out,
            value_out,
        };

        let artifact = ArtifactId {
            nullifiers: input_count,
            outputs: output_count,
        };
        artifacts
            .get_artifacts(artifact.nullifiers, artifact.outputs)
            .await?;

        info!(artifact = %artifact, tree = self.group.spending_tree, "proving");
        let proof = prover.prove(artifact, &public_inputs, &witness).await?;

        Ok(SerializedTransaction {
            proof,
            merkle_root,
            nullifiers,
            commitments,
            bound_params,
            unshield_preimage,
        })
    }
}

fn change_note<R: rand::RngCore>(
    keys: &WalletKeys,
    token: &TokenData,
    value: u128,
    rng: &mut R,
) -> Result<TransactNote> {
    Ok(TransactNote::new(
        keys.master_public_key()?,
        keys.viewing_public_key()?,
        token.clone(),
        value,
        MemoField::hidden(OutputType::Change, rng),
        rng,
    )?)
}

/// seal one output: the note toward its receiver, plus a sender annotation
/// when the receiver is somebody else
fn seal_output<R: rand::RngCore>(
    keys: &WalletKeys,
    own_mpk: U256,
    note: &TransactNote,
    rng: &mut R,
) -> Result<TransactCiphertext> {
    let sealed = note.encrypt(Some(keys.viewing_key()), rng)?;
    let annotation = if note.receiver_mpk == own_mpk {
        None
    } else {
        let mut plain = Vec::with_capacity(49);
        plain.push(note.memo.output_type.to_byte());
        plain.extend_from_slice(&note.value.to_be_bytes());
        plain.extend_from_slice(&note.token.hash()?.to_be_bytes::<32>());
        let ephemeral = SecretKey::random(rng);
        Some(envelope::seal(
            &ephemeral,
            &keys.viewing_public_key()?,
            &plain,
        )?)
    };
    Ok(TransactCiphertext {
        note: sealed,
        annotation,
    })
}
