//! UTXO selection
//!
//! turns "send these amounts of this token" into spending-solution groups
//! the circuits accept. every group draws from exactly one tree and spends a
//! circuit-legal number of inputs (1, 2 or 8; 8 is a hard cap). the simple
//! path finds one tree that covers everything; the complex fallback slices
//! amounts across trees, tracking consumed UTXOs so no group double-spends.
//!
//! candidate sets inside one tree are ranked by fewest inputs, then smallest
//! over-sum (least change), then smallest leaf-index sum, so selection is
//! deterministic.

use std::collections::HashSet;

use caligo_pool::{TokenData, TransactNote, UnshieldNote};
use caligo_pool::bytes::{u256_to_hex, ByteLength};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::wallet::{TreeBalance, Txo};

/// input arities the circuits ship artifacts for
pub const VALID_INPUT_COUNTS: [usize; 3] = [1, 2, 8];

/// hard cap on inputs per group
pub const MAX_INPUTS: usize = 8;

pub fn is_valid_nullifier_count(inputs: usize) -> bool {
    VALID_INPUT_COUNTS.contains(&inputs)
}

/// three-output groups (output + unshield + change) reject a 3-input wiring
pub fn is_valid_for_3_outputs(inputs: usize) -> bool {
    inputs != 3 && is_valid_nullifier_count(inputs)
}

/// one sub-transaction's worth of spending: inputs from a single tree
/// covering a set of same-token outputs and at most one unshield slice
#[derive(Clone, Debug)]
pub struct SpendingSolutionGroup {
    pub spending_tree: u64,
    pub utxos: Vec<Txo>,
    pub token_outputs: Vec<TransactNote>,
    pub unshield: Option<UnshieldNote>,
    pub token: TokenData,
}

impl SpendingSolutionGroup {
    pub fn input_value(&self) -> u128 {
        self.utxos.iter().map(|u| u.value).sum()
    }

    pub fn required_value(&self) -> u128 {
        self.token_outputs.iter().map(|o| o.value).sum::<u128>()
            + self.unshield.as_ref().map(|u| u.value).unwrap_or(0)
    }

    /// the structural invariants every group must satisfy
    pub fn validate(&self) -> Result<()> {
        let token_hash = self.token.hash()?;
        for utxo in &self.utxos {
            if utxo.tree_number != self.spending_tree || utxo.token.hash()? != token_hash {
                return Err(EngineError::TokenMismatch);
            }
        }
        for output in &self.token_outputs {
            if output.token.hash()? != token_hash {
                return Err(EngineError::TokenMismatch);
            }
        }
        if let Some(unshield) = &self.unshield {
            if unshield.token.hash()? != token_hash {
                return Err(EngineError::TokenMismatch);
            }
        }
        if self.input_value() < self.required_value() {
            return Err(EngineError::InsufficientBalance {
                token: token_hex(&self.token)?,
                available: self.input_value(),
                required: self.required_value(),
            });
        }
        Ok(())
    }
}

/// solve one token's outputs and unshield against its per-tree balances
pub fn create_spending_solution_groups<R: rand::RngCore>(
    token: &TokenData,
    tree_balances: &[TreeBalance],
    outputs: Vec<TransactNote>,
    unshield: Option<UnshieldNote>,
    rng: &mut R,
) -> Result<Vec<SpendingSolutionGroup>> {
    let total_required = checked_sum(
        outputs
            .iter()
            .map(|o| o.value)
            .chain(unshield.as_ref().map(|u| u.value)),
    )?;
    let total_balance = checked_sum(tree_balances.iter().map(|t| t.balance))?;
    if total_balance < total_required {
        return Err(EngineError::InsufficientBalance {
            token: token_hex(token)?,
            available: total_balance,
            required: total_required,
        });
    }

    let mut groups = Vec::new();
    let mut excluded: HashSet<String> = HashSet::new();

    for (chunk_outputs, chunk_unshield) in chunk_outputs(outputs, unshield) {
        let target: u128 = chunk_outputs.iter().map(|o| o.value).sum::<u128>()
            + chunk_unshield.as_ref().map(|u| u.value).unwrap_or(0);
        let three_outputs = !chunk_outputs.is_empty() && chunk_unshield.is_some();

        // simple path: a single tree covers the whole chunk
        let exact = tree_balances.iter().find_map(|tree| {
            find_exact_solutions_over_target_value(tree, target, three_outputs, &excluded)
                .map(|utxos| (tree.tree_number, utxos))
        });

        if let Some((tree_number, utxos)) = exact {
            for utxo in &utxos {
                excluded.insert(utxo.id());
            }
            groups.push(SpendingSolutionGroup {
                spending_tree: tree_number,
                utxos,
                token_outputs: chunk_outputs,
                unshield: chunk_unshield,
                token: token.clone(),
            });
            continue;
        }

        // complex path: slice each output (and the unshield) across trees
        debug!(token = %token_hex(token)?, target, "no single-tree solution, slicing");
        for output in chunk_outputs {
            let slices = slice_over_trees(token, tree_balances, output.value, &mut excluded)?;
            for (tree_number, utxos, applied) in slices {
                let mut slice_note = output.clone();
                slice_note.value = applied;
                rng.fill_bytes(&mut slice_note.random);
                groups.push(SpendingSolutionGroup {
                    spending_tree: tree_number,
                    utxos,
                    token_outputs: vec![slice_note],
                    unshield: None,
                    token: token.clone(),
                });
            }
        }
        if let Some(unshield_note) = chunk_unshield {
            let slices =
                slice_over_trees(token, tree_balances, unshield_note.value, &mut excluded)?;
            for (tree_number, utxos, applied) in slices {
                let mut slice_note = unshield_note.clone();
                slice_note.value = applied;
                groups.push(SpendingSolutionGroup {
                    spending_tree: tree_number,
                    utxos,
                    token_outputs: Vec::new(),
                    unshield: Some(slice_note),
                    token: token.clone(),
                });
            }
        }
    }

    for group in &groups {
        group.validate()?;
    }
    Ok(groups)
}

/// split the requested outputs into circuit-sized chunks: at most two token
/// outputs per group (change takes the third slot), and the unshield riding
/// with at most one token output
fn chunk_outputs(
    outputs: Vec<TransactNote>,
    unshield: Option<UnshieldNote>,
) -> Vec<(Vec<TransactNote>, Option<UnshieldNote>)> {
    let mut chunks: Vec<(Vec<TransactNote>, Option<UnshieldNote>)> = outputs
        .chunks(2)
        .map(|c| (c.to_vec(), None))
        .collect();

    if let Some(unshield) = unshield {
        match chunks.iter_mut().find(|(outputs, _)| outputs.len() <= 1) {
            Some(chunk) => chunk.1 = Some(unshield),
            None => chunks.push((Vec::new(), Some(unshield))),
        }
    }
    chunks
}

/// greedy subset search inside one tree: the cheapest circuit-legal UTXO set
/// whose sum meets the target, or nothing
pub fn find_exact_solutions_over_target_value(
    tree: &TreeBalance,
    target: u128,
    three_outputs: bool,
    excluded: &HashSet<String>,
) -> Option<Vec<Txo>> {
    let mut available: Vec<&Txo> = tree
        .utxos
        .iter()
        .filter(|u| !u.is_spent() && !excluded.contains(&u.id()))
        .collect();
    available.sort_by_key(|u| (u.value, u.leaf_index));
    if available.is_empty() {
        return None;
    }

    for count in VALID_INPUT_COUNTS {
        if three_outputs && !is_valid_for_3_outputs(count) {
            continue;
        }
        if let Some(candidate) = best_subset_of_size(&available, count, target) {
            return Some(candidate.into_iter().cloned().collect());
        }
    }
    None
}

/// minimal-(sum, leaf_sum) subset of exactly `count` inputs meeting
/// `target`; `available` must be sorted by (value, leaf_index)
fn best_subset_of_size<'a>(
    available: &[&'a Txo],
    count: usize,
    target: u128,
) -> Option<Vec<&'a Txo>> {
    if available.len() < count {
        return None;
    }
    if count == 1 {
        // sorted ascending, so the first hit carries the least excess
        return available
            .iter()
            .find(|u| u.value >= target)
            .map(|u| vec![*u]);
    }

    let mut best: Option<(u128, u64, Vec<&Txo>)> = None;
    let mut chosen = Vec::with_capacity(count);
    subset_search(available, count, target, 0, 0, 0, &mut chosen, &mut best);
    best.map(|(_, _, set)| set)
}

/// exhaustive subset walk over the value-sorted slice, pruned by target
/// feasibility and by the best (sum, leaf_sum) found so far
#[allow(clippy::too_many_arguments)]
fn subset_search<'a>(
    items: &[&'a Txo],
    need: usize,
    target: u128,
    start: usize,
    sum: u128,
    leaf_sum: u64,
    chosen: &mut Vec<&'a Txo>,
    best: &mut Option<(u128, u64, Vec<&'a Txo>)>,
) {
    if need == 0 {
        if sum >= target
            && best
                .as_ref()
                .map_or(true, |(s, l, _)| (sum, leaf_sum) < (*s, *l))
        {
            *best = Some((sum, leaf_sum, chosen.clone()));
        }
        return;
    }
    if items.len() - start < need {
        return;
    }
    // even the largest remaining values cannot reach the target
    let max_tail: u128 = items[items.len() - need..].iter().map(|u| u.value).sum();
    if sum.saturating_add(max_tail) < target {
        return;
    }
    // even the smallest remaining values overshoot the best sum found
    if let Some((best_sum, _, _)) = best {
        let min_tail: u128 = items[start..start + need].iter().map(|u| u.value).sum();
        if sum + min_tail > *best_sum {
            return;
        }
    }
    for i in start..=(items.len() - need) {
        chosen.push(items[i]);
        subset_search(
            items,
            need - 1,
            target,
            i + 1,
            sum + items[i].value,
            leaf_sum + items[i].leaf_index,
            chosen,
            best,
        );
        chosen.pop();
    }
}

/// consume value for one output across as many groups as it takes; a tree
/// may contribute several groups. returns `(tree, utxos, applied_value)`
/// slices.
fn slice_over_trees(
    token: &TokenData,
    tree_balances: &[TreeBalance],
    value: u128,
    excluded: &mut HashSet<String>,
) -> Result<Vec<(u64, Vec<Txo>, u128)>> {
    let mut remaining = value;
    let mut slices = Vec::new();

    while remaining > 0 {
        // a tree that can close out the remainder ends the walk
        let exact = tree_balances.iter().find_map(|tree| {
            find_exact_solutions_over_target_value(tree, remaining, false, excluded)
                .map(|utxos| (tree.tree_number, utxos))
        });
        if let Some((tree_number, utxos)) = exact {
            for utxo in &utxos {
                excluded.insert(utxo.id());
            }
            slices.push((tree_number, utxos, remaining));
            remaining = 0;
            break;
        }

        // otherwise drain the largest circuit-legal set from the first tree
        // that still has anything, then retry the exact search
        let drained = tree_balances.iter().find_map(|tree| {
            let mut available: Vec<&Txo> = tree
                .utxos
                .iter()
                .filter(|u| !u.is_spent() && !excluded.contains(&u.id()))
                .collect();
            if available.is_empty() {
                return None;
            }
            available.sort_by_key(|u| (core::cmp::Reverse(u.value), u.leaf_index));
            let count = VALID_INPUT_COUNTS
                .iter()
                .rev()
                .find(|c| **c <= available.len())
                .copied()
                .unwrap_or(1);
            let utxos: Vec<Txo> = available[..count].iter().map(|u| (*u).clone()).collect();
            Some((tree.tree_number, utxos))
        });

        let Some((tree_number, utxos)) = drained else {
            return Err(EngineError::ConsolidateBalanceRequired(token_hex(token)?));
        };
        let sum: u128 = utxos.iter().map(|u| u.value).sum();
        // the exact search already failed, so this set cannot cover the
        // remainder; everything it holds gets applied
        let applied = sum.min(remaining);
        for utxo in &utxos {
            excluded.insert(utxo.id());
        }
        slices.push((tree_number, utxos, applied));
        remaining -= applied;
    }

    Ok(slices)
}

fn token_hex(token: &TokenData) -> Result<String> {
    Ok(u256_to_hex(token.hash()?, ByteLength::Uint256))
}

fn checked_sum(values: impl Iterator<Item = u128>) -> Result<u128> {
    let mut total = 0u128;
    for value in values {
        total = total
            .checked_add(value)
            .ok_or(caligo_pool::PoolError::ValueOverflow)?;
    }
    Ok(total)
}
