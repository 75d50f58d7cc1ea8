//! formatted transaction history
//!
//! one record per transaction id, with amounts partitioned the way users
//! read them: what came in, what went out, the relayer's cut, change back to
//! ourselves, and exits to public addresses. derived entirely from scanned
//! state (TXOs, sent-note records, unshield events); nothing here touches
//! the chain.

use caligo_pool::{encode_address, AddressData, OutputType, TokenData};
use ruint::aliases::U256;
use std::collections::BTreeMap;

use crate::chain::Chain;
use crate::error::Result;
use crate::events::UnshieldEvent;
use crate::wallet::{SentNote, Txo, TxoOrigin, Wallet};

/// one amount line inside a history entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenAmount {
    pub token: TokenData,
    pub amount: u128,
    pub memo_text: Option<String>,
    /// only receives from senders who chose to reveal themselves carry this
    pub sender_address: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionHistoryEntry {
    pub txid: U256,
    pub block_number: u64,
    pub receive_token_amounts: Vec<TokenAmount>,
    pub transfer_token_amounts: Vec<TokenAmount>,
    pub relayer_fee_token_amount: Option<TokenAmount>,
    pub change_token_amounts: Vec<TokenAmount>,
    pub unshield_token_amounts: Vec<TokenAmount>,
}

impl Wallet {
    /// derive the wallet's history for one chain, oldest first
    pub async fn transaction_history(
        &self,
        chain: Chain,
    ) -> Result<Vec<TransactionHistoryEntry>> {
        let txos = self.txos(chain).await?;
        let sent = self.sent_notes(chain).await?;
        let unshields = self.unshields(chain).await?;
        derive_history(chain, &txos, &sent, &unshields)
    }
}

pub fn derive_history(
    chain: Chain,
    txos: &[Txo],
    sent: &[SentNote],
    unshields: &[UnshieldEvent],
) -> Result<Vec<TransactionHistoryEntry>> {
    let mut entries: BTreeMap<(u64, U256), TransactionHistoryEntry> = BTreeMap::new();

    // incoming notes: receives and change, by the receipt transaction
    for txo in txos {
        let amount = TokenAmount {
            token: txo.token.clone(),
            amount: txo.value,
            memo_text: txo.memo.as_ref().and_then(|m| m.text.clone()),
            sender_address: sender_address(chain, txo)?,
        };
        let slot = entries
            .entry((txo.block_number, txo.txid))
            .or_insert_with(|| TransactionHistoryEntry {
                txid: txo.txid,
                block_number: txo.block_number,
                ..Default::default()
            });
        match (txo.origin, txo.output_type()) {
            (TxoOrigin::Shield, _) => slot.receive_token_amounts.push(amount),
            (TxoOrigin::Transact, Some(OutputType::Change)) => {
                slot.change_token_amounts.push(amount)
            }
            (TxoOrigin::Transact, _) => slot.receive_token_amounts.push(amount),
        }
    }

    // outgoing notes recovered from annotations, by the sending transaction
    for note in sent {
        let amount = TokenAmount {
            token: note.token.clone(),
            amount: note.value,
            memo_text: None,
            sender_address: None,
        };
        let slot = entries
            .entry((note.block_number, note.txid))
            .or_insert_with(|| TransactionHistoryEntry {
                txid: note.txid,
                block_number: note.block_number,
                ..Default::default()
            });
        match note.output_type {
            OutputType::RelayerFee => {
                // at most one fee per transaction; keep the first
                if slot.relayer_fee_token_amount.is_none() {
                    slot.relayer_fee_token_amount = Some(amount);
                }
            }
            _ => slot.transfer_token_amounts.push(amount),
        }
    }

    // ensure spend-only transactions (pure unshields) still get an entry
    for txo in txos {
        if let Some(spent) = &txo.spent {
            entries
                .entry((spent.block_number, spent.txid))
                .or_insert_with(|| TransactionHistoryEntry {
                    txid: spent.txid,
                    block_number: spent.block_number,
                    ..Default::default()
                });
        }
    }

    // unshield exits, only for transactions this wallet took part in
    for unshield in unshields {
        if let Some(slot) = entries
            .values_mut()
            .find(|e| e.txid == unshield.txid)
        {
            slot.unshield_token_amounts.push(TokenAmount {
                token: unshield.token.clone(),
                amount: unshield.value,
                memo_text: None,
                sender_address: None,
            });
        }
    }

    // a receive that mirrors a change record in the same transaction is the
    // change itself seen twice; drop the receive
    for slot in entries.values_mut() {
        let changes: Vec<(U256, u128)> = slot
            .change_token_amounts
            .iter()
            .map(|c| Ok((c.token.hash()?, c.amount)))
            .collect::<Result<_>>()?;
        slot.receive_token_amounts.retain(|r| {
            let hash = match r.token.hash() {
                Ok(h) => h,
                Err(_) => return true,
            };
            !changes.contains(&(hash, r.amount))
        });
    }

    // drop entries that ended up carrying nothing
    Ok(entries
        .into_values()
        .filter(|e| {
            !(e.receive_token_amounts.is_empty()
                && e.transfer_token_amounts.is_empty()
                && e.relayer_fee_token_amount.is_none()
                && e.change_token_amounts.is_empty()
                && e.unshield_token_amounts.is_empty())
        })
        .collect())
}

/// reconstruct the sender's address when they revealed themselves
fn sender_address(chain: Chain, txo: &Txo) -> Result<Option<String>> {
    let Some(memo) = &txo.memo else {
        return Ok(None);
    };
    let (Some(mpk), Some(viewing)) = (memo.sender_mpk, txo.sender_viewing_pub) else {
        return Ok(None);
    };
    let address = encode_address(&AddressData {
        master_public_key: mpk,
        viewing_public_key: viewing,
        chain_type: chain.chain_type.as_byte(),
        chain_id: chain.id,
    })?;
    Ok(Some(address))
}
