//! Periodic transfer scanning: ingests `Transfer` logs for every enabled
//! watch rule and dispatches triggers for freshly stored transactions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::{sleep_until, Instant};

use crate::engine::TriggerMsg;
use crate::model::{EvmTransaction, EvmTrigger, TriggerKind, WatchRule};
use crate::plugin::{EventPlugin, EvmEventPlugin};
use crate::rpc::ChainReader;
use crate::storage::Store;
use crate::tokens::TokenMetadataCache;
use crate::triggers;
use crate::unix_millis;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Rpc(#[from] crate::rpc::RpcError),
    #[error(transparent)]
    Store(#[from] crate::storage::StoreError),
    #[error("trigger engine is no longer running")]
    EngineGone,
}

/// Checkpoints are tracked per network/contract pair.
pub fn checkpoint_key(network_id: u64, contract_address: &str) -> String {
    format!("{network_id}#{contract_address}")
}

/// Scan loop. Each tick ingests new `Transfer` logs for every enabled rule,
/// then dispatches triggers for the stored transactions the rule has not
/// processed yet. Runs until the exit signal flips.
pub async fn run_scanner<C: ChainReader>(
    reader: Arc<C>,
    store: Store,
    tokens: Arc<TokenMetadataCache>,
    sender: Sender<TriggerMsg>,
    interval: Duration,
    exit_signal: Arc<AtomicBool>,
) {
    let mut now = Instant::now();
    loop {
        if exit_signal.load(Ordering::Relaxed) {
            info!("Exiting...");
            break;
        }
        sleep_until(now + interval).await;
        now = Instant::now();

        let rules = match store.enabled_rules() {
            Ok(rules) => rules,
            Err(e) => {
                warn!("failed to load watch rules: {e}");
                continue;
            }
        };
        if rules.is_empty() {
            debug!("no enabled watch rules");
            continue;
        }

        info!("start scanning token transfers for {} configured rules", rules.len());
        for rule in &rules {
            if let Err(e) = ingest_rule_transfers(reader.as_ref(), &store, rule).await {
                warn!("transfer ingestion failed for rule {} ({}): {e}", rule.id, rule.contract_address);
            }
        }
        for rule in &rules {
            match dispatch_rule_triggers(reader.as_ref(), &store, &tokens, &sender, rule).await {
                Ok(_) => {}
                Err(ScanError::EngineGone) => {
                    warn!("trigger engine gone, stopping scanner");
                    return;
                }
                Err(e) => warn!("trigger dispatch failed for rule {}: {e}", rule.id),
            }
        }
        info!("end scanning token transfers");
    }
    if sender.send(TriggerMsg::Exit).is_err() {
        debug!("trigger engine already stopped");
    }
}

/// Fetches and stores new transfers for one rule. The first observation of a
/// contract only records the chain tip as checkpoint so history is never
/// replayed. Returns the number of stored rows.
pub async fn ingest_rule_transfers<C: ChainReader>(reader: &C, store: &Store, rule: &WatchRule) -> Result<usize, ScanError> {
    let key = checkpoint_key(rule.network_id, &rule.contract_address);
    let tip = reader.last_block(&rule.blockchain_network).await?;
    let last_checked = match store.checkpoint(&key)? {
        Some(block) => block,
        None => {
            store.save_checkpoint(&key, tip)?;
            debug!("first observation of {key}, checkpoint initialized at block {tip}");
            return Ok(0);
        }
    };
    if tip <= last_checked {
        return Ok(0);
    }

    let events = reader.transfer_events(&rule.blockchain_network, &rule.contract_address, last_checked + 1, tip).await?;
    let sent_date = unix_millis();
    let mut stored = 0usize;
    for event in events {
        if store.has_transaction(rule.network_id, &rule.contract_address, &event.fingerprint())? {
            continue;
        }
        store.append_transaction(EvmTransaction {
            id: 0,
            transaction_hash: event.transaction_hash,
            network_id: rule.network_id,
            from_address: event.from,
            to_address: event.to,
            contract_address: rule.contract_address.clone(),
            sent_date,
            amount: event.amount,
        })?;
        stored += 1;
    }
    store.save_checkpoint(&key, tip)?;
    if stored > 0 {
        info!("stored {stored} token transfers for contract {} on {}", rule.contract_address, rule.blockchain_network);
    }
    Ok(stored)
}

/// Emits triggers for every stored transaction the rule has not processed
/// yet. The watermark advances per consumed transaction, and only past
/// transactions that dispatched or are permanently ineligible; a hold
/// transfer still waiting for its window stops the pass unconsumed so the
/// next scan reconsiders it. The first dispatch only initializes the
/// watermark to the newest stored id. Returns the number of triggers
/// emitted.
pub async fn dispatch_rule_triggers<C: ChainReader>(
    reader: &C,
    store: &Store,
    tokens: &TokenMetadataCache,
    sender: &Sender<TriggerMsg>,
    rule: &WatchRule,
) -> Result<usize, ScanError> {
    let watermark = match rule.last_id_processed {
        Some(id) => id,
        None => {
            let newest = store.newest_transaction_id(&rule.contract_address, rule.network_id)?.unwrap_or(0);
            store.save_rule_watermark(rule.id, newest)?;
            return Ok(0);
        }
    };

    let transactions = store.transactions_after(&rule.contract_address, rule.network_id, watermark)?;
    let mut dispatched = 0usize;
    for tx in transactions {
        if rule.min_amount.is_some_and(|min| tx.amount < min) {
            debug!("transfer {} below minimum amount for rule {}", tx.transaction_hash, rule.id);
            store.save_rule_watermark(rule.id, tx.id)?;
            continue;
        }
        // Transient metadata failures propagate before the watermark moves,
        // so the transfer is retried instead of consumed
        if !passes_event_gate(reader, tokens, rule, &tx).await? {
            store.save_rule_watermark(rule.id, tx.id)?;
            continue;
        }
        let Some(trigger) = build_trigger(reader, rule, &tx).await? else {
            // Hold transfer still waiting for its window or its balance;
            // leave it unconsumed and stop so the watermark never jumps it
            break;
        };
        sender.send(TriggerMsg::Trigger(trigger)).map_err(|_| ScanError::EngineGone)?;
        store.save_rule_watermark(rule.id, tx.id)?;
        dispatched += 1;
    }
    Ok(dispatched)
}

/// Rules that pin a token name/symbol are validated against the live token
/// metadata before dispatch, mirroring the host-side event validation.
/// Rules without token expectations pass unconditionally. Metadata fetch
/// failures propagate so the caller retries instead of dropping transfers.
async fn passes_event_gate<C: ChainReader>(
    reader: &C,
    tokens: &TokenMetadataCache,
    rule: &WatchRule,
    tx: &EvmTransaction,
) -> Result<bool, ScanError> {
    let (Some(expected_name), Some(expected_symbol)) = (&rule.token_name, &rule.token_symbol) else {
        return Ok(true);
    };
    let token = tokens.get_or_fetch(reader, &rule.blockchain_network, &rule.contract_address).await?;
    let properties = HashMap::from([
        (triggers::CONTRACT_ADDRESS.to_string(), rule.contract_address.clone()),
        (triggers::BLOCKCHAIN_NETWORK.to_string(), rule.blockchain_network.clone()),
        (triggers::TOKEN_NAME.to_string(), expected_name.clone()),
        (triggers::TOKEN_SYMBOL.to_string(), expected_symbol.clone()),
    ]);
    let details = triggers::encode_details(&[
        (triggers::WALLET_ADDRESS, &tx.from_address),
        (triggers::TRANSACTION_HASH, &tx.transaction_hash),
        (triggers::CONTRACT_ADDRESS, &tx.contract_address),
        (triggers::BLOCKCHAIN_NETWORK, &rule.blockchain_network),
        (triggers::TOKEN_NAME, &token.name),
        (triggers::TOKEN_SYMBOL, &token.symbol),
    ]);
    let valid = EvmEventPlugin.is_valid_event(&properties, &details);
    if !valid {
        debug!("transfer {} rejected by event validation for rule {}", tx.transaction_hash, rule.id);
    }
    Ok(valid)
}

/// Maps a stored transaction into a trigger according to the rule kind.
/// `None` means the transaction does not qualify (hold rules only).
async fn build_trigger<C: ChainReader>(reader: &C, rule: &WatchRule, tx: &EvmTransaction) -> Result<Option<EvmTrigger>, ScanError> {
    let (wallet_address, target_address, token_balance) = match rule.trigger {
        TriggerKind::TransferToken | TriggerKind::SendToken => (tx.from_address.clone(), Some(tx.to_address.clone()), None),
        TriggerKind::ReceiveToken => (tx.to_address.clone(), Some(tx.from_address.clone()), None),
        TriggerKind::HoldToken => {
            let Some(balance) = holding_balance(reader, rule, tx).await? else {
                return Ok(None);
            };
            (tx.to_address.clone(), None, Some(balance))
        }
    };
    Ok(Some(EvmTrigger {
        trigger: rule.trigger,
        wallet_address,
        target_address,
        transaction_hash: tx.transaction_hash.clone(),
        transaction_id: tx.id,
        rule_id: rule.id,
        contract_address: tx.contract_address.clone(),
        blockchain_network: rule.blockchain_network.clone(),
        network_id: tx.network_id,
        amount: tx.amount,
        sent_date: tx.sent_date,
        token_balance,
    }))
}

/// Hold rules only reward transfers still held: the tokens must have stayed
/// with the recipient for the configured duration and the current balance
/// must still cover the transferred amount.
async fn holding_balance<C: ChainReader>(reader: &C, rule: &WatchRule, tx: &EvmTransaction) -> Result<Option<u128>, ScanError> {
    let required = rule.hold_duration_ms.unwrap_or(0);
    if unix_millis().saturating_sub(tx.sent_date) < required {
        return Ok(None);
    }
    let balance = reader.erc20_balance_of(&rule.blockchain_network, &rule.contract_address, &tx.to_address).await?;
    if balance < tx.amount {
        debug!("holder {} no longer covers transfer {} for rule {}", tx.to_address, tx.transaction_hash, rule.id);
        return Ok(None);
    }
    Ok(Some(balance))
}
