use std::sync::mpsc::channel;

use integration_tests::support::{drain_engine, mem_store, transfer, watch_rule, MockChain, CONTRACT, NETWORK, NETWORK_ID};

use engage_evm::engine::{RealizationRecorder, TriggerEngine, TriggerMsg};
use engage_evm::extension::{register_user_actions, ExtensionRegistry, ENGAGEMENT_CENTER_ACTIONS};
use engage_evm::model::{Erc20Token, TriggerKind};
use engage_evm::scan::{checkpoint_key, dispatch_rule_triggers, ingest_rule_transfers};
use engage_evm::tokens::TokenMetadataCache;

#[tokio::test]
async fn first_scan_initializes_checkpoint_without_replaying_history() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 100);
    chain.push_transfer(NETWORK, CONTRACT, 90, transfer("0xold", "0xaaa", "0xbbb", 5));

    let store = mem_store();
    let rule = watch_rule(1, TriggerKind::TransferToken);
    store.upsert_rule(rule.clone()).unwrap();

    let stored = ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    assert_eq!(stored, 0, "history before the first observation must not be replayed");
    assert_eq!(store.checkpoint(&checkpoint_key(NETWORK_ID, CONTRACT)).unwrap(), Some(100));

    // The next tick picks up everything after the initialized checkpoint
    chain.set_tip(NETWORK, 110);
    chain.push_transfer(NETWORK, CONTRACT, 105, transfer("0xnew", "0xaaa", "0xbbb", 5));
    let stored = ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    assert_eq!(stored, 1);
    assert_eq!(store.checkpoint(&checkpoint_key(NETWORK_ID, CONTRACT)).unwrap(), Some(110));

    let rows = store.recent_transactions(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].transaction_hash, "0xnew");
    assert_eq!(rows[0].network_id, NETWORK_ID);
}

#[tokio::test]
async fn redelivered_transfers_are_stored_once() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);

    let store = mem_store();
    let rule = watch_rule(1, TriggerKind::TransferToken);
    store.upsert_rule(rule.clone()).unwrap();
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 15, transfer("0xdup", "0xaaa", "0xbbb", 5));
    assert_eq!(ingest_rule_transfers(&chain, &store, &rule).await.unwrap(), 1);

    // The node re-serves the same log in a later range
    chain.set_tip(NETWORK, 30);
    chain.push_transfer(NETWORK, CONTRACT, 25, transfer("0xdup", "0xaaa", "0xbbb", 5));
    assert_eq!(ingest_rule_transfers(&chain, &store, &rule).await.unwrap(), 0);
    assert_eq!(store.recent_transactions(10).unwrap().len(), 1);
}

#[tokio::test]
async fn watermark_initialization_skips_the_backlog() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);

    let store = mem_store();
    let rule = watch_rule(1, TriggerKind::TransferToken);
    store.upsert_rule(rule.clone()).unwrap();
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 15, transfer("0xbacklog", "0xaaa", "0xbbb", 5));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    let tokens = TokenMetadataCache::disabled();
    let (sender, receiver) = channel();

    // First dispatch only positions the watermark after the stored backlog
    let dispatched = dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap();
    assert_eq!(dispatched, 0);

    let rule = store.rules().unwrap().into_iter().find(|r| r.id == 1).unwrap();
    assert!(rule.last_id_processed.is_some());

    // Nothing new: the second dispatch stays quiet
    let dispatched = dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap();
    assert_eq!(dispatched, 0);

    drop(sender);
    assert!(drain_engine(store, receiver).is_empty());
}

#[tokio::test]
async fn transfers_dispatch_to_the_sender_and_advance_the_watermark() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);

    let store = mem_store();
    let mut rule = watch_rule(1, TriggerKind::TransferToken);
    rule.last_id_processed = Some(0);
    store.upsert_rule(rule.clone()).unwrap();
    store.upsert_wallet("0xaaa", "alice").unwrap();

    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 12, transfer("0x01", "0xaaa", "0xbbb", 5));
    chain.push_transfer(NETWORK, CONTRACT, 13, transfer("0x02", "0xaaa", "0xccc", 9));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    let tokens = TokenMetadataCache::disabled();
    let (sender, receiver) = channel();
    let dispatched = dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap();
    assert_eq!(dispatched, 2);
    sender.send(TriggerMsg::Exit).unwrap();

    let events = drain_engine(store.clone(), receiver);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].receiver_id, "alice");
    assert_eq!(events[0].object_id, format!("{NETWORK_ID}0x01"));
    assert_eq!(events[0].rule_title, "transferToken");
    assert_eq!(events[1].object_id, format!("{NETWORK_ID}0x02"));

    // Watermark advanced: nothing is re-dispatched on the next pass
    let rule = store.rules().unwrap().into_iter().find(|r| r.id == 1).unwrap();
    let (sender, _receiver) = channel();
    let dispatched = dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap();
    assert_eq!(dispatched, 0);
}

#[tokio::test]
async fn min_amount_filters_small_transfers() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);

    let store = mem_store();
    let mut rule = watch_rule(1, TriggerKind::TransferToken);
    rule.min_amount = Some(100);
    rule.last_id_processed = Some(0);
    store.upsert_rule(rule.clone()).unwrap();
    store.upsert_wallet("0xaaa", "alice").unwrap();

    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 12, transfer("0xsmall", "0xaaa", "0xbbb", 99));
    chain.push_transfer(NETWORK, CONTRACT, 13, transfer("0xbig", "0xaaa", "0xbbb", 100));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    let tokens = TokenMetadataCache::disabled();
    let (sender, receiver) = channel();
    let dispatched = dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap();
    assert_eq!(dispatched, 1);
    sender.send(TriggerMsg::Exit).unwrap();

    let events = drain_engine(store, receiver);
    assert_eq!(events.len(), 1);
    assert!(events[0].object_id.ends_with("0xbig"));
}

#[tokio::test]
async fn receive_token_rewards_the_recipient() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);

    let store = mem_store();
    let mut rule = watch_rule(1, TriggerKind::ReceiveToken);
    rule.last_id_processed = Some(0);
    store.upsert_rule(rule.clone()).unwrap();
    store.upsert_wallet("0xbbb", "bob").unwrap();

    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 12, transfer("0x01", "0xaaa", "0xbbb", 5));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    let tokens = TokenMetadataCache::disabled();
    let (sender, receiver) = channel();
    dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap();
    sender.send(TriggerMsg::Exit).unwrap();

    let events = drain_engine(store, receiver);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].receiver_id, "bob");
    assert_eq!(events[0].rule_title, "receiveToken");
}

#[tokio::test]
async fn hold_token_requires_duration_and_remaining_balance() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);

    let store = mem_store();
    let mut rule = watch_rule(1, TriggerKind::HoldToken);
    rule.last_id_processed = Some(0);
    store.upsert_rule(rule.clone()).unwrap();
    store.upsert_wallet("0xbbb", "bob").unwrap();

    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 12, transfer("0xheld", "0xaaa", "0xbbb", 50));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    let tokens = TokenMetadataCache::disabled();

    // Still inside the holding window: the transfer stays pending
    let mut early = rule.clone();
    early.hold_duration_ms = Some(u64::MAX);
    let (sender, _receiver) = channel();
    assert_eq!(dispatch_rule_triggers(&chain, &store, &tokens, &sender, &early).await.unwrap(), 0);
    let pending = store.rules().unwrap().into_iter().find(|r| r.id == 1).unwrap();
    assert_eq!(pending.last_id_processed, Some(0), "a waiting hold transfer must not be consumed");

    // Window elapsed but the balance no longer covers the transfer: still pending
    chain.set_balance(NETWORK, CONTRACT, "0xbbb", 10);
    let (sender, _receiver) = channel();
    assert_eq!(dispatch_rule_triggers(&chain, &store, &tokens, &sender, &pending).await.unwrap(), 0);
    let pending = store.rules().unwrap().into_iter().find(|r| r.id == 1).unwrap();
    assert_eq!(pending.last_id_processed, Some(0));

    // Balance restored: the next scan of the same rule dispatches with the
    // live balance attached, no manual intervention
    chain.set_balance(NETWORK, CONTRACT, "0xbbb", 75);
    let (sender, receiver) = channel();
    assert_eq!(dispatch_rule_triggers(&chain, &store, &tokens, &sender, &pending).await.unwrap(), 1);
    sender.send(TriggerMsg::Exit).unwrap();

    let events = drain_engine(store.clone(), receiver);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].receiver_id, "bob");
    assert_eq!(events[0].rule_title, "holdToken");

    let consumed = store.rules().unwrap().into_iter().find(|r| r.id == 1).unwrap();
    assert_ne!(consumed.last_id_processed, Some(0), "the dispatched transfer is consumed");
}

#[tokio::test]
async fn token_expectations_gate_dispatch_on_live_metadata() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);
    chain.set_token(NETWORK, CONTRACT, Erc20Token { name: "Other".into(), symbol: "OTH".into(), decimals: 18, total_supply: 1_000 });

    let store = mem_store();
    let mut rule = watch_rule(1, TriggerKind::TransferToken);
    rule.token_name = Some("Demo".into());
    rule.token_symbol = Some("DMO".into());
    rule.last_id_processed = Some(0);
    store.upsert_rule(rule.clone()).unwrap();
    store.upsert_wallet("0xaaa", "alice").unwrap();

    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 12, transfer("0x01", "0xaaa", "0xbbb", 5));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    // Metadata disagrees with the rule: rejected for good and consumed
    let tokens = TokenMetadataCache::disabled();
    let (sender, _receiver) = channel();
    assert_eq!(dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap(), 0);
    let rule = store.rules().unwrap().into_iter().find(|r| r.id == 1).unwrap();
    assert_ne!(rule.last_id_processed, Some(0), "a mismatched transfer is consumed");

    // Matching metadata: the next transfer goes through
    chain.set_token(NETWORK, CONTRACT, Erc20Token { name: "Demo".into(), symbol: "DMO".into(), decimals: 18, total_supply: 1_000 });
    chain.set_tip(NETWORK, 30);
    chain.push_transfer(NETWORK, CONTRACT, 25, transfer("0x02", "0xaaa", "0xbbb", 5));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    let (sender, _receiver) = channel();
    assert_eq!(dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap(), 1);
}

#[tokio::test]
async fn transient_metadata_failures_do_not_consume_transfers() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);
    // No token metadata configured yet: lookups fail like a flaky RPC

    let store = mem_store();
    let mut rule = watch_rule(1, TriggerKind::TransferToken);
    rule.token_name = Some("Demo".into());
    rule.token_symbol = Some("DMO".into());
    rule.last_id_processed = Some(0);
    store.upsert_rule(rule.clone()).unwrap();
    store.upsert_wallet("0xaaa", "alice").unwrap();

    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 12, transfer("0x01", "0xaaa", "0xbbb", 5));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    let tokens = TokenMetadataCache::disabled();
    let (sender, _receiver) = channel();
    assert!(dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.is_err());
    let rule = store.rules().unwrap().into_iter().find(|r| r.id == 1).unwrap();
    assert_eq!(rule.last_id_processed, Some(0), "a transfer behind a failed lookup must not be consumed");

    // Metadata is reachable again: the same transfer dispatches
    chain.set_token(NETWORK, CONTRACT, Erc20Token { name: "Demo".into(), symbol: "DMO".into(), decimals: 18, total_supply: 1_000 });
    let (sender, _receiver) = channel();
    assert_eq!(dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap(), 1);
}

#[tokio::test]
async fn realizations_recorded_by_the_engine_resolve_explorer_links() {
    let chain = MockChain::default();
    chain.set_tip(NETWORK, 10);

    let store = mem_store();
    let mut rule = watch_rule(1, TriggerKind::TransferToken);
    rule.last_id_processed = Some(0);
    store.upsert_rule(rule.clone()).unwrap();
    store.upsert_wallet("0xaaa", "alice").unwrap();

    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();
    chain.set_tip(NETWORK, 20);
    chain.push_transfer(NETWORK, CONTRACT, 12, transfer("0xabc123", "0xaaa", "0xbbb", 5));
    ingest_rule_transfers(&chain, &store, &rule).await.unwrap();

    let tokens = TokenMetadataCache::disabled();
    let (sender, receiver) = channel();
    dispatch_rule_triggers(&chain, &store, &tokens, &sender, &rule).await.unwrap();
    sender.send(TriggerMsg::Exit).unwrap();

    let mut engine = TriggerEngine::new(receiver, store.clone());
    engine.start(vec![RealizationRecorder::new(store.clone())]);

    let mut rows = store.recent_realizations(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].object_type, "evm");
    assert_eq!(rows[0].object_id, "10xabc123");
    assert_eq!(rows[0].link, None, "links are derived at read time");

    let mut registry = ExtensionRegistry::new();
    register_user_actions(&mut registry);
    let link = registry.resolve_action_link(ENGAGEMENT_CENTER_ACTIONS, "transferToken", &mut rows[0]);
    assert_eq!(link.as_deref(), Some("https://etherscan.io/tx/0xabc123"));
    assert_eq!(rows[0].link.as_deref(), Some("https://etherscan.io/tx/0xabc123"));
}
