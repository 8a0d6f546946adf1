//! Blocking trigger engine: consumes scanner triggers from an mpsc channel,
//! resolves the earner behind the wallet and fans gamification events out to
//! the registered handlers.

use std::sync::mpsc::Receiver;

use log::{info, warn};

use crate::explorer::format_object_id;
use crate::model::{EvmTrigger, GamificationEvent, Realization};
use crate::storage::Store;
use crate::triggers::{self, CONNECTOR_NAME};
use crate::unix_millis;

pub enum TriggerMsg {
    Trigger(EvmTrigger),
    Exit,
}

pub trait GamificationEventHandler {
    fn on_event(&self, event: &GamificationEvent);
}

pub struct TriggerEngine {
    rx: Receiver<TriggerMsg>,
    store: Store,
}

impl TriggerEngine {
    pub fn new(rx: Receiver<TriggerMsg>, store: Store) -> Self {
        Self { rx, store }
    }

    /// Runs until an `Exit` message arrives or every sender is dropped.
    pub fn start<H: GamificationEventHandler>(&mut self, handlers: Vec<H>) {
        info!("trigger engine started");
        loop {
            match self.rx.recv() {
                Ok(TriggerMsg::Trigger(trigger)) => self.process(&trigger, &handlers),
                Ok(TriggerMsg::Exit) | Err(_) => break,
            }
        }
        info!("trigger engine stopped");
    }

    fn process<H: GamificationEventHandler>(&self, trigger: &EvmTrigger, handlers: &[H]) {
        let earner = match self.store.wallet_earner(&trigger.wallet_address) {
            Ok(Some(earner)) => earner,
            Ok(None) => {
                warn!("no earner bound to wallet {}, dropping {} trigger", trigger.wallet_address, trigger.trigger.label());
                return;
            }
            Err(e) => {
                warn!("wallet lookup failed for {}: {e}", trigger.wallet_address);
                return;
            }
        };
        let event = gamification_event(trigger, &earner);
        for handler in handlers {
            handler.on_event(&event);
        }
        info!("evm action {} broadcast for earner {}", event.rule_title, event.receiver_id);
    }
}

/// Builds the broadcast payload. The object id concatenates the decimal
/// network id with the `0x`-prefixed transaction hash so display extensions
/// can split it again.
pub fn gamification_event(trigger: &EvmTrigger, earner: &str) -> GamificationEvent {
    let event_details = triggers::encode_details(&[
        (triggers::WALLET_ADDRESS, trigger.wallet_address.as_str()),
        (triggers::TRANSACTION_HASH, trigger.transaction_hash.as_str()),
        (triggers::CONTRACT_ADDRESS, trigger.contract_address.as_str()),
        (triggers::BLOCKCHAIN_NETWORK, trigger.blockchain_network.as_str()),
    ]);
    GamificationEvent {
        sender_id: earner.to_string(),
        receiver_id: earner.to_string(),
        object_id: format_object_id(trigger.network_id, &trigger.transaction_hash),
        object_type: CONNECTOR_NAME.to_string(),
        rule_title: trigger.trigger.label().to_string(),
        rule_id: trigger.rule_id,
        event_details,
    }
}

/// Records a realization row for every broadcast event. Links are derived at
/// read time through the extension registry, so `link` stays unset here.
pub struct RealizationRecorder {
    store: Store,
}

impl RealizationRecorder {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl GamificationEventHandler for RealizationRecorder {
    fn on_event(&self, event: &GamificationEvent) {
        let realization = Realization {
            object_type: event.object_type.clone(),
            object_id: event.object_id.clone(),
            link: None,
            action_label: event.rule_title.clone(),
            earner: event.receiver_id.clone(),
            rule_id: event.rule_id,
            created_at: unix_millis(),
        };
        if let Err(e) = self.store.append_realization(realization) {
            warn!("failed to record realization for {}: {e}", event.object_id);
        }
    }
}

#[cfg(all(test, feature = "mem-store"))]
mod tests {
    use super::*;
    use crate::explorer::parse_object_id;
    use crate::model::TriggerKind;
    use crate::storage::new_store;
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};

    struct Recording(Arc<Mutex<Vec<GamificationEvent>>>);

    impl GamificationEventHandler for Recording {
        fn on_event(&self, event: &GamificationEvent) {
            self.0.lock().expect("handler state poisoned").push(event.clone());
        }
    }

    fn trigger() -> EvmTrigger {
        EvmTrigger {
            trigger: TriggerKind::TransferToken,
            wallet_address: "0xWallet".into(),
            target_address: Some("0xtarget".into()),
            transaction_hash: "0xfeed".into(),
            transaction_id: 1,
            rule_id: 9,
            contract_address: "0xtoken".into(),
            blockchain_network: "Polygon".into(),
            network_id: 137,
            amount: 10,
            sent_date: 0,
            token_balance: None,
        }
    }

    #[test]
    fn known_wallets_broadcast_with_composite_object_id() {
        let store = new_store(None).unwrap();
        store.upsert_wallet("0xwallet", "alice").unwrap();

        let (tx, rx) = channel();
        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = Recording(Arc::clone(&events));

        tx.send(TriggerMsg::Trigger(trigger())).unwrap();
        tx.send(TriggerMsg::Exit).unwrap();
        TriggerEngine::new(rx, store).start(vec![handler]);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].receiver_id, "alice");
        assert_eq!(events[0].object_id, "1370xfeed");
        assert_eq!(events[0].rule_title, "transferToken");

        let parsed = parse_object_id(&events[0].object_id).unwrap();
        assert_eq!(parsed.network_id, 137);
        assert_eq!(parsed.transaction_hash, "0xfeed");
    }

    #[test]
    fn unknown_wallets_drop_the_trigger() {
        let store = new_store(None).unwrap();
        let (tx, rx) = channel();
        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = Recording(Arc::clone(&events));

        tx.send(TriggerMsg::Trigger(trigger())).unwrap();
        drop(tx);
        TriggerEngine::new(rx, store).start(vec![handler]);

        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn recorder_persists_unlinked_realizations() {
        let store = new_store(None).unwrap();
        store.upsert_wallet("0xwallet", "alice").unwrap();

        let (tx, rx) = channel();
        tx.send(TriggerMsg::Trigger(trigger())).unwrap();
        tx.send(TriggerMsg::Exit).unwrap();
        TriggerEngine::new(rx, store.clone()).start(vec![RealizationRecorder::new(store.clone())]);

        let rows = store.recent_realizations(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].object_type, "evm");
        assert_eq!(rows[0].object_id, "1370xfeed");
        assert_eq!(rows[0].earner, "alice");
        assert_eq!(rows[0].link, None);
    }
}
