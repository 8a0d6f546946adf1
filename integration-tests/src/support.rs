use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use engage_evm::engine::{GamificationEventHandler, TriggerEngine, TriggerMsg};
use engage_evm::model::{Erc20Token, GamificationEvent, TokenTransferEvent, TriggerKind, WatchRule};
use engage_evm::rpc::{ChainReader, RpcError};
use engage_evm::storage::{new_store, Store};

pub const NETWORK: &str = "Mainnet";
pub const NETWORK_ID: u64 = 1;
pub const CONTRACT: &str = "0xc0ffee254729296a45a3885639ac7e10f9d54979";

/// Programmable stand-in for the JSON-RPC chain reader.
#[derive(Default)]
pub struct MockChain {
    tips: Mutex<HashMap<String, u64>>,
    transfers: Mutex<HashMap<(String, String), Vec<(u64, TokenTransferEvent)>>>,
    tokens: Mutex<HashMap<(String, String), Erc20Token>>,
    balances: Mutex<HashMap<(String, String, String), u128>>,
}

impl MockChain {
    pub fn set_tip(&self, network: &str, block: u64) {
        self.tips.lock().expect("tips poisoned").insert(network.to_string(), block);
    }

    pub fn push_transfer(&self, network: &str, contract: &str, block: u64, event: TokenTransferEvent) {
        self.transfers
            .lock()
            .expect("transfers poisoned")
            .entry((network.to_string(), contract.to_string()))
            .or_default()
            .push((block, event));
    }

    pub fn set_token(&self, network: &str, contract: &str, token: Erc20Token) {
        self.tokens.lock().expect("tokens poisoned").insert((network.to_string(), contract.to_string()), token);
    }

    pub fn set_balance(&self, network: &str, contract: &str, holder: &str, balance: u128) {
        self.balances
            .lock()
            .expect("balances poisoned")
            .insert((network.to_string(), contract.to_string(), holder.to_string()), balance);
    }
}

impl ChainReader for MockChain {
    async fn last_block(&self, network: &str) -> Result<u64, RpcError> {
        self.tips
            .lock()
            .expect("tips poisoned")
            .get(network)
            .copied()
            .ok_or_else(|| RpcError::UnknownNetwork(network.to_string()))
    }

    async fn transfer_events(
        &self,
        network: &str,
        contract: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TokenTransferEvent>, RpcError> {
        let key = (network.to_string(), contract.to_string());
        Ok(self
            .transfers
            .lock()
            .expect("transfers poisoned")
            .get(&key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(block, _)| *block >= from_block && *block <= to_block)
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn erc20_token(&self, network: &str, contract: &str) -> Result<Erc20Token, RpcError> {
        self.tokens
            .lock()
            .expect("tokens poisoned")
            .get(&(network.to_string(), contract.to_string()))
            .cloned()
            .ok_or(RpcError::Malformed)
    }

    async fn erc20_balance_of(&self, network: &str, contract: &str, holder: &str) -> Result<u128, RpcError> {
        Ok(self
            .balances
            .lock()
            .expect("balances poisoned")
            .get(&(network.to_string(), contract.to_string(), holder.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

/// Records every broadcast gamification event.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<GamificationEvent>>>,
}

impl RecordingHandler {
    pub fn new() -> (Self, Arc<Mutex<Vec<GamificationEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (Self { events: Arc::clone(&events) }, events)
    }
}

impl GamificationEventHandler for RecordingHandler {
    fn on_event(&self, event: &GamificationEvent) {
        self.events.lock().expect("handler state poisoned").push(event.clone());
    }
}

pub fn events_snapshot(events: &Arc<Mutex<Vec<GamificationEvent>>>) -> Vec<GamificationEvent> {
    events.lock().expect("handler state poisoned").clone()
}

pub fn mem_store() -> Store {
    new_store(None).expect("in-memory store")
}

pub fn watch_rule(id: u64, trigger: TriggerKind) -> WatchRule {
    WatchRule {
        id,
        title: format!("rule-{id}"),
        trigger,
        enabled: true,
        contract_address: CONTRACT.to_string(),
        blockchain_network: NETWORK.to_string(),
        network_id: NETWORK_ID,
        min_amount: None,
        hold_duration_ms: None,
        token_name: None,
        token_symbol: None,
        last_id_processed: None,
    }
}

pub fn transfer(hash: &str, from: &str, to: &str, amount: u128) -> TokenTransferEvent {
    TokenTransferEvent { from: from.to_string(), to: to.to_string(), amount, transaction_hash: hash.to_string() }
}

/// Drains already-queued triggers through the engine on the current thread
/// and returns every event it broadcast. The caller must have sent `Exit`
/// (or dropped all senders) first.
pub fn drain_engine(store: Store, receiver: std::sync::mpsc::Receiver<TriggerMsg>) -> Vec<GamificationEvent> {
    let (handler, events) = RecordingHandler::new();
    let mut engine = TriggerEngine::new(receiver, store);
    engine.start(vec![handler]);
    events_snapshot(&events)
}
