//! Domain records exchanged between the scanner, the trigger engine and the
//! engagement host.

use serde::{Deserialize, Serialize};

use crate::triggers;

/// A configured EVM network the connector can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainNetwork {
    pub name: String,
    pub provider_url: String,
    pub network_id: u64,
}

/// ERC-20 metadata read from the token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc20Token {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: u128,
}

/// One decoded `Transfer` log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransferEvent {
    pub from: String,
    pub to: String,
    pub amount: u128,
    pub transaction_hash: String,
}

impl TokenTransferEvent {
    /// Dedup key for a transfer. A single transaction can emit several
    /// `Transfer` logs, so the hash alone is not enough.
    pub fn fingerprint(&self) -> String {
        format!("{}#{}#{}#{}", self.transaction_hash, self.from, self.to, self.amount)
    }
}

/// Stored transfer row. The `id` field is assigned by the store on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransaction {
    pub id: u64,
    pub transaction_hash: String,
    pub network_id: u64,
    pub from_address: String,
    pub to_address: String,
    pub contract_address: String,
    pub sent_date: u64,
    pub amount: u128,
}

impl EvmTransaction {
    /// Must stay in sync with [`TokenTransferEvent::fingerprint`].
    pub fn fingerprint(&self) -> String {
        format!("{}#{}#{}#{}", self.transaction_hash, self.from_address, self.to_address, self.amount)
    }
}

/// The trigger kinds the connector can reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    TransferToken,
    SendToken,
    ReceiveToken,
    HoldToken,
}

impl TriggerKind {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerKind::TransferToken => triggers::TRANSFER_TOKEN_EVENT,
            TriggerKind::SendToken => triggers::SEND_TOKEN_EVENT,
            TriggerKind::ReceiveToken => triggers::RECEIVE_TOKEN_EVENT,
            TriggerKind::HoldToken => triggers::HOLD_TOKEN_EVENT,
        }
    }
}

/// A configured watch over one token contract on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRule {
    pub id: u64,
    pub title: String,
    pub trigger: TriggerKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub contract_address: String,
    pub blockchain_network: String,
    pub network_id: u64,
    #[serde(default)]
    pub min_amount: Option<u128>,
    #[serde(default)]
    pub hold_duration_ms: Option<u64>,
    #[serde(default)]
    pub token_name: Option<String>,
    #[serde(default)]
    pub token_symbol: Option<String>,
    #[serde(default)]
    pub last_id_processed: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

/// One EVM trigger ready for gamification processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTrigger {
    pub trigger: TriggerKind,
    pub wallet_address: String,
    pub target_address: Option<String>,
    pub transaction_hash: String,
    pub transaction_id: u64,
    pub rule_id: u64,
    pub contract_address: String,
    pub blockchain_network: String,
    pub network_id: u64,
    pub amount: u128,
    pub sent_date: u64,
    pub token_balance: Option<u128>,
}

/// A recorded occurrence of a gamified action, carrying the metadata display
/// extensions use for linking. `link` is only ever written by a link
/// resolver; the backend stores it unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Realization {
    pub object_type: String,
    pub object_id: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub action_label: String,
    #[serde(default)]
    pub earner: String,
    #[serde(default)]
    pub rule_id: u64,
    #[serde(default)]
    pub created_at: u64,
}

/// Broadcast payload handed to gamification event handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamificationEvent {
    pub sender_id: String,
    pub receiver_id: String,
    pub object_id: String,
    pub object_type: String,
    pub rule_title: String,
    pub rule_id: u64,
    pub event_details: String,
}
