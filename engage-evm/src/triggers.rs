//! Trigger names, event property keys and the brace-delimited details codec
//! shared with the engagement host.

use std::collections::HashMap;

pub const CONNECTOR_NAME: &str = "evm";

pub const TRANSFER_TOKEN_EVENT: &str = "transferToken";
pub const SEND_TOKEN_EVENT: &str = "sendToken";
pub const RECEIVE_TOKEN_EVENT: &str = "receiveToken";
pub const HOLD_TOKEN_EVENT: &str = "holdToken";

pub const WALLET_ADDRESS: &str = "walletAddress";
pub const CONTRACT_ADDRESS: &str = "contractAddress";
pub const BLOCKCHAIN_NETWORK: &str = "blockchainNetwork";
pub const NETWORK_ID: &str = "networkId";
pub const TOKEN_NAME: &str = "tokenName";
pub const TOKEN_SYMBOL: &str = "tokenSymbol";
pub const TOKEN_DECIMALS: &str = "tokenDecimals";
pub const MIN_AMOUNT: &str = "minAmount";
pub const RECIPIENT_ADDRESS: &str = "recipientAddress";
pub const TRANSACTION_HASH: &str = "transactionHash";
pub const DURATION: &str = "duration";

/// Encodes detail pairs into the `{key: value, key: value}` string format the
/// engagement host exchanges trigger details in. Pair order is preserved.
pub fn encode_details(pairs: &[(&str, &str)]) -> String {
    let body = pairs.iter().map(|(key, value)| format!("{key}: {value}")).collect::<Vec<_>>().join(", ");
    format!("{{{body}}}")
}

/// Parses a `{key: value, key: value}` details string into a map. Malformed
/// pairs are skipped rather than failing the whole map.
pub fn parse_details(details: &str) -> HashMap<String, String> {
    let inner = details.trim().trim_start_matches('{').trim_end_matches('}');
    let mut map = HashMap::new();
    for pair in inner.split(", ") {
        if let Some((key, value)) = pair.split_once(": ") {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}
