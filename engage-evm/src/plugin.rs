//! Connector-side event plugin mirroring the engagement host SPI: an event
//! type, its triggers, and a check that a configured event matches concrete
//! trigger details.

use std::collections::HashMap;

use crate::triggers::{
    parse_details, BLOCKCHAIN_NETWORK, CONNECTOR_NAME, CONTRACT_ADDRESS, HOLD_TOKEN_EVENT, RECEIVE_TOKEN_EVENT,
    SEND_TOKEN_EVENT, TOKEN_NAME, TOKEN_SYMBOL, TRANSFER_TOKEN_EVENT,
};

pub trait EventPlugin {
    fn event_type(&self) -> &'static str;

    fn triggers(&self) -> Vec<&'static str>;

    /// Whether the trigger details satisfy the configured event properties.
    fn is_valid_event(&self, properties: &HashMap<String, String>, trigger_details: &str) -> bool;
}

pub struct EvmEventPlugin;

impl EventPlugin for EvmEventPlugin {
    fn event_type(&self) -> &'static str {
        CONNECTOR_NAME
    }

    fn triggers(&self) -> Vec<&'static str> {
        vec![TRANSFER_TOKEN_EVENT, SEND_TOKEN_EVENT, RECEIVE_TOKEN_EVENT, HOLD_TOKEN_EVENT]
    }

    fn is_valid_event(&self, properties: &HashMap<String, String>, trigger_details: &str) -> bool {
        let details = parse_details(trigger_details);
        let agrees = |key: &str| matches!((properties.get(key), details.get(key)), (Some(want), Some(got)) if want == got);
        agrees(CONTRACT_ADDRESS) && agrees(BLOCKCHAIN_NETWORK) && agrees(TOKEN_NAME) && agrees(TOKEN_SYMBOL)
    }
}
