//! Minimal ABI helpers for the ERC-20 surface the connector reads: the
//! `Transfer` event and the metadata/balance view functions.

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::model::TokenTransferEvent;

/// keccak256 of `Transfer(address,address,uint256)`.
pub const TRANSFER_EVENT_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const SELECTOR_NAME: &str = "0x06fdde03";
pub const SELECTOR_SYMBOL: &str = "0x95d89b41";
pub const SELECTOR_DECIMALS: &str = "0x313ce567";
pub const SELECTOR_TOTAL_SUPPLY: &str = "0x18160ddd";
pub const SELECTOR_BALANCE_OF: &str = "0x70a08231";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AbiError {
    #[error("invalid hex payload")]
    InvalidHex,
    #[error("truncated abi payload")]
    Truncated,
    #[error("abi string payload is not utf-8")]
    InvalidUtf8,
}

/// Raw `eth_getLogs` entry, as returned by the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub data: String,
    #[serde(default)]
    pub removed: bool,
    pub transaction_hash: String,
}

/// Call data for `balanceOf(address)`.
pub fn encode_balance_of(holder: &str) -> Result<String, AbiError> {
    let addr = holder.trim_start_matches("0x");
    if addr.len() != 40 || !addr.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AbiError::InvalidHex);
    }
    Ok(format!("{SELECTOR_BALANCE_OF}{:0>64}", addr.to_ascii_lowercase()))
}

/// Decodes a uint256 word. Values beyond `u128::MAX` clamp instead of
/// failing the scan.
pub fn decode_uint(data: &str) -> Result<u128, AbiError> {
    let hex = data.trim_start_matches("0x");
    if hex.is_empty() {
        return Ok(0);
    }
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AbiError::InvalidHex);
    }
    let significant = hex.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Ok(u128::MAX);
    }
    u128::from_str_radix(significant, 16).map_err(|_| AbiError::InvalidHex)
}

/// Extracts the address packed into the low 20 bytes of a 32-byte word.
pub fn decode_address(word: &str) -> Result<String, AbiError> {
    let hex = word.trim_start_matches("0x");
    if hex.len() < 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AbiError::InvalidHex);
    }
    Ok(format!("0x{}", hex[hex.len() - 40..].to_ascii_lowercase()))
}

/// Decodes a dynamic `string` return value (offset word, length word, bytes).
pub fn decode_string(data: &str) -> Result<String, AbiError> {
    let hex = data.trim_start_matches("0x");
    if hex.len() % 2 != 0 {
        return Err(AbiError::InvalidHex);
    }
    let mut bytes = vec![0u8; hex.len() / 2];
    faster_hex::hex_decode(hex.as_bytes(), &mut bytes).map_err(|_| AbiError::InvalidHex)?;
    let offset = word_as_usize(&bytes, 0)?;
    let len = word_as_usize(&bytes, offset)?;
    let start = offset.checked_add(32).ok_or(AbiError::Truncated)?;
    let end = start.checked_add(len).ok_or(AbiError::Truncated)?;
    if end > bytes.len() {
        return Err(AbiError::Truncated);
    }
    String::from_utf8(bytes[start..end].to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

fn word_as_usize(bytes: &[u8], at: usize) -> Result<usize, AbiError> {
    let end = at.checked_add(32).ok_or(AbiError::Truncated)?;
    if end > bytes.len() {
        return Err(AbiError::Truncated);
    }
    let word = &bytes[at..end];
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Truncated);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..32]);
    Ok(u64::from_be_bytes(buf) as usize)
}

/// Decodes one `Transfer` log. Logs that are removed, carry a different
/// topic, or have an unexpected shape are skipped with a debug trace, the
/// same way incompatible `Transfer` events are skipped upstream.
pub fn decode_transfer_log(log: &LogEntry) -> Option<TokenTransferEvent> {
    if log.removed {
        return None;
    }
    if log.topics.first().map(String::as_str) != Some(TRANSFER_EVENT_TOPIC) {
        return None;
    }
    if log.topics.len() != 3 {
        debug!(
            "skipping Transfer log of transaction {}: {} indexed values, expected 2",
            log.transaction_hash,
            log.topics.len().saturating_sub(1)
        );
        return None;
    }
    let from = match decode_address(&log.topics[1]) {
        Ok(from) => from,
        Err(e) => {
            debug!("skipping Transfer log of transaction {}: bad sender topic: {e}", log.transaction_hash);
            return None;
        }
    };
    let to = match decode_address(&log.topics[2]) {
        Ok(to) => to,
        Err(e) => {
            debug!("skipping Transfer log of transaction {}: bad recipient topic: {e}", log.transaction_hash);
            return None;
        }
    };
    let amount = match decode_uint(&log.data) {
        Ok(amount) => amount,
        Err(e) => {
            debug!("skipping Transfer log of transaction {}: bad amount payload: {e}", log.transaction_hash);
            return None;
        }
    };
    Some(TokenTransferEvent { from, to, amount, transaction_hash: log.transaction_hash.clone() })
}
