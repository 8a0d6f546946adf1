//! Maps chain ids to public transaction explorers and splits the composite
//! object id (decimal network id immediately followed by a `0x`-prefixed
//! transaction hash) that realizations carry.

use thiserror::Error;

const EXPLORER_BASES: &[(u64, &str)] = &[
    (1, "https://etherscan.io"),
    (137, "https://polygonscan.com"),
    (80002, "https://amoy.polygonscan.com"),
    (11155111, "https://sepolia.etherscan.io"),
];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ObjectIdError {
    #[error("object id carries no 0x-prefixed transaction hash")]
    MissingHashPrefix,
    #[error("object id network prefix is not a decimal chain id")]
    InvalidNetworkId,
}

/// A split object id: chain id plus the `0x`-prefixed transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRef<'a> {
    pub network_id: u64,
    pub transaction_hash: &'a str,
}

/// Splits a composite object id at the first `0x` occurrence. The prefix is
/// the decimal chain id, the suffix (including `0x`) is the transaction hash.
pub fn parse_object_id(object_id: &str) -> Result<TxRef<'_>, ObjectIdError> {
    let at = object_id.find("0x").ok_or(ObjectIdError::MissingHashPrefix)?;
    let network_id = object_id[..at].parse::<u64>().map_err(|_| ObjectIdError::InvalidNetworkId)?;
    Ok(TxRef { network_id, transaction_hash: &object_id[at..] })
}

/// Inverse of [`parse_object_id`].
pub fn format_object_id(network_id: u64, transaction_hash: &str) -> String {
    format!("{network_id}{transaction_hash}")
}

/// Explorer URL for a transaction, or `None` when the chain id has no
/// configured explorer.
pub fn explorer_tx_url(network_id: u64, transaction_hash: &str) -> Option<String> {
    EXPLORER_BASES.iter().find(|(id, _)| *id == network_id).map(|(_, base)| format!("{base}/tx/{transaction_hash}"))
}
