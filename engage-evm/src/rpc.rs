//! JSON-RPC access to the configured EVM networks, plus the `ChainReader`
//! seam the scanner runs against so tests can substitute an in-process
//! chain.

use std::collections::HashMap;
use std::future::Future;

use itertools::Itertools;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::abi::{self, AbiError, LogEntry};
use crate::model::{BlockchainNetwork, Erc20Token, TokenTransferEvent};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("malformed rpc response")]
    Malformed,
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error("network {0} is not configured")]
    UnknownNetwork(String),
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// One JSON-RPC endpoint, typically one per configured network.
pub struct JsonRpcEndpoint {
    url: String,
    client: reqwest::Client,
}

impl JsonRpcEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), client: reqwest::Client::new() }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        debug!("rpc {method} -> {}", self.url);
        let response: RpcResponse = self.client.post(&self.url).json(&body).send().await?.json().await?;
        if let Some(err) = response.error {
            return Err(RpcError::Node { code: err.code, message: err.message });
        }
        response.result.ok_or(RpcError::Malformed)
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(result.as_str().ok_or(RpcError::Malformed)?)
    }

    pub async fn net_version(&self) -> Result<u64, RpcError> {
        let result = self.call("net_version", json!([])).await?;
        result.as_str().and_then(|v| v.parse().ok()).ok_or(RpcError::Malformed)
    }

    /// `Transfer` logs emitted by a contract over an inclusive block range.
    pub async fn transfer_logs(&self, contract: &str, from_block: u64, to_block: u64) -> Result<Vec<LogEntry>, RpcError> {
        let filter = json!({
            "fromBlock": format_quantity(from_block),
            "toBlock": format_quantity(to_block),
            "address": contract,
            "topics": [abi::TRANSFER_EVENT_TOPIC],
        });
        let result = self.call("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result).map_err(|_| RpcError::Malformed)
    }

    pub async fn eth_call(&self, to: &str, data: &str) -> Result<String, RpcError> {
        let call = json!({ "to": to, "data": data });
        let result = self.call("eth_call", json!([call, "latest"])).await?;
        result.as_str().map(str::to_string).ok_or(RpcError::Malformed)
    }

    pub async fn erc20_name(&self, contract: &str) -> Result<String, RpcError> {
        Ok(abi::decode_string(&self.eth_call(contract, abi::SELECTOR_NAME).await?)?)
    }

    pub async fn erc20_symbol(&self, contract: &str) -> Result<String, RpcError> {
        Ok(abi::decode_string(&self.eth_call(contract, abi::SELECTOR_SYMBOL).await?)?)
    }

    pub async fn erc20_decimals(&self, contract: &str) -> Result<u8, RpcError> {
        let raw = abi::decode_uint(&self.eth_call(contract, abi::SELECTOR_DECIMALS).await?)?;
        Ok(u8::try_from(raw).unwrap_or(u8::MAX))
    }

    pub async fn erc20_total_supply(&self, contract: &str) -> Result<u128, RpcError> {
        Ok(abi::decode_uint(&self.eth_call(contract, abi::SELECTOR_TOTAL_SUPPLY).await?)?)
    }

    pub async fn erc20_balance_of(&self, contract: &str, holder: &str) -> Result<u128, RpcError> {
        let data = abi::encode_balance_of(holder)?;
        Ok(abi::decode_uint(&self.eth_call(contract, &data).await?)?)
    }
}

/// Hex quantity (`0x1f`) to integer.
pub fn parse_quantity(quantity: &str) -> Result<u64, RpcError> {
    let hex = quantity.trim_start_matches("0x");
    if hex.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(hex, 16).map_err(|_| RpcError::Malformed)
}

pub fn format_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Read access to the watched EVM networks. Implemented over JSON-RPC in
/// production and by in-process mocks in tests.
pub trait ChainReader: Send + Sync {
    fn last_block(&self, network: &str) -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn transfer_events(
        &self,
        network: &str,
        contract: &str,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<TokenTransferEvent>, RpcError>> + Send;

    fn erc20_token(&self, network: &str, contract: &str) -> impl Future<Output = Result<Erc20Token, RpcError>> + Send;

    fn erc20_balance_of(
        &self,
        network: &str,
        contract: &str,
        holder: &str,
    ) -> impl Future<Output = Result<u128, RpcError>> + Send;
}

/// `ChainReader` over one JSON-RPC endpoint per configured network.
pub struct RpcChainReader {
    endpoints: HashMap<String, JsonRpcEndpoint>,
}

impl RpcChainReader {
    pub fn new(networks: &[BlockchainNetwork]) -> Self {
        let endpoints =
            networks.iter().map(|network| (network.name.clone(), JsonRpcEndpoint::new(network.provider_url.clone()))).collect();
        Self { endpoints }
    }

    fn endpoint(&self, network: &str) -> Result<&JsonRpcEndpoint, RpcError> {
        self.endpoints.get(network).ok_or_else(|| RpcError::UnknownNetwork(network.to_string()))
    }
}

impl ChainReader for RpcChainReader {
    async fn last_block(&self, network: &str) -> Result<u64, RpcError> {
        self.endpoint(network)?.block_number().await
    }

    async fn transfer_events(
        &self,
        network: &str,
        contract: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TokenTransferEvent>, RpcError> {
        let logs = self.endpoint(network)?.transfer_logs(contract, from_block, to_block).await?;
        // Keep first-seen order while dropping duplicate events
        Ok(logs.iter().filter_map(abi::decode_transfer_log).unique().collect())
    }

    async fn erc20_token(&self, network: &str, contract: &str) -> Result<Erc20Token, RpcError> {
        let endpoint = self.endpoint(network)?;
        let name = endpoint.erc20_name(contract).await?;
        let symbol = endpoint.erc20_symbol(contract).await?;
        let decimals = endpoint.erc20_decimals(contract).await?;
        let total_supply = endpoint.erc20_total_supply(contract).await?;
        Ok(Erc20Token { name, symbol, decimals, total_supply })
    }

    async fn erc20_balance_of(&self, network: &str, contract: &str, holder: &str) -> Result<u128, RpcError> {
        self.endpoint(network)?.erc20_balance_of(contract, holder).await
    }
}
