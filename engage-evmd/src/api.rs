use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use engage_evm::extension::{ExtensionRegistry, ENGAGEMENT_CENTER_ACTIONS};
use engage_evm::model::{BlockchainNetwork, Erc20Token, EvmTransaction, Realization, WatchRule};
use engage_evm::rpc::RpcChainReader;
use engage_evm::storage::Store;
use engage_evm::tokens::TokenMetadataCache;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub registry: Arc<ExtensionRegistry>,
    pub reader: Arc<RpcChainReader>,
    pub tokens: Arc<TokenMetadataCache>,
    pub networks: Arc<Vec<BlockchainNetwork>>,
}

pub async fn health() -> &'static str {
    "ok"
}

// Simple metrics for observability
#[derive(Serialize)]
pub struct MetricsResp {
    pub transactions: usize,
    pub realizations: usize,
    pub rules: usize,
    pub wallets: usize,
}

pub async fn metrics(State(state): State<AppState>) -> Result<Json<MetricsResp>, StatusCode> {
    let s = state.store.stats().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(MetricsResp { transactions: s.transactions, realizations: s.realizations, rules: s.rules, wallets: s.wallets }))
}

pub async fn networks(State(state): State<AppState>) -> Json<Vec<BlockchainNetwork>> {
    Json(state.networks.as_ref().clone())
}

pub async fn rules(State(state): State<AppState>) -> Result<Json<Vec<WatchRule>>, StatusCode> {
    state.store.rules().map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn save_rule(State(state): State<AppState>, Json(mut rule): Json<WatchRule>) -> Result<StatusCode, StatusCode> {
    if rule.contract_address.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !state.networks.iter().any(|n| n.name == rule.blockchain_network && n.network_id == rule.network_id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    rule.contract_address = rule.contract_address.to_ascii_lowercase();
    state.store.upsert_rule(rule).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBinding {
    pub wallet_address: String,
    pub earner: String,
}

pub async fn save_wallet(State(state): State<AppState>, Json(binding): Json<WalletBinding>) -> Result<StatusCode, StatusCode> {
    if binding.wallet_address.is_empty() || binding.earner.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    state.store.upsert_wallet(&binding.wallet_address, &binding.earner).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub async fn recent_transactions(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<Vec<EvmTransaction>>, StatusCode> {
    let limit = q.limit.unwrap_or(50).min(500);
    state.store.recent_transactions(limit).map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn recent_realizations(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<Vec<Realization>>, StatusCode> {
    let limit = q.limit.unwrap_or(50).min(500);
    let mut rows = state.store.recent_realizations(limit).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    // Links are derived on the way out, never stored
    for row in rows.iter_mut() {
        let label = row.action_label.clone();
        state.registry.resolve_action_link(ENGAGEMENT_CENTER_ACTIONS, &label, row);
    }
    Ok(Json(rows))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub action_label: String,
    pub realization: Realization,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResp {
    pub link: Option<String>,
    pub realization: Realization,
}

/// Host-style dispatch: picks the matching action extension and returns both
/// the resolved link and the (possibly mutated) realization.
pub async fn action_link(State(state): State<AppState>, Json(req): Json<LinkRequest>) -> Json<LinkResp> {
    let mut realization = req.realization;
    let link = state.registry.resolve_action_link(ENGAGEMENT_CENTER_ACTIONS, &req.action_label, &mut realization);
    Json(LinkResp { link, realization })
}

pub async fn token_details(
    State(state): State<AppState>,
    Path((network, address)): Path<(String, String)>,
) -> Result<Json<Erc20Token>, StatusCode> {
    if !state.networks.iter().any(|n| n.name == network) {
        return Err(StatusCode::NOT_FOUND);
    }
    let token = state
        .tokens
        .get_or_fetch(state.reader.as_ref(), &network, &address)
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;
    // Contracts answering with no name and no symbol are not ERC-20 tokens
    if token.name.is_empty() && token.symbol.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(token))
}
