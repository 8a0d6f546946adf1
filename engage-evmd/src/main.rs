mod api;
mod config;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc::channel, Arc};
use tower_http::cors::{Any, CorsLayer};

use engage_evm::engine::{RealizationRecorder, TriggerEngine};
use engage_evm::extension::{register_user_actions, ExtensionRegistry};
use engage_evm::model::WatchRule;
use engage_evm::rpc::RpcChainReader;
use engage_evm::scan;
use engage_evm::storage;
use engage_evm::tokens::TokenMetadataCache;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = config::Config::load()?;

    let store = storage::new_store(config.db_path.as_deref())?;

    // Seed watch rules from disk when provided
    if let Some(path) = &config.rules_file {
        let raw = std::fs::read_to_string(path)?;
        let rules: Vec<WatchRule> = serde_json::from_str(&raw)?;
        log::info!("seeding {} watch rules from {path}", rules.len());
        for mut rule in rules {
            rule.contract_address = rule.contract_address.to_ascii_lowercase();
            store.upsert_rule(rule)?;
        }
    }

    let mut registry = ExtensionRegistry::new();
    register_user_actions(&mut registry);
    let registry = Arc::new(registry);

    let reader = Arc::new(RpcChainReader::new(&config.networks));
    let tokens = Arc::new(TokenMetadataCache::with_capacity(config.token_cache_capacity));

    // Trigger engine consumes scanner output on its own thread
    let (sender, receiver) = channel();
    let engine_store = store.clone();
    std::thread::spawn(move || {
        let mut engine = TriggerEngine::new(receiver, engine_store.clone());
        engine.start(vec![RealizationRecorder::new(engine_store)]);
    });

    // Scanner with graceful shutdown support
    let exit_signal = Arc::new(AtomicBool::new(false));
    {
        let reader = reader.clone();
        let store = store.clone();
        let tokens = tokens.clone();
        let exit_signal = exit_signal.clone();
        let interval = config.scan_interval;
        tokio::spawn(async move {
            scan::run_scanner(reader, store, tokens, sender, interval, exit_signal).await;
        });
    }

    // HTTP API
    let state = api::AppState {
        store,
        registry,
        reader,
        tokens,
        networks: Arc::new(config.networks.clone()),
    };
    let cors = build_cors_from_env();
    let app = Router::new()
        .route("/engage/health", get(api::health))
        .route("/engage/metrics", get(api::metrics))
        .route("/engage/networks", get(api::networks))
        .route("/engage/rules", get(api::rules).post(api::save_rule))
        .route("/engage/wallets", post(api::save_wallet))
        .route("/engage/transactions/recent", get(api::recent_transactions))
        .route("/engage/realizations/recent", get(api::recent_realizations))
        .route("/engage/actions/link", post(api::action_link))
        .route("/engage/tokens/{network}/{address}", get(api::token_details))
        .with_state(state)
        .layer(cors);

    let addr: SocketAddr = config.bind.parse()?;
    println!("engage-evmd on http://{addr}/");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        exit_signal.store(true, Ordering::Relaxed);
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

fn build_cors_from_env() -> CorsLayer {
    if let Ok(origins) = std::env::var("ENGAGE_CORS_ORIGINS") {
        let list = origins.split(',').filter_map(|s| HeaderValue::from_str(s.trim()).ok()).collect::<Vec<_>>();
        if !list.is_empty() {
            return CorsLayer::new().allow_origin(list).allow_methods(tower_http::cors::AllowMethods::any()).allow_headers(Any);
        }
    }
    CorsLayer::new().allow_origin(Any).allow_methods(tower_http::cors::AllowMethods::any()).allow_headers(Any)
}
