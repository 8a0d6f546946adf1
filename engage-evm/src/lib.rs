//! EVM token-transfer connector for engagement gamification.
//!
//! Watches ERC-20 `Transfer` logs on configured EVM networks, stores them,
//! turns them into gamification triggers, and provides the engagement-center
//! action extension that derives public explorer links for realizations.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod abi;
pub mod engine;
pub mod explorer;
pub mod extension;
pub mod model;
pub mod plugin;
pub mod rpc;
pub mod scan;
pub mod storage;
pub mod tokens;
pub mod triggers;

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
