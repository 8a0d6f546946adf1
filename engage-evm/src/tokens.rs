//! Short-lived ERC-20 metadata cache so validation passes do not re-issue
//! the four metadata calls for every transfer.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::model::Erc20Token;
use crate::rpc::{ChainReader, RpcError};

pub struct TokenMetadataCache {
    inner: Option<Mutex<LruCache<(String, String), Erc20Token>>>,
}

impl TokenMetadataCache {
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Capacity 0 disables caching entirely.
    pub fn with_capacity(capacity: usize) -> Self {
        let inner = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { inner }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub async fn get_or_fetch<C: ChainReader>(&self, reader: &C, network: &str, contract: &str) -> Result<Erc20Token, RpcError> {
        let key = (network.to_string(), contract.to_ascii_lowercase());
        if let Some(cache) = &self.inner {
            if let Ok(mut guard) = cache.lock() {
                if let Some(token) = guard.get(&key) {
                    return Ok(token.clone());
                }
            }
        }
        // Fetch without holding the lock
        let token = reader.erc20_token(network, contract).await?;
        if let Some(cache) = &self.inner {
            if let Ok(mut guard) = cache.lock() {
                guard.put(key, token.clone());
            }
        }
        Ok(token)
    }
}

impl Default for TokenMetadataCache {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}
