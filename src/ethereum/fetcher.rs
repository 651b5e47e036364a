//! Cache-aware JSON-RPC fetching.
//!
//! Results are written to the user storage as `{data, time}` so that UIs
//! subscribed to the key see fresh values. Cache write failures never fail
//! the fetch.

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{EthereumMethod, RpcPreRequest};

use super::context::EthereumContext;

// ============================================================================
// Trait
// ============================================================================

/// Fetch layer for requests without dedicated handling.
#[async_trait]
pub trait EthereumFetcher: Send + Sync {
    /// Fetches `request` and refreshes its cache entry.
    async fn fetch(&self, context: &EthereumContext, request: &RpcPreRequest) -> Result<Value>;

    /// Re-publishes the cache entry of `request`, fetching if absent.
    async fn index(&self, context: &EthereumContext, request: &RpcPreRequest) -> Result<Value>;
}

// ============================================================================
// CachedEthereumFetcher
// ============================================================================

/// Stored cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData {
    /// Result returned by the node.
    pub data: Value,
    /// Milliseconds since the Unix epoch.
    pub time: u64,
}

/// Default fetcher: JSON-RPC over the wallet's brume, cached in user storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedEthereumFetcher;

impl CachedEthereumFetcher {
    /// Returns the cache key of `request` on `chain_id`.
    ///
    /// `eth_getBalance` gets `balance/<chain>/<address>/<block>`; any other
    /// method `ethereum/<chain>/<method>/<params>`.
    #[must_use]
    pub fn cache_key(chain_id: u64, request: &RpcPreRequest) -> String {
        if EthereumMethod::parse(&request.method) == Some(EthereumMethod::GetBalance)
            && let Ok((address, block)) = request.params_as::<(String, String)>()
        {
            return format!("balance/{chain_id}/{}/{block}", address.to_lowercase());
        }

        format!("ethereum/{chain_id}/{}/{}", request.method, request.params)
    }

    async fn store(&self, context: &EthereumContext, key: &str, data: &Value) {
        let entry = CachedData {
            data: data.clone(),
            time: now_millis(),
        };

        if let Err(e) = context.user.storage.set_as(key, &entry).await {
            warn!(%key, error = %e, "Could not cache fetch result");
        }
    }
}

#[async_trait]
impl EthereumFetcher for CachedEthereumFetcher {
    async fn fetch(&self, context: &EthereumContext, request: &RpcPreRequest) -> Result<Value> {
        let key = Self::cache_key(context.chain.chain_id, request);
        let data = context.brume.rpc(&context.chain, request).await?;

        self.store(context, &key, &data).await;
        debug!(%key, "Fetched");

        Ok(data)
    }

    async fn index(&self, context: &EthereumContext, request: &RpcPreRequest) -> Result<Value> {
        let key = Self::cache_key(context.chain.chain_id, request);

        match context.user.storage.get_as::<CachedData>(&key).await {
            Ok(Some(entry)) => {
                self.store(context, &key, &entry.data).await;
                Ok(entry.data)
            }
            Ok(None) => self.fetch(context, request).await,
            Err(e) => {
                debug!(%key, error = %e, "Unreadable cache entry, refetching");
                self.fetch(context, request).await
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ============================================================================
// Tests
// ============================================================================
