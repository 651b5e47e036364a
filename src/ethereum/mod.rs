//! Ethereum request context and the cache-aware fetch layer.

pub mod context;
pub mod fetcher;

pub use context::EthereumContext;
pub use fetcher::{CachedData, CachedEthereumFetcher, EthereumFetcher};
