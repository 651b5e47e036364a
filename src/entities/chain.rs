//! Ethereum chains known to the wallet.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// EthereumChain
// ============================================================================

/// One EVM chain and the RPC endpoint used to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumChain {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Display name.
    pub name: String,
    /// JSON-RPC endpoint.
    pub url: String,
}

impl EthereumChain {
    /// Creates a chain entry.
    #[must_use]
    pub fn new(chain_id: u64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            url: url.into(),
        }
    }

    /// Returns the chain id as `0x`-prefixed hex.
    #[must_use]
    pub fn hex_id(&self) -> String {
        format!("{:#x}", self.chain_id)
    }
}

// ============================================================================
// ChainTable
// ============================================================================

/// Lookup table from chain id to chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTable {
    chains: FxHashMap<u64, EthereumChain>,
}

impl ChainTable {
    /// Creates a table from a list of chains.
    #[must_use]
    pub fn new(chains: impl IntoIterator<Item = EthereumChain>) -> Self {
        Self {
            chains: chains.into_iter().map(|c| (c.chain_id, c)).collect(),
        }
    }

    /// Returns the chain for `chain_id`.
    #[inline]
    #[must_use]
    pub fn get(&self, chain_id: u64) -> Option<&EthereumChain> {
        self.chains.get(&chain_id)
    }

    /// Returns the chain for `chain_id` or [`Error::UnknownChain`].
    pub fn resolve(&self, chain_id: u64) -> Result<&EthereumChain> {
        self.get(chain_id)
            .ok_or_else(|| Error::unknown_chain(chain_id))
    }

    /// Resolves a `0x`-prefixed hex chain id.
    pub fn resolve_hex(&self, hex: &str) -> Result<&EthereumChain> {
        let digits = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .ok_or_else(|| Error::invalid_params(format!("chain id is not hex: {hex}")))?;

        let chain_id = u64::from_str_radix(digits, 16)
            .map_err(|e| Error::invalid_params(format!("chain id {hex}: {e}")))?;

        self.resolve(chain_id)
    }

    /// Resolves a CAIP-2 `eip155:<id>` chain reference.
    pub fn resolve_caip2(&self, reference: &str) -> Result<&EthereumChain> {
        let chain_id = reference
            .strip_prefix("eip155:")
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| Error::invalid_params(format!("chain reference {reference}")))?;

        self.resolve(chain_id)
    }

    /// Returns the number of known chains.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Returns `true` if no chain is known.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl Default for ChainTable {
    fn default() -> Self {
        Self::new([
            EthereumChain::new(1, "Ethereum", "https://rpc.ankr.com/eth"),
            EthereumChain::new(5, "Goerli", "https://rpc.ankr.com/eth_goerli"),
            EthereumChain::new(11155111, "Sepolia", "https://rpc.ankr.com/eth_sepolia"),
        ])
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = ChainTable::default();
        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve(1).expect("mainnet").name, "Ethereum");
    }

    #[test]
    fn test_unknown_chain() {
        let table = ChainTable::default();
        let err = table.resolve(424242).unwrap_err();
        assert!(matches!(err, Error::UnknownChain { chain_id: 424242 }));
    }

    #[test]
    fn test_resolve_hex_and_caip2() {
        let table = ChainTable::default();
        assert_eq!(table.resolve_hex("0x5").expect("goerli").chain_id, 5);
        assert_eq!(table.resolve_caip2("eip155:1").expect("mainnet").chain_id, 1);
        assert!(table.resolve_hex("5").is_err());
        assert!(table.resolve_caip2("cosmos:1").is_err());
    }

    #[test]
    fn test_hex_id() {
        assert_eq!(ChainTable::default().resolve(5).expect("goerli").hex_id(), "0x5");
    }

    #[test]
    fn test_serde_camel_case() {
        let chain = EthereumChain::new(1, "Ethereum", "https://rpc");
        let json = serde_json::to_value(&chain).expect("serialize");
        assert_eq!(json["chainId"], 1);
    }
}
