//! Circuit bundles ("brumes").
//!
//! An [`EthBrume`] is handed to one wallet for the lifetime of the process
//! and carries that wallet's JSON-RPC traffic. A [`RelayBundle`] pairs one
//! circuit with the authentication key of one relay session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::entities::EthereumChain;
use crate::error::{Error, Result};
use crate::identifiers::BrumeId;
use crate::pool::{Pool, PoolOptions};
use crate::protocol::{RpcError, RpcPreRequest};
use crate::relay::{AuthKey, RelayProtocol};

use super::core::{CircuitPool, HttpRequest, SharedCircuit};

// ============================================================================
// Constants
// ============================================================================

/// Attempts per JSON-RPC call before giving up.
const MAX_RPC_ATTEMPTS: usize = 3;

// ============================================================================
// EthBrume
// ============================================================================

/// Per-wallet bundle of circuits for Ethereum JSON-RPC.
///
/// Cloning shares the bundle. The bundle is chain-agnostic: the chain is
/// chosen per call.
#[derive(Clone)]
pub struct EthBrume {
    id: BrumeId,
    circuits: CircuitPool,
    counter: Arc<AtomicU64>,
}

impl fmt::Debug for EthBrume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthBrume")
            .field("id", &self.id)
            .field("circuits", &self.circuits.capacity())
            .finish()
    }
}

#[derive(Deserialize)]
struct JsonRpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl EthBrume {
    /// Builds a bundle whose `size` circuits are taken from `circuits`.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(circuits: &CircuitPool, size: usize, options: PoolOptions) -> Self {
        let source = circuits.clone();
        let own = Pool::with_options(size.max(1), options, move |_params| {
            let source = source.clone();
            async move { Ok(source.take().await?.into_inner()) }
        });

        Self {
            id: BrumeId::generate(),
            circuits: own,
            counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the bundle id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> BrumeId {
        self.id
    }

    /// Sends a JSON-RPC request to `chain`.
    ///
    /// Each attempt uses a random circuit of the bundle; a circuit that fails
    /// at transport level is restarted and another one is tried.
    ///
    /// # Errors
    ///
    /// - The node's JSON-RPC error, converted with [`Error::from`]
    /// - [`Error::CircuitUnavailable`] once every attempt failed
    pub async fn rpc(&self, chain: &EthereumChain, request: &RpcPreRequest) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.counter.fetch_add(1, Ordering::Relaxed),
            "method": request.method,
            "params": request.params,
        });

        let mut last_error = None;

        for attempt in 0..MAX_RPC_ATTEMPTS {
            let index = rand::thread_rng().gen_range(0..self.circuits.capacity());
            let circuit = self.circuits.get(index).await?;

            let reply = match self.exchange(&circuit, &chain.url, &body).await {
                Ok(reply) => reply,
                Err(e) if e.is_transient() => {
                    warn!(brume = %self.id, attempt, circuit = circuit.id(), error = %e, "RPC over circuit failed");
                    self.circuits.restart(index);
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(error) = reply.error {
                return Err(Error::from(error));
            }

            debug!(brume = %self.id, method = %request.method, chain = chain.chain_id, "RPC completed");
            return Ok(reply.result.unwrap_or(Value::Null));
        }

        Err(last_error.unwrap_or_else(|| Error::circuit("no attempt made")))
    }

    async fn exchange(&self, circuit: &SharedCircuit, url: &str, body: &Value) -> Result<JsonRpcReply> {
        let request = HttpRequest::post_json(url, body)?;
        let response = circuit.fetch(request).await?.error_for_status()?;
        response
            .json()
            .map_err(|e| Error::circuit(format!("malformed RPC reply: {e}")))
    }
}

/// Creates the pool of per-wallet bundles.
#[must_use]
pub fn create_eth_brume_pool(
    circuits: &CircuitPool,
    capacity: usize,
    circuits_per_brume: usize,
    options: PoolOptions,
) -> Pool<EthBrume> {
    let circuits = circuits.clone();
    Pool::with_options(capacity, options, move |_params| {
        let circuits = circuits.clone();
        async move { Ok(EthBrume::new(&circuits, circuits_per_brume, options)) }
    })
}

// ============================================================================
// RelayBundle
// ============================================================================

/// One circuit plus the authentication key used on the relay.
#[derive(Clone)]
pub struct RelayBundle {
    /// Bundle id.
    pub id: BrumeId,
    /// Circuit reaching the relay.
    pub circuit: SharedCircuit,
    /// Local authentication key.
    pub auth_key: AuthKey,
}

impl fmt::Debug for RelayBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayBundle")
            .field("id", &self.id)
            .field("circuit", &self.circuit.id())
            .field("auth_key", &self.auth_key)
            .finish()
    }
}

impl RelayBundle {
    /// Builds a bundle around an existing key, taking a fresh circuit.
    pub async fn with_auth_key(circuits: &CircuitPool, auth_key: AuthKey) -> Result<Self> {
        let circuit = circuits.take().await?.into_inner();
        Ok(Self {
            id: BrumeId::generate(),
            circuit,
            auth_key,
        })
    }
}

/// Creates the pool of relay bundles, each with a fresh key.
#[must_use]
pub fn create_relay_bundle_pool(
    circuits: &CircuitPool,
    protocol: Arc<dyn RelayProtocol>,
    capacity: usize,
    options: PoolOptions,
) -> Pool<RelayBundle> {
    let circuits = circuits.clone();
    Pool::with_options(capacity, options, move |_params| {
        let circuits = circuits.clone();
        let protocol = Arc::clone(&protocol);
        async move {
            let auth_key = protocol.generate_auth_key().await?;
            RelayBundle::with_auth_key(&circuits, auth_key).await
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::circuit::create_circuit_pool;
    use crate::entities::ChainTable;
    use crate::testing::{FakeCircuitFactory, FakeRelayProtocol};

    fn mainnet() -> EthereumChain {
        ChainTable::default().resolve(1).expect("mainnet").clone()
    }

    #[tokio::test]
    async fn test_rpc_returns_result() {
        let factory = Arc::new(FakeCircuitFactory::new());
        factory.respond("eth_chainId", json!("0x1"));
        let circuits = create_circuit_pool(factory, 2, PoolOptions::default());

        let brume = EthBrume::new(&circuits, 1, PoolOptions::default());
        let value = brume
            .rpc(&mainnet(), &RpcPreRequest::new("eth_chainId", json!([])))
            .await
            .expect("rpc");

        assert_eq!(value, json!("0x1"));
    }

    #[tokio::test]
    async fn test_rpc_node_error_is_not_retried() {
        let factory = Arc::new(FakeCircuitFactory::new());
        let circuits = create_circuit_pool(factory.clone(), 2, PoolOptions::default());

        let brume = EthBrume::new(&circuits, 1, PoolOptions::default());
        let err = brume
            .rpc(&mainnet(), &RpcPreRequest::new("eth_unknown", json!([])))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rpc_retries_failing_circuit() {
        let factory = Arc::new(FakeCircuitFactory::new());
        factory.respond("eth_blockNumber", json!("0x10"));
        factory.fail_next_fetches(1);
        let circuits = create_circuit_pool(factory, 3, PoolOptions::default());

        let brume = EthBrume::new(&circuits, 1, PoolOptions::default());
        let value = brume
            .rpc(&mainnet(), &RpcPreRequest::new("eth_blockNumber", json!([])))
            .await
            .expect("rpc after retry");

        assert_eq!(value, json!("0x10"));
    }

    #[tokio::test]
    async fn test_relay_bundle_pool() {
        let factory = Arc::new(FakeCircuitFactory::new());
        let circuits = create_circuit_pool(factory, 2, PoolOptions::default());
        let protocol = Arc::new(FakeRelayProtocol::new());

        let bundles = create_relay_bundle_pool(&circuits, protocol, 1, PoolOptions::default());
        let bundle = bundles.take().await.expect("bundle").into_inner();

        assert!(!bundle.auth_key.public_x().is_empty());
    }
}
