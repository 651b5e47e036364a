//! Router for content-script ports.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::ethereum::EthereumContext;
use crate::platform::Mouse;
use crate::protocol::{ContentMethod, EthereumMethod, RpcPreRequest, RpcRequest};
use crate::transport::{Port, RequestRouter};

use super::core::{Orchestrator, load_wallet};

// ============================================================================
// ContentRouter
// ============================================================================

/// Handles `brume_run(subrequest, mouse)` from a content script.
pub(super) struct ContentRouter {
    orchestrator: Orchestrator,
}

impl ContentRouter {
    pub(super) fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl RequestRouter for ContentRouter {
    async fn route(&self, port: &Port, request: &RpcRequest) -> Option<Result<Value>> {
        match ContentMethod::parse(&request.method)? {
            ContentMethod::Run => Some(self.run(port, request).await),
        }
    }
}

impl ContentRouter {
    async fn run(&self, script: &Port, request: &RpcRequest) -> Result<Value> {
        let (subrequest, mouse): (RpcPreRequest, Mouse) = request.params_as()?;
        let orchestrator = &self.orchestrator;

        let session = orchestrator.resolve_session(script, mouse).await?;
        let user = orchestrator.inner.state.require_user()?;

        let wallet = load_wallet(&user, session.first_wallet()?.uuid).await?;
        let brume = orchestrator.eth_brume(wallet.uuid).await?;

        let context = EthereumContext {
            user,
            chain: session.chain.clone(),
            session: Some(session),
            wallet,
            brume,
        };

        debug!(method = %subrequest.method, origin = ?context.origin(), "Running");

        let mouse = Some(mouse);
        match EthereumMethod::parse(&subrequest.method) {
            Some(EthereumMethod::RequestAccounts | EthereumMethod::Accounts) => {
                orchestrator.accounts(&context).await
            }
            Some(EthereumMethod::SendTransaction) => {
                orchestrator.send_transaction(&context, &subrequest, mouse).await
            }
            Some(EthereumMethod::PersonalSign) => {
                orchestrator.personal_sign(&context, &subrequest, mouse).await
            }
            Some(EthereumMethod::SignTypedDataV4) => {
                orchestrator.sign_typed_data(&context, &subrequest, mouse).await
            }
            Some(EthereumMethod::SwitchEthereumChain) => {
                orchestrator.switch_chain(&context, &subrequest, mouse).await
            }
            Some(EthereumMethod::GetBalance) | None => {
                orchestrator.inner.fetcher.fetch(&context, &subrequest).await
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::entities::Session;
    use crate::error::Error;
    use crate::store::keys;
    use crate::testing::{FakePeer, TestBed, script_pair};
    use crate::transport::{PortAcceptor, PortKind};

    const DAPP: &str = "https://dapp.example";

    async fn seeded(bed: &TestBed) -> (Orchestrator, Port, FakePeer, String) {
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;

        let user = orchestrator.inner.state.require_user().expect("user");
        let session = Session::direct(DAPP, true, wallet.wallet_ref(), bed.mainnet());
        user.storage
            .set_as(&keys::session(session.id), &session)
            .await
            .expect("seed");

        let (script, page) = script_pair(DAPP);
        orchestrator.accept(script.clone());
        (orchestrator, script, page, wallet.address)
    }

    #[tokio::test]
    async fn test_run_accounts() {
        let bed = TestBed::new();
        let (_orchestrator, _script, page, address) = seeded(&bed).await;

        let accounts = page
            .run(RpcPreRequest::new("eth_accounts", json!([])))
            .await
            .expect("accounts");
        assert_eq!(accounts, json!([address]));
    }

    #[tokio::test]
    async fn test_run_unknown_method_uses_fetcher() {
        let bed = TestBed::new();
        bed.circuits.respond("eth_blockNumber", json!("0x42"));
        let (_orchestrator, _script, page, _) = seeded(&bed).await;

        let block = page
            .run(RpcPreRequest::new("eth_blockNumber", json!([])))
            .await
            .expect("block");
        assert_eq!(block, json!("0x42"));
    }

    #[tokio::test]
    async fn test_node_error_reaches_page() {
        let bed = TestBed::new();
        let (_orchestrator, _script, page, _) = seeded(&bed).await;

        let err = page
            .run(RpcPreRequest::new("eth_doesNotExist", json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn test_other_methods_not_handled() {
        let bed = TestBed::new();
        let orchestrator = bed.orchestrator();
        let router = ContentRouter::new(orchestrator);
        let (port, _peer) = Port::pair(PortKind::Background, PortKind::Script);

        let request = RpcRequest::new("brume_login", json!([]));
        assert!(router.route(&port, &request).await.is_none());
    }
}
