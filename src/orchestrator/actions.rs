//! Wallet actions: accounts, signatures, transactions and chain switches.
//!
//! Every action except account listing goes through the approval
//! correlator; `mouse` decides whether the popup is shown (content scripts)
//! or the request only waits in the queue (relay sessions).

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::entities::{AppRequest, Session};
use crate::error::{Error, Result};
use crate::ethereum::EthereumContext;
use crate::platform::Mouse;
use crate::protocol::{Notification, RpcPreRequest};
use crate::store::keys;

use super::core::{Orchestrator, load_wallet};

// ============================================================================
// Params
// ============================================================================

#[derive(Debug, Deserialize)]
struct TransactionParams {
    from: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    gas: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchChainParams {
    chain_id: String,
}

// ============================================================================
// Actions
// ============================================================================

impl Orchestrator {
    /// `eth_requestAccounts` / `eth_accounts`: addresses of the session wallets.
    pub(super) async fn accounts(&self, context: &EthereumContext) -> Result<Value> {
        let session = session_of(context)?;

        let mut addresses = Vec::with_capacity(session.wallets.len());
        for wallet in &session.wallets {
            addresses.push(load_wallet(&context.user, wallet.uuid).await?.address);
        }

        Ok(json!(addresses))
    }

    /// `eth_sendTransaction`: approval returns the signed transaction, which
    /// is broadcast over the wallet's brume.
    pub(super) async fn send_transaction(
        &self,
        context: &EthereumContext,
        request: &RpcPreRequest,
        mouse: Option<Mouse>,
    ) -> Result<Value> {
        let (tx,): (TransactionParams,) = request.params_as()?;
        let session = session_of(context)?;

        let approval = approval(
            session,
            "eth_sendTransaction",
            json!({
                "from": tx.from,
                "to": tx.to,
                "gas": tx.gas,
                "value": tx.value,
                "data": tx.data,
                "chainId": context.chain.chain_id.to_string(),
            }),
        );
        let signed = self.inner.correlator.request(approval, mouse).await?;

        let broadcast = RpcPreRequest::new("eth_sendRawTransaction", json!([signed]));
        let hash = context.brume.rpc(&context.chain, &broadcast).await?;

        info!(session_id = %session.id, chain = context.chain.chain_id, "Transaction sent");
        Ok(hash)
    }

    /// `personal_sign(message, address)`.
    pub(super) async fn personal_sign(
        &self,
        context: &EthereumContext,
        request: &RpcPreRequest,
        mouse: Option<Mouse>,
    ) -> Result<Value> {
        let (message, address): (String, String) = request.params_as()?;
        let session = session_of(context)?;

        let approval = approval(
            session,
            "personal_sign",
            json!({ "message": message, "address": address }),
        );
        self.inner.correlator.request(approval, mouse).await
    }

    /// `eth_signTypedData_v4(address, data)`.
    pub(super) async fn sign_typed_data(
        &self,
        context: &EthereumContext,
        request: &RpcPreRequest,
        mouse: Option<Mouse>,
    ) -> Result<Value> {
        let (address, data): (String, Value) = request.params_as()?;
        let session = session_of(context)?;

        // The UI expects the typed data as a JSON string.
        let data = match data {
            Value::String(text) => text,
            other => other.to_string(),
        };

        let approval = approval(
            session,
            "eth_signTypedData_v4",
            json!({ "data": data, "address": address }),
        );
        self.inner.correlator.request(approval, mouse).await
    }

    /// `wallet_switchEthereumChain([{chainId}])`.
    ///
    /// Updates the session chain and notifies every attached script.
    pub(super) async fn switch_chain(
        &self,
        context: &EthereumContext,
        request: &RpcPreRequest,
        mouse: Option<Mouse>,
    ) -> Result<Value> {
        let (params,): (SwitchChainParams,) = request.params_as()?;
        let session = session_of(context)?;
        let chain = self.inner.chains.resolve_hex(&params.chain_id)?.clone();

        let approval = approval(
            session,
            "wallet_switchEthereumChain",
            json!({ "chainId": params.chain_id }),
        );
        self.inner.correlator.request(approval, mouse).await?;

        let hex_id = chain.hex_id();
        let chain_id = chain.chain_id;

        context
            .user
            .storage
            .mutate::<Session, _>(&keys::session(session.id), move |current| {
                current.map(|mut session| {
                    session.chain = chain;
                    session
                })
            })
            .await?
            .ok_or_else(|| Error::missing(format!("session {}", session.id)))?;

        let scripts = self.inner.registry.scripts(session.id).await;
        for script in &scripts {
            script.notify(Notification::ChainChanged(hex_id.clone()));
        }

        info!(session_id = %session.id, chain = chain_id, scripts = scripts.len(), "Chain switched");
        Ok(Value::Null)
    }
}

fn session_of(context: &EthereumContext) -> Result<&Session> {
    context
        .session
        .as_ref()
        .ok_or_else(|| Error::missing("session"))
}

fn approval(session: &Session, method: &str, params: Value) -> AppRequest {
    debug!(session_id = %session.id, %method, "Approval requested");
    AppRequest::new(session.origin.clone(), method, params).with_session(session.id)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::TestBed;

    #[tokio::test]
    async fn test_accounts_lists_session_wallets() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let (context, wallet) = bed.session_context(&orchestrator, "https://dapp.example").await;

        let accounts = orchestrator.accounts(&context).await.expect("accounts");
        assert_eq!(accounts, json!([wallet.address]));
    }

    #[tokio::test]
    async fn test_accounts_without_session() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let (mut context, _) = bed.session_context(&orchestrator, "https://dapp.example").await;
        context.session = None;

        let err = orchestrator.accounts(&context).await.unwrap_err();
        assert!(err.is_missing_precondition());
    }

    #[tokio::test]
    async fn test_personal_sign_request_shape() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let (context, _) = bed.session_context(&orchestrator, "wc://pairing").await;
        let request = RpcPreRequest::new("personal_sign", json!(["0x68656c6c6f", "0xabc"]));

        let approver = bed.approve_next(&orchestrator, json!("0xsig"));
        let (signature, approval): (Result<Value>, AppRequest) = tokio::join!(
            orchestrator.personal_sign(&context, &request, None),
            approver
        );

        assert_eq!(signature.expect("signature"), json!("0xsig"));
        assert_eq!(approval.method, "personal_sign");
        assert_eq!(approval.origin, "wc://pairing");
        assert_eq!(approval.session, context.session.as_ref().map(|s| s.id));
        assert_eq!(approval.params, json!({"message": "0x68656c6c6f", "address": "0xabc"}));
    }

    #[tokio::test]
    async fn test_send_transaction_broadcasts_signature() {
        let bed = TestBed::new();
        bed.circuits.respond("eth_sendRawTransaction", json!("0xhash"));
        let orchestrator = bed.logged_in().await;
        let (context, wallet) = bed.session_context(&orchestrator, "wc://pairing").await;
        let request = RpcPreRequest::new(
            "eth_sendTransaction",
            json!([{"from": wallet.address, "to": "0xdef", "gas": "0x5208", "value": "0x1"}]),
        );

        let approver = bed.approve_next(&orchestrator, json!("0xsigned"));
        let (hash, approval) = tokio::join!(
            orchestrator.send_transaction(&context, &request, None),
            approver
        );

        assert_eq!(hash.expect("hash"), json!("0xhash"));
        assert_eq!(approval.params["chainId"], json!("1"));
        assert_eq!(approval.params["to"], json!("0xdef"));
        assert_eq!(approval.params["data"], Value::Null);
    }

    #[tokio::test]
    async fn test_sign_typed_data_stringifies_object() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let (context, _) = bed.session_context(&orchestrator, "wc://pairing").await;
        let request = RpcPreRequest::new(
            "eth_signTypedData_v4",
            json!(["0xabc", {"primaryType": "Mail"}]),
        );

        let approver = bed.approve_next(&orchestrator, json!("0xsig"));
        let (_, approval) = tokio::join!(
            orchestrator.sign_typed_data(&context, &request, None),
            approver
        );

        assert_eq!(approval.params["data"], json!(r#"{"primaryType":"Mail"}"#));
        assert_eq!(approval.params["address"], json!("0xabc"));
    }

    #[tokio::test]
    async fn test_switch_chain_updates_session() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let (context, _) = bed.session_context(&orchestrator, "wc://pairing").await;
        let request = RpcPreRequest::new("wallet_switchEthereumChain", json!([{"chainId": "0x5"}]));

        let approver = bed.approve_next(&orchestrator, Value::Null);
        let (result, _) = tokio::join!(
            orchestrator.switch_chain(&context, &request, None),
            approver
        );
        result.expect("switched");

        let id = context.session.as_ref().map(|s| s.id).expect("session");
        let stored: Session = context
            .user
            .storage
            .get_as(&keys::session(id))
            .await
            .expect("read")
            .expect("session");
        assert_eq!(stored.chain.chain_id, 5);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_chain_asks_nothing() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let (context, _) = bed.session_context(&orchestrator, "wc://pairing").await;
        let request = RpcPreRequest::new("wallet_switchEthereumChain", json!([{"chainId": "0x999"}]));

        let err = orchestrator.switch_chain(&context, &request, None).await.unwrap_err();
        assert!(matches!(err, Error::UnknownChain { .. }));
        assert_eq!(orchestrator.correlator().waiting(), 0);
    }
}
