//! Relay pairing, reconnection and request routing.
//!
//! A pairing is persisted with its settlement receipt *before* the receipt
//! is awaited. A background restarted mid-handshake finds the receipt on
//! the next reconnection and awaits it again.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::circuit::{HttpRequest, RelayBundle};
use crate::entities::{
    Blobby, BlobbyRef, OriginData, RelaySessionData, Session, SessionKind, SessionRef,
    StatusRecord,
};
use crate::error::{Error, Result};
use crate::ethereum::EthereumContext;
use crate::identifiers::{SessionId, WalletId};
use crate::protocol::{EthereumMethod, RpcPreRequest};
use crate::relay::{
    AuthKey, Pairing, PairingUri, RelayEvent, RelayMetadata, RelayRouter, RelaySession,
    SESSION_REQUEST, SessionKey, SessionRequestParams, SettlementReceipt,
};
use crate::session::UserSession;
use crate::store::keys;

use super::core::{Orchestrator, load_wallet};
use super::resolve::load_session;

/// Chain a new pairing starts on.
const PAIRING_CHAIN_ID: u64 = 1;

// ============================================================================
// Reconnection
// ============================================================================

impl Orchestrator {
    /// Reconnects every persisted relay session of the logged-in user.
    ///
    /// Sessions are handled concurrently; one failing session never
    /// prevents the others. Each outcome is written to its status record.
    pub async fn reconnect_all(&self) -> Result<()> {
        let user = self.inner.state.require_user()?;

        let references: Vec<SessionRef> = user
            .storage
            .get_as(keys::PERSISTENT_SESSIONS)
            .await?
            .unwrap_or_default();

        let outcomes = join_all(
            references
                .into_iter()
                .map(|reference| self.resolve_and_reconnect(&user, reference.id)),
        )
        .await;

        let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
        info!(
            attempted = outcomes.len(),
            failed,
            live = self.inner.state.relay_count(),
            "Relay sessions reconnected"
        );

        Ok(())
    }

    async fn resolve_and_reconnect(&self, user: &UserSession, id: SessionId) -> Result<()> {
        if !self.inner.state.begin_relay(id) {
            debug!(session_id = %id, "Relay already live or connecting");
            return Ok(());
        }

        let session = match load_session(user, id).await {
            Ok(session) if session.is_relay() => session,
            Ok(_) => {
                self.inner.state.finish_relay(id, None);
                return Ok(());
            }
            Err(e) => {
                self.inner.state.finish_relay(id, None);
                return Err(e);
            }
        };

        match self.reconnect(user, &session).await {
            Ok((relay, events)) => {
                // Written first so a close seen by the watcher clears it.
                if let Err(e) = self.inner.registry.set_status(&StatusRecord::ok(id)).await {
                    self.inner.state.finish_relay(id, None);
                    close_quietly(&relay).await;
                    return Err(e);
                }
                self.activate(user, session, relay, events);
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Relay reconnection failed");
                self.inner.state.finish_relay(id, None);
                self.inner
                    .registry
                    .set_status(&StatusRecord::failed(id, e.to_rpc()))
                    .await?;
                Err(e)
            }
        }
    }

    /// Restores one relay session and awaits an interrupted settlement.
    ///
    /// The returned receiver was subscribed before the settlement wait, so
    /// a close during the wait still reaches [`Self::activate`].
    async fn reconnect(
        &self,
        user: &UserSession,
        session: &Session,
    ) -> Result<(Arc<dyn RelaySession>, broadcast::Receiver<RelayEvent>)> {
        let data = session
            .relay_data()
            .ok_or_else(|| Error::missing("relay session data"))?;

        let auth_key = AuthKey::from_jwk(data.auth_key_jwk.clone())?;
        let bundle = RelayBundle::with_auth_key(&self.inner.circuits, auth_key).await?;
        let session_key = SessionKey::from_base64(&data.session_key_base64)?;

        let relay = self
            .inner
            .relay
            .restore(bundle, &data.topic, session_key, data.metadata.clone())
            .await?;
        let events = relay.events();

        let restored = async {
            relay.subscribe().await?;
            if let Some(receipt) = &data.settlement {
                debug!(session_id = %session.id, "Awaiting interrupted settlement");
                self.settle(user, session.id, &relay, receipt).await?;
            }
            Ok(())
        }
        .await;

        match restored {
            Ok(()) => Ok((relay, events)),
            Err(e) => {
                close_quietly(&relay).await;
                Err(e)
            }
        }
    }

    /// Awaits a settlement and clears the persisted receipt.
    async fn settle(
        &self,
        user: &UserSession,
        id: SessionId,
        relay: &Arc<dyn RelaySession>,
        receipt: &SettlementReceipt,
    ) -> Result<()> {
        if !relay.wait_settlement(receipt).await? {
            return Err(Error::relay("pairing was not settled by the peer"));
        }

        user.storage
            .mutate::<Session, _>(&keys::session(id), |current| {
                current.map(|mut session| {
                    if let SessionKind::Relay(data) = &mut session.kind {
                        data.settlement = None;
                    }
                    session
                })
            })
            .await?;

        Ok(())
    }

    /// Routes the relay's requests and tracks its lifetime.
    fn activate(
        &self,
        user: &UserSession,
        session: Session,
        relay: Arc<dyn RelaySession>,
        mut events: broadcast::Receiver<RelayEvent>,
    ) {
        let id = session.id;

        relay.set_router(Some(Arc::new(RelaySessionRouter {
            orchestrator: self.clone(),
            user: user.clone(),
            session,
        })));
        self.inner.state.finish_relay(id, Some(Arc::clone(&relay)));

        let orchestrator = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RelayEvent::Close) => break,
                    Ok(RelayEvent::Error(message)) => {
                        warn!(session_id = %id, %message, "Relay session failed");
                        break;
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }

            relay.set_router(None);
            if orchestrator.inner.state.remove_relay_if(id, &relay) {
                orchestrator.inner.registry.clear_status(id).await;
                info!(session_id = %id, "Relay session ended");
            }
        });
    }
}

// ============================================================================
// Pairing
// ============================================================================

impl Orchestrator {
    /// Pairs `wallet` with the dapp behind `uri`.
    ///
    /// Returns the dapp metadata once the pairing is settled.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParams`] for a malformed URI
    /// - [`Error::NotLoggedIn`] / [`Error::MissingPrecondition`] without a
    ///   user or wallet
    /// - [`Error::Relay`] if the peer does not settle
    pub(super) async fn pair(&self, uri: &str, wallet: WalletId) -> Result<RelayMetadata> {
        let uri = PairingUri::parse(uri)?;
        let user = self.inner.state.require_user()?;
        let wallet = load_wallet(&user, wallet).await?;
        let chain = self.inner.chains.resolve(PAIRING_CHAIN_ID)?.clone();

        let bundle = self.inner.state.relay_bundles()?.take().await?.into_inner();
        let Pairing {
            session: relay,
            settlement,
        } = self.inner.relay.pair(bundle, &uri, &wallet.address).await?;
        let events = relay.events();
        let metadata = relay.metadata().clone();

        let origin = OriginData {
            origin: format!("wc://{}", Uuid::new_v4()),
            title: Some(metadata.name.clone()),
            description: Some(metadata.description.clone()),
            icons: Vec::new(),
        };
        user.storage
            .set_as(&keys::origin(&origin.origin), &origin)
            .await?;

        let data = RelaySessionData {
            metadata: metadata.clone(),
            relay: self.inner.options.relay_endpoint().to_string(),
            topic: relay.topic().to_string(),
            session_key_base64: relay.session_key().to_base64(),
            auth_key_jwk: relay.auth_key().to_jwk(),
            settlement: Some(settlement.clone()),
        };
        let mut session = Session::relay(origin.origin.clone(), wallet.wallet_ref(), chain, data);
        let id = session.id;

        user.storage.set_as(&keys::session(id), &session).await?;
        info!(session_id = %id, topic = %relay.topic(), dapp = %metadata.name, "Pairing persisted");

        self.inner.state.begin_relay(id);
        if let Err(e) = self.settle(&user, id, &relay, &settlement).await {
            self.inner.state.finish_relay(id, None);
            close_quietly(&relay).await;
            return Err(e);
        }

        if let SessionKind::Relay(data) = &mut session.kind {
            data.settlement = None;
        }
        if let Err(e) = self.inner.registry.set_status(&StatusRecord::ok(id)).await {
            self.inner.state.finish_relay(id, None);
            close_quietly(&relay).await;
            return Err(e);
        }
        self.activate(&user, session, relay, events);

        self.store_icons(&user, &origin.origin, &metadata.icons).await?;
        info!(session_id = %id, "Pairing settled");

        Ok(metadata)
    }

    /// Points the origin at the dapp icons and fetches them in the background.
    async fn store_icons(&self, user: &UserSession, origin: &str, icons: &[String]) -> Result<()> {
        let refs: Vec<BlobbyRef> = icons.iter().map(BlobbyRef::new).collect();
        user.storage
            .mutate::<OriginData, _>(&keys::origin(origin), move |current| {
                current.map(|mut data| {
                    data.icons = refs;
                    data
                })
            })
            .await?;

        for url in icons {
            let orchestrator = self.clone();
            let user = user.clone();
            let url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.fetch_icon(&user, &url).await {
                    warn!(%url, error = %e, "Icon not fetched");
                }
            });
        }

        Ok(())
    }

    async fn fetch_icon(&self, user: &UserSession, url: &str) -> Result<()> {
        let circuit = self.inner.circuits.take().await?.into_inner();
        debug!(%url, circuit = circuit.id(), "Fetching icon");

        let response = circuit
            .fetch(HttpRequest::get(url))
            .await?
            .error_for_status()?;
        let mime = response.content_type.as_deref().unwrap_or_default();
        let blobby = Blobby::image(url, mime, &response.body)?;

        user.storage.set_as(&keys::blobby(url), &blobby).await
    }
}

async fn close_quietly(relay: &Arc<dyn RelaySession>) {
    if let Err(e) = relay.close().await {
        debug!(topic = %relay.topic(), error = %e, "Relay close failed");
    }
}

// ============================================================================
// RelaySessionRouter
// ============================================================================

/// Serves `wc_sessionRequest` calls of one relay session.
///
/// Approvals never open a popup: they wait in the queue for a UI.
struct RelaySessionRouter {
    orchestrator: Orchestrator,
    user: UserSession,
    session: Session,
}

#[async_trait]
impl RelayRouter for RelaySessionRouter {
    async fn route(&self, request: &RpcPreRequest) -> Option<Result<Value>> {
        if request.method != SESSION_REQUEST {
            return None;
        }

        let params: SessionRequestParams = match request.params_as() {
            Ok(params) => params,
            Err(e) => return Some(Err(e)),
        };

        let method = match EthereumMethod::parse(&params.request.method) {
            Some(
                method @ (EthereumMethod::SendTransaction
                | EthereumMethod::PersonalSign
                | EthereumMethod::SignTypedDataV4),
            ) => method,
            _ => {
                debug!(session_id = %self.session.id, method = %params.request.method, "Relay method not handled");
                return None;
            }
        };

        Some(self.run(method, &params).await)
    }
}

impl RelaySessionRouter {
    async fn run(&self, method: EthereumMethod, params: &SessionRequestParams) -> Result<Value> {
        let orchestrator = &self.orchestrator;

        let chain = orchestrator.inner.chains.resolve_caip2(&params.chain_id)?.clone();
        let wallet = load_wallet(&self.user, self.session.first_wallet()?.uuid).await?;
        let brume = orchestrator.eth_brume(wallet.uuid).await?;

        let context = EthereumContext {
            user: self.user.clone(),
            session: Some(self.session.clone()),
            wallet,
            chain,
            brume,
        };

        let request = &params.request;
        match method {
            EthereumMethod::SendTransaction => orchestrator.send_transaction(&context, request, None).await,
            EthereumMethod::PersonalSign => orchestrator.personal_sign(&context, request, None).await,
            _ => orchestrator.sign_typed_data(&context, request, None).await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio::time::{sleep, timeout};

    use crate::entities::{EthereumChain, WalletData};
    use crate::testing::{TestBed, pairing_uri};

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        timeout(Duration::from_secs(5), async {
            while !check().await {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn relay_data(topic: &str, settlement: Option<SettlementReceipt>) -> RelaySessionData {
        RelaySessionData {
            metadata: RelayMetadata {
                name: "Dapp".into(),
                ..RelayMetadata::default()
            },
            relay: "wss://relay.example".into(),
            topic: topic.into(),
            session_key_base64: SessionKey::new([7; 32]).to_base64(),
            auth_key_jwk: json!({"kty": "OKP", "crv": "Ed25519", "x": "pub", "d": "priv"}),
            settlement,
        }
    }

    async fn seed_relay(
        user: &UserSession,
        wallet: &WalletData,
        chain: EthereumChain,
        topic: &str,
        settlement: Option<SettlementReceipt>,
    ) -> Session {
        let session = Session::relay(
            format!("wc://{topic}"),
            wallet.wallet_ref(),
            chain,
            relay_data(topic, settlement),
        );
        user.storage
            .set_as(&keys::session(session.id), &session)
            .await
            .expect("seed");
        session
    }

    async fn status(orchestrator: &Orchestrator, id: SessionId) -> Option<StatusRecord> {
        orchestrator.global().get_as(&keys::status(id)).await.expect("read")
    }

    async fn paired(bed: &TestBed) -> (Orchestrator, UserSession, Session) {
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;

        orchestrator
            .pair(&pairing_uri(), wallet.uuid)
            .await
            .expect("pair");

        let user = orchestrator.inner.state.require_user().expect("user");
        let references: Vec<SessionRef> = user
            .storage
            .get_as(keys::PERSISTENT_SESSIONS)
            .await
            .expect("read")
            .expect("sessions");
        let session = load_session(&user, references[0].id).await.expect("session");
        (orchestrator, user, session)
    }

    #[tokio::test]
    async fn test_reconnect_survives_failing_session() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;
        let user = orchestrator.inner.state.require_user().expect("user");
        bed.relay.fail_restore("broken");

        let a = seed_relay(&user, &wallet, bed.mainnet(), "topic-a", None).await;
        let b = seed_relay(&user, &wallet, bed.mainnet(), "broken", None).await;
        let c = seed_relay(&user, &wallet, bed.mainnet(), "topic-c", None).await;

        orchestrator.reconnect_all().await.expect("reconnect");

        eventually(|| async {
            status(&orchestrator, a.id).await.is_some()
                && status(&orchestrator, b.id).await.is_some()
                && status(&orchestrator, c.id).await.is_some()
        })
        .await;

        assert_eq!(status(&orchestrator, a.id).await, Some(StatusRecord::ok(a.id)));
        assert_eq!(status(&orchestrator, c.id).await, Some(StatusRecord::ok(c.id)));
        let failed = status(&orchestrator, b.id).await.expect("status");
        assert!(failed.error.is_some());
        assert_eq!(orchestrator.relay_count(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_skips_direct_sessions() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;
        let user = orchestrator.inner.state.require_user().expect("user");

        let direct = Session::direct("https://dapp.example", true, wallet.wallet_ref(), bed.mainnet());
        user.storage
            .set_as(&keys::session(direct.id), &direct)
            .await
            .expect("seed");

        orchestrator.reconnect_all().await.expect("reconnect");
        assert_eq!(orchestrator.relay_count(), 0);
        assert!(status(&orchestrator, direct.id).await.is_none());
        assert!(bed.relay.restored().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_awaits_leftover_settlement() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;
        let user = orchestrator.inner.state.require_user().expect("user");

        let receipt = SettlementReceipt::new(json!({"topic": "pending"}));
        let session = seed_relay(&user, &wallet, bed.mainnet(), "pending", Some(receipt)).await;

        orchestrator.reconnect_all().await.expect("reconnect");
        eventually(|| async { status(&orchestrator, session.id).await.is_some() }).await;

        let stored = load_session(&user, session.id).await.expect("session");
        assert_eq!(stored.relay_data().and_then(|d| d.settlement.clone()), None);
        assert_eq!(bed.relay.settlements_awaited(), 1);
        assert_eq!(orchestrator.relay_count(), 1);
    }

    #[tokio::test]
    async fn test_close_during_leftover_settlement_is_observed() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;
        let user = orchestrator.inner.state.require_user().expect("user");
        bed.relay.hold_settlements();

        let receipt = SettlementReceipt::new(json!({"topic": "pending"}));
        let session = seed_relay(&user, &wallet, bed.mainnet(), "pending", Some(receipt)).await;

        let reconnecting = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.reconnect_all().await }
        });

        eventually(|| async { bed.relay.settlements_awaited() >= 1 }).await;
        let relay = bed.relay.sessions()[0].clone();
        relay.emit(RelayEvent::Close);
        bed.relay.release_settlements(true);

        reconnecting.await.expect("join").expect("reconnect");
        eventually(|| async { orchestrator.relay_count() == 0 }).await;
        eventually(|| async { status(&orchestrator, session.id).await.is_none() }).await;
        assert!(!relay.has_router());
    }

    #[tokio::test]
    async fn test_pair_persists_before_settlement() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;
        let user = orchestrator.inner.state.require_user().expect("user");
        bed.relay.hold_settlements();

        let pairing = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.pair(&pairing_uri(), wallet.uuid).await }
        });

        let pending = timeout(Duration::from_secs(5), async {
            loop {
                let references: Vec<SessionRef> = user
                    .storage
                    .get_as(keys::PERSISTENT_SESSIONS)
                    .await
                    .expect("read")
                    .unwrap_or_default();
                if let Some(reference) = references.first() {
                    return load_session(&user, reference.id).await.expect("session");
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pending session");
        assert!(pending.relay_data().and_then(|d| d.settlement.clone()).is_some());
        assert_eq!(orchestrator.relay_count(), 0);

        bed.relay.release_settlements(true);
        let metadata = pairing.await.expect("join").expect("pair");
        assert_eq!(metadata.name, "Test Dapp");

        let settled = load_session(&user, pending.id).await.expect("session");
        assert!(settled.relay_data().and_then(|d| d.settlement.clone()).is_none());
        assert!(settled.origin.starts_with("wc://"));
        assert_eq!(orchestrator.relay_count(), 1);
        assert_eq!(status(&orchestrator, pending.id).await, Some(StatusRecord::ok(pending.id)));

        let origin: OriginData = user
            .storage
            .get_as(&keys::origin(&settled.origin))
            .await
            .expect("read")
            .expect("origin");
        assert_eq!(origin.title.as_deref(), Some("Test Dapp"));
    }

    #[tokio::test]
    async fn test_pair_rejected_settlement() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;
        bed.relay.hold_settlements();
        bed.relay.release_settlements(false);

        let err = orchestrator
            .pair(&pairing_uri(), wallet.uuid)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Relay { .. }));
        assert_eq!(orchestrator.relay_count(), 0);
        assert!(bed.relay.sessions()[0].is_closed());
    }

    #[tokio::test]
    async fn test_pair_rejects_bad_uri() {
        let bed = TestBed::new();
        let orchestrator = bed.logged_in().await;
        let wallet = bed.create_wallet(&orchestrator, "main").await;

        let err = orchestrator.pair("https://nope", wallet.uuid).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
        assert!(bed.relay.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_pair_fetches_icons() {
        let bed = TestBed::new();
        bed.circuits.serve("https://dapp.example/icon.png", "image/png", b"png");
        let (_orchestrator, user, session) = paired(&bed).await;

        eventually(|| async {
            user.storage
                .get(&keys::blobby("https://dapp.example/icon.png"))
                .await
                .expect("read")
                .is_some()
        })
        .await;

        let origin: OriginData = user
            .storage
            .get_as(&keys::origin(&session.origin))
            .await
            .expect("read")
            .expect("origin");
        assert_eq!(origin.icons, vec![BlobbyRef::new("https://dapp.example/icon.png")]);
    }

    #[tokio::test]
    async fn test_close_event_removes_relay() {
        let bed = TestBed::new();
        let (orchestrator, _user, session) = paired(&bed).await;
        assert_eq!(orchestrator.relay_count(), 1);

        let relay = bed.relay.sessions()[0].clone();
        relay.emit(RelayEvent::Close);

        eventually(|| async { orchestrator.relay_count() == 0 }).await;
        eventually(|| async { status(&orchestrator, session.id).await.is_none() }).await;
        assert!(!relay.has_router());
    }

    #[tokio::test]
    async fn test_session_request_goes_through_approval() {
        let bed = TestBed::new();
        let (orchestrator, _user, session) = paired(&bed).await;
        let relay = bed.relay.sessions()[0].clone();

        let request = RpcPreRequest::new(
            SESSION_REQUEST,
            json!({
                "chainId": "eip155:1",
                "request": {"method": "personal_sign", "params": ["0x68656c6c6f", "0xabc"]},
            }),
        );

        let approver = bed.approve_next(&orchestrator, json!("0xsig"));
        let (result, approval) = tokio::join!(relay.deliver(&request), approver);

        assert_eq!(result.expect("routed").expect("signed"), json!("0xsig"));
        assert_eq!(approval.origin, session.origin);
        assert_eq!(approval.session, Some(session.id));
        assert!(bed.windows.created().is_empty());
    }

    #[tokio::test]
    async fn test_session_request_other_methods_unhandled() {
        let bed = TestBed::new();
        let (_orchestrator, _user, _session) = paired(&bed).await;
        let relay = bed.relay.sessions()[0].clone();

        let request = RpcPreRequest::new(
            SESSION_REQUEST,
            json!({"chainId": "eip155:1", "request": {"method": "eth_chainId", "params": []}}),
        );
        assert!(relay.deliver(&request).await.is_none());

        let other = RpcPreRequest::new("wc_sessionPing", json!({}));
        assert!(relay.deliver(&other).await.is_none());
    }
}
