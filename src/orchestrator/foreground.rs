//! Router for foreground UI ports (popup, tab, sidebar).
//!
//! Every `brume_*` method of the UI maps to one handler below. Handlers
//! decode positional params with [`RpcRequest::params_as`] and return the
//! JSON result sent back to the UI.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use rand::RngCore;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::circuit::send_log;
use crate::entities::{SeedData, UserInit, WalletData};
use crate::error::{Error, Result};
use crate::ethereum::EthereumContext;
use crate::identifiers::{SessionId, UserId, WalletId};
use crate::protocol::{ForegroundMethod, Notification, RpcPreRequest, RpcRequest, RpcResponse};
use crate::store::{KeyChange, keys};
use crate::transport::{Port, RequestRouter};

use super::core::{Orchestrator, load_wallet};

// ============================================================================
// Constants
// ============================================================================

/// IV length of `brume_encrypt`.
const IV_LENGTH: usize = 16;

// ============================================================================
// ForegroundRouter
// ============================================================================

/// Handles the `brume_*` methods of a foreground UI.
pub(super) struct ForegroundRouter {
    orchestrator: Orchestrator,
}

impl ForegroundRouter {
    pub(super) fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl RequestRouter for ForegroundRouter {
    async fn route(&self, port: &Port, request: &RpcRequest) -> Option<Result<Value>> {
        let method = ForegroundMethod::parse(&request.method)?;
        debug!(port_id = %port.id(), method = method.as_str(), "Foreground request");
        Some(self.dispatch(method, port, request).await)
    }
}

impl ForegroundRouter {
    async fn dispatch(&self, method: ForegroundMethod, port: &Port, request: &RpcRequest) -> Result<Value> {
        let orchestrator = &self.orchestrator;

        match method {
            ForegroundMethod::GetPath => Ok(json!(orchestrator.inner.state.path())),
            ForegroundMethod::SetPath => {
                let (path,): (String,) = request.params_as()?;
                orchestrator.inner.state.set_path(path);
                Ok(Value::Null)
            }
            ForegroundMethod::Login => {
                let (uuid, password): (UserId, String) = request.params_as()?;
                orchestrator.login(uuid, &password).await?;
                Ok(Value::Null)
            }
            ForegroundMethod::CreateUser => {
                let (init,): (UserInit,) = request.params_as()?;
                orchestrator.create_user(&init).await
            }
            ForegroundMethod::CreateSeed => {
                let (seed,): (SeedData,) = request.params_as()?;
                let user = orchestrator.inner.state.require_user()?;
                user.storage.set_as(&keys::seed(seed.uuid), &seed).await?;
                Ok(Value::Null)
            }
            ForegroundMethod::CreateWallet => {
                let (wallet,): (WalletData,) = request.params_as()?;
                let user = orchestrator.inner.state.require_user()?;
                user.storage.set_as(&keys::wallet(wallet.uuid), &wallet).await?;
                Ok(Value::Null)
            }
            ForegroundMethod::Disconnect => {
                let (id,): (SessionId,) = request.params_as()?;
                orchestrator.disconnect(id).await?;
                Ok(Value::Null)
            }
            ForegroundMethod::GetGlobal => {
                let (key,): (String,) = request.params_as()?;
                Ok(orchestrator.inner.global.get(&key).await?.unwrap_or(Value::Null))
            }
            ForegroundMethod::GetUser => {
                let (key,): (String,) = request.params_as()?;
                let user = orchestrator.inner.state.require_user()?;
                Ok(user.storage.get(&key).await?.unwrap_or(Value::Null))
            }
            ForegroundMethod::Subscribe => {
                let (key,): (String,) = request.params_as()?;
                self.subscribe(port, key);
                Ok(Value::Null)
            }
            ForegroundMethod::EthFetch => {
                let (wallet, chain_id, subrequest): (WalletId, u64, RpcPreRequest) =
                    request.params_as()?;
                let context = orchestrator.ethereum_context(wallet, chain_id).await?;
                orchestrator.inner.fetcher.fetch(&context, &subrequest).await
            }
            ForegroundMethod::EthIndex => {
                let (wallet, chain_id, subrequest): (WalletId, u64, RpcPreRequest) =
                    request.params_as()?;
                let context = orchestrator.ethereum_context(wallet, chain_id).await?;
                orchestrator.inner.fetcher.index(&context, &subrequest).await?;
                Ok(Value::Null)
            }
            ForegroundMethod::Log => {
                let options = &orchestrator.inner.options;
                send_log(
                    &orchestrator.inner.circuits,
                    options.log_endpoint(),
                    options.log_attempts,
                )
                .await?;
                Ok(Value::Null)
            }
            ForegroundMethod::Open => {
                let (path,): (String,) = request.params_as()?;
                let url = format!("index.html#{path}");
                orchestrator.inner.windows.open_tab(&url).await?;
                Ok(Value::Null)
            }
            ForegroundMethod::Encrypt => {
                let (plain,): (String,) = request.params_as()?;
                self.encrypt(&plain).await
            }
            ForegroundMethod::Decrypt => {
                let (iv, cipher): (String, String) = request.params_as()?;
                self.decrypt(&iv, &cipher).await
            }
            ForegroundMethod::WcConnect | ForegroundMethod::WcStatus => {
                let (uri, wallet): (String, WalletId) = request.params_as()?;
                let metadata = orchestrator.pair(&uri, wallet).await?;
                Ok(serde_json::to_value(metadata)?)
            }
            ForegroundMethod::PopupHello => {
                orchestrator.inner.popup.hello(port.clone());
                Ok(Value::Null)
            }
            ForegroundMethod::Respond => {
                let (response,): (RpcResponse,) = request.params_as()?;
                orchestrator.inner.correlator.respond(response);
                Ok(Value::Null)
            }
        }
    }

    /// Pushes `brume_update(key, value)` on every write of `key` until the
    /// port closes. The user feed follows logins.
    fn subscribe(&self, port: &Port, key: String) {
        let orchestrator = self.orchestrator.clone();
        let mut logins = orchestrator.inner.state.watch_logins();
        let mut global = Some(orchestrator.inner.global.watch());
        let mut user = user_feed(&orchestrator);
        let port = port.clone();

        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    () = port.closed() => break,
                    login = logins.changed() => {
                        if login.is_err() {
                            break;
                        }
                        user = user_feed(&orchestrator);
                        continue;
                    }
                    change = next_change(&mut global) => change,
                    change = next_change(&mut user) => change,
                };

                if change.key == key {
                    port.notify(Notification::Update {
                        key: change.key,
                        value: change.value,
                    });
                }
            }
            debug!(port_id = %port.id(), %key, "Subscription ended");
        });
    }

    async fn encrypt(&self, plain_base64: &str) -> Result<Value> {
        let user = self.orchestrator.user_session()?;
        let plain = decode_base64(plain_base64)?;

        let mut iv = [0u8; IV_LENGTH];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = user.crypter.encrypt(&plain, &iv).await?;
        Ok(json!([Base64Standard.encode(iv), Base64Standard.encode(cipher)]))
    }

    async fn decrypt(&self, iv_base64: &str, cipher_base64: &str) -> Result<Value> {
        let user = self.orchestrator.user_session()?;
        let iv = decode_base64(iv_base64)?;
        let cipher = decode_base64(cipher_base64)?;

        let plain = user.crypter.decrypt(&cipher, &iv).await?;
        Ok(json!(Base64Standard.encode(plain)))
    }
}

fn user_feed(orchestrator: &Orchestrator) -> Option<broadcast::Receiver<KeyChange>> {
    orchestrator
        .inner
        .state
        .user()
        .map(|user| user.storage.watch())
}

/// Next change of an optional feed; a closed or absent feed never yields.
async fn next_change(feed: &mut Option<broadcast::Receiver<KeyChange>>) -> KeyChange {
    loop {
        let Some(receiver) = feed.as_mut() else {
            return std::future::pending().await;
        };

        match receiver.recv().await {
            Ok(change) => return change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => *feed = None,
        }
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    Base64Standard
        .decode(encoded)
        .map_err(|e| Error::invalid_params(format!("base64: {e}")))
}

// ============================================================================
// Orchestrator Operations
// ============================================================================

impl Orchestrator {
    /// Creates a user and returns the list of users.
    pub async fn create_user(&self, init: &UserInit) -> Result<Value> {
        let global = &self.inner.global;

        let user = self.inner.keyring.create_user(init).await?;
        global.set_as(&keys::user(user.uuid), &user).await?;
        info!(user = %user.uuid, name = %user.name, "User created");

        Ok(global.get(keys::USERS).await?.unwrap_or_else(|| json!([])))
    }

    /// Removes a session everywhere and tells its scripts.
    ///
    /// Scripts receive `accountsChanged([])` and lose their attachment; a
    /// live relay session is closed.
    pub async fn disconnect(&self, id: SessionId) -> Result<()> {
        let user = self.inner.state.require_user()?;

        user.storage.delete(&keys::session(id)).await?;

        if let Some(relay) = self.inner.state.remove_relay(id)
            && let Err(e) = relay.close().await
        {
            warn!(session_id = %id, error = %e, "Relay close failed");
        }

        let scripts = self.inner.registry.forget(id).await;
        for script in &scripts {
            script.notify(Notification::AccountsChanged(Vec::new()));
        }

        info!(session_id = %id, scripts = scripts.len(), "Session disconnected");
        Ok(())
    }

    /// Builds the context of a wallet acting outside any session.
    pub(crate) async fn ethereum_context(
        &self,
        wallet: WalletId,
        chain_id: u64,
    ) -> Result<EthereumContext> {
        let user = self.inner.state.require_user()?;
        let wallet = load_wallet(&user, wallet).await?;
        let chain = self.inner.chains.resolve(chain_id)?.clone();
        let brume = self.eth_brume(wallet.uuid).await?;

        Ok(EthereumContext {
            user,
            session: None,
            wallet,
            chain,
            brume,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
