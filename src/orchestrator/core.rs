//! Orchestrator core: shared state, login and per-wallet bundles.
//!
//! # Lifecycle
//!
//! 1. [`OrchestratorBuilder`](super::OrchestratorBuilder) creates the
//!    circuit pool and the approval machinery
//! 2. [`Orchestrator::init`] replays a stored credential, if any
//! 3. Ports are handed over through [`PortAcceptor::accept`]; content
//!    scripts and foreground UIs get their routers
//! 4. [`Orchestrator::login`] unlocks a user, creates the bundle pools and
//!    reconnects persisted relay sessions in the background

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::approval::{Correlator, PopupManager};
use crate::circuit::{
    CircuitPool, EthBrume, RelayBundle, create_eth_brume_pool, create_relay_bundle_pool,
};
use crate::entities::{ChainTable, SessionRef, UserData, UserRef, WalletData};
use crate::error::{Error, Result};
use crate::ethereum::EthereumFetcher;
use crate::identifiers::{SessionId, UserId, WalletId};
use crate::platform::{Credential, CredentialStore, Keyring, WindowManager};
use crate::pool::Pool;
use crate::relay::{RelayProtocol, RelaySession};
use crate::session::{SessionRegistry, UserSession};
use crate::store::{Store, keys};
use crate::transport::{Port, PortAcceptor, PortKind};

use super::builder::OrchestratorBuilder;
use super::content::ContentRouter;
use super::foreground::ForegroundRouter;
use super::options::BackgroundOptions;

// ============================================================================
// OrchestratorState
// ============================================================================

#[derive(Default)]
struct RelayState {
    live: FxHashMap<SessionId, Arc<dyn RelaySession>>,
    connecting: FxHashSet<SessionId>,
}

/// Mutable state of the background.
///
/// Every multi-step mutation goes through a method that takes the relevant
/// lock; no map is exposed.
pub(super) struct OrchestratorState {
    user: RwLock<Option<UserSession>>,
    logins: watch::Sender<u64>,
    path: Mutex<String>,
    eth_brumes: Mutex<Option<Pool<EthBrume>>>,
    relay_bundles: Mutex<Option<Pool<RelayBundle>>>,
    brume_by_wallet: AsyncMutex<FxHashMap<WalletId, EthBrume>>,
    resolving: Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
    relays: Mutex<RelayState>,
}

impl OrchestratorState {
    fn new() -> Self {
        Self {
            user: RwLock::new(None),
            logins: watch::Sender::new(0),
            path: Mutex::new("/".to_string()),
            eth_brumes: Mutex::new(None),
            relay_bundles: Mutex::new(None),
            brume_by_wallet: AsyncMutex::new(FxHashMap::default()),
            resolving: Mutex::new(FxHashMap::default()),
            relays: Mutex::new(RelayState::default()),
        }
    }

    pub(super) fn user(&self) -> Option<UserSession> {
        self.user.read().clone()
    }

    pub(super) fn require_user(&self) -> Result<UserSession> {
        self.user().ok_or(Error::NotLoggedIn)
    }

    fn set_user(&self, user: UserSession) {
        *self.user.write() = Some(user);
        self.logins.send_modify(|count| *count += 1);
    }

    /// Ticks each time a user logs in.
    pub(super) fn watch_logins(&self) -> watch::Receiver<u64> {
        self.logins.subscribe()
    }

    pub(super) fn path(&self) -> String {
        self.path.lock().clone()
    }

    pub(super) fn set_path(&self, path: String) {
        *self.path.lock() = path;
    }

    /// Installs fresh bundle pools, closing the previous ones.
    fn install_pools(&self, eth: Pool<EthBrume>, relay: Pool<RelayBundle>) {
        if let Some(previous) = self.eth_brumes.lock().replace(eth) {
            previous.close();
        }
        if let Some(previous) = self.relay_bundles.lock().replace(relay) {
            previous.close();
        }
    }

    pub(super) fn relay_bundles(&self) -> Result<Pool<RelayBundle>> {
        self.relay_bundles.lock().clone().ok_or(Error::NotLoggedIn)
    }

    /// Returns the wallet's bundle, taking one from the pool on first use.
    ///
    /// The lock is held across the take so two first uses of one wallet
    /// share a single bundle.
    pub(super) async fn eth_brume(&self, wallet: WalletId) -> Result<EthBrume> {
        let mut brumes = self.brume_by_wallet.lock().await;

        if let Some(brume) = brumes.get(&wallet) {
            return Ok(brume.clone());
        }

        let pool = self.eth_brumes.lock().clone().ok_or(Error::NotLoggedIn)?;
        let brume = pool.take().await?.into_inner();
        debug!(%wallet, brume = %brume.id(), "Bundle assigned to wallet");

        brumes.insert(wallet, brume.clone());
        Ok(brume)
    }

    /// Returns the lock serializing session resolution for `origin`.
    pub(super) fn origin_lock(&self, origin: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.resolving.lock().entry(origin.to_string()).or_default())
    }

    /// Drops the origin lock once nobody else holds or awaits it.
    pub(super) fn release_origin_lock(&self, origin: &str, lock: Arc<AsyncMutex<()>>) {
        let mut resolving = self.resolving.lock();
        drop(lock);
        if resolving
            .get(origin)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            resolving.remove(origin);
        }
    }

    /// Marks a relay session as connecting.
    ///
    /// Returns `false` if it is already live or being connected.
    pub(super) fn begin_relay(&self, id: SessionId) -> bool {
        let mut relays = self.relays.lock();
        if relays.live.contains_key(&id) || relays.connecting.contains(&id) {
            return false;
        }
        relays.connecting.insert(id)
    }

    /// Ends a connection attempt, recording the live session on success.
    pub(super) fn finish_relay(&self, id: SessionId, session: Option<Arc<dyn RelaySession>>) {
        let mut relays = self.relays.lock();
        relays.connecting.remove(&id);
        if let Some(session) = session {
            relays.live.insert(id, session);
        }
    }

    pub(super) fn relay(&self, id: SessionId) -> Option<Arc<dyn RelaySession>> {
        self.relays.lock().live.get(&id).cloned()
    }

    pub(super) fn remove_relay(&self, id: SessionId) -> Option<Arc<dyn RelaySession>> {
        self.relays.lock().live.remove(&id)
    }

    /// Removes `session` only if it is still the live one for `id`.
    pub(super) fn remove_relay_if(&self, id: SessionId, session: &Arc<dyn RelaySession>) -> bool {
        let mut relays = self.relays.lock();
        let current = relays
            .live
            .get(&id)
            .is_some_and(|live| Arc::ptr_eq(live, session));
        if current {
            relays.live.remove(&id);
        }
        current
    }

    pub(super) fn relay_count(&self) -> usize {
        self.relays.lock().live.len()
    }

    fn close(&self) {
        if let Some(pool) = self.eth_brumes.lock().take() {
            pool.close();
        }
        if let Some(pool) = self.relay_bundles.lock().take() {
            pool.close();
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Collaborators handed over by the builder.
pub(super) struct Collaborators {
    pub(super) global: Store,
    pub(super) circuits: CircuitPool,
    pub(super) keyring: Arc<dyn Keyring>,
    pub(super) credentials: Arc<dyn CredentialStore>,
    pub(super) windows: Arc<dyn WindowManager>,
    pub(super) relay: Arc<dyn RelayProtocol>,
    pub(super) fetcher: Arc<dyn EthereumFetcher>,
    pub(super) popup: PopupManager,
    pub(super) correlator: Correlator,
}

pub(super) struct OrchestratorInner {
    pub(super) options: BackgroundOptions,
    pub(super) chains: ChainTable,
    pub(super) global: Store,
    pub(super) circuits: CircuitPool,
    pub(super) keyring: Arc<dyn Keyring>,
    pub(super) credentials: Arc<dyn CredentialStore>,
    pub(super) windows: Arc<dyn WindowManager>,
    pub(super) relay: Arc<dyn RelayProtocol>,
    pub(super) fetcher: Arc<dyn EthereumFetcher>,
    pub(super) popup: PopupManager,
    pub(super) correlator: Correlator,
    pub(super) registry: SessionRegistry,
    pub(super) state: OrchestratorState,
}

/// Top-level façade of the background.
///
/// Cloning shares the orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) inner: Arc<OrchestratorInner>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("logged_in", &self.inner.state.user().is_some())
            .field("relays", &self.inner.state.relay_count())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub(super) fn new(options: BackgroundOptions, parts: Collaborators) -> Self {
        let registry = SessionRegistry::new(parts.global.clone());

        Self {
            inner: Arc::new(OrchestratorInner {
                chains: options.chains(),
                options,
                global: parts.global,
                circuits: parts.circuits,
                keyring: parts.keyring,
                credentials: parts.credentials,
                windows: parts.windows,
                relay: parts.relay,
                fetcher: parts.fetcher,
                popup: parts.popup,
                correlator: parts.correlator,
                registry,
                state: OrchestratorState::new(),
            }),
        }
    }

    /// Replays the stored credential, if any.
    pub async fn init(&self) -> Result<()> {
        match self.inner.credentials.load().await? {
            Some(credential) => {
                debug!(user = %credential.uuid, "Replaying stored credential");
                self.set_current_user(credential.uuid, &credential.password)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Unlocks a user and stores the credential for later restarts.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingPrecondition`] if the user does not exist
    /// - Keyring errors on a wrong password
    pub async fn login(&self, uuid: UserId, password: &str) -> Result<()> {
        self.set_current_user(uuid, password).await?;

        let credential = Credential {
            uuid,
            password: password.to_string(),
        };
        self.inner.credentials.save(&credential).await
    }

    async fn set_current_user(&self, uuid: UserId, password: &str) -> Result<()> {
        let inner = &self.inner;

        let user: UserData = inner
            .global
            .get_as(&keys::user(uuid))
            .await?
            .ok_or_else(|| Error::missing("user"))?;

        let unlocked = inner.keyring.unlock(&user, password).await?;

        inner
            .global
            .set_as(keys::CURRENT_USER, &UserRef { uuid })
            .await?;

        let session = UserSession::new(user, unlocked);
        purge_temporary_sessions(&session.storage, &inner.registry).await;
        inner.state.set_user(session);

        let options = &inner.options;
        let eth = create_eth_brume_pool(
            &inner.circuits,
            options.eth_brume_capacity,
            options.circuits_per_brume,
            options.pool,
        );
        let relay = create_relay_bundle_pool(
            &inner.circuits,
            Arc::clone(&inner.relay),
            options.relay_bundle_capacity,
            options.pool,
        );
        inner.state.install_pools(eth, relay);

        info!(user = %uuid, "Logged in");

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.reconnect_all().await {
                warn!(error = %e, "Relay reconnection failed");
            }
        });

        Ok(())
    }

    /// Returns the logged-in user record.
    #[must_use]
    pub fn current_user(&self) -> Option<UserData> {
        self.inner.state.user().map(|session| session.user)
    }

    /// Returns the unlocked user.
    pub(crate) fn user_session(&self) -> Result<UserSession> {
        self.inner.state.require_user()
    }

    /// Returns the approval popup manager.
    #[inline]
    #[must_use]
    pub fn popup(&self) -> &PopupManager {
        &self.inner.popup
    }

    /// Returns the approval correlator.
    #[inline]
    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.inner.correlator
    }

    /// Returns the session registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Returns the global store.
    #[inline]
    #[must_use]
    pub fn global(&self) -> &Store {
        &self.inner.global
    }

    /// Returns the number of live relay sessions.
    #[inline]
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.inner.state.relay_count()
    }

    /// Closes every pool. Live ports and relay sessions are left to their owners.
    pub fn close(&self) {
        self.inner.state.close();
        self.inner.circuits.close();
    }

    /// Returns the wallet's bundle.
    pub(super) async fn eth_brume(&self, wallet: WalletId) -> Result<EthBrume> {
        self.inner.state.eth_brume(wallet).await
    }
}

/// Loads a wallet of the logged-in user.
pub(super) async fn load_wallet(user: &UserSession, wallet: WalletId) -> Result<WalletData> {
    user.storage
        .get_as(&keys::wallet(wallet))
        .await?
        .ok_or_else(|| Error::missing(format!("wallet {wallet}")))
}

/// Deletes sessions that were not meant to outlive their unlocking.
async fn purge_temporary_sessions(storage: &Store, registry: &SessionRegistry) {
    let temporary = match storage
        .get_as::<Vec<SessionRef>>(keys::TEMPORARY_SESSIONS)
        .await
    {
        Ok(list) => list.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "Unreadable temporary session list");
            return;
        }
    };

    for reference in temporary {
        registry.forget(reference.id).await;
        if let Err(e) = storage.delete(&keys::session(reference.id)).await {
            warn!(session_id = %reference.id, error = %e, "Could not purge temporary session");
        }
    }
}

// ============================================================================
// PortAcceptor
// ============================================================================

impl PortAcceptor for Orchestrator {
    fn accept(&self, port: Port) {
        match port.kind() {
            PortKind::Script => {
                port.add_router(Arc::new(ContentRouter::new(self.clone())));
                debug!(port_id = %port.id(), "Content script accepted");
            }
            PortKind::Foreground => {
                port.add_router(Arc::new(ForegroundRouter::new(self.clone())));
                debug!(port_id = %port.id(), "Foreground accepted");
            }
            PortKind::Background => {
                warn!(port_id = %port.id(), "Unexpected background peer, closing");
                port.close();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
