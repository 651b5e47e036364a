//! In-process fakes for the platform, circuit and relay collaborators.
//!
//! [`TestBed`] wires one of each into an [`Orchestrator`] with small pools.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value, json};
use tokio::sync::{Notify, broadcast, watch};
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

use crate::circuit::{Circuit, CircuitFactory, HttpRequest, HttpResponse, RelayBundle};
use crate::entities::{
    AppRequest, AppRequestRef, ChainTable, EthereumChain, PreOriginData, Session, UserData,
    UserInit, WalletData,
};
use crate::error::{Error, Result};
use crate::ethereum::EthereumContext;
use crate::identifiers::{TabId, UserId, WalletId, WindowId};
use crate::orchestrator::{BackgroundOptions, Orchestrator, OrchestratorBuilder};
use crate::platform::{
    Badge, Credential, CredentialStore, Crypter, Keyring, Mouse, PopupGeometry, UnlockedUser,
    WindowHandle, WindowManager,
};
use crate::protocol::{RpcError, RpcPreRequest, RpcRequest, RpcResponse};
use crate::relay::{
    AuthKey, Pairing, PairingUri, RelayEvent, RelayMetadata, RelayProtocol, RelayRouter,
    RelaySession, SessionKey, SettlementReceipt,
};
use crate::store::{KeyChange, MemoryStorage, Storage, keys};
use crate::transport::{Port, PortKind, RequestRouter};

/// How long a test helper waits before giving up.
const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Circuits
// ============================================================================

#[derive(Default)]
struct CircuitState {
    responses: FxHashMap<String, Value>,
    served: FxHashMap<String, (String, Vec<u8>)>,
    fail_next: usize,
    posts: FxHashMap<String, usize>,
    created: usize,
    destroyed: usize,
}

/// Circuit factory answering JSON-RPC posts from a response table.
#[derive(Default)]
pub struct FakeCircuitFactory {
    state: Arc<Mutex<CircuitState>>,
}

impl FakeCircuitFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers JSON-RPC `method` with `result`. Other methods get -32601.
    pub fn respond(&self, method: &str, result: Value) {
        self.state.lock().responses.insert(method.to_string(), result);
    }

    /// Serves `body` on GET `url`.
    pub fn serve(&self, url: &str, mime: &str, body: &[u8]) {
        self.state
            .lock()
            .served
            .insert(url.to_string(), (mime.to_string(), body.to_vec()));
    }

    /// Fails the next `count` fetches on any circuit.
    pub fn fail_next_fetches(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Successful POSTs to `url`.
    pub fn posts_to(&self, url: &str) -> usize {
        self.state.lock().posts.get(url).copied().unwrap_or(0)
    }

    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn destroyed(&self) -> usize {
        self.state.lock().destroyed
    }
}

#[async_trait]
impl CircuitFactory for FakeCircuitFactory {
    async fn create(&self, _index: usize) -> Result<Arc<dyn Circuit>> {
        let number = {
            let mut state = self.state.lock();
            state.created += 1;
            state.created
        };

        Ok(Arc::new(FakeCircuit {
            id: format!("circuit-{number}"),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeCircuit {
    id: String,
    state: Arc<Mutex<CircuitState>>,
}

impl FakeCircuit {
    fn json_rpc(state: &CircuitState, body: &Value) -> Option<Value> {
        let method = body.get("method")?.as_str()?;
        let id = body.get("id").cloned().unwrap_or(Value::Null);

        Some(match state.responses.get(method) {
            Some(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            None => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {method}")},
            }),
        })
    }
}

#[async_trait]
impl Circuit for FakeCircuit {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut state = self.state.lock();

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::circuit(format!("{} dropped the request", self.id)));
        }

        if request.method == "GET" {
            return Ok(match state.served.get(&request.url) {
                Some((mime, body)) => HttpResponse {
                    status: 200,
                    content_type: Some(mime.clone()),
                    body: body.clone(),
                },
                None => HttpResponse {
                    status: 404,
                    content_type: None,
                    body: Vec::new(),
                },
            });
        }

        *state.posts.entry(request.url.clone()).or_default() += 1;

        let body: Value = request
            .body
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
            .unwrap_or(Value::Null);

        Ok(match Self::json_rpc(&state, &body) {
            Some(reply) => HttpResponse {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: serde_json::to_vec(&reply)?,
            },
            None => HttpResponse {
                status: 200,
                content_type: None,
                body: Vec::new(),
            },
        })
    }

    async fn destroy(&self) {
        self.state.lock().destroyed += 1;
    }
}

// ============================================================================
// Relay
// ============================================================================

#[derive(Default)]
struct RelayControl {
    failing: FxHashSet<String>,
    restored: Vec<String>,
    sessions: Vec<Arc<FakeRelaySession>>,
    keys: usize,
}

/// Relay protocol whose sessions are driven by the test.
///
/// Settlements succeed immediately unless [`FakeRelayProtocol::hold_settlements`]
/// was called.
pub struct FakeRelayProtocol {
    control: Mutex<RelayControl>,
    settlement: watch::Sender<Option<bool>>,
    awaited: Arc<AtomicUsize>,
    metadata: RelayMetadata,
}

impl FakeRelayProtocol {
    pub fn new() -> Self {
        let (settlement, _) = watch::channel(Some(true));
        Self {
            control: Mutex::new(RelayControl::default()),
            settlement,
            awaited: Arc::new(AtomicUsize::new(0)),
            metadata: RelayMetadata {
                name: "Test Dapp".to_string(),
                description: "A dapp under test".to_string(),
                url: "https://dapp.example".to_string(),
                icons: vec!["https://dapp.example/icon.png".to_string()],
            },
        }
    }

    /// Makes `restore` fail for `topic`.
    pub fn fail_restore(&self, topic: &str) {
        self.control.lock().failing.insert(topic.to_string());
    }

    /// Topics restored so far.
    pub fn restored(&self) -> Vec<String> {
        self.control.lock().restored.clone()
    }

    /// Sessions created so far, restored or paired.
    pub fn sessions(&self) -> Vec<Arc<FakeRelaySession>> {
        self.control.lock().sessions.clone()
    }

    /// Blocks settlements until [`FakeRelayProtocol::release_settlements`].
    pub fn hold_settlements(&self) {
        self.settlement.send_replace(None);
    }

    /// Completes held and future settlements with `settled`.
    pub fn release_settlements(&self, settled: bool) {
        self.settlement.send_replace(Some(settled));
    }

    /// Number of settlement waits started.
    pub fn settlements_awaited(&self) -> usize {
        self.awaited.load(Ordering::SeqCst)
    }

    fn open(&self, topic: &str, session_key: SessionKey, auth_key: AuthKey, metadata: RelayMetadata) -> Arc<FakeRelaySession> {
        let (events, _) = broadcast::channel(16);
        let session = Arc::new(FakeRelaySession {
            topic: topic.to_string(),
            session_key,
            auth_key,
            metadata,
            router: Mutex::new(None),
            events,
            settlement: self.settlement.subscribe(),
            awaited: Arc::clone(&self.awaited),
            subscribed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.control.lock().sessions.push(Arc::clone(&session));
        session
    }
}

#[async_trait]
impl RelayProtocol for FakeRelayProtocol {
    async fn generate_auth_key(&self) -> Result<AuthKey> {
        let number = {
            let mut control = self.control.lock();
            control.keys += 1;
            control.keys
        };

        AuthKey::from_jwk(json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": format!("public-{number}"),
            "d": format!("private-{number}"),
        }))
    }

    async fn restore(
        &self,
        bundle: RelayBundle,
        topic: &str,
        session_key: SessionKey,
        metadata: RelayMetadata,
    ) -> Result<Arc<dyn RelaySession>> {
        {
            let mut control = self.control.lock();
            if control.failing.contains(topic) {
                return Err(Error::relay(format!("relay refused topic {topic}")));
            }
            control.restored.push(topic.to_string());
        }

        Ok(self.open(topic, session_key, bundle.auth_key, metadata))
    }

    async fn pair(&self, bundle: RelayBundle, uri: &PairingUri, address: &str) -> Result<Pairing> {
        let topic = format!("session-{}", uri.topic);
        let session = self.open(
            &topic,
            SessionKey::new(uri.sym_key),
            bundle.auth_key,
            self.metadata.clone(),
        );

        Ok(Pairing {
            session,
            settlement: SettlementReceipt::new(json!({"topic": topic, "address": address})),
        })
    }
}

/// A relay session whose dapp side is the test.
pub struct FakeRelaySession {
    topic: String,
    session_key: SessionKey,
    auth_key: AuthKey,
    metadata: RelayMetadata,
    router: Mutex<Option<Arc<dyn RelayRouter>>>,
    events: broadcast::Sender<RelayEvent>,
    settlement: watch::Receiver<Option<bool>>,
    awaited: Arc<AtomicUsize>,
    subscribed: AtomicBool,
    closed: AtomicBool,
}

impl FakeRelaySession {
    /// Emits a session event.
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    /// Sends a dapp request to the installed router.
    pub async fn deliver(&self, request: &RpcPreRequest) -> Option<Result<Value>> {
        let router = self.router.lock().clone()?;
        router.route(request).await
    }

    pub fn has_router(&self) -> bool {
        self.router.lock().is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelaySession for FakeRelaySession {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    fn auth_key(&self) -> &AuthKey {
        &self.auth_key
    }

    fn metadata(&self) -> &RelayMetadata {
        &self.metadata
    }

    async fn subscribe(&self) -> Result<()> {
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_settlement(&self, _receipt: &SettlementReceipt) -> Result<bool> {
        self.awaited.fetch_add(1, Ordering::SeqCst);

        let mut settlement = self.settlement.clone();
        let settled = *settlement
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::relay("settlement channel closed"))?;

        Ok(settled == Some(true))
    }

    fn set_router(&self, router: Option<Arc<dyn RelayRouter>>) {
        *self.router.lock() = router;
    }

    fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(RelayEvent::Close);
        }
        Ok(())
    }
}

/// A valid pairing URI.
pub fn pairing_uri() -> String {
    format!(
        "wc:{}@2?relay-protocol=irn&symKey={}",
        "7f".repeat(32),
        hex::encode([9u8; 32])
    )
}

// ============================================================================
// Windows & Badge
// ============================================================================

type CreateHook = Arc<dyn Fn(WindowId) + Send + Sync>;

#[derive(Default)]
struct WindowState {
    next_id: u32,
    created: Vec<(String, WindowId)>,
    focused: Vec<WindowId>,
    tabs: Vec<String>,
    on_create: Option<CreateHook>,
}

/// Window manager recording every call.
pub struct FakeWindowManager {
    state: Mutex<WindowState>,
    removed: broadcast::Sender<WindowId>,
}

impl FakeWindowManager {
    pub fn new() -> Self {
        let (removed, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(WindowState::default()),
            removed,
        }
    }

    /// Runs `hook` inside every `create_popup`, after the window exists.
    pub fn on_create(&self, hook: impl Fn(WindowId) + Send + Sync + 'static) {
        self.state.lock().on_create = Some(Arc::new(hook));
    }

    /// Popup urls and ids, in creation order.
    pub fn created(&self) -> Vec<(String, WindowId)> {
        self.state.lock().created.clone()
    }

    pub fn focused(&self) -> Vec<WindowId> {
        self.state.lock().focused.clone()
    }

    pub fn tabs(&self) -> Vec<String> {
        self.state.lock().tabs.clone()
    }

    /// Simulates the user closing a window.
    pub fn remove(&self, id: WindowId) {
        let _ = self.removed.send(id);
    }
}

#[async_trait]
impl WindowManager for FakeWindowManager {
    async fn create_popup(&self, url: &str, _geometry: PopupGeometry) -> Result<WindowHandle> {
        let (id, hook) = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = WindowId::new(state.next_id);
            state.created.push((url.to_string(), id));
            (id, state.on_create.clone())
        };

        if let Some(hook) = hook {
            hook(id);
        }

        Ok(WindowHandle {
            id,
            tab_id: Some(TabId::new(id.as_u32())),
        })
    }

    async fn focus(&self, window: &WindowHandle) -> Result<()> {
        self.state.lock().focused.push(window.id);
        Ok(())
    }

    async fn open_tab(&self, url: &str) -> Result<TabId> {
        let mut state = self.state.lock();
        state.tabs.push(url.to_string());
        Ok(TabId::new(1000 + state.tabs.len() as u32))
    }

    fn removed(&self) -> broadcast::Receiver<WindowId> {
        self.removed.subscribe()
    }
}

/// Badge remembering its last text.
#[derive(Default)]
pub struct FakeBadge {
    text: Mutex<Option<String>>,
}

impl FakeBadge {
    pub fn last_text(&self) -> Option<String> {
        self.text.lock().clone()
    }
}

#[async_trait]
impl Badge for FakeBadge {
    async fn set(&self, text: &str, _background: &str, _foreground: &str) -> Result<()> {
        *self.text.lock() = Some(text.to_string());
        Ok(())
    }
}

// ============================================================================
// Credentials & Keyring
// ============================================================================

/// Credential store kept in memory.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn with(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }

    pub fn stored(&self) -> Option<Credential> {
        self.credential.lock().clone()
    }

    pub fn put(&self, credential: Credential) {
        *self.credential.lock() = Some(credential);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        Ok(self.stored())
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        self.put(credential.clone());
        Ok(())
    }
}

/// Keyring holding one in-memory storage per user.
///
/// Unlocking twice yields the same storage.
#[derive(Default)]
pub struct FakeKeyring {
    users: Mutex<FxHashMap<UserId, (String, Arc<MemoryStorage>)>>,
}

#[async_trait]
impl Keyring for FakeKeyring {
    async fn create_user(&self, init: &UserInit) -> Result<UserData> {
        self.users.lock().insert(
            init.uuid,
            (init.password.clone(), Arc::new(MemoryStorage::new())),
        );

        Ok(UserData {
            uuid: init.uuid,
            name: init.name.clone(),
            material: init.extra.clone(),
        })
    }

    async fn unlock(&self, user: &UserData, password: &str) -> Result<UnlockedUser> {
        let users = self.users.lock();
        let (expected, storage) = users
            .get(&user.uuid)
            .ok_or_else(|| Error::missing("keyring entry"))?;

        if expected != password {
            return Err(Error::user_rejected("wrong password"));
        }

        Ok(UnlockedUser {
            storage: Arc::clone(storage) as Arc<dyn Storage>,
            crypter: Arc::new(XorCrypter),
        })
    }
}

/// Reversible cipher: XOR with the repeated IV.
struct XorCrypter;

impl XorCrypter {
    fn apply(data: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        if iv.is_empty() {
            return Err(Error::invalid_params("empty iv"));
        }
        Ok(data
            .iter()
            .zip(iv.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect())
    }
}

#[async_trait]
impl Crypter for XorCrypter {
    async fn encrypt(&self, plain: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        Self::apply(plain, iv)
    }

    async fn decrypt(&self, cipher: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        Self::apply(cipher, iv)
    }
}

/// Storage failing every operation.
pub struct FailingStorage;

#[async_trait]
impl Storage for FailingStorage {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Err(Error::storage("storage unavailable"))
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<()> {
        Err(Error::storage("storage unavailable"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(Error::storage("storage unavailable"))
    }

    fn watch(&self) -> broadcast::Receiver<KeyChange> {
        broadcast::channel(1).1
    }
}

// ============================================================================
// Peers
// ============================================================================

type Received = Arc<Mutex<Vec<RpcRequest>>>;

/// Records every inbound request and answers the origin query.
struct PeerRouter {
    origin: Option<String>,
    received: Received,
    arrived: Arc<Notify>,
}

#[async_trait]
impl RequestRouter for PeerRouter {
    async fn route(&self, _port: &Port, request: &RpcRequest) -> Option<Result<Value>> {
        self.received.lock().push(request.clone());
        self.arrived.notify_waiters();

        match (&self.origin, request.method.as_str()) {
            (Some(origin), "brume_origin") => Some(
                serde_json::to_value(PreOriginData {
                    origin: origin.clone(),
                    title: Some("Dapp".to_string()),
                    description: None,
                    icon: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
                })
                .map_err(Error::from),
            ),
            _ => Some(Ok(Value::Null)),
        }
    }
}

/// The page or UI end of a port.
pub struct FakePeer {
    port: Port,
    received: Received,
    arrived: Arc<Notify>,
}

impl FakePeer {
    fn attach(port: Port, origin: Option<String>) -> Self {
        let received = Received::default();
        let arrived = Arc::new(Notify::new());
        port.add_router(Arc::new(PeerRouter {
            origin,
            received: Arc::clone(&received),
            arrived: Arc::clone(&arrived),
        }));

        Self {
            port,
            received,
            arrived,
        }
    }

    /// Calls a background method.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.port
            .request(RpcRequest::new(method, params))
            .await?
            .into_result()
    }

    /// Sends `brume_run(subrequest, mouse)`.
    pub async fn run(&self, subrequest: RpcPreRequest) -> Result<Value> {
        self.call("brume_run", json!([subrequest, Mouse::default()]))
            .await
    }

    /// Waits for the first inbound request named `method`.
    pub async fn wait_for(&self, method: &str) -> RpcRequest {
        timeout(WAIT, async {
            loop {
                let arrived = self.arrived.notified();
                if let Some(request) = self.find(method) {
                    return request;
                }
                arrived.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {method} received"))
    }

    pub fn received_count(&self, method: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    fn find(&self, method: &str) -> Option<RpcRequest> {
        self.received
            .lock()
            .iter()
            .find(|request| request.method == method)
            .cloned()
    }
}

/// A content-script port for `origin` and the page behind it.
pub fn script_pair(origin: &str) -> (Port, FakePeer) {
    let (script, page) = Port::pair(PortKind::Background, PortKind::Script);
    (script, FakePeer::attach(page, Some(origin.to_string())))
}

/// A foreground port and the UI behind it.
pub fn foreground_pair() -> (Port, FakePeer) {
    let (foreground, ui) = Port::pair(PortKind::Background, PortKind::Foreground);
    (foreground, FakePeer::attach(ui, None))
}

// ============================================================================
// TestBed
// ============================================================================

/// One fake of each collaborator.
pub struct TestBed {
    pub circuits: Arc<FakeCircuitFactory>,
    pub relay: Arc<FakeRelayProtocol>,
    pub windows: Arc<FakeWindowManager>,
    pub badge: Arc<FakeBadge>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub keyring: Arc<FakeKeyring>,
    popups: Arc<Mutex<Vec<Port>>>,
}

impl TestBed {
    pub fn new() -> Self {
        init_logging();
        Self {
            circuits: Arc::new(FakeCircuitFactory::new()),
            relay: Arc::new(FakeRelayProtocol::new()),
            windows: Arc::new(FakeWindowManager::new()),
            badge: Arc::new(FakeBadge::default()),
            credentials: Arc::new(MemoryCredentialStore::default()),
            keyring: Arc::new(FakeKeyring::default()),
            popups: Arc::default(),
        }
    }

    /// Options with small pools and short handshakes.
    pub fn options() -> BackgroundOptions {
        BackgroundOptions::new()
            .with_circuit_capacity(4)
            .with_eth_brume_capacity(2)
            .with_relay_bundle_capacity(1)
            .with_circuits_per_brume(1)
            .with_popup_hello_timeout(Duration::from_secs(2))
    }

    /// A builder with every collaborator set.
    pub fn builder(&self) -> OrchestratorBuilder {
        Orchestrator::builder()
            .options(Self::options())
            .global_storage(Arc::new(MemoryStorage::new()))
            .circuit_factory(self.circuits.clone())
            .relay_protocol(self.relay.clone())
            .window_manager(self.windows.clone())
            .badge(self.badge.clone())
            .credential_store(self.credentials.clone())
            .keyring(self.keyring.clone())
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.builder().build().expect("build")
    }

    /// Creates a user with password `password`.
    pub async fn create_user(&self, orchestrator: &Orchestrator, name: &str) -> UserId {
        let uuid = UserId::generate();
        orchestrator
            .create_user(&UserInit {
                uuid,
                name: name.to_string(),
                password: "password".to_string(),
                extra: Map::new(),
            })
            .await
            .expect("create user");
        uuid
    }

    /// An orchestrator with a freshly created user logged in.
    pub async fn logged_in(&self) -> Orchestrator {
        let orchestrator = self.orchestrator();
        let user = self.create_user(&orchestrator, "alice").await;
        orchestrator.login(user, "password").await.expect("login");
        orchestrator
    }

    /// Stores a wallet for the logged-in user.
    pub async fn create_wallet(&self, orchestrator: &Orchestrator, name: &str) -> WalletData {
        let uuid = WalletId::generate();
        let wallet = WalletData {
            uuid,
            name: name.to_string(),
            address: format!("0x{}", hex::encode(&uuid.as_uuid().as_bytes()[..])),
            material: Map::new(),
        };

        orchestrator
            .user_session()
            .expect("user")
            .storage
            .set_as(&keys::wallet(uuid), &wallet)
            .await
            .expect("store wallet");
        wallet
    }

    pub fn mainnet(&self) -> EthereumChain {
        ChainTable::default().resolve(1).expect("mainnet").clone()
    }

    /// A mainnet context for a new wallet, outside any session.
    pub async fn ethereum_context(&self) -> EthereumContext {
        let orchestrator = self.logged_in().await;
        let wallet = self.create_wallet(&orchestrator, "main").await;
        orchestrator
            .ethereum_context(wallet.uuid, 1)
            .await
            .expect("context")
    }

    /// A context inside a new persistent session for `origin`.
    pub async fn session_context(
        &self,
        orchestrator: &Orchestrator,
        origin: &str,
    ) -> (EthereumContext, WalletData) {
        let wallet = self.create_wallet(orchestrator, "main").await;
        let mut context = orchestrator
            .ethereum_context(wallet.uuid, 1)
            .await
            .expect("context");

        let session = Session::direct(origin, true, wallet.wallet_ref(), self.mainnet());
        context
            .user
            .storage
            .set_as(&keys::session(session.id), &session)
            .await
            .expect("store session");
        context.session = Some(session);

        (context, wallet)
    }

    /// Answers every popup with a hello from a fresh UI port.
    pub fn auto_hello(&self, orchestrator: &Orchestrator) {
        let popup = orchestrator.popup().clone();
        let peers = Arc::clone(&self.popups);
        self.windows.on_create(move |_| {
            let (port, peer) = Port::pair(PortKind::Background, PortKind::Foreground);
            popup.hello(port);
            peers.lock().push(peer);
        });
    }

    /// Approves the next queued request with `result`.
    pub fn approve_next(
        &self,
        orchestrator: &Orchestrator,
        result: Value,
    ) -> impl Future<Output = AppRequest> + use<> {
        let orchestrator = orchestrator.clone();
        async move {
            let request = next_request(&orchestrator).await;
            orchestrator
                .correlator()
                .respond(RpcResponse::ok(request.id, result));
            request
        }
    }

    /// Rejects the next queued request.
    pub fn reject_next(&self, orchestrator: &Orchestrator) -> impl Future<Output = ()> + use<> {
        let orchestrator = orchestrator.clone();
        async move {
            let request = next_request(&orchestrator).await;
            orchestrator.correlator().respond(RpcResponse::err(
                request.id,
                RpcError::new(4001, "User rejected the request"),
            ));
        }
    }
}

/// Installs a test-writer subscriber once per test binary.
///
/// `RUST_LOG` overrides the default `brume_background=warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("brume_background=warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Waits for the first request of the approval queue.
async fn next_request(orchestrator: &Orchestrator) -> AppRequest {
    timeout(WAIT, async {
        loop {
            let queue: Vec<AppRequestRef> = orchestrator
                .global()
                .get_as(keys::REQUESTS)
                .await
                .expect("read queue")
                .unwrap_or_default();

            if let Some(first) = queue.first()
                && let Some(request) = orchestrator
                    .global()
                    .get_as::<AppRequest>(&keys::request(first.id))
                    .await
                    .expect("read request")
            {
                return request;
            }

            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("no approval request queued")
}
