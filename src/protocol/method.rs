//! Method names understood by the orchestrator.
//!
//! Methods are plain strings on the wire. These enums give them a closed,
//! matchable form; unknown names parse to `None` so the next router can try.
//!
//! | Source | Enum | Examples |
//! |--------|------|----------|
//! | Content script | [`ContentMethod`] | `brume_run` |
//! | Foreground UI | [`ForegroundMethod`] | `brume_login`, `brume_respond` |
//! | Dapp sub-request | [`EthereumMethod`] | `eth_sendTransaction`, `personal_sign` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Parsing helper
// ============================================================================

fn parse_name<T: for<'de> Deserialize<'de>>(method: &str) -> Option<T> {
    serde_json::from_value(Value::String(method.to_string())).ok()
}

// ============================================================================
// ContentMethod
// ============================================================================

/// Methods sent by content scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentMethod {
    /// Run a dapp sub-request: params `[subrequest, mouse]`.
    #[serde(rename = "brume_run")]
    Run,
}

impl ContentMethod {
    /// Parses a method name.
    #[inline]
    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        parse_name(method)
    }
}

// ============================================================================
// ForegroundMethod
// ============================================================================

/// Methods sent by foreground UIs (popup, tab, web page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForegroundMethod {
    /// Get the last UI path.
    #[serde(rename = "brume_getPath")]
    GetPath,

    /// Set the last UI path: `[path]`.
    #[serde(rename = "brume_setPath")]
    SetPath,

    /// Log in: `[uuid, password]`.
    #[serde(rename = "brume_login")]
    Login,

    /// Create a user: `[init]`.
    #[serde(rename = "brume_createUser")]
    CreateUser,

    /// Create a seed: `[seed]`.
    #[serde(rename = "brume_createSeed")]
    CreateSeed,

    /// Create a wallet: `[wallet]`.
    #[serde(rename = "brume_createWallet")]
    CreateWallet,

    /// Disconnect a session: `[sessionId]`.
    #[serde(rename = "brume_disconnect")]
    Disconnect,

    /// Read a key from global storage: `[cacheKey]`.
    #[serde(rename = "brume_get_global")]
    GetGlobal,

    /// Read a key from user storage: `[cacheKey]`.
    #[serde(rename = "brume_get_user")]
    GetUser,

    /// Subscribe to a cache key: `[cacheKey]`.
    #[serde(rename = "brume_subscribe")]
    Subscribe,

    /// Fetch through the cache: `[walletId, chainId, subrequest]`.
    #[serde(rename = "brume_eth_fetch")]
    EthFetch,

    /// Re-index through the cache: `[walletId, chainId, subrequest]`.
    #[serde(rename = "brume_eth_index")]
    EthIndex,

    /// Send a telemetry log over a circuit.
    #[serde(rename = "brume_log")]
    Log,

    /// Open a page in a new tab: `[path]`.
    #[serde(rename = "brume_open")]
    Open,

    /// Encrypt with the user crypter: `[plainBase64]`.
    #[serde(rename = "brume_encrypt")]
    Encrypt,

    /// Decrypt with the user crypter: `[ivBase64, cipherBase64]`.
    #[serde(rename = "brume_decrypt")]
    Decrypt,

    /// Pair with a relay URI: `[uri, walletId]`.
    #[serde(rename = "brume_wc_connect")]
    WcConnect,

    /// Alias of [`ForegroundMethod::WcConnect`].
    #[serde(rename = "brume_wc_status")]
    WcStatus,

    /// Popup handshake.
    #[serde(rename = "popup_hello")]
    PopupHello,

    /// Approval answer: `[response]`.
    #[serde(rename = "brume_respond")]
    Respond,
}

impl ForegroundMethod {
    /// Parses a method name.
    #[inline]
    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        parse_name(method)
    }

    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetPath => "brume_getPath",
            Self::SetPath => "brume_setPath",
            Self::Login => "brume_login",
            Self::CreateUser => "brume_createUser",
            Self::CreateSeed => "brume_createSeed",
            Self::CreateWallet => "brume_createWallet",
            Self::Disconnect => "brume_disconnect",
            Self::GetGlobal => "brume_get_global",
            Self::GetUser => "brume_get_user",
            Self::Subscribe => "brume_subscribe",
            Self::EthFetch => "brume_eth_fetch",
            Self::EthIndex => "brume_eth_index",
            Self::Log => "brume_log",
            Self::Open => "brume_open",
            Self::Encrypt => "brume_encrypt",
            Self::Decrypt => "brume_decrypt",
            Self::WcConnect => "brume_wc_connect",
            Self::WcStatus => "brume_wc_status",
            Self::PopupHello => "popup_hello",
            Self::Respond => "brume_respond",
        }
    }
}

// ============================================================================
// EthereumMethod
// ============================================================================

/// Dapp methods with dedicated handling.
///
/// Any other name goes through the cache-aware fetch layer unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EthereumMethod {
    /// List accounts, prompting for a session if needed.
    #[serde(rename = "eth_requestAccounts")]
    RequestAccounts,

    /// List accounts of the current session.
    #[serde(rename = "eth_accounts")]
    Accounts,

    /// Sign and broadcast a transaction.
    #[serde(rename = "eth_sendTransaction")]
    SendTransaction,

    /// Sign a personal message.
    #[serde(rename = "personal_sign")]
    PersonalSign,

    /// Sign EIP-712 typed data.
    #[serde(rename = "eth_signTypedData_v4")]
    SignTypedDataV4,

    /// Switch the session chain.
    #[serde(rename = "wallet_switchEthereumChain")]
    SwitchEthereumChain,

    /// Native balance, cached under a dedicated key.
    #[serde(rename = "eth_getBalance")]
    GetBalance,
}

impl EthereumMethod {
    /// Parses a method name.
    #[inline]
    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        parse_name(method)
    }
}

// ============================================================================
// Tests
// ============================================================================
