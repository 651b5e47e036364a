//! Per-request Ethereum context.

use crate::circuit::EthBrume;
use crate::entities::{EthereumChain, Session, WalletData};
use crate::session::UserSession;

/// Everything a wallet action needs, built fresh for each request.
#[derive(Debug, Clone)]
pub struct EthereumContext {
    /// Logged-in user.
    pub user: UserSession,
    /// Session the request came through, if any.
    pub session: Option<Session>,
    /// Acting wallet.
    pub wallet: WalletData,
    /// Target chain.
    pub chain: EthereumChain,
    /// The wallet's circuit bundle.
    pub brume: EthBrume,
}

impl EthereumContext {
    /// Returns the origin of the session, if any.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.origin.as_str())
    }
}
