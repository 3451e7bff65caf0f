//! External Collaborator Adapters
//!
//! The orchestrator only sees these traits and the normalized types below.
//! Every loosely-typed external payload is decoded into them at the
//! adapter boundary.
//!
//! - [`FiatRail`] - remittance anchor (SEP-10 auth + SEP-24 interactive flows)
//! - [`Bridge`] - cross-chain stablecoin bridge
//! - [`Settlement`] - payment submission on the settlement chain

pub mod anchor;
pub mod bridge;
pub mod error;
pub mod horizon;
pub mod sandbox;
pub mod stellar;

#[cfg(test)]
pub mod mock;

pub use anchor::Sep24Anchor;
pub use bridge::AllbridgeClient;
pub use error::AdapterError;
pub use horizon::HorizonSettlement;
pub use sandbox::{SandboxBridge, SandboxRail, SandboxSettlement};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

use crate::config::{AdapterMode, AppConfig};

// ============================================================================
// Normalized rail types
// ============================================================================

/// Rail-side transaction status, closed over the SEP-24 vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RailStatus {
    Incomplete,
    /// Cash-out: anchor waits for our on-chain payment.
    /// Cash-in: anchor waits for the user's cash.
    PendingUserTransferStart,
    /// Cash-out: payment received, cash ready for pickup
    PendingUserTransferComplete,
    PendingExternal,
    PendingAnchor,
    PendingStellar,
    PendingTrust,
    PendingUser,
    Completed,
    Refunded,
    Expired,
    Error,
    NoMarket,
    TooSmall,
    TooLarge,
    /// Anything we don't recognize. Logged and treated as a no-op.
    Unknown(String),
}

impl RailStatus {
    /// Decode a wire status string
    pub fn from_wire(status: &str) -> Self {
        match status {
            "incomplete" => RailStatus::Incomplete,
            "pending_user_transfer_start" => RailStatus::PendingUserTransferStart,
            "pending_user_transfer_complete" => RailStatus::PendingUserTransferComplete,
            "pending_external" => RailStatus::PendingExternal,
            "pending_anchor" => RailStatus::PendingAnchor,
            "pending_stellar" => RailStatus::PendingStellar,
            "pending_trust" => RailStatus::PendingTrust,
            "pending_user" => RailStatus::PendingUser,
            "completed" => RailStatus::Completed,
            "refunded" => RailStatus::Refunded,
            "expired" => RailStatus::Expired,
            "error" => RailStatus::Error,
            "no_market" => RailStatus::NoMarket,
            "too_small" => RailStatus::TooSmall,
            "too_large" => RailStatus::TooLarge,
            other => RailStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RailStatus::Incomplete => "incomplete",
            RailStatus::PendingUserTransferStart => "pending_user_transfer_start",
            RailStatus::PendingUserTransferComplete => "pending_user_transfer_complete",
            RailStatus::PendingExternal => "pending_external",
            RailStatus::PendingAnchor => "pending_anchor",
            RailStatus::PendingStellar => "pending_stellar",
            RailStatus::PendingTrust => "pending_trust",
            RailStatus::PendingUser => "pending_user",
            RailStatus::Completed => "completed",
            RailStatus::Refunded => "refunded",
            RailStatus::Expired => "expired",
            RailStatus::Error => "error",
            RailStatus::NoMarket => "no_market",
            RailStatus::TooSmall => "too_small",
            RailStatus::TooLarge => "too_large",
            RailStatus::Unknown(s) => s,
        }
    }

    /// Rail gave up on the transaction (anything but expiry)
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RailStatus::Error
                | RailStatus::Refunded
                | RailStatus::NoMarket
                | RailStatus::TooSmall
                | RailStatus::TooLarge
        )
    }
}

impl fmt::Display for RailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Polled rail transaction, already normalized
#[derive(Debug, Clone, PartialEq)]
pub struct RailTransaction {
    pub session_id: String,
    pub status: RailStatus,
    pub amount_in: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub amount_fee: Option<Decimal>,
    /// Cash-out: account to pay on the settlement chain
    pub destination: Option<String>,
    pub memo: Option<String>,
    /// Remittance reference number
    pub reference_id: Option<String>,
}

impl RailTransaction {
    pub fn with_status(session_id: &str, status: RailStatus) -> Self {
        Self {
            session_id: session_id.to_string(),
            status,
            amount_in: None,
            amount_out: None,
            amount_fee: None,
            destination: None,
            memo: None,
            reference_id: None,
        }
    }
}

/// Opened interactive withdraw (cash-out) flow
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawSession {
    pub session_id: String,
    pub url: String,
    pub memo: Option<String>,
    pub destination: Option<String>,
}

/// Opened interactive deposit (cash-in) flow
#[derive(Debug, Clone, PartialEq)]
pub struct DepositSession {
    pub session_id: String,
    pub url: String,
}

// ============================================================================
// Normalized bridge types
// ============================================================================

/// Which way value crosses the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDirection {
    /// Custody chain -> settlement chain (cash-out)
    Forward,
    /// Settlement chain -> custody chain (cash-in)
    Back,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeReceipt {
    pub operation_id: String,
    pub source_tx: String,
    pub eta_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeQuote {
    pub fee: Decimal,
    pub fee_percent: Decimal,
    pub eta_secs: u64,
}

// ============================================================================
// Ports
// ============================================================================

/// Remittance anchor
#[async_trait]
pub trait FiatRail: Send + Sync {
    fn name(&self) -> &'static str;

    /// False for sandbox implementations
    fn is_live(&self) -> bool;

    /// Obtain a bearer token. `correlation_id` ties the session to a transfer.
    async fn authenticate(&self, correlation_id: &str) -> Result<String, AdapterError>;

    async fn open_withdraw(
        &self,
        token: &str,
        amount: Decimal,
    ) -> Result<WithdrawSession, AdapterError>;

    async fn open_deposit(&self, token: &str, amount: Decimal)
    -> Result<DepositSession, AdapterError>;

    async fn poll_status(
        &self,
        token: &str,
        session_id: &str,
    ) -> Result<RailTransaction, AdapterError>;
}

/// Cross-chain bridge
#[async_trait]
pub trait Bridge: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_live(&self) -> bool;

    /// Custody chain -> settlement chain, into our settlement account
    async fn bridge_forward(&self, amount: Decimal) -> Result<BridgeReceipt, AdapterError>;

    /// Settlement chain -> custody chain, to `destination`
    async fn bridge_back(
        &self,
        amount: Decimal,
        destination: &str,
    ) -> Result<BridgeReceipt, AdapterError>;

    async fn quote_fee(
        &self,
        amount: Decimal,
        direction: BridgeDirection,
    ) -> Result<BridgeQuote, AdapterError>;
}

/// Settlement-chain payment submission
#[async_trait]
pub trait Settlement: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_live(&self) -> bool;

    /// Pay `amount` to `destination` with `memo`; returns the tx reference
    async fn pay(
        &self,
        destination: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<String, AdapterError>;
}

/// The three collaborators the orchestrator drives
#[derive(Clone)]
pub struct Adapters {
    pub rail: Arc<dyn FiatRail>,
    pub bridge: Arc<dyn Bridge>,
    pub settlement: Arc<dyn Settlement>,
}

impl Adapters {
    pub fn sandbox() -> Self {
        Self {
            rail: Arc::new(SandboxRail::new()),
            bridge: Arc::new(SandboxBridge::new()),
            settlement: Arc::new(SandboxSettlement::new()),
        }
    }

    /// Build adapters according to each section's `mode`
    pub fn from_config(config: &AppConfig) -> Result<Self, AdapterError> {
        let rail: Arc<dyn FiatRail> = match config.rail.mode {
            AdapterMode::Sandbox => Arc::new(SandboxRail::new()),
            AdapterMode::Live => Arc::new(Sep24Anchor::new(&config.rail)?),
        };
        let bridge: Arc<dyn Bridge> = match config.bridge.mode {
            AdapterMode::Sandbox => Arc::new(SandboxBridge::new()),
            AdapterMode::Live => Arc::new(AllbridgeClient::new(&config.bridge)?),
        };
        let settlement: Arc<dyn Settlement> = match config.settlement.mode {
            AdapterMode::Sandbox => Arc::new(SandboxSettlement::new()),
            AdapterMode::Live => Arc::new(HorizonSettlement::new(&config.settlement)?),
        };
        Ok(Self {
            rail,
            bridge,
            settlement,
        })
    }

    pub fn all_live(&self) -> bool {
        self.rail.is_live() && self.bridge.is_live() && self.settlement.is_live()
    }
}
