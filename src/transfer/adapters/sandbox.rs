//! Sandbox adapters
//!
//! Deterministic stand-ins used when an adapter section runs in
//! `mode: sandbox`. No network calls. Refused by `is_enabled` in production.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use super::{
    AdapterError, Bridge, BridgeDirection, BridgeQuote, BridgeReceipt, DepositSession, FiatRail,
    RailStatus, RailTransaction, Settlement, WithdrawSession,
};

/// Sandbox rail fee: 3%
const RAIL_FEE_PERCENT: Decimal = Decimal::from_parts(3, 0, 0, false, 0);
/// Sandbox bridge fee: 0.3%
const BRIDGE_FEE_PERCENT: Decimal = Decimal::from_parts(3, 0, 0, false, 1);
const BRIDGE_ETA_SECS: u64 = 180;
const SANDBOX_DESTINATION: &str = "GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5";

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    (amount * percent / Decimal::ONE_HUNDRED).round_dp(2)
}

/// Rail that opens sessions immediately and always reports
/// `pending_user_transfer_start` with the session's amount.
pub struct SandboxRail {
    sessions: DashMap<String, Decimal>,
}

impl SandboxRail {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl Default for SandboxRail {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FiatRail for SandboxRail {
    fn name(&self) -> &'static str {
        "sandbox-rail"
    }

    fn is_live(&self) -> bool {
        false
    }

    async fn authenticate(&self, correlation_id: &str) -> Result<String, AdapterError> {
        Ok(format!("sandbox-token-{}", correlation_id))
    }

    async fn open_withdraw(
        &self,
        _token: &str,
        amount: Decimal,
    ) -> Result<WithdrawSession, AdapterError> {
        let session_id = format!("MOCK_WD_{}", short_id());
        self.sessions.insert(session_id.clone(), amount);
        debug!(session_id = %session_id, %amount, "sandbox withdraw opened");
        Ok(WithdrawSession {
            url: format!("https://sandbox.invalid/withdraw?id={}", session_id),
            memo: Some(session_id.clone()),
            destination: Some(SANDBOX_DESTINATION.to_string()),
            session_id,
        })
    }

    async fn open_deposit(
        &self,
        _token: &str,
        amount: Decimal,
    ) -> Result<DepositSession, AdapterError> {
        let session_id = format!("MOCK_DEP_{}", short_id());
        self.sessions.insert(session_id.clone(), amount);
        debug!(session_id = %session_id, %amount, "sandbox deposit opened");
        Ok(DepositSession {
            url: format!("https://sandbox.invalid/deposit?id={}", session_id),
            session_id,
        })
    }

    async fn poll_status(
        &self,
        _token: &str,
        session_id: &str,
    ) -> Result<RailTransaction, AdapterError> {
        let amount = self
            .sessions
            .get(session_id)
            .map(|a| *a)
            .ok_or_else(|| AdapterError::Http {
                status: 404,
                body: format!("unknown session {}", session_id),
            })?;
        let mut tx = RailTransaction::with_status(session_id, RailStatus::PendingUserTransferStart);
        tx.amount_in = Some(amount);
        tx.amount_fee = Some(percent_of(amount, RAIL_FEE_PERCENT));
        Ok(tx)
    }
}

/// Bridge that charges 0.3% and settles in three minutes
pub struct SandboxBridge;

impl SandboxBridge {
    pub fn new() -> Self {
        Self
    }

    fn receipt(prefix: &str) -> BridgeReceipt {
        BridgeReceipt {
            operation_id: format!("{}_{}", prefix, short_id()),
            source_tx: format!("sandbox_tx_{}", short_id()),
            eta_secs: BRIDGE_ETA_SECS,
        }
    }
}

impl Default for SandboxBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bridge for SandboxBridge {
    fn name(&self) -> &'static str {
        "sandbox-bridge"
    }

    fn is_live(&self) -> bool {
        false
    }

    async fn bridge_forward(&self, amount: Decimal) -> Result<BridgeReceipt, AdapterError> {
        debug!(%amount, "sandbox bridge forward");
        Ok(Self::receipt("MOCK_FWD"))
    }

    async fn bridge_back(
        &self,
        amount: Decimal,
        destination: &str,
    ) -> Result<BridgeReceipt, AdapterError> {
        debug!(%amount, destination, "sandbox bridge back");
        Ok(Self::receipt("MOCK_BACK"))
    }

    async fn quote_fee(
        &self,
        amount: Decimal,
        _direction: BridgeDirection,
    ) -> Result<BridgeQuote, AdapterError> {
        Ok(BridgeQuote {
            fee: percent_of(amount, BRIDGE_FEE_PERCENT),
            fee_percent: BRIDGE_FEE_PERCENT,
            eta_secs: BRIDGE_ETA_SECS,
        })
    }
}

/// Settlement that accepts every payment
pub struct SandboxSettlement;

impl SandboxSettlement {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SandboxSettlement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Settlement for SandboxSettlement {
    fn name(&self) -> &'static str {
        "sandbox-settlement"
    }

    fn is_live(&self) -> bool {
        false
    }

    async fn pay(
        &self,
        destination: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<String, AdapterError> {
        if destination.is_empty() {
            return Err(AdapterError::Rejected("missing destination".to_string()));
        }
        debug!(destination, %amount, memo, "sandbox payment");
        Ok(format!("sandbox_pay_{}", short_id()))
    }
}
