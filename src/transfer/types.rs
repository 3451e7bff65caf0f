//! Transfer Core Types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::state::{Direction, TransferState};

/// Transfer ID - ULID-based, sortable, no coordination needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for TransferId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Transfer record - the aggregate root
///
/// Mutated only through state-guarded writes (see `TransferStore::update_if`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: TransferId,
    pub direction: Direction,
    /// Wallet address on the custody chain
    pub owner: String,

    /// Requested amount in USD
    pub amount: Decimal,
    /// Fee charged by the rail, once reported
    pub rail_fee: Option<Decimal>,
    /// Amount delivered, once reported
    pub net_amount: Option<Decimal>,

    pub rail_session_id: Option<String>,
    pub rail_url: Option<String>,
    /// Cash-out only: memo the rail expects on the settlement payment
    pub rail_memo: Option<String>,
    /// Cash-out only: rail's receiving account on the settlement chain
    pub rail_destination: Option<String>,
    pub bridge_operation_id: Option<String>,
    pub bridge_source_tx: Option<String>,
    pub settlement_tx: Option<String>,
    /// Remittance reference number shown to the user at pickup
    pub reference_number: Option<String>,

    pub state: TransferState,
    pub error_message: Option<String>,
    /// Set when a compound step failed after funds may have moved
    pub manual_review: bool,
    pub retry_count: i32,
    /// Optimistic concurrency counter, bumped by every stored write
    pub version: i64,

    pub last_polled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    /// Create a new record in INITIATED state
    pub fn new(direction: Direction, owner: &str, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: TransferId::new(),
            direction,
            owner: owner.to_string(),
            amount,
            rail_fee: None,
            net_amount: None,
            rail_session_id: None,
            rail_url: None,
            rail_memo: None,
            rail_destination: None,
            bridge_operation_id: None,
            bridge_source_tx: None,
            settlement_tx: None,
            reference_number: None,
            state: TransferState::Initiated,
            error_message: None,
            manual_review: false,
            retry_count: 0,
            version: 0,
            last_polled_at: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Whether the poll cooldown has elapsed
    pub fn is_due(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_polled_at {
            None => true,
            Some(at) => now - at >= cooldown,
        }
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] {} owner={} amount={} state={} retries={}",
            self.id, self.direction, self.owner, self.amount, self.state, self.retry_count
        )
    }
}

/// Advisory fee breakdown. Never stored against a transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub amount: Decimal,
    pub direction: Direction,
    pub bridge_fee: Decimal,
    pub bridge_fee_percent: Decimal,
    pub rail_fee_estimate: Decimal,
    pub total_fees: Decimal,
    pub net_amount: Decimal,
    /// Bridge ETA plus the rail processing buffer
    pub estimated_seconds: u64,
}
