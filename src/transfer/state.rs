//! Transfer FSM State Definitions
//!
//! State IDs are stored as SMALLINT. Positive IDs are on-path states,
//! negative IDs are failure terminals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of value movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum Direction {
    /// On-chain stablecoin -> cash pickup
    CashOut = 1,
    /// Cash deposit -> on-chain stablecoin
    CashIn = 2,
}

impl Direction {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Direction::CashOut),
            2 => Some(Direction::CashIn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::CashOut => "CASH_OUT",
            Direction::CashIn => "CASH_IN",
        }
    }

    /// The ordered happy path for this direction, `INITIATED` first.
    pub fn path(&self) -> &'static [TransferState] {
        match self {
            Direction::CashOut => &CASH_OUT_PATH,
            Direction::CashIn => &CASH_IN_PATH,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transfer FSM States
///
/// ```text
/// CASH_OUT: INITIATED → PENDING_KYC → CONFIRMED → BRIDGING → USDC_SENT → PENDING_PICKUP → COMPLETED
/// CASH_IN:  INITIATED → PENDING_KYC → PENDING_DEPOSIT → USDC_RECEIVED → BRIDGING_BACK → COMPLETED
///
/// any non-terminal → FAILED
/// INITIATED | PENDING_KYC | CONFIRMED | PENDING_DEPOSIT → CANCELLED
/// any non-terminal → EXPIRED (rail reported expiry only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransferState {
    /// Record created, rail session not yet opened
    Initiated = 0,
    /// Rail session open, user going through the interactive flow
    PendingKyc = 10,
    /// Cash-out: user reported the interactive flow as done
    Confirmed = 20,
    /// Cash-in: rail waiting for the cash deposit
    PendingDeposit = 25,
    /// Cash-out: bridge + settlement payment in progress
    /// CRITICAL: funds may be in-flight
    Bridging = 30,
    /// Cash-in: rail delivered stablecoin on the settlement chain
    UsdcReceived = 35,
    /// Cash-out: rail's account paid on the settlement chain
    UsdcSent = 40,
    /// Cash-in: bridging stablecoin back to the owner
    BridgingBack = 45,
    /// Cash-out: cash ready for pickup
    PendingPickup = 50,

    /// Terminal: value delivered
    Completed = 100,
    /// Terminal: adapter error, rail error or retry exhaustion
    Failed = -10,
    /// Terminal: cancelled by the user
    Cancelled = -20,
    /// Terminal: rail session expired
    Expired = -30,
}

const CASH_OUT_PATH: [TransferState; 7] = [
    TransferState::Initiated,
    TransferState::PendingKyc,
    TransferState::Confirmed,
    TransferState::Bridging,
    TransferState::UsdcSent,
    TransferState::PendingPickup,
    TransferState::Completed,
];

const CASH_IN_PATH: [TransferState; 6] = [
    TransferState::Initiated,
    TransferState::PendingKyc,
    TransferState::PendingDeposit,
    TransferState::UsdcReceived,
    TransferState::BridgingBack,
    TransferState::Completed,
];

/// Every state, in ID order. Handy for exhaustive checks.
pub const ALL_STATES: [TransferState; 13] = [
    TransferState::Expired,
    TransferState::Cancelled,
    TransferState::Failed,
    TransferState::Initiated,
    TransferState::PendingKyc,
    TransferState::Confirmed,
    TransferState::PendingDeposit,
    TransferState::Bridging,
    TransferState::UsdcReceived,
    TransferState::UsdcSent,
    TransferState::BridgingBack,
    TransferState::PendingPickup,
    TransferState::Completed,
];

/// Stored IDs of the terminal states (used in SQL filters)
pub const TERMINAL_STATE_IDS: [i16; 4] = [
    TransferState::Completed as i16,
    TransferState::Failed as i16,
    TransferState::Cancelled as i16,
    TransferState::Expired as i16,
];

impl TransferState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed
                | TransferState::Failed
                | TransferState::Cancelled
                | TransferState::Expired
        )
    }

    /// Cancellation is only allowed before any bridge or settlement action
    #[inline]
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TransferState::Initiated
                | TransferState::PendingKyc
                | TransferState::Confirmed
                | TransferState::PendingDeposit
        )
    }

    /// Inside a compound step: funds may have moved without the record
    /// reflecting it yet.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferState::Bridging | TransferState::UsdcReceived | TransferState::BridgingBack
        )
    }

    /// Position on the direction's happy path, if the state lies on it
    pub fn rank(&self, direction: Direction) -> Option<usize> {
        direction.path().iter().position(|s| s == self)
    }

    /// Whether `self -> next` is a legal forward move for `direction`.
    ///
    /// Terminal states never move. Same-state writes are not transitions
    /// and return false here.
    pub fn can_transition(&self, direction: Direction, next: TransferState) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match next {
            TransferState::Failed | TransferState::Expired => true,
            TransferState::Cancelled => self.is_cancellable(),
            _ => match (self.rank(direction), next.rank(direction)) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        ALL_STATES.iter().copied().find(|s| s.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Initiated => "INITIATED",
            TransferState::PendingKyc => "PENDING_KYC",
            TransferState::Confirmed => "CONFIRMED",
            TransferState::PendingDeposit => "PENDING_DEPOSIT",
            TransferState::Bridging => "BRIDGING",
            TransferState::UsdcReceived => "USDC_RECEIVED",
            TransferState::UsdcSent => "USDC_SENT",
            TransferState::BridgingBack => "BRIDGING_BACK",
            TransferState::PendingPickup => "PENDING_PICKUP",
            TransferState::Completed => "COMPLETED",
            TransferState::Failed => "FAILED",
            TransferState::Cancelled => "CANCELLED",
            TransferState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferState::from_id(value).ok_or(())
    }
}
