//! Transfer Error Types

use rust_decimal::Decimal;
use thiserror::Error;

use super::adapters::AdapterError;
use super::state::{Direction, TransferState};

/// Transfer error types
///
/// Validation errors are returned to the caller and never retried.
/// Adapter errors raised during reconciliation are recorded on the
/// transfer instead of being returned past the batch.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount must be between ${min} and ${max}")]
    AmountOutOfRange { min: Decimal, max: Decimal },

    #[error("Owner address is required")]
    InvalidOwner,

    #[error("Operation not supported for {0} transfers")]
    WrongDirection(Direction),

    #[error("Transfer cannot be {action} in state {state}")]
    InvalidState {
        state: TransferState,
        action: &'static str,
    },

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    // === External Errors ===
    #[error("External service error: {0}")]
    Adapter(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            TransferError::InvalidOwner => "INVALID_OWNER",
            TransferError::WrongDirection(_) => "WRONG_DIRECTION",
            TransferError::InvalidState { .. } => "INVALID_STATE",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::Adapter(_) => "EXTERNAL_SERVICE_ERROR",
            TransferError::DatabaseError(_) => "DATABASE_ERROR",
            TransferError::SystemError(_) => "SYSTEM_ERROR",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidAmount
            | TransferError::AmountOutOfRange { .. }
            | TransferError::InvalidOwner
            | TransferError::WrongDirection(_)
            | TransferError::InvalidState { .. } => 400,
            TransferError::TransferNotFound(_) => 404,
            TransferError::Adapter(_) => 502,
            TransferError::DatabaseError(_)
            | TransferError::SystemError(_)
            | TransferError::InvalidStateTransition(_) => 500,
        }
    }

    /// Validation errors are caller mistakes: reject, never retry
    pub fn is_validation(&self) -> bool {
        self.http_status() == 400
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::DatabaseError(e.to_string())
    }
}

impl From<AdapterError> for TransferError {
    fn from(e: AdapterError) -> Self {
        TransferError::Adapter(e.to_string())
    }
}
