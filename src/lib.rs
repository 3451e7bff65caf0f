//! Cash Rail - settlement orchestrator between on-chain stablecoin and cash
//!
//! # Modules
//!
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - tracing subscriber setup
//! - [`transfer`] - Transfer FSM, reconcile worker and external adapters

pub mod config;
pub mod logging;
pub mod transfer;

pub use config::AppConfig;
pub use transfer::{
    Direction, ReconcileWorker, SettlementOrchestrator, TransferError, TransferRecord,
    TransferState,
};
