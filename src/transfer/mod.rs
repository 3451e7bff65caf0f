//! Cash Rail Settlement FSM
//!
//! Moves value between an on-chain stablecoin balance and a cash pickup or
//! deposit network, across three external collaborators:
//! - **Fiat rail** (SEP-24 anchor): interactive KYC sessions, cash side
//! - **Bridge** (Allbridge): stablecoin between the custody chain and the settlement chain
//! - **Settlement** (Stellar Horizon): pays the rail's account on the settlement chain
//!
//! # Architecture
//!
//! Each transfer is a persistent FSM record. Callers create, confirm and
//! cancel; a lock-guarded reconcile worker advances everything else by
//! polling the rail.
//!
//! # State Machine
//!
//! ```text
//! CASH_OUT: INITIATED → PENDING_KYC → CONFIRMED → BRIDGING → USDC_SENT → PENDING_PICKUP → COMPLETED
//! CASH_IN:  INITIATED → PENDING_KYC → PENDING_DEPOSIT → USDC_RECEIVED → BRIDGING_BACK → COMPLETED
//!
//!              any non-terminal → FAILED | EXPIRED
//!   INITIATED | PENDING_KYC | CONFIRMED | PENDING_DEPOSIT → CANCELLED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Guarded Writes**: every write is conditional on the state and version read
//! 2. **Persist-Before-Call**: BRIDGING / BRIDGING_BACK are stored before the bridge is called
//! 3. **No Re-drive**: a record found mid compound step is failed for manual review
//! 4. **Bounded Retries**: poll failures stop at `max_retries`

pub mod adapters;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod lock;
pub mod memory;
pub mod schema;
pub mod state;
pub mod token_cache;
pub mod types;
pub mod worker;


// Re-exports for convenience
pub use adapters::{Adapters, AdapterError};
pub use coordinator::{BatchReport, ReconcileOutcome, SettlementOrchestrator};
pub use db::{PgTransferStore, TransferStore};
pub use error::TransferError;
pub use lock::{MemoryReconcileLock, PgReconcileLock, ReconcileLock};
pub use memory::MemoryTransferStore;
pub use schema::init_schema;
pub use state::{Direction, TransferState};
pub use token_cache::TokenCache;
pub use types::{FeeEstimate, TransferId, TransferRecord};
pub use worker::ReconcileWorker;
