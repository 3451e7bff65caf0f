//! Settlement Orchestrator
//!
//! Drives transfer records through the FSM. Creation, confirmation and
//! cancellation run synchronously for the caller; everything after that is
//! advanced by `reconcile_record`, at most one step (or one compound step)
//! per visit.
//!
//! Every write goes through `transition`, which checks the FSM and performs a
//! state+version guarded update. A lost guard ends the visit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::adapters::{Adapters, AdapterError, BridgeDirection, RailStatus, RailTransaction};
use super::db::TransferStore;
use super::error::TransferError;
use super::state::{Direction, TransferState};
use super::token_cache::TokenCache;
use super::types::{FeeEstimate, TransferId, TransferRecord};
use crate::config::OrchestratorConfig;

pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// Upper bound for `list_transfers`
pub const LIST_LIMIT: usize = 50;

/// What a single reconcile visit did to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Record already terminal
    Terminal,
    /// Polled within the cooldown; untouched
    CoolingDown,
    /// Polled, state unchanged
    Polled(TransferState),
    Advanced {
        from: TransferState,
        to: TransferState,
    },
    /// Adapter error; retry count is now the given value
    RetryScheduled(i32),
    /// Another actor wrote the record first
    Conflict,
}

/// Tally of one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub advanced: usize,
    pub polled: usize,
    pub skipped: usize,
    pub retried: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Advanced { .. } => self.advanced += 1,
            ReconcileOutcome::Polled(_) => self.polled += 1,
            ReconcileOutcome::Terminal | ReconcileOutcome::CoolingDown => self.skipped += 1,
            ReconcileOutcome::RetryScheduled(_) => self.retried += 1,
            ReconcileOutcome::Conflict => self.conflicts += 1,
        }
    }
}

fn token_key(id: TransferId) -> String {
    format!("rail:{}", id)
}

fn outcome_of(from: TransferState, record: &TransferRecord, written: bool) -> ReconcileOutcome {
    if !written {
        ReconcileOutcome::Conflict
    } else if record.state == from {
        ReconcileOutcome::Polled(from)
    } else {
        ReconcileOutcome::Advanced {
            from,
            to: record.state,
        }
    }
}

pub struct SettlementOrchestrator {
    store: Arc<dyn TransferStore>,
    adapters: Adapters,
    tokens: Arc<TokenCache>,
    config: OrchestratorConfig,
}

impl SettlementOrchestrator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        adapters: Adapters,
        tokens: Arc<TokenCache>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            tokens,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Sandbox adapters are only acceptable outside production
    pub fn is_enabled(&self) -> bool {
        self.adapters.all_live() || !self.config.production
    }

    // ========================================================================
    // Synchronous operations
    // ========================================================================

    /// Create a transfer and open its rail session.
    ///
    /// Returns the record in `PENDING_KYC`. If the rail call fails the record
    /// is left in `FAILED` and the adapter error is returned.
    pub async fn start_transfer(
        &self,
        direction: Direction,
        owner: &str,
        amount: Decimal,
    ) -> Result<TransferRecord, TransferError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(TransferError::InvalidOwner);
        }
        if amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount);
        }
        let (min, max) = self.config.limits.bounds(direction);
        if amount < min || amount > max {
            return Err(TransferError::AmountOutOfRange { min, max });
        }

        let now = Utc::now();
        let mut record = TransferRecord::new(direction, owner, amount, now);
        self.store.create(&record).await?;
        info!(transfer_id = %record.id, %direction, %amount, "Transfer created");

        match self.open_session(&mut record, now).await {
            Ok(()) => {
                if !self
                    .transition(&mut record, TransferState::PendingKyc, now)
                    .await?
                {
                    return Err(self.conflict_error(record.id, "started").await);
                }
                info!(transfer_id = %record.id, "Rail session opened");
                Ok(record)
            }
            Err(e) => {
                warn!(transfer_id = %record.id, error = %e, "Rail session failed to open");
                record.error_message = Some(e.to_string());
                self.transition(&mut record, TransferState::Failed, now)
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn open_session(
        &self,
        record: &mut TransferRecord,
        now: DateTime<Utc>,
    ) -> Result<(), AdapterError> {
        let token = self.adapters.rail.authenticate(&record.id.to_string()).await?;
        self.tokens.insert(&token_key(record.id), token.clone(), now);

        match record.direction {
            Direction::CashOut => {
                let session = self.adapters.rail.open_withdraw(&token, record.amount).await?;
                record.rail_session_id = Some(session.session_id);
                record.rail_url = Some(session.url);
                record.rail_memo = session.memo;
                record.rail_destination = session.destination;
            }
            Direction::CashIn => {
                let session = self.adapters.rail.open_deposit(&token, record.amount).await?;
                record.rail_session_id = Some(session.session_id);
                record.rail_url = Some(session.url);
            }
        }
        Ok(())
    }

    /// User finished the interactive cash-out flow
    pub async fn confirm_transfer(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        let mut record = self.get_transfer(id).await?;
        if record.direction != Direction::CashOut {
            return Err(TransferError::WrongDirection(record.direction));
        }
        if !matches!(
            record.state,
            TransferState::Initiated | TransferState::PendingKyc
        ) {
            return Err(TransferError::InvalidState {
                state: record.state,
                action: "confirmed",
            });
        }

        let now = Utc::now();
        record.confirmed_at = Some(now);
        if !self
            .transition(&mut record, TransferState::Confirmed, now)
            .await?
        {
            return Err(self.conflict_error(id, "confirmed").await);
        }
        info!(transfer_id = %id, "Transfer confirmed");
        Ok(record)
    }

    /// Cancel before any bridge or settlement action
    pub async fn cancel_transfer(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        let mut record = self.get_transfer(id).await?;
        if !record.state.is_cancellable() {
            return Err(TransferError::InvalidState {
                state: record.state,
                action: "cancelled",
            });
        }

        let now = Utc::now();
        record.cancelled_at = Some(now);
        if !self
            .transition(&mut record, TransferState::Cancelled, now)
            .await?
        {
            return Err(self.conflict_error(id, "cancelled").await);
        }
        self.tokens.invalidate(&token_key(id));
        info!(transfer_id = %id, "Transfer cancelled");
        Ok(record)
    }

    /// Lost a guarded write during a caller-facing operation: report the
    /// state the winner left behind.
    async fn conflict_error(&self, id: TransferId, action: &'static str) -> TransferError {
        match self.store.get(id).await {
            Ok(Some(current)) => TransferError::InvalidState {
                state: current.state,
                action,
            },
            Ok(None) => TransferError::TransferNotFound(id.to_string()),
            Err(e) => e,
        }
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))
    }

    /// Newest first, at most [`LIST_LIMIT`]
    pub async fn list_transfers(
        &self,
        owner: &str,
        direction: Option<Direction>,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        self.store
            .list_by_owner(owner.trim(), direction, LIST_LIMIT)
            .await
    }

    /// Advisory fee breakdown; nothing is stored
    pub async fn estimate_fees(
        &self,
        amount: Decimal,
        direction: Direction,
    ) -> Result<FeeEstimate, TransferError> {
        if amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount);
        }
        let bridge_direction = match direction {
            Direction::CashOut => BridgeDirection::Forward,
            Direction::CashIn => BridgeDirection::Back,
        };
        let quote = self
            .adapters
            .bridge
            .quote_fee(amount, bridge_direction)
            .await?;

        let fees = &self.config.fees;
        let bridge_fee = quote.fee.round_dp(2);
        let rail_fee_estimate = (amount * fees.rail_fee_percent / Decimal::ONE_HUNDRED).round_dp(2);
        let total_fees = bridge_fee + rail_fee_estimate;

        Ok(FeeEstimate {
            amount,
            direction,
            bridge_fee,
            bridge_fee_percent: quote.fee_percent,
            rail_fee_estimate,
            total_fees,
            net_amount: (amount - total_fees).round_dp(2),
            estimated_seconds: quote.eta_secs.saturating_add(fees.rail_buffer_secs),
        })
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Reconcile a single record by id
    pub async fn reconcile_once(
        &self,
        id: TransferId,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, TransferError> {
        let record = self.get_transfer(id).await?;
        self.reconcile_record(record, now).await
    }

    /// Reconcile one batch of due records. Per-record errors are logged and
    /// counted, never returned.
    pub async fn reconcile_batch(&self, now: DateTime<Utc>) -> Result<BatchReport, TransferError> {
        let due = self
            .store
            .find_due(self.config.max_retries, self.config.batch_size)
            .await?;
        let mut report = BatchReport {
            fetched: due.len(),
            ..BatchReport::default()
        };

        for record in due {
            let id = record.id;
            match self.reconcile_record(record, now).await {
                Ok(outcome) => {
                    debug!(transfer_id = %id, ?outcome, "Reconciled");
                    report.record(outcome);
                }
                Err(e) => {
                    error!(transfer_id = %id, error = %e, "Reconcile failed");
                    report.errors += 1;
                }
            }
        }

        let purged = self.tokens.purge_expired(now);
        if purged > 0 {
            debug!(purged, "Purged expired rail tokens");
        }
        Ok(report)
    }

    /// Advance `record` by at most one step using the snapshot as the CAS guard
    pub async fn reconcile_record(
        &self,
        mut record: TransferRecord,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, TransferError> {
        let from = record.state;
        if from.is_terminal() {
            return Ok(ReconcileOutcome::Terminal);
        }

        if record.retry_count >= self.config.max_retries {
            warn!(transfer_id = %record.id, retries = record.retry_count, "Retry ceiling reached");
            let written = self
                .fail(&mut record, now, MAX_RETRIES_EXCEEDED.to_string(), false)
                .await?;
            return Ok(outcome_of(from, &record, written));
        }

        let cooldown = self.config.poll_cooldown();
        if !record.is_due(now, cooldown) {
            return Ok(ReconcileOutcome::CoolingDown);
        }
        // A fresh record without a session may still be inside start_transfer
        if record.rail_session_id.is_none() && now - record.created_at < cooldown {
            return Ok(ReconcileOutcome::CoolingDown);
        }

        record.last_polled_at = Some(now);
        let Some(session_id) = record.rail_session_id.clone() else {
            // Creation never finished; count it against the ceiling
            let e = AdapterError::Rejected("no rail session".to_string());
            return self.record_poll_failure(record, e, now).await;
        };

        let rail_tx = match self.poll_rail(&record, &session_id, now).await {
            Ok(tx) => tx,
            Err(e) => return self.record_poll_failure(record, e, now).await,
        };
        // Transient poll errors do not outlive a successful poll
        record.error_message = None;
        debug!(
            transfer_id = %record.id,
            state = %from,
            rail_status = %rail_tx.status,
            "Rail polled"
        );

        let written = self.apply_rail_status(&mut record, &rail_tx, now).await?;
        let outcome = outcome_of(from, &record, written);
        if let ReconcileOutcome::Advanced { from, to } = outcome {
            info!(transfer_id = %record.id, %from, %to, "Transfer advanced");
        }
        Ok(outcome)
    }

    async fn poll_rail(
        &self,
        record: &TransferRecord,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RailTransaction, AdapterError> {
        let key = token_key(record.id);
        let token = match self.tokens.get(&key, now) {
            Some(token) => token,
            None => {
                let token = self
                    .adapters
                    .rail
                    .authenticate(&record.id.to_string())
                    .await?;
                self.tokens.insert(&key, token.clone(), now);
                token
            }
        };
        self.adapters.rail.poll_status(&token, session_id).await
    }

    async fn record_poll_failure(
        &self,
        mut record: TransferRecord,
        e: AdapterError,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, TransferError> {
        let from = record.state;
        self.tokens.invalidate(&token_key(record.id));
        record.retry_count += 1;
        record.error_message = Some(e.to_string());
        warn!(
            transfer_id = %record.id,
            retries = record.retry_count,
            error = %e,
            "Rail poll failed"
        );

        if record.retry_count >= self.config.max_retries {
            let written = self
                .fail(&mut record, now, MAX_RETRIES_EXCEEDED.to_string(), false)
                .await?;
            return Ok(outcome_of(from, &record, written));
        }

        if self.transition(&mut record, from, now).await? {
            Ok(ReconcileOutcome::RetryScheduled(record.retry_count))
        } else {
            Ok(ReconcileOutcome::Conflict)
        }
    }

    /// Map a polled rail status onto the record. Returns whether the
    /// resulting write landed.
    async fn apply_rail_status(
        &self,
        record: &mut TransferRecord,
        rail_tx: &RailTransaction,
        now: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        let state = record.state;
        let status = &rail_tx.status;

        if status.is_failure() {
            let message = format!("Rail status: {}", status);
            return self.fail(record, now, message, state.is_in_flight()).await;
        }
        if *status == RailStatus::Expired {
            record.error_message = Some(format!("Rail status: {}", status));
            record.manual_review = state.is_in_flight();
            return self.transition(record, TransferState::Expired, now).await;
        }
        if let RailStatus::Unknown(raw) = status {
            warn!(transfer_id = %record.id, status = %raw, "Unrecognized rail status");
        }

        match record.direction {
            Direction::CashOut => self.advance_cash_out(record, rail_tx, now).await,
            Direction::CashIn => self.advance_cash_in(record, rail_tx, now).await,
        }
    }

    async fn advance_cash_out(
        &self,
        record: &mut TransferRecord,
        rail_tx: &RailTransaction,
        now: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        match (record.state, &rail_tx.status) {
            (_, RailStatus::Completed) => {
                record.reference_number = rail_tx
                    .reference_id
                    .clone()
                    .or_else(|| record.reference_number.clone())
                    .or_else(|| record.rail_session_id.clone());
                record.completed_at = Some(now);
                self.transition(record, TransferState::Completed, now).await
            }
            (state, _) if state.is_in_flight() => self.fail_interrupted(record, now).await,
            (TransferState::Confirmed, RailStatus::PendingUserTransferStart) => {
                self.send_funds(record, rail_tx, now).await
            }
            (TransferState::UsdcSent, RailStatus::PendingUserTransferComplete) => {
                record.reference_number = rail_tx
                    .reference_id
                    .clone()
                    .or_else(|| record.reference_number.clone());
                self.transition(record, TransferState::PendingPickup, now)
                    .await
            }
            (state, _) => self.transition(record, state, now).await,
        }
    }

    async fn advance_cash_in(
        &self,
        record: &mut TransferRecord,
        rail_tx: &RailTransaction,
        now: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        match (record.state, &rail_tx.status) {
            (state, _) if state.is_in_flight() => self.fail_interrupted(record, now).await,
            (
                TransferState::Initiated | TransferState::PendingKyc,
                RailStatus::PendingUserTransferStart,
            ) => {
                self.transition(record, TransferState::PendingDeposit, now)
                    .await
            }
            (
                TransferState::Initiated | TransferState::PendingKyc | TransferState::PendingDeposit,
                RailStatus::Completed,
            ) => self.return_funds(record, rail_tx, now).await,
            (state, _) => self.transition(record, state, now).await,
        }
    }

    /// Cash-out compound step: BRIDGING → bridge forward → pay rail → USDC_SENT.
    ///
    /// Never retried. Any failure after the bridge call may have moved funds,
    /// so those failures are flagged for manual review.
    async fn send_funds(
        &self,
        record: &mut TransferRecord,
        rail_tx: &RailTransaction,
        now: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        if !self
            .transition(record, TransferState::Bridging, now)
            .await?
        {
            return Ok(false);
        }

        let receipt = match self.adapters.bridge.bridge_forward(record.amount).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(transfer_id = %record.id, error = %e, "Bridge forward failed");
                let ambiguous = e.is_ambiguous();
                return self
                    .fail(record, now, format!("Bridge/send error: {}", e), ambiguous)
                    .await;
            }
        };
        record.bridge_operation_id = Some(receipt.operation_id);
        record.bridge_source_tx = Some(receipt.source_tx);
        if !self
            .transition(record, TransferState::Bridging, now)
            .await?
        {
            error!(transfer_id = %record.id, "Lost record after bridging; funds in flight");
            return Ok(false);
        }

        let destination = rail_tx
            .destination
            .clone()
            .or_else(|| record.rail_destination.clone());
        let memo = rail_tx
            .memo
            .clone()
            .or_else(|| record.rail_memo.clone())
            .unwrap_or_default();
        let amount = rail_tx.amount_in.unwrap_or(record.amount);

        let Some(destination) = destination else {
            error!(transfer_id = %record.id, "Rail reported no destination account");
            return self
                .fail(
                    record,
                    now,
                    "Bridge/send error: no destination account".to_string(),
                    true,
                )
                .await;
        };

        match self
            .adapters
            .settlement
            .pay(&destination, amount, &memo)
            .await
        {
            Ok(tx_ref) => {
                record.settlement_tx = Some(tx_ref);
                record.rail_fee = rail_tx.amount_fee.or(record.rail_fee);
                self.transition(record, TransferState::UsdcSent, now).await
            }
            Err(e) => {
                error!(transfer_id = %record.id, error = %e, "Settlement payment failed");
                self.fail(record, now, format!("Bridge/send error: {}", e), true)
                    .await
            }
        }
    }

    /// Cash-in compound step: USDC_RECEIVED → BRIDGING_BACK → bridge back → COMPLETED
    async fn return_funds(
        &self,
        record: &mut TransferRecord,
        rail_tx: &RailTransaction,
        now: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        record.net_amount = rail_tx.amount_out.or(record.net_amount);
        record.rail_fee = rail_tx.amount_fee.or(record.rail_fee);
        if !self
            .transition(record, TransferState::UsdcReceived, now)
            .await?
        {
            return Ok(false);
        }
        if !self
            .transition(record, TransferState::BridgingBack, now)
            .await?
        {
            return Ok(false);
        }

        let amount = rail_tx.amount_out.unwrap_or(record.amount);
        let owner = record.owner.clone();
        match self.adapters.bridge.bridge_back(amount, &owner).await {
            Ok(receipt) => {
                record.bridge_operation_id = Some(receipt.operation_id);
                record.bridge_source_tx = Some(receipt.source_tx);
                record.completed_at = Some(now);
                self.transition(record, TransferState::Completed, now).await
            }
            Err(e) => {
                error!(transfer_id = %record.id, error = %e, "Bridge back failed");
                self.fail(record, now, format!("Bridge back error: {}", e), true)
                    .await
            }
        }
    }

    /// Found mid compound step at the start of a visit: a previous run died
    /// between writes. Never re-driven.
    async fn fail_interrupted(
        &self,
        record: &mut TransferRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        let message = format!("Interrupted in {}; needs manual reconciliation", record.state);
        error!(transfer_id = %record.id, state = %record.state, "Interrupted compound step");
        self.fail(record, now, message, true).await
    }

    async fn fail(
        &self,
        record: &mut TransferRecord,
        now: DateTime<Utc>,
        message: String,
        manual_review: bool,
    ) -> Result<bool, TransferError> {
        record.error_message = Some(message);
        record.manual_review |= manual_review;
        self.transition(record, TransferState::Failed, now).await
    }

    /// Guarded write of `record` moving to `next`. `next == record.state`
    /// persists field changes without a transition.
    ///
    /// Returns false when the guard lost; the local record is then stale.
    async fn transition(
        &self,
        record: &mut TransferRecord,
        next: TransferState,
        now: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        let from = record.state;
        if from != next && !from.can_transition(record.direction, next) {
            return Err(TransferError::InvalidStateTransition(format!(
                "{} {} -> {}",
                record.direction, from, next
            )));
        }

        record.state = next;
        record.updated_at = now;
        if self.store.update_if(record, from).await? {
            record.version += 1;
            Ok(true)
        } else {
            warn!(transfer_id = %record.id, %from, %next, "Guarded write lost");
            record.state = from;
            Ok(false)
        }
    }
}
