//! Reconcile Worker
//!
//! Fixed-interval loop: acquire lock → reconcile one batch → release lock.
//! Safe to run from several processes at once; only the lock holder works.

use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::coordinator::{BatchReport, SettlementOrchestrator};
use super::error::TransferError;
use super::lock::ReconcileLock;
use crate::config::WorkerConfig;

pub struct ReconcileWorker {
    orchestrator: Arc<SettlementOrchestrator>,
    lock: Arc<dyn ReconcileLock>,
    config: WorkerConfig,
}

impl ReconcileWorker {
    pub fn new(
        orchestrator: Arc<SettlementOrchestrator>,
        lock: Arc<dyn ReconcileLock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            lock,
            config,
        }
    }

    /// Run one pass.
    ///
    /// Returns `Ok(None)` when another holder has the lock. The lock is
    /// released however the batch ends, including a panic inside it.
    pub async fn run_pass(&self) -> Result<Option<BatchReport>, TransferError> {
        let name = self.config.lock_name.as_str();
        let Some(lease) = self.lock.try_acquire(name, self.config.lock_lease()).await? else {
            debug!(job = name, "Reconcile lock held elsewhere, skipping pass");
            return Ok(None);
        };
        debug!(job = name, %lease, "Reconcile lock acquired");

        let result = AssertUnwindSafe(self.orchestrator.reconcile_batch(Utc::now()))
            .catch_unwind()
            .await;

        if let Err(e) = self.lock.release(name, lease).await {
            warn!(job = name, error = %e, "Failed to release reconcile lock, lease will expire");
        }

        match result {
            Ok(report) => report.map(Some),
            Err(_) => {
                error!(job = name, "Reconcile pass panicked");
                Err(TransferError::SystemError(
                    "reconcile pass panicked".to_string(),
                ))
            }
        }
    }

    /// Tick until `shutdown` resolves. The first pass runs immediately.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            tick_interval_secs = self.config.tick_interval_secs,
            lock_lease_secs = self.config.lock_lease_secs,
            job = %self.config.lock_name,
            "Starting reconcile worker"
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Reconcile worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_pass().await {
                        Ok(Some(report)) => info!(
                            fetched = report.fetched,
                            advanced = report.advanced,
                            polled = report.polled,
                            skipped = report.skipped,
                            retried = report.retried,
                            conflicts = report.conflicts,
                            errors = report.errors,
                            "Reconcile pass finished"
                        ),
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "Reconcile pass failed"),
                    }
                }
            }
        }
    }
}
