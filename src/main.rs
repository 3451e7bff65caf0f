//! Cash Rail reconciler
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌────────────┐
//! │  Config  │───▶│   Lock   │───▶│ Orchestrator │───▶│  Adapters  │
//! │  (YAML)  │    │ (PG/mem) │    │  (batch FSM) │    │ rail/bridge│
//! └──────────┘    └──────────┘    └──────────────┘    └────────────┘
//! ```
//!
//! Usage: `cash-rail-reconciler --env dev`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use sqlx::postgres::PgPoolOptions;

use cash_rail::config::AppConfig;
use cash_rail::transfer::{
    Adapters, MemoryReconcileLock, MemoryTransferStore, PgReconcileLock, PgTransferStore,
    ReconcileLock, ReconcileWorker, SettlementOrchestrator, TokenCache, TransferStore, init_schema,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config =
        AppConfig::load(&env).with_context(|| format!("loading config for env '{}'", env))?;
    let _log_guard = cash_rail::logging::init_logging(&app_config);

    tracing::info!("Starting cash rail reconciler in {} mode", env);

    let adapters = Adapters::from_config(&app_config).context("building adapters")?;
    tracing::info!(
        rail = adapters.rail.name(),
        bridge = adapters.bridge.name(),
        settlement = adapters.settlement.name(),
        "Adapters ready"
    );

    let (store, lock): (Arc<dyn TransferStore>, Arc<dyn ReconcileLock>) =
        match &app_config.postgres_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(url)
                    .await
                    .context("connecting to PostgreSQL")?;
                tracing::info!("PostgreSQL connection pool established");
                init_schema(&pool).await.context("initializing schema")?;
                (
                    Arc::new(PgTransferStore::new(pool.clone())),
                    Arc::new(PgReconcileLock::new(pool)),
                )
            }
            None => {
                tracing::warn!("No postgres_url configured, using in-memory store and lock");
                (
                    Arc::new(MemoryTransferStore::new()),
                    Arc::new(MemoryReconcileLock::new()),
                )
            }
        };

    let tokens = Arc::new(TokenCache::new(app_config.orchestrator.token_ttl()));
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        store,
        adapters,
        tokens,
        app_config.orchestrator.clone(),
    ));
    if !orchestrator.is_enabled() {
        bail!("sandbox adapters configured with production=true; refusing to start");
    }

    let worker = ReconcileWorker::new(orchestrator, lock, app_config.worker.clone());
    worker
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    tracing::info!("Reconciler stopped");
    Ok(())
}
