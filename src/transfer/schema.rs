//! PostgreSQL schema for the transfer store and reconcile lock

use sqlx::PgPool;

use super::error::TransferError;

/// Create tables and indexes if missing. Safe to run on every start.
pub async fn init_schema(pool: &PgPool) -> Result<(), TransferError> {
    tracing::info!("Initializing cash rail schema...");

    for (name, ddl) in [
        ("cash_rail_transfers_tb", CREATE_TRANSFERS_TABLE),
        ("idx_cash_rail_transfers_due", CREATE_DUE_INDEX),
        ("idx_cash_rail_transfers_owner", CREATE_OWNER_INDEX),
        ("cash_rail_locks_tb", CREATE_LOCKS_TABLE),
        ("uq_cash_rail_locks_open", CREATE_OPEN_LOCK_INDEX),
    ] {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            TransferError::DatabaseError(format!("Failed to create {}: {}", name, e))
        })?;
    }

    tracing::info!("Cash rail schema ready");
    Ok(())
}

const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cash_rail_transfers_tb (
    transfer_id         VARCHAR(26) PRIMARY KEY,
    direction           SMALLINT NOT NULL,
    owner               VARCHAR(128) NOT NULL,
    amount              DECIMAL(20, 7) NOT NULL,
    rail_fee            DECIMAL(20, 7),
    net_amount          DECIMAL(20, 7),
    rail_session_id     VARCHAR(128),
    rail_url            TEXT,
    rail_memo           VARCHAR(64),
    rail_destination    VARCHAR(64),
    bridge_operation_id VARCHAR(128),
    bridge_source_tx    VARCHAR(128),
    settlement_tx       VARCHAR(128),
    reference_number    VARCHAR(64),
    state               SMALLINT NOT NULL,
    error_message       TEXT,
    manual_review       BOOLEAN NOT NULL DEFAULT FALSE,
    retry_count         INTEGER NOT NULL DEFAULT 0,
    version             BIGINT NOT NULL DEFAULT 0,
    last_polled_at      TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    confirmed_at        TIMESTAMPTZ,
    completed_at        TIMESTAMPTZ,
    cancelled_at        TIMESTAMPTZ
)
"#;

// Terminal state ids: 100, -10, -20, -30
const CREATE_DUE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_cash_rail_transfers_due
    ON cash_rail_transfers_tb (last_polled_at NULLS FIRST, created_at)
    WHERE state NOT IN (100, -10, -20, -30)
"#;

const CREATE_OWNER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_cash_rail_transfers_owner
    ON cash_rail_transfers_tb (owner, created_at DESC)
"#;

const CREATE_LOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cash_rail_locks_tb (
    lease_id     UUID PRIMARY KEY,
    job_name     VARCHAR(64) NOT NULL,
    locked_at    TIMESTAMPTZ NOT NULL,
    expires_at   TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ
)
"#;

// At most one open lease per job
const CREATE_OPEN_LOCK_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS uq_cash_rail_locks_open
    ON cash_rail_locks_tb (job_name)
    WHERE completed_at IS NULL
"#;
