//! Transfer Record Store
//!
//! Every mutation after `create` is a guarded write: it lands only if the
//! stored row still has the expected state AND version. A lost guard means
//! another worker advanced the record first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use super::error::TransferError;
use super::state::{Direction, TERMINAL_STATE_IDS, TransferState};
use super::types::{TransferId, TransferRecord};

/// Persistence port for transfer records
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError>;

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, TransferError>;

    /// Write `record` iff the stored row is in `expected_state` and has
    /// `record.version`. The stored version is bumped on success.
    ///
    /// Returns false when the guard did not match.
    async fn update_if(
        &self,
        record: &TransferRecord,
        expected_state: TransferState,
    ) -> Result<bool, TransferError>;

    /// Non-terminal records with `retry_count < max_retries`,
    /// least recently polled first (never-polled before everything else).
    async fn find_due(
        &self,
        max_retries: i32,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;

    /// Newest first
    async fn list_by_owner(
        &self,
        owner: &str,
        direction: Option<Direction>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError>;
}

const SELECT_COLUMNS: &str = r#"
    SELECT transfer_id, direction, owner, amount, rail_fee, net_amount,
           rail_session_id, rail_url, rail_memo, rail_destination,
           bridge_operation_id, bridge_source_tx, settlement_tx, reference_number,
           state, error_message, manual_review, retry_count, version,
           last_polled_at, created_at, updated_at, confirmed_at, completed_at, cancelled_at
    FROM cash_rail_transfers_tb
"#;

/// PostgreSQL-backed store (`cash_rail_transfers_tb`)
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<TransferRecord, TransferError> {
        let id_str: String = row.get("transfer_id");
        let id: TransferId = id_str
            .parse()
            .map_err(|_| TransferError::SystemError(format!("Invalid transfer_id: {}", id_str)))?;

        let state_id: i16 = row.get("state");
        let state = TransferState::from_id(state_id)
            .ok_or_else(|| TransferError::SystemError(format!("Invalid state ID: {}", state_id)))?;

        let direction_id: i16 = row.get("direction");
        let direction = Direction::from_id(direction_id).ok_or_else(|| {
            TransferError::SystemError(format!("Invalid direction: {}", direction_id))
        })?;

        Ok(TransferRecord {
            id,
            direction,
            owner: row.get("owner"),
            amount: row.get::<Decimal, _>("amount"),
            rail_fee: row.get("rail_fee"),
            net_amount: row.get("net_amount"),
            rail_session_id: row.get("rail_session_id"),
            rail_url: row.get("rail_url"),
            rail_memo: row.get("rail_memo"),
            rail_destination: row.get("rail_destination"),
            bridge_operation_id: row.get("bridge_operation_id"),
            bridge_source_tx: row.get("bridge_source_tx"),
            settlement_tx: row.get("settlement_tx"),
            reference_number: row.get("reference_number"),
            state,
            error_message: row.get("error_message"),
            manual_review: row.get("manual_review"),
            retry_count: row.get("retry_count"),
            version: row.get("version"),
            last_polled_at: row.get::<Option<DateTime<Utc>>, _>("last_polled_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            confirmed_at: row.get("confirmed_at"),
            completed_at: row.get("completed_at"),
            cancelled_at: row.get("cancelled_at"),
        })
    }

    fn rows_to_records(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<TransferRecord>, TransferError> {
        rows.iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError> {
        sqlx::query(
            r#"
            INSERT INTO cash_rail_transfers_tb
                (transfer_id, direction, owner, amount, state, retry_count, version,
                 manual_review, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.direction.id())
        .bind(&record.owner)
        .bind(record.amount)
        .bind(record.state.id())
        .bind(record.retry_count)
        .bind(record.version)
        .bind(record.manual_review)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, TransferError> {
        let row = sqlx::query(&format!("{} WHERE transfer_id = $1", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn update_if(
        &self,
        record: &TransferRecord,
        expected_state: TransferState,
    ) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"
            UPDATE cash_rail_transfers_tb
            SET state = $1, rail_fee = $2, net_amount = $3,
                rail_session_id = $4, rail_url = $5, rail_memo = $6, rail_destination = $7,
                bridge_operation_id = $8, bridge_source_tx = $9, settlement_tx = $10,
                reference_number = $11, error_message = $12, manual_review = $13,
                retry_count = $14, last_polled_at = $15, updated_at = $16,
                confirmed_at = $17, completed_at = $18, cancelled_at = $19,
                version = version + 1
            WHERE transfer_id = $20 AND state = $21 AND version = $22
            "#,
        )
        .bind(record.state.id())
        .bind(record.rail_fee)
        .bind(record.net_amount)
        .bind(&record.rail_session_id)
        .bind(&record.rail_url)
        .bind(&record.rail_memo)
        .bind(&record.rail_destination)
        .bind(&record.bridge_operation_id)
        .bind(&record.bridge_source_tx)
        .bind(&record.settlement_tx)
        .bind(&record.reference_number)
        .bind(&record.error_message)
        .bind(record.manual_review)
        .bind(record.retry_count)
        .bind(record.last_polled_at)
        .bind(record.updated_at)
        .bind(record.confirmed_at)
        .bind(record.completed_at)
        .bind(record.cancelled_at)
        .bind(record.id.to_string())
        .bind(expected_state.id())
        .bind(record.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_due(
        &self,
        max_retries: i32,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE state <> ALL($1) AND retry_count < $2
            ORDER BY last_polled_at ASC NULLS FIRST, created_at ASC
            LIMIT $3
            "#,
            SELECT_COLUMNS
        ))
        .bind(&TERMINAL_STATE_IDS[..])
        .bind(max_retries)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_records(rows)
    }

    async fn list_by_owner(
        &self,
        owner: &str,
        direction: Option<Direction>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE owner = $1 AND ($2::SMALLINT IS NULL OR direction = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            SELECT_COLUMNS
        ))
        .bind(owner)
        .bind(direction.map(|d| d.id()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_records(rows)
    }
}
