//! In-memory record store
//!
//! Single-process deployments and tests. The guarded write runs under the
//! shard lock of the record's entry, so it is atomic like the SQL version.

use async_trait::async_trait;
use dashmap::DashMap;

use super::db::TransferStore;
use super::error::TransferError;
use super::state::{Direction, TransferState};
use super::types::{TransferId, TransferRecord};

#[derive(Default)]
pub struct MemoryTransferStore {
    records: DashMap<TransferId, TransferRecord>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn create(&self, record: &TransferRecord) -> Result<(), TransferError> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(TransferError::DatabaseError(format!(
                "duplicate transfer_id {}",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, TransferError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn update_if(
        &self,
        record: &TransferRecord,
        expected_state: TransferState,
    ) -> Result<bool, TransferError> {
        let Some(mut stored) = self.records.get_mut(&record.id) else {
            return Ok(false);
        };
        if stored.state != expected_state || stored.version != record.version {
            return Ok(false);
        }
        let mut next = record.clone();
        next.version = record.version + 1;
        *stored = next;
        Ok(true)
    }

    async fn find_due(
        &self,
        max_retries: i32,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let mut due: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| !r.state.is_terminal() && r.retry_count < max_retries)
            .map(|r| r.clone())
            .collect();
        // None sorts before Some: never-polled first
        due.sort_by(|a, b| {
            a.last_polled_at
                .cmp(&b.last_polled_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn list_by_owner(
        &self,
        owner: &str,
        direction: Option<Direction>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, TransferError> {
        let mut records: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| r.owner == owner && direction.is_none_or(|d| r.direction == d))
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn record(owner: &str, direction: Direction) -> TransferRecord {
        TransferRecord::new(direction, owner, dec!(100), Utc::now())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryTransferStore::new();
        let r = record("w1", Direction::CashOut);
        store.create(&r).await.unwrap();
        assert_eq!(store.get(r.id).await.unwrap(), Some(r.clone()));
        assert!(store.create(&r).await.is_err());
        assert!(store.get(TransferId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_if_guards_state_and_version() {
        let store = MemoryTransferStore::new();
        let r = record("w1", Direction::CashOut);
        store.create(&r).await.unwrap();

        let mut next = r.clone();
        next.state = TransferState::PendingKyc;
        assert!(store.update_if(&next, TransferState::Initiated).await.unwrap());
        assert_eq!(store.get(r.id).await.unwrap().unwrap().version, 1);

        // stale snapshot: right state on paper, wrong version
        let mut stale = r.clone();
        stale.state = TransferState::Cancelled;
        assert!(!store.update_if(&stale, TransferState::PendingKyc).await.unwrap());
        // wrong expected state
        next.version = 1;
        next.state = TransferState::Confirmed;
        assert!(!store.update_if(&next, TransferState::Initiated).await.unwrap());

        let stored = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TransferState::PendingKyc);
    }

    #[tokio::test]
    async fn test_find_due_order_and_filters() {
        let store = MemoryTransferStore::new();
        let now = Utc::now();

        let mut old = record("w1", Direction::CashOut);
        old.last_polled_at = Some(now - Duration::minutes(10));
        let mut recent = record("w1", Direction::CashOut);
        recent.last_polled_at = Some(now - Duration::minutes(1));
        let never = record("w1", Direction::CashIn);
        let mut done = record("w1", Direction::CashOut);
        done.state = TransferState::Completed;
        let mut exhausted = record("w1", Direction::CashOut);
        exhausted.retry_count = 5;

        for r in [&old, &recent, &never, &done, &exhausted] {
            store.create(r).await.unwrap();
        }

        let due = store.find_due(5, 20).await.unwrap();
        let ids: Vec<_> = due.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![never.id, old.id, recent.id]);

        assert_eq!(store.find_due(5, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_owner_newest_first() {
        let store = MemoryTransferStore::new();
        let now = Utc::now();
        let mut first = record("w1", Direction::CashOut);
        first.created_at = now - Duration::minutes(5);
        let second = record("w1", Direction::CashIn);
        let other = record("w2", Direction::CashOut);
        for r in [&first, &second, &other] {
            store.create(r).await.unwrap();
        }

        let all = store.list_by_owner("w1", None, 50).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        let cash_out = store
            .list_by_owner("w1", Some(Direction::CashOut), 50)
            .await
            .unwrap();
        assert_eq!(cash_out.len(), 1);
        assert_eq!(cash_out[0].id, first.id);
    }
}
