//! In-memory implementation of the policy store.
//!
//! # Purpose
//! Implements [`PolicyStore`] with a `Vec` of rows behind a
//! `tokio::sync::RwLock`. It exists for:
//! - tests of adapter semantics without a database
//! - embedding where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all rules are lost when the store is dropped.
//! - Rows get increasing ids, so loads return rules in insertion order.
//! - The `(ptype, v0..v5)` uniqueness constraint is enforced like the SQL
//!   unique index would; violations surface as [`StoreError::Conflict`].
//! - Every mutation runs against a staged copy of the table that only replaces
//!   the live table on success. A failed batch leaves no trace.
//!
//! # Lifecycle
//! After [`PolicyStore::close`] every call fails with `sqlx::Error::PoolClosed`,
//! matching what a closed Postgres pool reports.
use super::PolicyStore;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use rulebook_core::{PolicyRecord, RuleFilter};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    record: PolicyRecord,
}

#[derive(Debug, Clone, Default)]
struct RuleTable {
    next_id: i64,
    rows: Vec<StoredRow>,
}

impl RuleTable {
    fn insert(&mut self, record: PolicyRecord) -> StoreResult<()> {
        if self.rows.iter().any(|row| row.record == record) {
            return Err(conflict(&record));
        }
        self.next_id += 1;
        self.rows.push(StoredRow {
            id: self.next_id,
            record,
        });
        Ok(())
    }

    fn delete(&mut self, filter: &RuleFilter) -> u64 {
        let before = self.rows.len();
        self.rows.retain(|row| !filter.matches(&row.record));
        (before - self.rows.len()) as u64
    }

    fn update(&mut self, filter: &RuleFilter, record: &PolicyRecord) -> StoreResult<u64> {
        let mut changed = 0;
        for row in self.rows.iter_mut().filter(|row| filter.matches(&row.record)) {
            row.record = record.clone();
            changed += 1;
        }
        self.ensure_unique()?;
        Ok(changed)
    }

    fn ensure_unique(&self) -> StoreResult<()> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            if !seen.insert(&row.record) {
                return Err(conflict(&row.record));
            }
        }
        Ok(())
    }

    fn matching(&self, filter: &RuleFilter) -> Vec<PolicyRecord> {
        self.rows
            .iter()
            .filter(|row| filter.matches(&row.record))
            .map(|row| row.record.clone())
            .collect()
    }
}

fn conflict(record: &PolicyRecord) -> StoreError {
    StoreError::Conflict(format!(
        "duplicate rule {} [{}]",
        record.ptype,
        record.values.join(", ")
    ))
}

/// Non-durable policy store.
///
/// Cloning shares the underlying table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    table: Arc<RwLock<RuleTable>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn row_ids(&self) -> Vec<i64> {
        self.table.read().await.rows.iter().map(|row| row.id).collect()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    /// Run `apply` against a staged copy and publish it only on success.
    async fn transact<T, F>(&self, apply: F) -> StoreResult<T>
    where
        F: FnOnce(&mut RuleTable) -> StoreResult<T> + Send,
    {
        self.ensure_open()?;
        let mut table = self.table.write().await;
        let mut staged = table.clone();
        let outcome = apply(&mut staged)?;
        *table = staged;
        Ok(outcome)
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        self.ensure_open()
    }

    async fn load_all(&self) -> StoreResult<Vec<PolicyRecord>> {
        self.ensure_open()?;
        let table = self.table.read().await;
        Ok(table.rows.iter().map(|row| row.record.clone()).collect())
    }

    async fn replace_all(&self, records: Vec<PolicyRecord>) -> StoreResult<()> {
        self.transact(|table| {
            table.rows.clear();
            records.into_iter().try_for_each(|record| table.insert(record))
        })
        .await
    }

    async fn insert(&self, records: Vec<PolicyRecord>) -> StoreResult<u64> {
        self.transact(|table| {
            let count = records.len() as u64;
            records
                .into_iter()
                .try_for_each(|record| table.insert(record))?;
            Ok(count)
        })
        .await
    }

    async fn delete(&self, filters: Vec<RuleFilter>) -> StoreResult<u64> {
        self.transact(|table| Ok(filters.iter().map(|filter| table.delete(filter)).sum()))
            .await
    }

    async fn update(&self, updates: Vec<(RuleFilter, PolicyRecord)>) -> StoreResult<u64> {
        self.transact(|table| {
            let mut changed = 0;
            for (filter, record) in &updates {
                changed += table.update(filter, record)?;
            }
            Ok(changed)
        })
        .await
    }

    async fn replace_matching(
        &self,
        filter: RuleFilter,
        records: Vec<PolicyRecord>,
    ) -> StoreResult<Vec<PolicyRecord>> {
        self.transact(|table| {
            let captured = table.matching(&filter);
            table.delete(&filter);
            records
                .into_iter()
                .try_for_each(|record| table.insert(record))?;
            Ok(captured)
        })
        .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulebook_core::{MatchMode, encode};

    async fn seeded(rules: &[&[&str]]) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert(rules.iter().map(|rule| encode("p", *rule)).collect())
            .await
            .expect("seed");
        store
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let store = seeded(&[&["alice", "data1", "read"]]).await;
        let err = store
            .insert(vec![encode("p", &["alice", "data1", "read"])])
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(err.is_unique_violation());
        assert_eq!(store.load_all().await.expect("load").len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_leaves_table_untouched() {
        let store = seeded(&[&["alice", "data1", "read"]]).await;
        let err = store
            .insert(vec![
                encode("p", &["bob", "data2", "write"]),
                encode("p", &["alice", "data1", "read"]),
            ])
            .await
            .expect_err("duplicate mid-batch");
        assert!(err.is_unique_violation());
        let rows = store.load_all().await.expect("load");
        assert_eq!(rows, vec![encode("p", &["alice", "data1", "read"])]);
    }

    #[tokio::test]
    async fn update_into_existing_row_rolls_back() {
        let store = seeded(&[&["alice", "data1", "read"], &["bob", "data1", "read"]]).await;
        let alice = encode("p", &["alice", "data1", "read"]);
        let bob = encode("p", &["bob", "data1", "read"]);
        let err = store
            .update(vec![(RuleFilter::for_record(&bob, MatchMode::Exact), alice.clone())])
            .await
            .expect_err("collision");
        assert!(err.is_unique_violation());
        assert_eq!(store.load_all().await.expect("load"), vec![alice, bob]);
    }

    #[tokio::test]
    async fn ids_increase_and_survive_updates() {
        let store = seeded(&[&["alice", "data1", "read"], &["bob", "data2", "write"]]).await;
        let alice = encode("p", &["alice", "data1", "read"]);
        store
            .update(vec![(
                RuleFilter::for_record(&alice, MatchMode::Exact),
                encode("p", &["alice", "data1", "write"]),
            )])
            .await
            .expect("update");
        store
            .insert(vec![encode("p", &["carol", "data3", "read"])])
            .await
            .expect("insert");
        assert_eq!(store.row_ids().await, vec![1, 2, 3]);
        let rows = store.load_all().await.expect("load");
        assert_eq!(rows[0], encode("p", &["alice", "data1", "write"]));
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = InMemoryStore::new();
        store.health_check().await.expect("health");
        store.close().await;
        let err = store.load_all().await.expect_err("closed");
        assert!(matches!(err, StoreError::Database(sqlx::Error::PoolClosed)));
        assert!(store.health_check().await.is_err());
        assert!(!store.is_durable());
        assert_eq!(store.backend_name(), "memory");
    }
}
