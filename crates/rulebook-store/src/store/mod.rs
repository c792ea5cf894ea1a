//! Storage backends for policy records.
//!
//! # Purpose
//! [`PolicyStore`] is the record-level contract between the adapter and a
//! backend. The adapter does all tuple encoding and filter construction; a
//! backend only has to persist [`PolicyRecord`]s and honor [`RuleFilter`]s.
//!
//! # Key invariants
//! - `(ptype, v0..v5)` is unique across stored rows.
//! - Every multi-row method is all-or-nothing: on error, storage is left as it
//!   was before the call.
//! - Backends never retry and never reclassify storage errors.
use crate::error::StoreResult;
use async_trait::async_trait;
use rulebook_core::{PolicyRecord, RuleFilter};

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Create the rule table and its indexes when missing. Idempotent.
    async fn ensure_schema(&self) -> StoreResult<()>;

    /// Every stored record, oldest first.
    async fn load_all(&self) -> StoreResult<Vec<PolicyRecord>>;

    /// Discard every stored record and insert `records`, atomically.
    async fn replace_all(&self, records: Vec<PolicyRecord>) -> StoreResult<()>;

    /// Insert `records` as one statement; returns the number inserted.
    async fn insert(&self, records: Vec<PolicyRecord>) -> StoreResult<u64>;

    /// Delete rows matching each filter, all in one transaction.
    async fn delete(&self, filters: Vec<RuleFilter>) -> StoreResult<u64>;

    /// For each pair, rewrite rows matching the filter to the record's
    /// values. All pairs apply in one transaction.
    async fn update(&self, updates: Vec<(RuleFilter, PolicyRecord)>) -> StoreResult<u64>;

    /// Capture and delete the rows matching `filter`, then insert `records`,
    /// in one transaction. Returns the captured rows, oldest first.
    async fn replace_matching(
        &self,
        filter: RuleFilter,
        records: Vec<PolicyRecord>,
    ) -> StoreResult<Vec<PolicyRecord>>;

    async fn health_check(&self) -> StoreResult<()>;

    /// Release resources the store owns. Caller-owned connections stay open.
    async fn close(&self);

    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
