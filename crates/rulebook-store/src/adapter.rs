//! Engine-facing policy adapter.
//!
//! # Purpose
//! [`PolicyAdapter`] is what a policy engine talks to. It translates engine
//! tuples into [`PolicyRecord`]s, builds the row filters each operation needs,
//! and hands the result to a [`PolicyStore`] backend.
//!
//! # Key invariants
//! - The adapter holds no rule state between calls; storage is the only source
//!   of truth.
//! - Every operation is atomic. Batches run inside one store transaction and a
//!   failure anywhere leaves storage as it was.
//! - Storage errors are returned unchanged. Nothing is retried.
//! - The `sec` argument of mutation methods is accepted for engine symmetry and
//!   otherwise ignored; only load and save care about sections.
//!
//! # Row matching
//! Single and batch remove/update locate the row of a tuple through
//! [`RuleFilter::for_record`]. Under [`MatchMode::Exact`] (the default) the
//! slots after the tuple's last value must be empty, so a short tuple never
//! touches a longer rule sharing its prefix. [`MatchMode::Prefix`] leaves those
//! slots unconstrained.
//!
//! # Cancellation
//! Each operation has a `*_ctx` variant taking an [`OpContext`]. The plain
//! variant runs with [`OpContext::background`].
//!
//! # Casbin
//! `PolicyAdapter` implements [`casbin::Adapter`], so it can be handed straight
//! to `casbin::Enforcer::new`. Every trait method delegates to the matching
//! inherent operation with a background context.
use crate::config::{AdapterConfig, RulebookConfig};
use crate::context::OpContext;
use crate::error::{StoreError, StoreResult};
use crate::observability::{record_loaded, record_removed, record_written};
use crate::store::PolicyStore;
use crate::store::postgres::PostgresStore;
use async_trait::async_trait;
use rulebook_core::{
    MatchMode, PolicyModel, PolicyRecord, RuleFilter, SAVED_SECTIONS, decode_filter_values,
    decode_full, encode,
};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Persistence adapter between a policy model and a [`PolicyStore`].
///
/// Cloning is cheap and shares the backend.
#[derive(Clone)]
pub struct PolicyAdapter {
    store: Arc<dyn PolicyStore>,
    config: AdapterConfig,
    filtered: bool,
}

impl fmt::Debug for PolicyAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyAdapter")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .field("filtered", &self.filtered)
            .finish()
    }
}

/// Push `records` into `model` in order, skipping rules it already has.
fn apply_records<M: PolicyModel + ?Sized>(
    model: &mut M,
    records: &[PolicyRecord],
) -> StoreResult<()> {
    for record in records {
        let Some(sec) = record.section() else {
            return log_failure(
                "load",
                Err(StoreError::MalformedRecord(
                    "stored rule has an empty rule type".to_string(),
                )),
            );
        };
        let rule = decode_filter_values(record);
        if !model.has_rule(sec, &record.ptype, &rule) {
            model.add_rule(sec, &record.ptype, rule);
        }
    }
    record_loaded(records.len());
    debug!(rows = records.len(), "policy loaded");
    Ok(())
}

fn log_failure<T>(op: &'static str, result: StoreResult<T>) -> StoreResult<T> {
    if let Err(err) = &result {
        warn!(op, error = %err, "policy operation failed; storage left unchanged");
    }
    result
}

impl PolicyAdapter {
    /// Wrap `store`, bootstrapping its schema unless the config opts out.
    ///
    /// The store already knows its table, so `config.table_name` is only read by
    /// [`PolicyAdapter::connect`] and [`PolicyAdapter::with_pool`].
    pub async fn new(store: Arc<dyn PolicyStore>, config: AdapterConfig) -> StoreResult<Self> {
        if !config.skip_auto_create_table {
            store.ensure_schema().await?;
        }
        debug!(
            backend = store.backend_name(),
            durable = store.is_durable(),
            match_mode = %config.match_mode,
            "policy adapter ready"
        );
        Ok(Self {
            store,
            config,
            filtered: false,
        })
    }

    /// Connect to Postgres and build an adapter that owns its pool.
    ///
    /// The pool is closed again when bootstrap fails.
    pub async fn connect(config: &RulebookConfig) -> StoreResult<Self> {
        config.adapter.validate()?;
        let store: Arc<dyn PolicyStore> = Arc::new(
            PostgresStore::connect(&config.postgres, &config.adapter.table_name).await?,
        );
        match Self::new(Arc::clone(&store), config.adapter.clone()).await {
            Ok(adapter) => Ok(adapter),
            Err(err) => {
                store.close().await;
                Err(err)
            }
        }
    }

    /// Build an adapter over a caller-owned pool. [`PolicyAdapter::close`]
    /// leaves the pool open.
    pub async fn with_pool(pool: PgPool, config: AdapterConfig) -> StoreResult<Self> {
        let store = PostgresStore::from_pool(pool, &config.table_name)?;
        Self::new(Arc::new(store), config).await
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    fn locate(&self, ptype: &str, rule: &[impl AsRef<str>]) -> RuleFilter {
        RuleFilter::for_record(&encode(ptype, rule), self.config.match_mode)
    }

    pub async fn load_policy<M: PolicyModel + ?Sized>(&self, model: &mut M) -> StoreResult<()> {
        self.load_policy_ctx(&OpContext::background(), model).await
    }

    /// Push every stored rule into `model`, skipping rules it already has.
    ///
    /// Rows are applied in storage order. A malformed row stops the load; rows
    /// before it stay applied.
    pub async fn load_policy_ctx<M: PolicyModel + ?Sized>(
        &self,
        ctx: &OpContext,
        model: &mut M,
    ) -> StoreResult<()> {
        let records = log_failure("load", ctx.run(self.store.load_all()).await)?;
        apply_records(model, &records)
    }

    pub async fn load_filtered_policy<M, S>(
        &self,
        model: &mut M,
        p_filter: &[S],
        g_filter: &[S],
    ) -> StoreResult<()>
    where
        M: PolicyModel + ?Sized,
        S: AsRef<str>,
    {
        self.load_filtered_policy_ctx(&OpContext::background(), model, p_filter, g_filter)
            .await
    }

    /// Load only the `p` rules whose leading values match `p_filter` and the
    /// `g` rules matching `g_filter`. Empty filter values match anything.
    pub async fn load_filtered_policy_ctx<M, S>(
        &self,
        ctx: &OpContext,
        model: &mut M,
        p_filter: &[S],
        g_filter: &[S],
    ) -> StoreResult<()>
    where
        M: PolicyModel + ?Sized,
        S: AsRef<str>,
    {
        let records = log_failure("load_filtered", ctx.run(self.store.load_all()).await)?;
        let kept: Vec<PolicyRecord> = records
            .into_iter()
            .filter(|record| {
                let values = match record.section() {
                    Some("p") => p_filter,
                    Some("g") => g_filter,
                    _ => return true,
                };
                RuleFilter::by_field(&record.ptype, 0, values).matches(record)
            })
            .collect();
        apply_records(model, &kept)
    }

    pub async fn save_policy<M: PolicyModel + ?Sized>(&self, model: &M) -> StoreResult<()> {
        self.save_policy_ctx(&OpContext::background(), model).await
    }

    /// Replace all stored rules with the `p` and `g` rules of `model`.
    pub async fn save_policy_ctx<M: PolicyModel + ?Sized>(
        &self,
        ctx: &OpContext,
        model: &M,
    ) -> StoreResult<()> {
        let mut records = Vec::new();
        for sec in SAVED_SECTIONS {
            for (ptype, rules) in model.rules(sec) {
                records.extend(rules.iter().map(|rule| encode(&ptype, rule)));
            }
        }
        let rows = records.len() as u64;
        log_failure("save", ctx.run(self.store.replace_all(records)).await)?;
        record_written("save", rows);
        debug!(rows, "policy saved");
        Ok(())
    }

    pub async fn add_policy<S: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[S],
    ) -> StoreResult<()> {
        self.add_policy_ctx(&OpContext::background(), sec, ptype, rule)
            .await
    }

    pub async fn add_policy_ctx<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        rule: &[S],
    ) -> StoreResult<()> {
        let record = encode(ptype, rule);
        let inserted = log_failure("add", ctx.run(self.store.insert(vec![record])).await)?;
        record_written("add", inserted);
        Ok(())
    }

    pub async fn add_policies<S: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> StoreResult<()> {
        self.add_policies_ctx(&OpContext::background(), sec, ptype, rules)
            .await
    }

    /// Insert every rule in one statement. An empty batch does nothing.
    pub async fn add_policies_ctx<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> StoreResult<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let records: Vec<PolicyRecord> = rules.iter().map(|rule| encode(ptype, rule)).collect();
        let inserted = log_failure("add_batch", ctx.run(self.store.insert(records)).await)?;
        record_written("add_batch", inserted);
        debug!(ptype, rows = inserted, "policies added");
        Ok(())
    }

    pub async fn remove_policy<S: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[S],
    ) -> StoreResult<u64> {
        self.remove_policy_ctx(&OpContext::background(), sec, ptype, rule)
            .await
    }

    /// Delete the row(s) of `rule`; returns how many rows went away.
    pub async fn remove_policy_ctx<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        rule: &[S],
    ) -> StoreResult<u64> {
        let filter = self.locate(ptype, rule);
        let removed = log_failure("remove", ctx.run(self.store.delete(vec![filter])).await)?;
        record_removed("remove", removed);
        Ok(removed)
    }

    pub async fn remove_policies<S: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> StoreResult<u64> {
        self.remove_policies_ctx(&OpContext::background(), sec, ptype, rules)
            .await
    }

    /// Delete the rows of every rule in one transaction.
    pub async fn remove_policies_ctx<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        rules: &[Vec<S>],
    ) -> StoreResult<u64> {
        if rules.is_empty() {
            return Ok(0);
        }
        let filters: Vec<RuleFilter> = rules.iter().map(|rule| self.locate(ptype, rule)).collect();
        let removed = log_failure("remove_batch", ctx.run(self.store.delete(filters)).await)?;
        record_removed("remove_batch", removed);
        debug!(ptype, rows = removed, "policies removed");
        Ok(removed)
    }

    pub async fn remove_filtered_policy<S: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> StoreResult<u64> {
        self.remove_filtered_policy_ctx(
            &OpContext::background(),
            sec,
            ptype,
            field_index,
            field_values,
        )
        .await
    }

    /// Delete every row whose slots starting at `field_index` match
    /// `field_values`. Empty values match anything.
    pub async fn remove_filtered_policy_ctx<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> StoreResult<u64> {
        let filter = RuleFilter::by_field(ptype, field_index, field_values);
        let removed = log_failure(
            "remove_filtered",
            ctx.run(self.store.delete(vec![filter])).await,
        )?;
        record_removed("remove_filtered", removed);
        debug!(ptype, field_index, rows = removed, "filtered policies removed");
        Ok(removed)
    }

    pub async fn update_policy<S: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        old_rule: &[S],
        new_rule: &[S],
    ) -> StoreResult<u64> {
        self.update_policy_ctx(&OpContext::background(), sec, ptype, old_rule, new_rule)
            .await
    }

    /// Rewrite the row(s) of `old_rule` to `new_rule`; returns rows changed.
    pub async fn update_policy_ctx<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        old_rule: &[S],
        new_rule: &[S],
    ) -> StoreResult<u64> {
        let update = (self.locate(ptype, old_rule), encode(ptype, new_rule));
        let changed = log_failure("update", ctx.run(self.store.update(vec![update])).await)?;
        record_written("update", changed);
        Ok(changed)
    }

    pub async fn update_policies<S: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        old_rules: &[Vec<S>],
        new_rules: &[Vec<S>],
    ) -> StoreResult<u64> {
        self.update_policies_ctx(&OpContext::background(), sec, ptype, old_rules, new_rules)
            .await
    }

    /// Apply `old_rules[i] -> new_rules[i]` for every `i` in one transaction.
    ///
    /// # Errors
    /// `InvalidArgument` when the two slices differ in length; storage is not
    /// touched in that case.
    pub async fn update_policies_ctx<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        old_rules: &[Vec<S>],
        new_rules: &[Vec<S>],
    ) -> StoreResult<u64> {
        if old_rules.len() != new_rules.len() {
            return Err(StoreError::InvalidArgument(format!(
                "update_policies got {} old rules and {} new rules",
                old_rules.len(),
                new_rules.len()
            )));
        }
        if old_rules.is_empty() {
            return Ok(0);
        }
        let updates: Vec<(RuleFilter, PolicyRecord)> = old_rules
            .iter()
            .zip(new_rules)
            .map(|(old, new)| (self.locate(ptype, old), encode(ptype, new)))
            .collect();
        let changed = log_failure("update_batch", ctx.run(self.store.update(updates)).await)?;
        record_written("update_batch", changed);
        debug!(ptype, rows = changed, "policies updated");
        Ok(changed)
    }

    pub async fn update_filtered_policies<S: AsRef<str>, F: AsRef<str>>(
        &self,
        sec: &str,
        ptype: &str,
        new_rules: &[Vec<S>],
        field_index: usize,
        field_values: &[F],
    ) -> StoreResult<Vec<Vec<String>>> {
        self.update_filtered_policies_ctx(
            &OpContext::background(),
            sec,
            ptype,
            new_rules,
            field_index,
            field_values,
        )
        .await
    }

    /// Replace the rows matching the field filter with `new_rules`.
    ///
    /// Returns the replaced rules, each led by its rule type, in storage order.
    pub async fn update_filtered_policies_ctx<S: AsRef<str>, F: AsRef<str>>(
        &self,
        ctx: &OpContext,
        _sec: &str,
        ptype: &str,
        new_rules: &[Vec<S>],
        field_index: usize,
        field_values: &[F],
    ) -> StoreResult<Vec<Vec<String>>> {
        let filter = RuleFilter::by_field(ptype, field_index, field_values);
        let records: Vec<PolicyRecord> =
            new_rules.iter().map(|rule| encode(ptype, rule)).collect();
        let inserted = records.len() as u64;
        let captured = log_failure(
            "update_filtered",
            ctx.run(self.store.replace_matching(filter, records)).await,
        )?;
        record_removed("update_filtered", captured.len() as u64);
        record_written("update_filtered", inserted);
        debug!(
            ptype,
            field_index,
            removed = captured.len(),
            inserted,
            "filtered policies replaced"
        );
        Ok(captured.iter().map(decode_full).collect())
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        self.health_check_ctx(&OpContext::background()).await
    }

    pub async fn health_check_ctx(&self, ctx: &OpContext) -> StoreResult<()> {
        ctx.run(self.store.health_check()).await
    }

    /// Release the backend's owned resources. Later calls fail.
    pub async fn close(&self) {
        self.store.close().await;
        debug!(backend = self.store.backend_name(), "policy adapter closed");
    }

    pub fn match_mode(&self) -> MatchMode {
        self.config.match_mode
    }

    pub async fn clear_policy(&self) -> StoreResult<()> {
        self.clear_policy_ctx(&OpContext::background()).await
    }

    /// Delete every stored rule.
    pub async fn clear_policy_ctx(&self, ctx: &OpContext) -> StoreResult<()> {
        log_failure("clear", ctx.run(self.store.replace_all(Vec::new())).await)?;
        debug!("policy cleared");
        Ok(())
    }
}

#[async_trait]
impl casbin::Adapter for PolicyAdapter {
    async fn load_policy(&mut self, m: &mut dyn casbin::Model) -> casbin::Result<()> {
        self.load_policy_ctx(&OpContext::background(), m).await?;
        self.filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn casbin::Model,
        f: casbin::Filter<'a>,
    ) -> casbin::Result<()> {
        self.load_filtered_policy_ctx(&OpContext::background(), m, &f.p, &f.g)
            .await?;
        self.filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn casbin::Model) -> casbin::Result<()> {
        Ok(self.save_policy_ctx(&OpContext::background(), &*m).await?)
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        Ok(self.clear_policy_ctx(&OpContext::background()).await?)
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    async fn add_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.add_policy_ctx(&OpContext::background(), sec, ptype, &rule)
            .await?;
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        self.add_policies_ctx(&OpContext::background(), sec, ptype, &rules)
            .await?;
        Ok(true)
    }

    async fn remove_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        let removed = self
            .remove_policy_ctx(&OpContext::background(), sec, ptype, &rule)
            .await?;
        Ok(removed > 0)
    }

    async fn remove_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let removed = self
            .remove_policies_ctx(&OpContext::background(), sec, ptype, &rules)
            .await?;
        Ok(removed > 0)
    }

    async fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        let removed = self
            .remove_filtered_policy_ctx(
                &OpContext::background(),
                sec,
                ptype,
                field_index,
                &field_values,
            )
            .await?;
        Ok(removed > 0)
    }
}
