//! Postgres-backed implementation of the policy store.
//!
//! # What this module is
//! This module implements [`PolicyStore`] on top of Postgres (via `sqlx`). All
//! rules live in a single table:
//!
//! | column  | type                            |
//! |---------|---------------------------------|
//! | `id`    | `BIGSERIAL PRIMARY KEY`         |
//! | `ptype` | `VARCHAR(100) NOT NULL`         |
//! | `v0..v5`| `VARCHAR(100) NOT NULL DEFAULT ''` |
//!
//! with a unique index over `(ptype, v0, v1, v2, v3, v4, v5)` and a secondary
//! index over `ptype`.
//!
//! # Key invariants
//! - Every value is bound as a query parameter. The only text spliced into SQL
//!   is the table name (validated as a plain identifier at construction) and
//!   the fixed column names `v0..v5`.
//! - Every mutation runs inside a transaction, single-row ones included. sqlx
//!   rolls a transaction back when its guard is dropped, so any `?` exit (or a
//!   cancelled future) leaves the table as it was.
//! - Tables created by the caller may have nullable value columns. Reads and
//!   empty-slot predicates go through `COALESCE(vN, '')`, so `NULL` and `''`
//!   both mean "unset".
//! - Errors are returned exactly as sqlx reports them.
//!
//! # Concurrency model
//! - The store is shared across tasks; `sqlx::PgPool` manages connections.
//! - Isolation between concurrent batches is whatever the database's
//!   transaction isolation level provides. Nothing is locked in-process.
//!
//! # Resource ownership
//! - [`PostgresStore::connect`] builds and owns its pool; `close()` closes it.
//! - [`PostgresStore::from_pool`] borrows a caller-owned pool; `close()` leaves
//!   it open because other components may still use it.
//!
//! # Security notes
//! - Database URLs may contain credentials; never log them.
//! - Use a least-privilege role: DDL rights are only needed when the adapter
//!   bootstraps the table.
use super::PolicyStore;
use crate::config::{PostgresConfig, validate_identifier};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use rulebook_core::{MAX_ARITY, PolicyRecord, RuleFilter, SlotMatch, VALUE_COLUMNS};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, QueryBuilder};
use std::str::FromStr;
use std::time::Duration;

/// Durable policy store backed by a Postgres table.
///
/// # Example
/// ```rust,no_run
/// use rulebook_store::config::PostgresConfig;
/// use rulebook_store::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg, "casbin_policies").await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
    table: String,
    owns_pool: bool,
}

/// Row shape of the rule table (the `id` column is only used for ordering).
#[derive(Debug, Clone, FromRow)]
struct DbRule {
    ptype: String,
    v0: String,
    v1: String,
    v2: String,
    v3: String,
    v4: String,
    v5: String,
}

impl From<DbRule> for PolicyRecord {
    fn from(row: DbRule) -> Self {
        PolicyRecord::new(row.ptype, [row.v0, row.v1, row.v2, row.v3, row.v4, row.v5])
    }
}

impl PostgresStore {
    /// Build a pool from `pg` and wrap it. The store owns the pool.
    ///
    /// # Errors
    /// - `InvalidConfig` for an unsafe table name.
    /// - `Database` for URL parse or connection failures; a connection attempt
    ///   slower than `connect_timeout_ms` reports `PoolTimedOut`.
    pub async fn connect(pg: &PostgresConfig, table: &str) -> StoreResult<Self> {
        validate_identifier(table)?;
        // Avoid logging `pg.url` because it may contain credentials.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let connecting = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connecting)
            .await
            .map_err(|_| StoreError::Database(sqlx::Error::PoolTimedOut))??;
        Ok(Self {
            pool,
            table: table.to_string(),
            owns_pool: true,
        })
    }

    /// Wrap a caller-owned pool. `close()` will not close it.
    pub fn from_pool(pool: PgPool, table: &str) -> StoreResult<Self> {
        validate_identifier(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            owns_pool: false,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT COALESCE(ptype, '') AS ptype, \
             COALESCE(v0, '') AS v0, COALESCE(v1, '') AS v1, COALESCE(v2, '') AS v2, \
             COALESCE(v3, '') AS v3, COALESCE(v4, '') AS v4, COALESCE(v5, '') AS v5 \
             FROM {}",
            self.table
        )
    }
}

/// DDL for the rule table and its indexes, in execution order.
fn schema_statements(table: &str) -> [String; 3] {
    [
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id BIGSERIAL PRIMARY KEY, \
             ptype VARCHAR(100) NOT NULL, \
             v0 VARCHAR(100) NOT NULL DEFAULT '', \
             v1 VARCHAR(100) NOT NULL DEFAULT '', \
             v2 VARCHAR(100) NOT NULL DEFAULT '', \
             v3 VARCHAR(100) NOT NULL DEFAULT '', \
             v4 VARCHAR(100) NOT NULL DEFAULT '', \
             v5 VARCHAR(100) NOT NULL DEFAULT '')"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS unique_{table} \
             ON {table} (ptype, v0, v1, v2, v3, v4, v5)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_ptype ON {table} (ptype)"),
    ]
}

/// Append ` WHERE ...` for `filter`.
///
/// Wildcard slots render as `COALESCE(vN, '') LIKE '%'`, which accepts every
/// row (`NULL` included) while keeping one clause per filtered slot. An empty
/// value is compared through `COALESCE` too; a non-empty value never equals
/// `NULL`, so it compares the bare column and can use the unique index.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RuleFilter) {
    builder.push(" WHERE ptype = ");
    builder.push_bind(filter.ptype().to_string());
    for (column, slot) in filter.constrained_slots() {
        match slot {
            SlotMatch::Any => {
                builder.push(format!(" AND COALESCE({column}, '') LIKE '%'"));
            }
            SlotMatch::Eq(value) if value.is_empty() => {
                builder.push(format!(" AND COALESCE({column}, '') = "));
                builder.push_bind(value.clone());
            }
            SlotMatch::Eq(value) => {
                builder.push(format!(" AND {column} = "));
                builder.push_bind(value.clone());
            }
        }
    }
}

/// Insert all `records` with one statement by unnesting per-column arrays.
async fn insert_records<'e, E>(
    executor: E,
    table: &str,
    records: &[PolicyRecord],
) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    if records.is_empty() {
        return Ok(0);
    }
    let ptypes: Vec<String> = records.iter().map(|r| r.ptype.clone()).collect();
    let mut columns: [Vec<String>; MAX_ARITY] = Default::default();
    for record in records {
        for (column, value) in columns.iter_mut().zip(record.values.iter()) {
            column.push(value.clone());
        }
    }

    let sql = format!(
        "INSERT INTO {table} (ptype, v0, v1, v2, v3, v4, v5) \
         SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], \
         $5::text[], $6::text[], $7::text[])"
    );
    let mut query = sqlx::query(&sql).bind(ptypes);
    for column in columns {
        query = query.bind(column);
    }
    Ok(query.execute(executor).await?.rows_affected())
}

async fn delete_matching<'e, E>(
    executor: E,
    table: &str,
    filter: &RuleFilter,
) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let mut builder = QueryBuilder::<Postgres>::new(format!("DELETE FROM {table}"));
    push_filter(&mut builder, filter);
    Ok(builder.build().execute(executor).await?.rows_affected())
}

async fn update_matching<'e, E>(
    executor: E,
    table: &str,
    filter: &RuleFilter,
    record: &PolicyRecord,
) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let mut builder = QueryBuilder::<Postgres>::new(format!("UPDATE {table} SET ptype = "));
    builder.push_bind(record.ptype.clone());
    for (column, value) in VALUE_COLUMNS.iter().zip(record.values.iter()) {
        builder.push(format!(", {column} = "));
        builder.push_bind(value.clone());
    }
    push_filter(&mut builder, filter);
    Ok(builder.build().execute(executor).await?.rows_affected())
}

#[async_trait]
impl PolicyStore for PostgresStore {
    /// Create the table and both indexes in one transaction.
    ///
    /// Every statement is `IF NOT EXISTS`, so re-running against an existing
    /// schema is a no-op. Any failure rolls the whole bootstrap back.
    async fn ensure_schema(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Schema)?;
        for statement in schema_statements(&self.table) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Schema)?;
        }
        tx.commit().await.map_err(StoreError::Schema)?;
        Ok(())
    }

    async fn load_all(&self) -> StoreResult<Vec<PolicyRecord>> {
        let sql = format!("{} ORDER BY id", self.select_sql());
        let rows: Vec<DbRule> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(PolicyRecord::from).collect())
    }

    /// Truncate and re-insert inside one transaction so a failed insert keeps
    /// the previous rules.
    async fn replace_all(&self, records: Vec<PolicyRecord>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("TRUNCATE TABLE {}", self.table))
            .execute(&mut *tx)
            .await?;
        insert_records(&mut *tx, &self.table, &records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert(&self, records: Vec<PolicyRecord>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_records(&mut *tx, &self.table, &records).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn delete(&self, filters: Vec<RuleFilter>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for filter in &filters {
            deleted += delete_matching(&mut *tx, &self.table, filter).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn update(&self, updates: Vec<(RuleFilter, PolicyRecord)>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for (filter, record) in &updates {
            changed += update_matching(&mut *tx, &self.table, filter, record).await?;
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Select, delete, then insert, all in one transaction.
    async fn replace_matching(
        &self,
        filter: RuleFilter,
        records: Vec<PolicyRecord>,
    ) -> StoreResult<Vec<PolicyRecord>> {
        let mut tx = self.pool.begin().await?;

        let mut select = QueryBuilder::<Postgres>::new(self.select_sql());
        push_filter(&mut select, &filter);
        select.push(" ORDER BY id");
        let captured: Vec<DbRule> = select.build_query_as().fetch_all(&mut *tx).await?;

        delete_matching(&mut *tx, &self.table, &filter).await?;
        insert_records(&mut *tx, &self.table, &records).await?;
        tx.commit().await?;
        Ok(captured.into_iter().map(PolicyRecord::from).collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.owns_pool {
            self.pool.close().await;
        }
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
