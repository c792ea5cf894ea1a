//! Persistence adapter for Casbin-style policy models.
//!
//! # Purpose
//! Stores the rules of a policy model in one relational table and hands them
//! back on load. The engine owns all matching logic; this crate only persists
//! what the engine reports.
//!
//! # Layout
//! - [`adapter`]: the engine-facing [`PolicyAdapter`], also a `casbin::Adapter`.
//! - [`store`]: the [`PolicyStore`] contract with Postgres and in-memory
//!   backends.
//! - [`context`]: per-call cancellation and deadlines.
//! - [`config`]: explicit construction options loaded from env or YAML.
//! - [`error`]: the [`StoreError`] taxonomy.
//! - [`observability`]: tracing setup and metric names.
//!
//! # Examples
//! ```rust
//! use rulebook_core::RuleSet;
//! use rulebook_store::{AdapterConfig, InMemoryStore, PolicyAdapter};
//! use std::sync::Arc;
//!
//! # async fn demo() -> rulebook_store::StoreResult<()> {
//! let adapter =
//!     PolicyAdapter::new(Arc::new(InMemoryStore::new()), AdapterConfig::default()).await?;
//! adapter.add_policy("p", "p", &["alice", "data1", "read"]).await?;
//!
//! let mut model = RuleSet::new();
//! adapter.load_policy(&mut model).await?;
//! assert_eq!(model.len(), 1);
//! # Ok(())
//! # }
//! ```
pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod store;

pub use adapter::PolicyAdapter;
pub use config::{AdapterConfig, PostgresConfig, RulebookConfig};
pub use context::OpContext;
pub use error::{StoreError, StoreResult};
pub use store::PolicyStore;
pub use store::memory::InMemoryStore;
pub use store::postgres::PostgresStore;
