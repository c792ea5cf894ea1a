//! Rule encoding shared by every rulebook storage backend.
//!
//! # Purpose
//! Maps Casbin-style policy rules (variable-length string tuples) onto the
//! fixed `ptype, v0..v5` row shape used in relational storage, and builds the
//! filters that select stored rows.
//!
//! # How it fits
//! `rulebook-store` owns the I/O. This crate is pure: no database, no async
//! runtime, so the encoding rules can be tested in isolation.
//!
//! # Key invariants
//! - Rules carry at most [`MAX_ARITY`] values; longer rules are truncated.
//! - The empty string stands for "no value" in every slot.
//!
//! # Examples
//! ```rust
//! use rulebook_core::{RuleFilter, encode};
//!
//! let record = encode("p", &["alice", "data1", "read"]);
//! assert!(RuleFilter::by_field("p", 1, &["data1"]).matches(&record));
//! ```
pub mod codec;
pub mod filter;
pub mod model;
pub mod record;

pub use codec::{decode_filter_map, decode_filter_values, decode_full, encode};
pub use filter::{MatchMode, RuleFilter, SlotMatch};
pub use model::{PolicyModel, RuleSet, SAVED_SECTIONS};
pub use record::{MAX_ARITY, PolicyRecord, VALUE_COLUMNS, section_of};
