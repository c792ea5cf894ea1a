//! Conversions between engine tuples and [`PolicyRecord`]s.
//!
//! # Purpose
//! The engine speaks in variable-length `Vec<String>` rules; storage speaks in
//! fixed `v0..v5` rows. Everything that crosses that boundary goes through the
//! functions in this module.
//!
//! # Key invariants
//! - Encoding never fails: rules longer than [`MAX_ARITY`] are truncated.
//! - "No value" and "empty value" are the same thing on both sides. A rule with
//!   an embedded `""` loses that position when decoded.
use crate::record::{MAX_ARITY, PolicyRecord, VALUE_COLUMNS};
use std::collections::BTreeMap;

/// Build a record from a rule type and a positional rule.
///
/// Values beyond the sixth are dropped without error; missing ones stay `""`.
///
/// # Example
/// ```rust
/// use rulebook_core::codec::{decode_filter_values, encode};
///
/// let record = encode("p", &["alice", "data1", "read"]);
/// assert_eq!(record.values[2], "read");
/// assert_eq!(record.values[3], "");
/// assert_eq!(decode_filter_values(&record), vec!["alice", "data1", "read"]);
/// ```
pub fn encode<S: AsRef<str>>(ptype: &str, rule: &[S]) -> PolicyRecord {
    let mut values: [String; MAX_ARITY] = Default::default();
    for (slot, value) in values.iter_mut().zip(rule.iter()) {
        *slot = value.as_ref().to_string();
    }
    PolicyRecord {
        ptype: ptype.to_string(),
        values,
    }
}

/// Rule type followed by every non-empty value, in slot order.
///
/// Used to report rows back to the caller (for example rows captured by a
/// filtered replace).
pub fn decode_full(record: &PolicyRecord) -> Vec<String> {
    std::iter::once(record.ptype.as_str())
        .chain(record.values.iter().map(String::as_str))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

/// Every non-empty value in slot order, without the rule type.
///
/// This is the rule as the engine model stores it.
pub fn decode_filter_values(record: &PolicyRecord) -> Vec<String> {
    record
        .values
        .iter()
        .filter(|value| !value.is_empty())
        .cloned()
        .collect()
}

/// Non-empty slots keyed by column name (`v0`..`v5`).
pub fn decode_filter_map(record: &PolicyRecord) -> BTreeMap<&'static str, &str> {
    VALUE_COLUMNS
        .iter()
        .zip(record.values.iter())
        .filter(|(_, value)| !value.is_empty())
        .map(|(column, value)| (*column, value.as_str()))
        .collect()
}
