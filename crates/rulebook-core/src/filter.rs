//! Backend-neutral row filters.
//!
//! # Purpose
//! A [`RuleFilter`] describes which stored rows an operation touches: the rule
//! type always matches exactly, and each of the six slots is either
//! unconstrained, constrained to "anything", or constrained to one value.
//! Backends render the same filter into SQL or evaluate it in memory, so the
//! matching rules live in exactly one place.
//!
//! # Key invariants
//! - Slots outside `field_index..field_index + values.len()` are unconstrained.
//! - An empty filter value is a wildcard, rendered as an explicit predicate
//!   rather than dropped so query shape only depends on the filter range.
//! - Slot positions past `v5` are never produced.
use crate::codec::decode_filter_map;
use crate::record::{MAX_ARITY, PolicyRecord, VALUE_COLUMNS};
use std::fmt;
use std::str::FromStr;

/// Constraint placed on one positional slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotMatch {
    /// Matches any stored value, including `""`.
    Any,
    /// Matches exactly this value.
    Eq(String),
}

impl SlotMatch {
    fn accepts(&self, value: &str) -> bool {
        match self {
            SlotMatch::Any => true,
            SlotMatch::Eq(expected) => expected == value,
        }
    }
}

/// How a rule is turned into a filter that locates its stored row.
///
/// Rules shorter than six values leave trailing slots empty. `Exact` requires
/// those slots to be empty in storage too, so only the row of that very rule
/// matches. `Prefix` leaves them unconstrained, which also matches longer rows
/// sharing the same leading values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    #[default]
    Exact,
    Prefix,
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchMode::Exact),
            "prefix" => Ok(MatchMode::Prefix),
            other => Err(format!("unknown match mode: {other}")),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Exact => f.write_str("exact"),
            MatchMode::Prefix => f.write_str("prefix"),
        }
    }
}

/// Conjunctive filter over `ptype` and the positional slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFilter {
    ptype: String,
    slots: [Option<SlotMatch>; MAX_ARITY],
}

impl RuleFilter {
    /// Filter matching every row of a rule type.
    pub fn all(ptype: impl Into<String>) -> Self {
        Self {
            ptype: ptype.into(),
            slots: Default::default(),
        }
    }

    /// Filter for the engine's "filtered" operations.
    ///
    /// `values[i]` constrains slot `field_index + i`; an empty value matches
    /// anything. Values that would land past `v5` are ignored.
    ///
    /// # Example
    /// ```rust
    /// use rulebook_core::filter::{RuleFilter, SlotMatch};
    ///
    /// let filter = RuleFilter::by_field("p", 1, &["data1", ""]);
    /// let slots: Vec<_> = filter.constrained_slots().collect();
    /// assert_eq!(slots[0], ("v1", &SlotMatch::Eq("data1".to_string())));
    /// assert_eq!(slots[1], ("v2", &SlotMatch::Any));
    /// ```
    pub fn by_field<S: AsRef<str>>(ptype: &str, field_index: usize, values: &[S]) -> Self {
        let mut filter = Self::all(ptype);
        for (offset, value) in values.iter().enumerate() {
            let Some(slot) = field_index
                .checked_add(offset)
                .and_then(|n| filter.slots.get_mut(n))
            else {
                break;
            };
            let value = value.as_ref();
            *slot = Some(if value.is_empty() {
                SlotMatch::Any
            } else {
                SlotMatch::Eq(value.to_string())
            });
        }
        filter
    }

    /// Filter locating the stored row(s) of an encoded rule.
    pub fn for_record(record: &PolicyRecord, mode: MatchMode) -> Self {
        let mut filter = Self::all(record.ptype.as_str());
        match mode {
            MatchMode::Exact => {
                for (slot, value) in filter.slots.iter_mut().zip(record.values.iter()) {
                    *slot = Some(SlotMatch::Eq(value.clone()));
                }
            }
            MatchMode::Prefix => {
                let present = decode_filter_map(record);
                for (slot, column) in filter.slots.iter_mut().zip(VALUE_COLUMNS) {
                    if let Some(value) = present.get(column) {
                        *slot = Some(SlotMatch::Eq(value.to_string()));
                    }
                }
            }
        }
        filter
    }

    pub fn ptype(&self) -> &str {
        &self.ptype
    }

    /// Constrained slots in column order, keyed by column name.
    pub fn constrained_slots(&self) -> impl Iterator<Item = (&'static str, &SlotMatch)> + '_ {
        VALUE_COLUMNS
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(column, slot)| slot.as_ref().map(|slot| (*column, slot)))
    }

    /// Whether a stored record satisfies every predicate of this filter.
    pub fn matches(&self, record: &PolicyRecord) -> bool {
        record.ptype == self.ptype
            && self
                .slots
                .iter()
                .zip(record.values.iter())
                .all(|(slot, value)| slot.as_ref().is_none_or(|slot| slot.accepts(value)))
    }
}
