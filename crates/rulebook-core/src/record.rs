//! Fixed-shape row representation of one policy tuple.
//!
//! # Purpose
//! A [`PolicyRecord`] is what a rule looks like once it leaves the engine: a
//! rule type tag plus six positional value slots. Storage backends persist
//! exactly this shape.
//!
//! # Key invariants
//! - `ptype` is never empty for rows produced by this crate.
//! - Unset slots hold the empty string, never a missing value.
//! - Once a slot is empty every later slot is empty (producers must not leave
//!   gaps; decoders do not check).

/// Maximum number of positional values a stored rule can carry.
pub const MAX_ARITY: usize = 6;

/// Column names of the positional slots, in order.
pub const VALUE_COLUMNS: [&str; MAX_ARITY] = ["v0", "v1", "v2", "v3", "v4", "v5"];

/// One persisted rule: rule type plus positional values `v0..v5`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyRecord {
    pub ptype: String,
    pub values: [String; MAX_ARITY],
}

impl PolicyRecord {
    pub fn new(ptype: impl Into<String>, values: [String; MAX_ARITY]) -> Self {
        Self {
            ptype: ptype.into(),
            values,
        }
    }

    /// Value stored in slot `index`, or `None` past the last slot.
    pub fn slot(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// Section of the engine model this rule belongs to.
    ///
    /// The engine keys sections by the first character of the rule type
    /// (`p` for policies, `g` for groupings). Returns `None` for an empty tag.
    pub fn section(&self) -> Option<&str> {
        section_of(&self.ptype)
    }
}

/// First character of a rule type, as a string slice.
pub fn section_of(ptype: &str) -> Option<&str> {
    let first = ptype.chars().next()?;
    Some(&ptype[..first.len_utf8()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_is_first_char() {
        assert_eq!(section_of("p"), Some("p"));
        assert_eq!(section_of("g2"), Some("g"));
        assert_eq!(section_of(""), None);
    }

    #[test]
    fn section_handles_multibyte_tags() {
        assert_eq!(section_of("éx"), Some("é"));
    }

    #[test]
    fn slot_bounds() {
        let record = PolicyRecord::new(
            "p",
            ["alice", "data1", "read", "", "", ""].map(String::from),
        );
        assert_eq!(record.slot(0), Some("alice"));
        assert_eq!(record.slot(5), Some(""));
        assert_eq!(record.slot(6), None);
        assert_eq!(record.section(), Some("p"));
    }
}
