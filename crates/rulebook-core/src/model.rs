//! The engine model boundary.
//!
//! # Purpose
//! Load pushes stored rules into an engine model and save reads every rule back
//! out of it. [`PolicyModel`] is the minimal surface both operations need. It is
//! implemented for every Casbin [`Model`] (including `dyn Model`, which is what
//! an `Enforcer` hands its adapter) and for [`RuleSet`], a plain in-memory model
//! used by tooling and tests.
//!
//! # Key invariants
//! - Membership checks are the model's own: loading the same rows twice must
//!   not duplicate rules, and that guarantee comes from `has_rule`.
//! - Sections are keyed by the first character of the rule type.
use crate::record::section_of;
use casbin::Model;
use std::collections::BTreeMap;

/// Policy families persisted by a full save, in save order.
pub const SAVED_SECTIONS: [&str; 2] = ["p", "g"];

/// Engine-side view of a policy model.
pub trait PolicyModel: Send {
    /// Whether `rule` is already present under `sec`/`ptype`.
    fn has_rule(&self, sec: &str, ptype: &str, rule: &[String]) -> bool;

    /// Add `rule` under `sec`/`ptype`; returns whether the model changed.
    fn add_rule(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool;

    /// Every rule type of `sec` with its rules.
    fn rules(&self, sec: &str) -> Vec<(String, Vec<Vec<String>>)>;
}

impl<M: Model + Send + ?Sized> PolicyModel for M {
    fn has_rule(&self, sec: &str, ptype: &str, rule: &[String]) -> bool {
        Model::has_policy(self, sec, ptype, rule.to_vec())
    }

    fn add_rule(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool {
        Model::add_policy(self, sec, ptype, rule)
    }

    fn rules(&self, sec: &str) -> Vec<(String, Vec<Vec<String>>)> {
        let Some(assertions) = self.get_model().get(sec) else {
            return Vec::new();
        };
        let mut ptypes: Vec<&String> = assertions.keys().collect();
        ptypes.sort();
        ptypes
            .into_iter()
            .map(|ptype| (ptype.clone(), Model::get_policy(self, sec, ptype)))
            .collect()
    }
}

/// Insertion-ordered, de-duplicated rules grouped by section and rule type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    sections: BTreeMap<String, BTreeMap<String, Vec<Vec<String>>>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, deriving its section from the rule type.
    ///
    /// Returns `false` when the rule was already present or the rule type is
    /// empty.
    pub fn insert<S: AsRef<str>>(&mut self, ptype: &str, rule: &[S]) -> bool {
        let Some(sec) = section_of(ptype) else {
            return false;
        };
        let rule = rule.iter().map(|value| value.as_ref().to_string()).collect();
        self.add_rule(sec, ptype, rule)
    }

    /// Rules stored under `ptype`, in insertion order.
    pub fn get(&self, ptype: &str) -> &[Vec<String>] {
        section_of(ptype)
            .and_then(|sec| self.sections.get(sec))
            .and_then(|types| types.get(ptype))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of rules across all sections.
    pub fn len(&self) -> usize {
        self.sections
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PolicyModel for RuleSet {
    fn has_rule(&self, sec: &str, ptype: &str, rule: &[String]) -> bool {
        self.sections
            .get(sec)
            .and_then(|types| types.get(ptype))
            .is_some_and(|rules| rules.iter().any(|existing| existing == rule))
    }

    fn add_rule(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool {
        if self.has_rule(sec, ptype, &rule) {
            return false;
        }
        self.sections
            .entry(sec.to_string())
            .or_default()
            .entry(ptype.to_string())
            .or_default()
            .push(rule);
        true
    }

    fn rules(&self, sec: &str) -> Vec<(String, Vec<Vec<String>>)> {
        self.sections
            .get(sec)
            .map(|types| {
                types
                    .iter()
                    .map(|(ptype, rules)| (ptype.clone(), rules.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casbin::DefaultModel;

    const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn rule_set_deduplicates() {
        let mut rules = RuleSet::new();
        assert!(rules.insert("p", &["alice", "data1", "read"]));
        assert!(!rules.insert("p", &["alice", "data1", "read"]));
        assert!(rules.insert("g", &["alice", "admin"]));
        assert!(!rules.insert("", &["orphan"]));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.get("p"), &[owned(&["alice", "data1", "read"])]);
        assert!(rules.get("g2").is_empty());
    }

    #[test]
    fn rule_set_groups_by_section() {
        let mut rules = RuleSet::new();
        rules.insert("g", &["alice", "admin"]);
        rules.insert("g2", &["data1", "group1"]);
        rules.insert("p", &["admin", "data1", "read"]);
        let groupings = rules.rules("g");
        assert_eq!(groupings.len(), 2);
        assert_eq!(groupings[0].0, "g");
        assert_eq!(groupings[1], ("g2".to_string(), vec![owned(&["data1", "group1"])]));
        assert!(rules.rules("x").is_empty());
    }

    #[tokio::test]
    async fn casbin_model_membership() {
        let mut model = DefaultModel::from_str(RBAC_MODEL).await.expect("model");
        let rule = owned(&["alice", "data1", "read"]);
        assert!(!PolicyModel::has_rule(&model, "p", "p", &rule));
        assert!(PolicyModel::add_rule(&mut model, "p", "p", rule.clone()));
        assert!(PolicyModel::has_rule(&model, "p", "p", &rule));
        assert!(PolicyModel::add_rule(&mut model, "g", "g", owned(&["alice", "admin"])));

        let policies = PolicyModel::rules(&model, "p");
        assert_eq!(policies, vec![("p".to_string(), vec![rule])]);
        assert_eq!(PolicyModel::rules(&model, "g")[0].1.len(), 1);
    }

    #[tokio::test]
    async fn trait_object_models_are_policy_models() {
        let mut model = DefaultModel::from_str(RBAC_MODEL).await.expect("model");
        let dynamic: &mut dyn Model = &mut model;
        let grouping = owned(&["alice", "admin"]);
        assert!(PolicyModel::add_rule(&mut *dynamic, "g", "g", grouping.clone()));
        assert!(PolicyModel::has_rule(&*dynamic, "g", "g", &grouping));
        assert_eq!(
            PolicyModel::rules(&*dynamic, "g"),
            vec![("g".to_string(), vec![grouping])]
        );
    }
}
