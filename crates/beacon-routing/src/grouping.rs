//! Alert grouping keys
//!
//! The labels an alert is grouped by come from a per-rule registration
//! followed by the route's own `group_by` list. Registrations are keyed by
//! `(org_id, rule_id)` and never shared across tenants.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use beacon_common::{LabelSet, OrgId};

/// Label carrying the id of the rule that fired
pub const RULE_ID_LABEL: &str = "ruleId";
/// Label set to `"true"` on no-data alerts
pub const NO_DATA_LABEL: &str = "nodata";
/// A `group_by` entry meaning every label
pub const GROUP_BY_ALL: &str = "...";

/// Identity under which alerts are aggregated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupKey {
    pub org_id: OrgId,
    pub rule_id: String,
    /// Grouping labels in key order
    pub labels: Vec<(String, String)>,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{{", self.org_id, self.rule_id)?;
        for (i, (name, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        f.write_str("}")
    }
}

#[derive(Default)]
pub struct GroupingEngine {
    configs: RwLock<HashMap<(OrgId, String), Vec<String>>>,
}

impl GroupingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register grouping labels for a rule. Empty ids are ignored.
    pub fn set_group_labels(&self, org_id: &str, rule_id: &str, group_by: Vec<String>) {
        if org_id.is_empty() || rule_id.is_empty() {
            return;
        }
        self.configs
            .write()
            .insert((org_id.to_string(), rule_id.to_string()), group_by);
    }

    pub fn delete_group_labels(&self, org_id: &str, rule_id: &str) {
        self.configs
            .write()
            .remove(&(org_id.to_string(), rule_id.to_string()));
    }

    pub fn group_labels(&self, org_id: &str, rule_id: &str) -> Option<Vec<String>> {
        self.configs
            .read()
            .get(&(org_id.to_string(), rule_id.to_string()))
            .cloned()
    }

    /// Build the group key for an alert routed by a route with `route_group_by`
    pub fn group_key(&self, org_id: &str, labels: &LabelSet, route_group_by: &[String]) -> GroupKey {
        let rule_id = labels.get(RULE_ID_LABEL).cloned().unwrap_or_default();
        let configured = if rule_id.is_empty() {
            None
        } else {
            self.group_labels(org_id, &rule_id)
        };

        let mut keys: Vec<&str> = Vec::new();
        for key in configured.iter().flatten().chain(route_group_by) {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
        if labels.get(NO_DATA_LABEL).map(String::as_str) == Some("true")
            && !keys.contains(&NO_DATA_LABEL)
        {
            keys.push(NO_DATA_LABEL);
        }

        let labels: Vec<(String, String)> = if keys.contains(&GROUP_BY_ALL) {
            labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        } else {
            keys.iter()
                .filter_map(|k| labels.get(*k).map(|v| ((*k).to_string(), v.clone())))
                .collect()
        };

        GroupKey {
            org_id: org_id.to_string(),
            rule_id,
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_route_fallback() {
        let engine = GroupingEngine::new();
        let alert = labels(&[("alertname", "a"), ("instance", "i1"), ("severity", "crit")]);
        let key = engine.group_key("org1", &alert, &strings(&["instance"]));
        assert_eq!(key.labels, vec![("instance".to_string(), "i1".to_string())]);
        assert_eq!(key.rule_id, "");
    }

    #[test]
    fn test_config_first_then_route_and_absent_omitted() {
        let engine = GroupingEngine::new();
        engine.set_group_labels("org1", "r1", strings(&["service", "missing", "instance"]));
        let alert = labels(&[("ruleId", "r1"), ("instance", "i1"), ("service", "api")]);

        let key = engine.group_key("org1", &alert, &strings(&["instance", "ruleId"]));
        let names: Vec<&str> = key.labels.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["service", "instance", "ruleId"]);
        assert_eq!(key.to_string(), "org1/r1:{service=\"api\",instance=\"i1\",ruleId=\"r1\"}");
    }

    #[test]
    fn test_nodata_and_all_labels() {
        let engine = GroupingEngine::new();
        let alert = labels(&[("nodata", "true"), ("host", "h")]);
        let key = engine.group_key("org1", &alert, &strings(&["host"]));
        assert_eq!(key.labels.len(), 2);
        assert_eq!(key.labels[1].0, "nodata");

        let key = engine.group_key("org1", &alert, &strings(&["..."]));
        assert_eq!(key.labels.len(), 2);
    }

    #[test]
    fn test_empty_ids_are_noop() {
        let engine = GroupingEngine::new();
        engine.set_group_labels("", "r1", strings(&["a"]));
        engine.set_group_labels("org1", "", strings(&["a"]));
        assert!(engine.group_labels("", "r1").is_none());
        assert!(engine.group_labels("org1", "").is_none());

        engine.set_group_labels("org1", "r1", strings(&["a"]));
        engine.delete_group_labels("org1", "r1");
        assert!(engine.group_labels("org1", "r1").is_none());
    }

    #[test]
    fn test_isolation_across_tuples() {
        let engine = GroupingEngine::new();
        engine.set_group_labels("orgA", "r", strings(&["service"]));
        engine.set_group_labels("orgB", "r", strings(&["service"]));
        let alert = labels(&[("ruleId", "r"), ("service", "api")]);

        let a = engine.group_key("orgA", &alert, &[]);
        let b = engine.group_key("orgB", &alert, &[]);
        assert_eq!(a.labels, b.labels);
        assert_ne!(a, b);

        engine.set_group_labels("orgA", "r", strings(&["host"]));
        assert_eq!(engine.group_labels("orgB", "r"), Some(strings(&["service"])));
    }

    #[test]
    fn test_concurrent_registration() {
        let engine = Arc::new(GroupingEngine::new());
        let alert = labels(&[("ruleId", "r0"), ("service", "api"), ("host", "h")]);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let alert = alert.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let rule = format!("r{}", (i + n) % 4);
                        engine.set_group_labels("org1", &rule, vec!["service".into()]);
                        let key = engine.group_key("org1", &alert, &["host".to_string()]);
                        assert_eq!(key.labels.last().map(|(k, _)| k.as_str()), Some("host"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(engine.group_labels("org1", "r3"), Some(vec!["service".to_string()]));
    }
}
