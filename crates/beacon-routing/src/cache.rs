//! Compiled expression cache keyed by `(org_id, expression)`

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use beacon_common::metrics;
use beacon_common::OrgId;
use beacon_expr::Expression;

/// A failed compile is cached as `None` so it is reported only once
type Entry = Option<Arc<Expression>>;

pub struct ExpressionCache {
    entries: RwLock<HashMap<(OrgId, String), Entry>>,
    log_errors: bool,
}

impl ExpressionCache {
    pub fn new(log_errors: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            log_errors,
        }
    }

    /// The compiled expression, or `None` if it does not compile
    pub fn get_or_compile(&self, org_id: &str, source: &str) -> Option<Arc<Expression>> {
        let key = (org_id.to_string(), source.to_string());
        if let Some(entry) = self.entries.read().get(&key) {
            metrics::record_expression_cache(true);
            return entry.clone();
        }
        metrics::record_expression_cache(false);

        let entry = match Expression::compile(source) {
            Ok(expr) => Some(Arc::new(expr)),
            Err(e) => {
                metrics::record_expression_error("compile");
                if self.log_errors {
                    warn!(org_id, expression = source, error = %e, "route expression does not compile");
                }
                None
            }
        };

        // a racing compile of the same text yields the same entry
        self.entries
            .write()
            .entry(key)
            .or_insert(entry)
            .clone()
    }

    pub fn invalidate(&self, org_id: &str, source: &str) {
        self.entries
            .write()
            .remove(&(org_id.to_string(), source.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
