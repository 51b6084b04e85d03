//! Route matching: alert labels to channels

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use beacon_common::metrics;
use beacon_common::LabelSet;

use crate::cache::ExpressionCache;
use crate::route::Route;
use crate::store::RouteStore;

/// Evaluates an org's enabled routes against alert labels
pub struct RouteMatcher {
    store: Arc<dyn RouteStore>,
    cache: ExpressionCache,
}

impl RouteMatcher {
    pub fn new(store: Arc<dyn RouteStore>, log_expression_errors: bool) -> Self {
        Self {
            store,
            cache: ExpressionCache::new(log_expression_errors),
        }
    }

    /// Channels for `labels`, deduplicated keeping first occurrence.
    ///
    /// Never fails: a store error yields no channels, a broken route is
    /// skipped.
    pub async fn match_channels(&self, org_id: &str, labels: &LabelSet) -> Vec<String> {
        let routes = match self.store.list(org_id).await {
            Ok(routes) => routes,
            Err(e) => {
                warn!(org_id, error = %e, "failed to load notification routes");
                metrics::record_route_store_error();
                return Vec::new();
            }
        };

        let channels = self.match_routes(org_id, &routes, labels);
        metrics::record_routing_match(channels.len());
        channels
    }

    /// Evaluate already-loaded routes
    pub fn match_routes(&self, org_id: &str, routes: &[Route], labels: &LabelSet) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut channels = Vec::new();

        for route in routes {
            // never evaluate another tenant's route
            if !route.enabled || route.org_id != org_id {
                continue;
            }
            let Some(expr) = self.cache.get_or_compile(org_id, &route.expression) else {
                continue;
            };
            match expr.evaluate(labels) {
                Ok(true) => {
                    for channel in &route.channels {
                        if seen.insert(channel.as_str()) {
                            channels.push(channel.clone());
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    metrics::record_expression_error("evaluate");
                    debug!(org_id, route_id = %route.id, error = %e, "route expression failed");
                }
            }
        }
        channels
    }

    /// Drop the compiled form of `expression`
    pub fn invalidate(&self, org_id: &str, expression: &str) {
        self.cache.invalidate(org_id, expression);
    }

    pub fn cache(&self) -> &ExpressionCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteDraft;
    use crate::store::MemoryRouteStore;
    use proptest::prelude::*;
    use rstest::rstest;

    fn route(name: &str, expression: &str, channels: &[&str], enabled: bool) -> Route {
        RouteDraft {
            name: name.to_string(),
            description: String::new(),
            expression: expression.to_string(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            priority: 0,
            enabled,
            tags: Vec::new(),
            group_by: Vec::new(),
        }
        .into_route("org1", "tester")
    }

    fn alert() -> LabelSet {
        [
            ("service".to_string(), "auth".to_string()),
            ("host".to_string(), "prod-1".to_string()),
        ]
        .into()
    }

    fn matcher() -> RouteMatcher {
        RouteMatcher::new(Arc::new(MemoryRouteStore::new()), false)
    }

    #[rstest]
    #[case::single(vec![("labels[\"service\"] == 'auth'", vec!["c1"], true)], vec!["c1"])]
    #[case::no_match(vec![("labels[\"service\"] == 'billing'", vec!["c1"], true)], vec![])]
    #[case::disabled(vec![("labels[\"service\"] == 'auth'", vec!["c1"], false)], vec![])]
    #[case::dedup_keeps_first(
        vec![
            ("labels[\"host\"].startsWith('prod')", vec!["c2", "c1"], true),
            ("labels[\"service\"] in ['auth']", vec!["c1", "c3"], true),
        ],
        vec!["c2", "c1", "c3"]
    )]
    #[case::type_error_skipped(
        vec![
            ("labels[\"service\"] && true", vec!["broken"], true),
            ("labels[\"missing\"] != 'x'", vec!["c1"], true),
        ],
        vec!["c1"]
    )]
    #[case::uncompilable_skipped(
        vec![
            ("labels[\"service\"] ==", vec!["broken"], true),
            ("labels.host endsWith '-1'", vec!["c1"], true),
        ],
        vec!["c1"]
    )]
    fn test_match_routes(
        #[case] specs: Vec<(&str, Vec<&str>, bool)>,
        #[case] expected: Vec<&str>,
    ) {
        let routes: Vec<Route> = specs
            .iter()
            .enumerate()
            .map(|(i, (expression, channels, enabled))| {
                route(&format!("r{}", i), expression, channels, *enabled)
            })
            .collect();
        assert_eq!(matcher().match_routes("org1", &routes, &alert()), expected);
    }

    #[test]
    fn test_match_routes_skips_other_org() {
        let mut foreign = route("r0", "labels[\"service\"] == 'auth'", &["leak"], true);
        foreign.org_id = "org2".to_string();
        assert!(matcher().match_routes("org1", &[foreign], &alert()).is_empty());
    }

    const EXPRESSIONS: &[&str] = &[
        "labels[\"service\"] == 'auth'",
        "labels[\"host\"].contains('prod')",
        "labels[\"service\"] in ['auth', 'payment']",
        "!(labels[\"env\"] == 'dev')",
        "labels[\"service\"] && true",
        "labels[\"service\"] ==",
        "labels[\"service\"]",
    ];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_match_channels_is_deduplicated(
            specs in prop::collection::vec(
                (
                    prop::sample::select(EXPRESSIONS),
                    prop::collection::vec(prop::sample::select(&["a", "b", "c", "d"][..]), 1..4),
                    any::<bool>(),
                ),
                0..8,
            ),
            service in prop::sample::select(&["auth", "payment", "billing", ""][..]),
            host in prop::option::of("[a-z0-9-]{0,8}"),
        ) {
            let mut labels: LabelSet = [("service".to_string(), service.to_string())].into();
            if let Some(host) = host {
                labels.insert("host".to_string(), host);
            }

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = Arc::new(MemoryRouteStore::new());
            let routes: Vec<Route> = specs
                .iter()
                .enumerate()
                .map(|(i, (expression, channels, enabled))| {
                    route(&format!("r{}", i), expression, channels, *enabled)
                })
                .collect();
            let channels = runtime.block_on(async {
                for route in &routes {
                    store.create(route).await.unwrap();
                }
                RouteMatcher::new(store.clone(), false)
                    .match_channels("org1", &labels)
                    .await
            });

            let unique: HashSet<&String> = channels.iter().collect();
            prop_assert_eq!(unique.len(), channels.len());
            for channel in &channels {
                prop_assert!(routes
                    .iter()
                    .any(|r| r.enabled && r.channels.contains(channel)));
            }
        }
    }
}
