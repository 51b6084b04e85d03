//! Beacon notification routing
//!
//! Maps an alert's labels to the set of channels it is delivered to, using
//! per-tenant routes whose expressions are compiled once and cached, and
//! derives the group key the alert is aggregated under.

pub mod cache;
pub mod grouping;
pub mod matcher;
pub mod route;
pub mod service;
pub mod store;

pub use cache::ExpressionCache;
pub use grouping::{GroupKey, GroupingEngine};
pub use matcher::RouteMatcher;
pub use route::{Route, RouteDraft};
pub use service::RouteService;
pub use store::{AlertmanagerSync, MemoryRouteStore, NoopAlertmanager, RouteStore};
