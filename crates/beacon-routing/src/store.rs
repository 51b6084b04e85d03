//! Route persistence and the downstream alertmanager hook

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use beacon_common::{Error, OrgId, Result};

use crate::route::Route;

/// Tenant-scoped route storage
#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn create(&self, route: &Route) -> Result<()>;

    async fn update(&self, route: &Route) -> Result<()>;

    /// Remove and return the route
    async fn delete(&self, org_id: &str, id: &str) -> Result<Route>;

    async fn get(&self, org_id: &str, id: &str) -> Result<Route>;

    /// All routes of `org_id`, in evaluation order
    async fn list(&self, org_id: &str) -> Result<Vec<Route>>;
}

/// Receives route changes so the alertmanager configuration can follow
#[async_trait]
pub trait AlertmanagerSync: Send + Sync {
    async fn route_upserted(&self, route: &Route) -> Result<()>;

    async fn route_deleted(&self, route: &Route) -> Result<()>;
}

/// Used when no alertmanager is attached
pub struct NoopAlertmanager;

#[async_trait]
impl AlertmanagerSync for NoopAlertmanager {
    async fn route_upserted(&self, _route: &Route) -> Result<()> {
        Ok(())
    }

    async fn route_deleted(&self, _route: &Route) -> Result<()> {
        Ok(())
    }
}

/// In-memory route store.
///
/// Lists by ascending priority, ties in creation order.
#[derive(Default)]
pub struct MemoryRouteStore {
    routes: RwLock<HashMap<OrgId, Vec<Route>>>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn name_taken(routes: &[Route], route: &Route) -> bool {
        routes
            .iter()
            .any(|r| r.id != route.id && r.name == route.name)
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn create(&self, route: &Route) -> Result<()> {
        let mut routes = self.routes.write();
        let org_routes = routes.entry(route.org_id.clone()).or_default();
        if org_routes.iter().any(|r| r.id == route.id) {
            return Err(Error::AlreadyExists(format!("route {}", route.id)));
        }
        if Self::name_taken(org_routes, route) {
            return Err(Error::AlreadyExists(format!(
                "route named '{}'",
                route.name
            )));
        }
        org_routes.push(route.clone());
        Ok(())
    }

    async fn update(&self, route: &Route) -> Result<()> {
        let mut routes = self.routes.write();
        let org_routes = routes
            .get_mut(&route.org_id)
            .ok_or_else(|| Error::not_found(format!("route {}", route.id)))?;
        if Self::name_taken(org_routes, route) {
            return Err(Error::AlreadyExists(format!(
                "route named '{}'",
                route.name
            )));
        }
        let slot = org_routes
            .iter_mut()
            .find(|r| r.id == route.id)
            .ok_or_else(|| Error::not_found(format!("route {}", route.id)))?;
        *slot = route.clone();
        Ok(())
    }

    async fn delete(&self, org_id: &str, id: &str) -> Result<Route> {
        let mut routes = self.routes.write();
        let org_routes = routes
            .get_mut(org_id)
            .ok_or_else(|| Error::not_found(format!("route {}", id)))?;
        let index = org_routes
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::not_found(format!("route {}", id)))?;
        Ok(org_routes.remove(index))
    }

    async fn get(&self, org_id: &str, id: &str) -> Result<Route> {
        self.routes
            .read()
            .get(org_id)
            .and_then(|routes| routes.iter().find(|r| r.id == id))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("route {}", id)))
    }

    async fn list(&self, org_id: &str) -> Result<Vec<Route>> {
        let mut routes = self
            .routes
            .read()
            .get(org_id)
            .cloned()
            .unwrap_or_default();
        routes.sort_by_key(|r| r.priority);
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteDraft;

    fn route(org: &str, name: &str, priority: i32) -> Route {
        RouteDraft {
            name: name.into(),
            description: String::new(),
            expression: "true".into(),
            channels: vec!["c".into()],
            priority,
            enabled: true,
            tags: vec![],
            group_by: vec![],
        }
        .into_route(org, "tester")
    }

    #[tokio::test]
    async fn test_crud() {
        let store = MemoryRouteStore::new();
        let mut r = route("org1", "a", 0);
        store.create(&r).await.unwrap();
        assert_eq!(store.get("org1", &r.id).await.unwrap(), r);

        r.channels = vec!["d".into()];
        store.update(&r).await.unwrap();
        assert_eq!(store.get("org1", &r.id).await.unwrap().channels, ["d"]);

        let removed = store.delete("org1", &r.id).await.unwrap();
        assert_eq!(removed.id, r.id);
        assert!(matches!(store.get("org1", &r.id).await, Err(Error::NotFound(_))));
        assert!(matches!(store.delete("org1", &r.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_name_per_org() {
        let store = MemoryRouteStore::new();
        store.create(&route("org1", "a", 0)).await.unwrap();
        assert!(matches!(
            store.create(&route("org1", "a", 0)).await,
            Err(Error::AlreadyExists(_))
        ));
        store.create(&route("org2", "a", 0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_order_and_isolation() {
        let store = MemoryRouteStore::new();
        let low = route("org1", "low", 5);
        let first = route("org1", "first", 0);
        let second = route("org1", "second", 0);
        for r in [&low, &first, &second] {
            store.create(r).await.unwrap();
        }
        store.create(&route("org2", "other", 0)).await.unwrap();

        let names: Vec<String> = store
            .list("org1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["first", "second", "low"]);
        assert!(store.get("org2", &low.id).await.is_err());
        assert!(store.list("org3").await.unwrap().is_empty());
    }
}
