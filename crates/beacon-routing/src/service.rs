//! Route CRUD with cache invalidation and alertmanager sync

use std::sync::Arc;
use tracing::{error, info};

use beacon_common::{Error, LabelSet, Result};

use crate::matcher::RouteMatcher;
use crate::route::{Route, RouteDraft};
use crate::store::{AlertmanagerSync, RouteStore};

pub struct RouteService {
    store: Arc<dyn RouteStore>,
    alertmanager: Arc<dyn AlertmanagerSync>,
    matcher: RouteMatcher,
}

impl RouteService {
    pub fn new(
        store: Arc<dyn RouteStore>,
        alertmanager: Arc<dyn AlertmanagerSync>,
        log_expression_errors: bool,
    ) -> Self {
        let matcher = RouteMatcher::new(Arc::clone(&store), log_expression_errors);
        Self {
            store,
            alertmanager,
            matcher,
        }
    }

    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    pub async fn match_channels(&self, org_id: &str, labels: &LabelSet) -> Vec<String> {
        self.matcher.match_channels(org_id, labels).await
    }

    pub async fn create(&self, org_id: &str, user: &str, draft: RouteDraft) -> Result<Route> {
        draft.validate()?;
        let route = draft.into_route(org_id, user);
        self.store.create(&route).await?;
        info!(org_id, route_id = %route.id, name = %route.name, "notification route created");

        self.sync_upsert(&route).await?;
        Ok(route)
    }

    pub async fn update(&self, org_id: &str, id: &str, user: &str, draft: RouteDraft) -> Result<Route> {
        draft.validate()?;
        let mut route = self.store.get(org_id, id).await?;
        let previous_expression = route.expression.clone();
        route.apply(draft, user);

        self.store.update(&route).await?;
        self.matcher.invalidate(org_id, &previous_expression);
        self.matcher.invalidate(org_id, &route.expression);
        info!(org_id, route_id = %route.id, "notification route updated");

        self.sync_upsert(&route).await?;
        Ok(route)
    }

    pub async fn delete(&self, org_id: &str, id: &str) -> Result<Route> {
        let route = self.store.delete(org_id, id).await?;
        self.matcher.invalidate(org_id, &route.expression);
        info!(org_id, route_id = %route.id, "notification route deleted");

        // the store change stays even when the alertmanager update fails
        if let Err(e) = self.alertmanager.route_deleted(&route).await {
            error!(org_id, route_id = %route.id, error = %e, "failed to update alertmanager config");
            return Err(Error::Internal(format!(
                "route deleted but alertmanager config update failed: {}",
                e
            )));
        }
        Ok(route)
    }

    pub async fn get(&self, org_id: &str, id: &str) -> Result<Route> {
        self.store.get(org_id, id).await
    }

    pub async fn list(&self, org_id: &str) -> Result<Vec<Route>> {
        self.store.list(org_id).await
    }

    async fn sync_upsert(&self, route: &Route) -> Result<()> {
        self.alertmanager.route_upserted(route).await.map_err(|e| {
            error!(route_id = %route.id, error = %e, "failed to update alertmanager config");
            Error::Internal(format!(
                "route saved but alertmanager config update failed: {}",
                e
            ))
        })
    }
}
