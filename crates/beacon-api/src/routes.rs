//! `/notification-routes` CRUD

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use beacon_routing::{Route, RouteDraft};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct OrgQuery {
    pub org_id: Option<String>,
}

pub async fn create_route(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrgQuery>,
    Json(draft): Json<RouteDraft>,
) -> ApiResult<(StatusCode, Json<Route>)> {
    let org_id = user.org(query.org_id.as_deref())?;
    let route = state.routes.create(&org_id, &user.user_id, draft).await?;
    Ok((StatusCode::CREATED, Json(route)))
}

pub async fn list_routes(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrgQuery>,
) -> ApiResult<Json<Vec<Route>>> {
    let org_id = user.org(query.org_id.as_deref())?;
    Ok(Json(state.routes.list(&org_id).await?))
}

pub async fn get_route(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<OrgQuery>,
) -> ApiResult<Json<Route>> {
    let org_id = user.org(query.org_id.as_deref())?;
    Ok(Json(state.routes.get(&org_id, &id).await?))
}

pub async fn update_route(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<OrgQuery>,
    Json(draft): Json<RouteDraft>,
) -> ApiResult<Json<Route>> {
    let org_id = user.org(query.org_id.as_deref())?;
    Ok(Json(state.routes.update(&org_id, &id, &user.user_id, draft).await?))
}

pub async fn delete_route(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<OrgQuery>,
) -> ApiResult<StatusCode> {
    let org_id = user.org(query.org_id.as_deref())?;
    state.routes.delete(&org_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
