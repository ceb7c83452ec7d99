use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::success_response;
use super::inventory::InventoryHandlerState;
use crate::entities::derived_stock;
use crate::errors::ServiceError;
use crate::events::RefreshScope;
use crate::services::cache_refresher::RefreshReport;

/// Exactly one of the two ids selects the scope
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    #[serde(default)]
    pub warehouse_id: Option<Uuid>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
}

impl RefreshRequest {
    pub fn scope(&self) -> Result<RefreshScope, ServiceError> {
        match (self.warehouse_id, self.organization_id) {
            (Some(id), None) => Ok(RefreshScope::Warehouse(id)),
            (None, Some(id)) => Ok(RefreshScope::Organization(id)),
            _ => Err(ServiceError::ValidationError(
                "exactly one of warehouse_id and organization_id is required".into(),
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub scope: RefreshScope,
    /// False when the refresh failed and the previous cache was kept
    pub refreshed: bool,
    pub report: Option<RefreshReport>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CachedStockResponse {
    pub warehouse_id: Uuid,
    /// Possibly stale; display only
    pub rows: Vec<derived_stock::Model>,
}

pub fn cache_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new()
        .route("/cache/refresh", post(refresh_cache::<S>))
        .route(
            "/warehouses/:warehouse_id/stock/cached",
            get(get_cached_stock::<S>),
        )
}

/// Recompute the derived stock cache for a warehouse or organization
#[utoipa::path(
    post,
    path = "/api/v1/cache/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Refresh attempted", body = RefreshResponse),
        (status = 400, description = "Invalid scope", body = crate::errors::ErrorResponse)
    ),
    tag = "cache"
)]
pub async fn refresh_cache<S>(
    State(state): State<S>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let scope = payload.scope()?;
    let report = state.engine().cache.refresh_quietly(scope).await;

    Ok(success_response(RefreshResponse {
        scope,
        refreshed: report.is_some(),
        report,
    }))
}

/// Last cached stock of a warehouse
#[utoipa::path(
    get,
    path = "/api/v1/warehouses/{warehouse_id}/stock/cached",
    params(
        ("warehouse_id" = Uuid, Path, description = "Warehouse ID")
    ),
    responses(
        (status = 200, description = "Cached rows", body = CachedStockResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "cache"
)]
pub async fn get_cached_stock<S>(
    State(state): State<S>,
    Path(warehouse_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let rows = state
        .engine()
        .cache
        .cached_warehouse_stock(warehouse_id)
        .await?;
    Ok(success_response(CachedStockResponse { warehouse_id, rows }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn refresh_scope_requires_exactly_one_id() {
        let id = Uuid::new_v4();
        assert_matches!(
            RefreshRequest {
                warehouse_id: Some(id),
                organization_id: None
            }
            .scope(),
            Ok(RefreshScope::Warehouse(got)) if got == id
        );
        assert!(RefreshRequest::default().scope().is_err());
        assert!(RefreshRequest {
            warehouse_id: Some(id),
            organization_id: Some(id)
        }
        .scope()
        .is_err());
    }
}
