use std::collections::BTreeMap;

use axum::{
    extract::{Json, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::{actor_from_headers, success_response, validate_input};
use crate::common::AsOfParams;
use crate::errors::ServiceError;
use crate::services::{
    adjustment_writer::{ResetItem, ResetOutcome, StocktakeCount},
    stock_calculator::StockLevel,
    InventoryEngine,
};

// Trait for handler state that provides access to the inventory engine
pub trait InventoryHandlerState: Clone + Send + Sync + 'static {
    fn engine(&self) -> &InventoryEngine;
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WarehouseStockResponse {
    pub warehouse_id: Uuid,
    pub as_of: DateTime<Utc>,
    /// Part id to quantity
    #[schema(value_type = Object)]
    pub parts: BTreeMap<Uuid, Decimal>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrganizationStockResponse {
    pub organization_id: Uuid,
    pub as_of: DateTime<Utc>,
    /// Warehouse id to (part id to quantity)
    #[schema(value_type = Object)]
    pub warehouses: BTreeMap<Uuid, BTreeMap<Uuid, Decimal>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NegativeStockResponse {
    pub organization_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub pairs: Vec<StockLevel>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResetRequest {
    #[validate(length(min = 1, max = 1000))]
    pub items: Vec<ResetItem>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetResponse {
    pub warehouse_id: Uuid,
    pub results: Vec<ResetOutcome>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AdjustmentRequest {
    #[schema(value_type = String, example = "12")]
    pub new_quantity: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct StocktakeRequest {
    #[validate(length(min = 1, max = 1000))]
    pub counts: Vec<StocktakeCount>,
}

/// Create the inventory router
pub fn inventory_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new()
        .route(
            "/warehouses/:warehouse_id/parts/:part_id/stock",
            get(get_pair_stock::<S>),
        )
        .route(
            "/warehouses/:warehouse_id/parts/:part_id/adjustments",
            post(apply_adjustment::<S>),
        )
        .route("/warehouses/:warehouse_id/stock", get(get_warehouse_stock::<S>))
        .route("/warehouses/:warehouse_id/reset", post(apply_reset::<S>))
        .route("/warehouses/:warehouse_id/stocktake", post(record_stocktake::<S>))
        .route(
            "/organizations/:organization_id/stock",
            get(get_organization_stock::<S>),
        )
        .route(
            "/organizations/:organization_id/stock/negative",
            get(get_negative_stock::<S>),
        )
}

/// Stock of one part in one warehouse
#[utoipa::path(
    get,
    path = "/api/v1/warehouses/{warehouse_id}/parts/{part_id}/stock",
    params(
        ("warehouse_id" = Uuid, Path, description = "Warehouse ID"),
        ("part_id" = Uuid, Path, description = "Part ID"),
        AsOfParams
    ),
    responses(
        (status = 200, description = "Derived stock", body = StockLevel),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn get_pair_stock<S>(
    State(state): State<S>,
    Path((warehouse_id, part_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<AsOfParams>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let level = state
        .engine()
        .calculator
        .compute_stock(warehouse_id, part_id, Some(params.resolve()))
        .await?;
    Ok(success_response(level))
}

/// Stock of every active part in a warehouse
#[utoipa::path(
    get,
    path = "/api/v1/warehouses/{warehouse_id}/stock",
    params(
        ("warehouse_id" = Uuid, Path, description = "Warehouse ID"),
        AsOfParams
    ),
    responses(
        (status = 200, description = "Derived stock by part", body = WarehouseStockResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn get_warehouse_stock<S>(
    State(state): State<S>,
    Path(warehouse_id): Path<Uuid>,
    Query(params): Query<AsOfParams>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let as_of = params.resolve();
    let parts = state
        .engine()
        .aggregator
        .compute_warehouse_stock(warehouse_id, Some(as_of))
        .await?;

    Ok(success_response(WarehouseStockResponse {
        warehouse_id,
        as_of,
        parts,
    }))
}

/// Stock of every warehouse an organization owns
#[utoipa::path(
    get,
    path = "/api/v1/organizations/{organization_id}/stock",
    params(
        ("organization_id" = Uuid, Path, description = "Organization ID"),
        AsOfParams
    ),
    responses(
        (status = 200, description = "Derived stock by warehouse and part", body = OrganizationStockResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn get_organization_stock<S>(
    State(state): State<S>,
    Path(organization_id): Path<Uuid>,
    Query(params): Query<AsOfParams>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let as_of = params.resolve();
    let warehouses = state
        .engine()
        .aggregator
        .compute_organization_stock(organization_id, Some(as_of))
        .await?;

    Ok(success_response(OrganizationStockResponse {
        organization_id,
        as_of,
        warehouses,
    }))
}

/// Pairs whose derived stock is negative
#[utoipa::path(
    get,
    path = "/api/v1/organizations/{organization_id}/stock/negative",
    params(
        ("organization_id" = Uuid, Path, description = "Organization ID"),
        AsOfParams
    ),
    responses(
        (status = 200, description = "Negative stock report", body = NegativeStockResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "stock"
)]
pub async fn get_negative_stock<S>(
    State(state): State<S>,
    Path(organization_id): Path<Uuid>,
    Query(params): Query<AsOfParams>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let as_of = params.resolve();
    let pairs = state
        .engine()
        .aggregator
        .negative_stock(organization_id, Some(as_of))
        .await?;

    Ok(success_response(NegativeStockResponse {
        organization_id,
        as_of,
        pairs,
    }))
}

/// Set absolute quantities for several parts of a warehouse
#[utoipa::path(
    post,
    path = "/api/v1/warehouses/{warehouse_id}/reset",
    params(
        ("warehouse_id" = Uuid, Path, description = "Warehouse ID"),
        ("X-Actor-Id" = Option<String>, Header, description = "Actor recorded as performed_by")
    ),
    request_body = ResetRequest,
    responses(
        (status = 200, description = "Per-item reset results", body = ResetResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Pair busy; retry", body = crate::errors::ErrorResponse),
        (status = 422, description = "Invalid ledger entry", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "adjustments"
)]
pub async fn apply_reset<S>(
    State(state): State<S>,
    Path(warehouse_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ResetRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    validate_input(&payload)?;
    let results = state
        .engine()
        .adjustments
        .apply_reset(warehouse_id, payload.items, actor_from_headers(&headers))
        .await?;

    Ok(success_response(ResetResponse {
        warehouse_id,
        results,
    }))
}

/// Manual adjustment of one part
#[utoipa::path(
    post,
    path = "/api/v1/warehouses/{warehouse_id}/parts/{part_id}/adjustments",
    params(
        ("warehouse_id" = Uuid, Path, description = "Warehouse ID"),
        ("part_id" = Uuid, Path, description = "Part ID"),
        ("X-Actor-Id" = Option<String>, Header, description = "Actor recorded as performed_by")
    ),
    request_body = AdjustmentRequest,
    responses(
        (status = 200, description = "Adjustment result", body = ResetOutcome),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Pair busy; retry", body = crate::errors::ErrorResponse),
        (status = 422, description = "Invalid ledger entry", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "adjustments"
)]
pub async fn apply_adjustment<S>(
    State(state): State<S>,
    Path((warehouse_id, part_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(payload): Json<AdjustmentRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    validate_input(&payload)?;
    let outcome = state
        .engine()
        .adjustments
        .apply_adjustment(
            warehouse_id,
            part_id,
            payload.new_quantity,
            payload.reason,
            payload.notes,
            actor_from_headers(&headers),
        )
        .await?;
    Ok(success_response(outcome))
}

/// Record a physical count
#[utoipa::path(
    post,
    path = "/api/v1/warehouses/{warehouse_id}/stocktake",
    params(
        ("warehouse_id" = Uuid, Path, description = "Warehouse ID"),
        ("X-Actor-Id" = Option<String>, Header, description = "Actor recorded as performed_by")
    ),
    request_body = StocktakeRequest,
    responses(
        (status = 200, description = "Per-count results", body = ResetResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Pair busy; retry", body = crate::errors::ErrorResponse),
        (status = 422, description = "Invalid ledger entry", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "adjustments"
)]
pub async fn record_stocktake<S>(
    State(state): State<S>,
    Path(warehouse_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<StocktakeRequest>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    validate_input(&payload)?;
    let results = state
        .engine()
        .adjustments
        .record_stocktake(warehouse_id, payload.counts, actor_from_headers(&headers))
        .await?;

    Ok(success_response(ResetResponse {
        warehouse_id,
        results,
    }))
}
