use axum::{
    extract::{Json, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{actor_from_headers, created_response, success_response};
use super::inventory::InventoryHandlerState;
use crate::common::StockPair;
use crate::entities::{inventory_transaction, stock_adjustment};
use crate::errors::ServiceError;
use crate::services::ledger::NewTransaction;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// Earliest occurred_at to include
    pub since: Option<DateTime<Utc>>,
    /// Latest occurred_at to include
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PairHistoryResponse {
    pub warehouse_id: Uuid,
    pub part_id: Uuid,
    pub transactions: Vec<inventory_transaction::Model>,
    pub adjustments: Vec<stock_adjustment::Model>,
}

pub fn ledger_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new()
        .route("/transactions", post(record_transaction::<S>))
        .route(
            "/warehouses/:warehouse_id/parts/:part_id/history",
            get(get_pair_history::<S>),
        )
}

/// Record an ordinary ledger transaction
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    params(
        ("X-Actor-Id" = Option<String>, Header, description = "Actor recorded as performed_by")
    ),
    request_body = NewTransaction,
    responses(
        (status = 201, description = "Transaction stored", body = inventory_transaction::Model),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Pair busy; retry", body = crate::errors::ErrorResponse),
        (status = 422, description = "Invalid ledger entry", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn record_transaction<S>(
    State(state): State<S>,
    headers: HeaderMap,
    Json(mut payload): Json<NewTransaction>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    if let Some(actor) = actor_from_headers(&headers) {
        payload.performed_by = Some(actor);
    }
    let saved = state.engine().ledger.record_transaction(payload).await?;
    Ok(created_response(saved))
}

/// Audit trail of a pair: every transaction (mirrors included) and every checkpoint
#[utoipa::path(
    get,
    path = "/api/v1/warehouses/{warehouse_id}/parts/{part_id}/history",
    params(
        ("warehouse_id" = Uuid, Path, description = "Warehouse ID"),
        ("part_id" = Uuid, Path, description = "Part ID"),
        HistoryParams
    ),
    responses(
        (status = 200, description = "Ledger rows in order", body = PairHistoryResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse)
    ),
    tag = "ledger"
)]
pub async fn get_pair_history<S>(
    State(state): State<S>,
    Path((warehouse_id, part_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ServiceError>
where
    S: InventoryHandlerState,
{
    let pair = StockPair::new(warehouse_id, part_id);
    let ledger = &state.engine().ledger;
    let transactions = ledger
        .transactions_for_pair(pair, params.since, params.until)
        .await?;
    let adjustments = ledger.adjustments_for_pair(pair).await?;

    Ok(success_response(PairHistoryResponse {
        warehouse_id,
        part_id,
        transactions,
        adjustments,
    }))
}
