use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "stockledger",
        version = "0.1.0",
        description = r#"
# Calculated Inventory Engine

On-hand stock per (warehouse, part) is derived from an append-only ledger of
transactions plus authoritative checkpoints ("stock adjustments"). No mutable counter
is trusted.

## Actor

Write endpoints record `performed_by` from the `X-Actor-Id` header when present.
Authentication happens in front of this service.

## Errors

Every error uses one body shape:

```json
{
  "error": "Conflict",
  "message": "Concurrent modification of warehouse … / part …; retry the request",
  "timestamp": "2024-01-01T00:00:00Z",
  "retryable": true
}
```

Only `409 Conflict` is retryable as-is.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "stock", description = "Derived stock reads"),
        (name = "adjustments", description = "Checkpoint writes: resets, adjustments, stocktakes"),
        (name = "ledger", description = "Ordinary transactions and audit history"),
        (name = "cache", description = "Display-only derived stock cache"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        // Stock
        crate::handlers::inventory::get_pair_stock,
        crate::handlers::inventory::get_warehouse_stock,
        crate::handlers::inventory::get_organization_stock,
        crate::handlers::inventory::get_negative_stock,

        // Adjustments
        crate::handlers::inventory::apply_reset,
        crate::handlers::inventory::apply_adjustment,
        crate::handlers::inventory::record_stocktake,

        // Ledger
        crate::handlers::ledger::record_transaction,
        crate::handlers::ledger::get_pair_history,

        // Cache
        crate::handlers::cache::refresh_cache,
        crate::handlers::cache::get_cached_stock,

        // Health
        crate::health::health_check,
        crate::health::readiness_check,
    ),
    components(
        schemas(
            crate::services::stock_calculator::StockLevel,
            crate::services::adjustment_writer::ResetItem,
            crate::services::adjustment_writer::ResetOutcome,
            crate::services::adjustment_writer::StocktakeCount,
            crate::services::ledger::NewTransaction,
            crate::services::cache_refresher::RefreshReport,
            crate::events::RefreshScope,
            crate::entities::TransactionType,
            crate::entities::inventory_transaction::Model,
            crate::entities::stock_adjustment::Model,
            crate::entities::derived_stock::Model,
            crate::handlers::inventory::WarehouseStockResponse,
            crate::handlers::inventory::OrganizationStockResponse,
            crate::handlers::inventory::NegativeStockResponse,
            crate::handlers::inventory::ResetRequest,
            crate::handlers::inventory::ResetResponse,
            crate::handlers::inventory::AdjustmentRequest,
            crate::handlers::inventory::StocktakeRequest,
            crate::handlers::ledger::PairHistoryResponse,
            crate::handlers::cache::RefreshRequest,
            crate::handlers::cache::RefreshResponse,
            crate::handlers::cache::CachedStockResponse,
            crate::health::HealthInfo,
            crate::health::ReadinessInfo,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`
pub fn openapi_routes() -> Router {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_engine_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("/api/v1/warehouses/{warehouse_id}/reset"));
        assert!(json.contains("/api/v1/transactions"));
        assert!(json.contains("LedgerTransaction"));
    }
}
