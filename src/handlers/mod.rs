pub mod cache;
pub mod common;
pub mod inventory;
pub mod ledger;

use axum::Router;

pub use inventory::InventoryHandlerState;

/// Every engine route, to be nested under `/api/v1`
pub fn api_router<S>() -> Router<S>
where
    S: InventoryHandlerState,
{
    Router::new()
        .merge(inventory::inventory_router::<S>())
        .merge(ledger::ledger_router::<S>())
        .merge(cache::cache_router::<S>())
}
