// Ledger storage and the ordinary transaction writer
pub mod ledger;

// Derivation
pub mod aggregator;
pub mod stock_calculator;

// Checkpoint writes and their serialization boundary
pub mod adjustment_writer;
pub mod pair_locks;

// Display-only cache
pub mod cache_refresher;

// Service factory for dependency injection
pub mod factory;

pub use factory::{InventoryEngine, ServiceFactory};
