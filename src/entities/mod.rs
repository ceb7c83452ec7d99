pub mod derived_stock;
pub mod inventory_transaction;
pub mod stock_adjustment;
pub mod warehouse;

pub use derived_stock::Entity as DerivedStock;
pub use inventory_transaction::{Entity as InventoryTransaction, TransactionType};
pub use stock_adjustment::Entity as StockAdjustment;
pub use warehouse::Entity as Warehouse;
