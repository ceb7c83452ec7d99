/// Common types and utilities shared across handlers and services
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// A (warehouse, part) combination: the unit of stock and of write serialization.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub struct StockPair {
    pub warehouse_id: Uuid,
    pub part_id: Uuid,
}

impl StockPair {
    pub fn new(warehouse_id: Uuid, part_id: Uuid) -> Self {
        Self {
            warehouse_id,
            part_id,
        }
    }
}

impl fmt::Display for StockPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warehouse {} / part {}", self.warehouse_id, self.part_id)
    }
}

/// Fractional digits every quantity column keeps.
pub const QUANTITY_SCALE: u32 = 4;

/// Whether `quantity` fits the stored column without rounding.
pub fn fits_quantity_scale(quantity: Decimal) -> bool {
    quantity.normalize().scale() <= QUANTITY_SCALE
}

/// Pairs a row moves: the source and/or destination warehouse of `part_id`.
pub fn touched_pairs(
    part_id: Uuid,
    from_warehouse_id: Option<Uuid>,
    to_warehouse_id: Option<Uuid>,
) -> Vec<StockPair> {
    from_warehouse_id
        .into_iter()
        .chain(to_warehouse_id)
        .map(|warehouse_id| StockPair::new(warehouse_id, part_id))
        .collect()
}

/// Truncates a timestamp to microseconds, the resolution every supported store keeps.
pub fn to_ledger_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::microseconds(1)).unwrap_or(ts)
}

/// Current instant at ledger precision.
pub fn ledger_now() -> DateTime<Utc> {
    to_ledger_precision(Utc::now())
}

/// Optional `as_of` query parameter for historical reads
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AsOfParams {
    /// RFC 3339 instant; omitted means now
    pub as_of: Option<DateTime<Utc>>,
}

impl AsOfParams {
    pub fn resolve(&self) -> DateTime<Utc> {
        self.as_of.map(to_ledger_precision).unwrap_or_else(ledger_now)
    }
}
