//! Warehouse and organization stock, batched.
//!
//! One adjustments query and one transactions query cover the whole scope; rows are
//! grouped by pair in memory and folded with the same replay used for single pairs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::histogram;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::common::{ledger_now, to_ledger_precision, StockPair};
use crate::db::{self, DbPool};
use crate::entities::{warehouse, Warehouse};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{
    ledger,
    stock_calculator::{replay_batch, StockLevel},
};

/// Part id → quantity for one warehouse
pub type WarehouseStock = BTreeMap<Uuid, Decimal>;

/// Warehouse id → part stock for one organization
pub type OrganizationStock = BTreeMap<Uuid, WarehouseStock>;

#[derive(Debug, Clone)]
pub struct Aggregator {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl Aggregator {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Stock of every part with ledger activity in `warehouse_id`.
    #[instrument(skip(self))]
    pub async fn compute_warehouse_stock(
        &self,
        warehouse_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<WarehouseStock, ServiceError> {
        let start = Instant::now();
        let as_of = resolve(as_of);

        let txn = db::snapshot(self.db.as_ref()).await?;
        let levels = levels_for(&txn, &[warehouse_id], as_of).await?;
        txn.commit().await?;

        self.report_negative(&levels).await;
        histogram!("stockledger.compute.duration", start.elapsed().as_secs_f64(), "scope" => "warehouse");

        Ok(levels
            .into_iter()
            .map(|level| (level.part_id, level.quantity))
            .collect())
    }

    /// Stock of every warehouse the organization owns; warehouses without activity map
    /// to an empty part table.
    #[instrument(skip(self))]
    pub async fn compute_organization_stock(
        &self,
        organization_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<OrganizationStock, ServiceError> {
        let (warehouse_ids, levels) = self.organization_levels(organization_id, as_of).await?;
        self.report_negative(&levels).await;

        let mut stock: OrganizationStock = warehouse_ids
            .into_iter()
            .map(|id| (id, WarehouseStock::new()))
            .collect();
        for level in levels {
            stock
                .entry(level.warehouse_id)
                .or_default()
                .insert(level.part_id, level.quantity);
        }
        Ok(stock)
    }

    /// Pairs of the organization whose derived stock is below zero.
    #[instrument(skip(self))]
    pub async fn negative_stock(
        &self,
        organization_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<StockLevel>, ServiceError> {
        let (_, levels) = self.organization_levels(organization_id, as_of).await?;
        let negative: Vec<StockLevel> = levels.into_iter().filter(StockLevel::is_negative).collect();
        self.report_negative(&negative).await;

        info!(%organization_id, negative = negative.len(), "Negative stock scan finished");
        Ok(negative)
    }

    /// Organizations known through their warehouses.
    pub async fn organizations(&self) -> Result<Vec<Uuid>, ServiceError> {
        let mut ids: Vec<Uuid> = Warehouse::find()
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|w| w.organization_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn organization_levels(
        &self,
        organization_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Uuid>, Vec<StockLevel>), ServiceError> {
        let start = Instant::now();
        let as_of = resolve(as_of);

        let txn = db::snapshot(self.db.as_ref()).await?;
        let warehouse_ids: Vec<Uuid> = Warehouse::find()
            .filter(warehouse::Column::OrganizationId.eq(organization_id))
            .order_by_asc(warehouse::Column::Id)
            .all(&txn)
            .await?
            .into_iter()
            .map(|w| w.id)
            .collect();
        let levels = levels_for(&txn, &warehouse_ids, as_of).await?;
        txn.commit().await?;

        histogram!("stockledger.compute.duration", start.elapsed().as_secs_f64(), "scope" => "organization");
        Ok((warehouse_ids, levels))
    }

    async fn report_negative(&self, levels: &[StockLevel]) {
        for level in levels.iter().filter(|l| l.is_negative()) {
            warn!(
                warehouse_id = %level.warehouse_id,
                part_id = %level.part_id,
                quantity = %level.quantity,
                as_of = %level.as_of,
                "Negative derived stock"
            );
            self.event_sender
                .send_or_log(Event::NegativeStockDetected {
                    warehouse_id: level.warehouse_id,
                    part_id: level.part_id,
                    quantity: level.quantity,
                    as_of: level.as_of,
                })
                .await;
        }
    }
}

fn resolve(as_of: Option<DateTime<Utc>>) -> DateTime<Utc> {
    as_of.map(to_ledger_precision).unwrap_or_else(ledger_now)
}

/// Stock levels for every active pair in `warehouse_ids`, ordered by pair.
pub async fn levels_for<C>(
    db: &C,
    warehouse_ids: &[Uuid],
    as_of: DateTime<Utc>,
) -> Result<Vec<StockLevel>, ServiceError>
where
    C: ConnectionTrait,
{
    let adjustments = ledger::checkpoints_for_warehouses(db, warehouse_ids, as_of).await?;
    let transactions = ledger::replayable_transactions_for_warehouses(db, warehouse_ids, as_of).await?;

    let levels: BTreeMap<StockPair, StockLevel> =
        replay_batch(warehouse_ids, &adjustments, &transactions, as_of)
            .into_iter()
            .collect();
    Ok(levels.into_values().collect())
}
