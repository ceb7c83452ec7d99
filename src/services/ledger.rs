//! Ledger store and transaction writer.
//!
//! Transactions and adjustments are append-only. Everything here either inserts a new
//! row or reads rows back in ledger order; nothing updates or deletes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::common::{
    fits_quantity_scale, ledger_now, to_ledger_precision, touched_pairs, StockPair, QUANTITY_SCALE,
};
use crate::db::DbPool;
use crate::entities::{
    inventory_transaction::{self, TransactionType},
    stock_adjustment, InventoryTransaction, StockAdjustment,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pair_locks::PairLocks;

/// An ordinary ledger transaction as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct NewTransaction {
    pub part_id: Uuid,
    #[serde(default)]
    pub from_warehouse_id: Option<Uuid>,
    #[serde(default)]
    pub to_warehouse_id: Option<Uuid>,
    /// Strictly positive; direction comes from the warehouse fields
    #[schema(value_type = String, example = "5")]
    pub quantity: Decimal,
    pub transaction_type: TransactionType,
    /// Defaults to the time of recording
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub performed_by: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub reference: Option<String>,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

impl NewTransaction {
    fn new(
        part_id: Uuid,
        from_warehouse_id: Option<Uuid>,
        to_warehouse_id: Option<Uuid>,
        quantity: Decimal,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            part_id,
            from_warehouse_id,
            to_warehouse_id,
            quantity,
            transaction_type,
            occurred_at: None,
            performed_by: None,
            reference: None,
            notes: None,
        }
    }

    pub fn receipt(warehouse_id: Uuid, part_id: Uuid, quantity: Decimal) -> Self {
        Self::new(part_id, None, Some(warehouse_id), quantity, TransactionType::Receipt)
    }

    pub fn consumption(warehouse_id: Uuid, part_id: Uuid, quantity: Decimal) -> Self {
        Self::new(
            part_id,
            Some(warehouse_id),
            None,
            quantity,
            TransactionType::Consumption,
        )
    }

    pub fn transfer(from: Uuid, to: Uuid, part_id: Uuid, quantity: Decimal) -> Self {
        Self::new(part_id, Some(from), Some(to), quantity, TransactionType::Transfer)
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn by(mut self, performed_by: impl Into<String>) -> Self {
        self.performed_by = Some(performed_by.into());
        self
    }

    /// Ledger invariants; a violating transaction is never stored.
    pub fn check_invariants(&self) -> Result<(), ServiceError> {
        if self.quantity <= Decimal::ZERO {
            return Err(ServiceError::invalid_entry(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if !fits_quantity_scale(self.quantity) {
            return Err(ServiceError::invalid_entry(format!(
                "quantity {} has more than {} fractional digits",
                self.quantity, QUANTITY_SCALE
            )));
        }

        match (self.from_warehouse_id, self.to_warehouse_id) {
            (None, None) => Err(ServiceError::invalid_entry(
                "at least one of from_warehouse_id and to_warehouse_id must be set",
            )),
            (Some(from), Some(to)) if from == to => Err(ServiceError::invalid_entry(
                "a transfer must move stock between two different warehouses",
            )),
            (Some(_), Some(_)) if self.transaction_type != TransactionType::Transfer => {
                Err(ServiceError::invalid_entry(format!(
                    "a {} transaction may only touch one warehouse",
                    self.transaction_type
                )))
            }
            (Some(_), None) | (None, Some(_))
                if self.transaction_type == TransactionType::Transfer =>
            {
                Err(ServiceError::invalid_entry(
                    "a transfer needs both a source and a destination warehouse",
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn touched_pairs(&self) -> Vec<StockPair> {
        touched_pairs(self.part_id, self.from_warehouse_id, self.to_warehouse_id)
    }
}

/// Validated insert path for ordinary transactions plus audit-trail reads.
#[derive(Debug, Clone)]
pub struct LedgerService {
    db: Arc<DbPool>,
    locks: PairLocks,
    event_sender: EventSender,
}

impl LedgerService {
    pub fn new(db: Arc<DbPool>, locks: PairLocks, event_sender: EventSender) -> Self {
        Self {
            db,
            locks,
            event_sender,
        }
    }

    /// Records an ordinary transaction.
    ///
    /// Holds the touched pairs in shared mode for the insert, so it never lands inside a
    /// reset of the same pair.
    #[instrument(skip(self, new), fields(part_id = %new.part_id, transaction_type = %new.transaction_type))]
    pub async fn record_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<inventory_transaction::Model, ServiceError> {
        new.validate()?;
        new.check_invariants()?;

        let _guards = self.locks.shared(new.touched_pairs()).await?;

        let recorded_at = ledger_now();
        let occurred_at = new
            .occurred_at
            .map(to_ledger_precision)
            .unwrap_or(recorded_at);

        let saved = inventory_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            part_id: Set(new.part_id),
            from_warehouse_id: Set(new.from_warehouse_id),
            to_warehouse_id: Set(new.to_warehouse_id),
            quantity: Set(new.quantity),
            transaction_type: Set(new.transaction_type),
            occurred_at: Set(occurred_at),
            recorded_at: Set(recorded_at),
            performed_by: Set(new.performed_by),
            reference: Set(new.reference),
            notes: Set(new.notes),
            adjustment_id: Set(None),
        }
        .insert(self.db.as_ref())
        .await?;

        counter!("stockledger.transactions.recorded", 1, "type" => saved.transaction_type.to_string());
        info!(
            transaction_id = %saved.id,
            quantity = %saved.quantity,
            occurred_at = %saved.occurred_at,
            "Ledger transaction recorded"
        );

        self.event_sender
            .send_or_log(Event::TransactionRecorded {
                transaction_id: saved.id,
                part_id: saved.part_id,
                from_warehouse_id: saved.from_warehouse_id,
                to_warehouse_id: saved.to_warehouse_id,
                quantity: saved.quantity,
                transaction_type: saved.transaction_type,
                occurred_at: saved.occurred_at,
            })
            .await;

        Ok(saved)
    }

    /// Full history for a pair in ledger order, audit mirrors included.
    pub async fn transactions_for_pair(
        &self,
        pair: StockPair,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<inventory_transaction::Model>, ServiceError> {
        let mut query = InventoryTransaction::find().filter(pair_condition(pair));
        if let Some(since) = since {
            query = query.filter(inventory_transaction::Column::OccurredAt.gte(to_ledger_precision(since)));
        }
        if let Some(until) = until {
            query = query.filter(inventory_transaction::Column::OccurredAt.lte(to_ledger_precision(until)));
        }

        Ok(query
            .order_by_asc(inventory_transaction::Column::OccurredAt)
            .order_by_asc(inventory_transaction::Column::RecordedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Every checkpoint ever written for a pair, oldest first.
    pub async fn adjustments_for_pair(
        &self,
        pair: StockPair,
    ) -> Result<Vec<stock_adjustment::Model>, ServiceError> {
        Ok(StockAdjustment::find()
            .filter(stock_adjustment::Column::WarehouseId.eq(pair.warehouse_id))
            .filter(stock_adjustment::Column::PartId.eq(pair.part_id))
            .order_by_asc(stock_adjustment::Column::OccurredAt)
            .order_by_asc(stock_adjustment::Column::RecordedAt)
            .all(self.db.as_ref())
            .await?)
    }
}

fn pair_condition(pair: StockPair) -> Condition {
    Condition::all()
        .add(inventory_transaction::Column::PartId.eq(pair.part_id))
        .add(
            Condition::any()
                .add(inventory_transaction::Column::ToWarehouseId.eq(pair.warehouse_id))
                .add(inventory_transaction::Column::FromWarehouseId.eq(pair.warehouse_id)),
        )
}

fn warehouses_condition(warehouse_ids: &[Uuid]) -> Condition {
    Condition::any()
        .add(inventory_transaction::Column::ToWarehouseId.is_in(warehouse_ids.iter().copied()))
        .add(inventory_transaction::Column::FromWarehouseId.is_in(warehouse_ids.iter().copied()))
}

/// Latest checkpoint for `pair` at or before `as_of`, ties broken by recording order.
pub async fn latest_checkpoint<C>(
    db: &C,
    pair: StockPair,
    as_of: DateTime<Utc>,
) -> Result<Option<stock_adjustment::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(StockAdjustment::find()
        .filter(stock_adjustment::Column::WarehouseId.eq(pair.warehouse_id))
        .filter(stock_adjustment::Column::PartId.eq(pair.part_id))
        .filter(stock_adjustment::Column::OccurredAt.lte(as_of))
        .order_by_desc(stock_adjustment::Column::OccurredAt)
        .order_by_desc(stock_adjustment::Column::RecordedAt)
        .one(db)
        .await?)
}

/// Ordinary transactions for `pair` in `[since, as_of]`; audit mirrors are left out.
pub async fn replayable_transactions<C>(
    db: &C,
    pair: StockPair,
    since: Option<DateTime<Utc>>,
    as_of: DateTime<Utc>,
) -> Result<Vec<inventory_transaction::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = InventoryTransaction::find()
        .filter(pair_condition(pair))
        .filter(inventory_transaction::Column::AdjustmentId.is_null())
        .filter(inventory_transaction::Column::OccurredAt.lte(as_of));
    if let Some(since) = since {
        query = query.filter(inventory_transaction::Column::OccurredAt.gte(since));
    }

    Ok(query
        .order_by_asc(inventory_transaction::Column::OccurredAt)
        .order_by_asc(inventory_transaction::Column::RecordedAt)
        .all(db)
        .await?)
}

/// All checkpoints at or before `as_of` for a set of warehouses, in one query.
pub async fn checkpoints_for_warehouses<C>(
    db: &C,
    warehouse_ids: &[Uuid],
    as_of: DateTime<Utc>,
) -> Result<Vec<stock_adjustment::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    if warehouse_ids.is_empty() {
        return Ok(Vec::new());
    }

    Ok(StockAdjustment::find()
        .filter(stock_adjustment::Column::WarehouseId.is_in(warehouse_ids.iter().copied()))
        .filter(stock_adjustment::Column::OccurredAt.lte(as_of))
        .all(db)
        .await?)
}

/// All ordinary transactions at or before `as_of` touching a set of warehouses, in one query.
pub async fn replayable_transactions_for_warehouses<C>(
    db: &C,
    warehouse_ids: &[Uuid],
    as_of: DateTime<Utc>,
) -> Result<Vec<inventory_transaction::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    if warehouse_ids.is_empty() {
        return Ok(Vec::new());
    }

    Ok(InventoryTransaction::find()
        .filter(warehouses_condition(warehouse_ids))
        .filter(inventory_transaction::Column::AdjustmentId.is_null())
        .filter(inventory_transaction::Column::OccurredAt.lte(as_of))
        .all(db)
        .await?)
}

/// Whether an ordinary transaction for `pair` sits at exactly `instant`.
pub async fn has_transaction_at<C>(
    db: &C,
    pair: StockPair,
    instant: DateTime<Utc>,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let count = InventoryTransaction::find()
        .filter(pair_condition(pair))
        .filter(inventory_transaction::Column::AdjustmentId.is_null())
        .filter(inventory_transaction::Column::OccurredAt.eq(instant))
        .count(db)
        .await?;
    Ok(count > 0)
}
