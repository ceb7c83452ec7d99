//! The only writer of checkpoints.
//!
//! A batch takes exclusive locks on all of its pairs, then reads the current stock and
//! writes each checkpoint inside one database transaction. Once the locks are held the
//! work runs on its own task, so a dropped caller cannot abandon it halfway.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::common::{fits_quantity_scale, ledger_now, StockPair, QUANTITY_SCALE};
use crate::db::{self, DbPool};
use crate::entities::{inventory_transaction, stock_adjustment, TransactionType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{ledger, pair_locks::PairLocks, stock_calculator};

pub const STOCKTAKE_REASON: &str = "stocktake";

/// One line of a stock reset.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResetItem {
    pub part_id: Uuid,
    #[schema(value_type = String, example = "0")]
    pub new_quantity: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

/// Counted quantity for one part during a stocktake.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct StocktakeCount {
    pub part_id: Uuid,
    #[schema(value_type = String, example = "42")]
    pub counted_quantity: Decimal,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

impl From<StocktakeCount> for ResetItem {
    fn from(count: StocktakeCount) -> Self {
        Self {
            part_id: count.part_id,
            new_quantity: count.counted_quantity,
            reason: STOCKTAKE_REASON.to_string(),
            notes: count.notes,
        }
    }
}

/// Result for one reset line. `adjustment_id` is `None` when nothing changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResetOutcome {
    pub part_id: Uuid,
    #[schema(value_type = String)]
    pub previous: Decimal,
    #[schema(value_type = String)]
    pub new: Decimal,
    #[schema(value_type = String)]
    pub delta: Decimal,
    pub adjustment_id: Option<Uuid>,
}

impl ResetOutcome {
    pub fn skipped(&self) -> bool {
        self.adjustment_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct AdjustmentWriter {
    db: Arc<DbPool>,
    locks: PairLocks,
    event_sender: EventSender,
    audit_transactions: bool,
}

impl AdjustmentWriter {
    pub fn new(
        db: Arc<DbPool>,
        locks: PairLocks,
        event_sender: EventSender,
        audit_transactions: bool,
    ) -> Self {
        Self {
            db,
            locks,
            event_sender,
            audit_transactions,
        }
    }

    /// Sets each listed part of `warehouse_id` to an absolute quantity.
    ///
    /// All-or-nothing: either every changed line gets its checkpoint or none does.
    /// Lines whose quantity already matches are reported with a zero delta and write
    /// nothing.
    #[instrument(skip(self, items, performed_by), fields(items = items.len()))]
    pub async fn apply_reset(
        &self,
        warehouse_id: Uuid,
        items: Vec<ResetItem>,
        performed_by: Option<String>,
    ) -> Result<Vec<ResetOutcome>, ServiceError> {
        self.write_batch(warehouse_id, items, performed_by, TransactionType::Adjustment)
            .await
    }

    /// Manual correction of a single pair.
    #[instrument(skip(self, reason, notes, performed_by))]
    pub async fn apply_adjustment(
        &self,
        warehouse_id: Uuid,
        part_id: Uuid,
        new_quantity: Decimal,
        reason: String,
        notes: Option<String>,
        performed_by: Option<String>,
    ) -> Result<ResetOutcome, ServiceError> {
        let item = ResetItem {
            part_id,
            new_quantity,
            reason,
            notes,
        };
        let mut outcomes = self
            .write_batch(
                warehouse_id,
                vec![item],
                performed_by,
                TransactionType::Adjustment,
            )
            .await?;
        outcomes
            .pop()
            .ok_or_else(|| ServiceError::InternalError("adjustment produced no outcome".into()))
    }

    /// Physical count: a reset whose lines carry the stocktake reason and type.
    #[instrument(skip(self, counts, performed_by), fields(counts = counts.len()))]
    pub async fn record_stocktake(
        &self,
        warehouse_id: Uuid,
        counts: Vec<StocktakeCount>,
        performed_by: Option<String>,
    ) -> Result<Vec<ResetOutcome>, ServiceError> {
        for count in &counts {
            count.validate()?;
        }
        let items = counts.into_iter().map(ResetItem::from).collect();
        self.write_batch(warehouse_id, items, performed_by, TransactionType::Stocktake)
            .await
    }

    async fn write_batch(
        &self,
        warehouse_id: Uuid,
        items: Vec<ResetItem>,
        performed_by: Option<String>,
        audit_type: TransactionType,
    ) -> Result<Vec<ResetOutcome>, ServiceError> {
        validate_items(&items)?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<StockPair> = items
            .iter()
            .map(|item| StockPair::new(warehouse_id, item.part_id))
            .collect();
        let guards = self.locks.exclusive(pairs).await?;

        let db = Arc::clone(&self.db);
        let event_sender = self.event_sender.clone();
        let audit = self.audit_transactions.then_some(audit_type);

        let task = tokio::spawn(
            async move {
                let written = db::with_transaction(db.as_ref(), move |txn| {
                    Box::pin(write_checkpoints(txn, warehouse_id, items, performed_by, audit))
                })
                .await;
                drop(guards);

                let (outcomes, adjustments) = written?;
                publish(&event_sender, &outcomes, adjustments).await;
                Ok::<_, ServiceError>(outcomes)
            }
            .in_current_span(),
        );

        task.await
            .map_err(|e| ServiceError::InternalError(format!("checkpoint task failed: {}", e)))?
    }
}

fn validate_items(items: &[ResetItem]) -> Result<(), ServiceError> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        item.validate()?;
        if item.new_quantity < Decimal::ZERO {
            return Err(ServiceError::invalid_entry(format!(
                "new quantity for part {} must not be negative, got {}",
                item.part_id, item.new_quantity
            )));
        }
        if !fits_quantity_scale(item.new_quantity) {
            return Err(ServiceError::invalid_entry(format!(
                "new quantity {} for part {} has more than {} fractional digits",
                item.new_quantity, item.part_id, QUANTITY_SCALE
            )));
        }
        if !seen.insert(item.part_id) {
            return Err(ServiceError::ValidationError(format!(
                "part {} appears more than once in the batch",
                item.part_id
            )));
        }
    }
    Ok(())
}

/// First instant at or after `from` with no ordinary transaction for the pair.
///
/// A transaction sharing the checkpoint's instant replays after it, so placing the
/// checkpoint there would count that transaction twice.
async fn free_instant(
    txn: &DatabaseTransaction,
    pair: StockPair,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>, ServiceError> {
    let mut instant = from;
    while ledger::has_transaction_at(txn, pair, instant).await? {
        instant += TimeDelta::microseconds(1);
    }
    Ok(instant)
}

async fn write_checkpoints(
    txn: &DatabaseTransaction,
    warehouse_id: Uuid,
    items: Vec<ResetItem>,
    performed_by: Option<String>,
    audit: Option<TransactionType>,
) -> Result<(Vec<ResetOutcome>, Vec<stock_adjustment::Model>), ServiceError> {
    let now = ledger_now();
    let mut outcomes = Vec::with_capacity(items.len());
    let mut written = Vec::new();

    for item in items {
        let pair = StockPair::new(warehouse_id, item.part_id);
        let occurred_at = free_instant(txn, pair, now).await?;
        let (current, previous_checkpoint) =
            stock_calculator::pair_state(txn, pair, occurred_at).await?;

        let delta = item.new_quantity - current.quantity;
        if delta.is_zero() {
            counter!("stockledger.reset.skipped", 1);
            outcomes.push(ResetOutcome {
                part_id: item.part_id,
                previous: current.quantity,
                new: item.new_quantity,
                delta,
                adjustment_id: None,
            });
            continue;
        }

        // Keep (occurred_at, recorded_at) strictly increasing per pair.
        let recorded_at = match &previous_checkpoint {
            Some(prev) if prev.recorded_at >= ledger_now() => {
                prev.recorded_at + TimeDelta::microseconds(1)
            }
            _ => ledger_now(),
        };

        let adjustment = stock_adjustment::ActiveModel {
            id: Set(Uuid::new_v4()),
            warehouse_id: Set(warehouse_id),
            part_id: Set(item.part_id),
            quantity_before: Set(current.quantity),
            quantity_after: Set(item.new_quantity),
            occurred_at: Set(occurred_at),
            recorded_at: Set(recorded_at),
            reason: Set(item.reason.clone()),
            notes: Set(item.notes.clone()),
            performed_by: Set(performed_by.clone()),
        }
        .insert(txn)
        .await?;

        if let Some(transaction_type) = audit {
            inventory_transaction::ActiveModel {
                id: Set(Uuid::new_v4()),
                part_id: Set(item.part_id),
                from_warehouse_id: Set((delta < Decimal::ZERO).then_some(warehouse_id)),
                to_warehouse_id: Set((delta > Decimal::ZERO).then_some(warehouse_id)),
                quantity: Set(delta.abs()),
                transaction_type: Set(transaction_type),
                occurred_at: Set(occurred_at),
                recorded_at: Set(recorded_at),
                performed_by: Set(performed_by.clone()),
                reference: Set(Some(format!("adjustment:{}", adjustment.id))),
                notes: Set(Some(item.reason.clone())),
                adjustment_id: Set(Some(adjustment.id)),
            }
            .insert(txn)
            .await?;
        }

        counter!("stockledger.reset.items", 1);
        outcomes.push(ResetOutcome {
            part_id: item.part_id,
            previous: current.quantity,
            new: item.new_quantity,
            delta,
            adjustment_id: Some(adjustment.id),
        });
        written.push(adjustment);
    }

    Ok((outcomes, written))
}

async fn publish(
    event_sender: &EventSender,
    outcomes: &[ResetOutcome],
    adjustments: Vec<stock_adjustment::Model>,
) {
    info!(
        lines = outcomes.len(),
        written = adjustments.len(),
        skipped = outcomes.iter().filter(|o| o.skipped()).count(),
        "Stock reset committed"
    );

    for adjustment in adjustments {
        event_sender
            .send_or_log(Event::StockReset {
                adjustment_id: adjustment.id,
                warehouse_id: adjustment.warehouse_id,
                part_id: adjustment.part_id,
                quantity_before: adjustment.quantity_before,
                quantity_after: adjustment.quantity_after,
                reason: adjustment.reason,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn item(part: u128, qty: Decimal) -> ResetItem {
        ResetItem {
            part_id: Uuid::from_u128(part),
            new_quantity: qty,
            reason: "cycle count".into(),
            notes: None,
        }
    }

    #[test]
    fn duplicate_parts_are_rejected() {
        let items = vec![item(1, dec!(2)), item(1, dec!(3))];
        assert_matches!(validate_items(&items), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn negative_target_is_an_invalid_entry() {
        let items = vec![item(1, dec!(-1))];
        assert_matches!(validate_items(&items), Err(ServiceError::InvalidLedgerEntry(_)));
    }

    #[test]
    fn target_finer_than_storage_is_an_invalid_entry() {
        let items = vec![item(1, dec!(7.00001))];
        assert_matches!(validate_items(&items), Err(ServiceError::InvalidLedgerEntry(_)));
        assert!(validate_items(&[item(1, dec!(7.0001))]).is_ok());
    }

    #[test]
    fn empty_reason_fails_validation() {
        let mut line = item(1, dec!(1));
        line.reason.clear();
        assert_matches!(validate_items(&[line]), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn stocktake_counts_become_stocktake_lines() {
        let line: ResetItem = StocktakeCount {
            part_id: Uuid::from_u128(4),
            counted_quantity: dec!(12),
            notes: Some("aisle 3".into()),
        }
        .into();
        assert_eq!(line.reason, STOCKTAKE_REASON);
        assert_eq!(line.new_quantity, dec!(12));
    }
}
