//! Checkpoint-plus-replay stock computation.
//!
//! Stock for a pair as of `t` is the latest checkpoint at or before `t` plus the net of
//! every ordinary transaction from the checkpoint instant up to `t`. A transaction that
//! shares its instant with the checkpoint counts after it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::histogram;
use rust_decimal::Decimal;
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{ledger_now, to_ledger_precision, StockPair};
use crate::db::{self, DbPool};
use crate::entities::{inventory_transaction, stock_adjustment};
use crate::errors::ServiceError;
use crate::services::ledger;

/// Derived quantity of one pair at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StockLevel {
    pub warehouse_id: Uuid,
    pub part_id: Uuid,
    #[schema(value_type = String, example = "11")]
    pub quantity: Decimal,
    pub as_of: DateTime<Utc>,
    /// Checkpoint the replay started from, if any
    pub checkpoint_id: Option<Uuid>,
}

impl StockLevel {
    pub fn pair(&self) -> StockPair {
        StockPair::new(self.warehouse_id, self.part_id)
    }

    /// Negative stock is reported as-is; it flags missing or mis-entered ledger rows.
    pub fn is_negative(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}

/// The checkpoint that governs `pair` at `as_of`.
pub fn pick_checkpoint<'a, I>(
    pair: StockPair,
    adjustments: I,
    as_of: DateTime<Utc>,
) -> Option<&'a stock_adjustment::Model>
where
    I: IntoIterator<Item = &'a stock_adjustment::Model>,
{
    adjustments
        .into_iter()
        .filter(|a| a.pair() == pair && a.occurred_at <= as_of)
        .max_by_key(|a| (a.occurred_at, a.recorded_at))
}

/// Folds a pair's ledger rows into a quantity.
///
/// Rows for other pairs, audit mirrors and rows outside `[checkpoint, as_of]` are
/// ignored, so callers may pass a superset.
pub fn replay<'a, I>(
    pair: StockPair,
    checkpoint: Option<&stock_adjustment::Model>,
    transactions: I,
    as_of: DateTime<Utc>,
) -> Decimal
where
    I: IntoIterator<Item = &'a inventory_transaction::Model>,
{
    let baseline = checkpoint.map_or(Decimal::ZERO, |c| c.quantity_after);
    let since = checkpoint.map(|c| c.occurred_at);

    let net: Decimal = transactions
        .into_iter()
        .filter(|tx| tx.part_id == pair.part_id && !tx.is_audit_mirror())
        .filter(|tx| tx.occurred_at <= as_of)
        .filter(|tx| since.map_or(true, |since| tx.occurred_at >= since))
        .map(|tx| tx.effect_on(pair.warehouse_id))
        .sum();

    baseline + net
}

/// Batched form of [`replay`]: one pass over rows loaded for a set of warehouses.
///
/// Every pair with a checkpoint or a replayable transaction in one of the warehouses
/// gets an entry.
pub fn replay_batch(
    warehouse_ids: &[Uuid],
    adjustments: &[stock_adjustment::Model],
    transactions: &[inventory_transaction::Model],
    as_of: DateTime<Utc>,
) -> HashMap<StockPair, StockLevel> {
    let scope: HashSet<Uuid> = warehouse_ids.iter().copied().collect();

    let mut checkpoints: HashMap<StockPair, &stock_adjustment::Model> = HashMap::new();
    for adjustment in adjustments
        .iter()
        .filter(|a| a.occurred_at <= as_of && scope.contains(&a.warehouse_id))
    {
        checkpoints
            .entry(adjustment.pair())
            .and_modify(|current| {
                if (adjustment.occurred_at, adjustment.recorded_at)
                    > (current.occurred_at, current.recorded_at)
                {
                    *current = adjustment;
                }
            })
            .or_insert(adjustment);
    }

    let mut grouped: HashMap<StockPair, Vec<&inventory_transaction::Model>> = HashMap::new();
    for tx in transactions
        .iter()
        .filter(|tx| !tx.is_audit_mirror() && tx.occurred_at <= as_of)
    {
        for pair in tx.touched_pairs() {
            if scope.contains(&pair.warehouse_id) {
                grouped.entry(pair).or_default().push(tx);
            }
        }
    }

    let pairs: HashSet<StockPair> = checkpoints.keys().chain(grouped.keys()).copied().collect();

    pairs
        .into_iter()
        .map(|pair| {
            let checkpoint = checkpoints.get(&pair).copied();
            let rows = grouped.get(&pair).map(Vec::as_slice).unwrap_or_default();
            let quantity = replay(pair, checkpoint, rows.iter().copied(), as_of);
            let level = StockLevel {
                warehouse_id: pair.warehouse_id,
                part_id: pair.part_id,
                quantity,
                as_of,
                checkpoint_id: checkpoint.map(|c| c.id),
            };
            (pair, level)
        })
        .collect()
}

/// Stock of one pair plus the checkpoint it was derived from.
pub(crate) async fn pair_state<C>(
    db: &C,
    pair: StockPair,
    as_of: DateTime<Utc>,
) -> Result<(StockLevel, Option<stock_adjustment::Model>), ServiceError>
where
    C: ConnectionTrait,
{
    let checkpoint = ledger::latest_checkpoint(db, pair, as_of).await?;
    let since = checkpoint.as_ref().map(|c| c.occurred_at);
    let transactions = ledger::replayable_transactions(db, pair, since, as_of).await?;

    let quantity = replay(pair, checkpoint.as_ref(), &transactions, as_of);
    debug!(
        %pair,
        %quantity,
        replayed = transactions.len(),
        checkpoint = ?checkpoint.as_ref().map(|c| c.id),
        "Replayed pair"
    );

    let level = StockLevel {
        warehouse_id: pair.warehouse_id,
        part_id: pair.part_id,
        quantity,
        as_of,
        checkpoint_id: checkpoint.as_ref().map(|c| c.id),
    };
    Ok((level, checkpoint))
}

/// Computes stock on an existing connection or transaction.
pub async fn compute_stock_on<C>(
    db: &C,
    pair: StockPair,
    as_of: DateTime<Utc>,
) -> Result<StockLevel, ServiceError>
where
    C: ConnectionTrait,
{
    pair_state(db, pair, as_of).await.map(|(level, _)| level)
}

#[derive(Debug, Clone)]
pub struct StockCalculator {
    db: Arc<DbPool>,
}

impl StockCalculator {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Stock of `(warehouse_id, part_id)` as of `as_of`, defaulting to now.
    ///
    /// A pair with no history is 0. Both queries run inside one read snapshot.
    #[instrument(skip(self))]
    pub async fn compute_stock(
        &self,
        warehouse_id: Uuid,
        part_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<StockLevel, ServiceError> {
        let start = Instant::now();
        let as_of = as_of.map(to_ledger_precision).unwrap_or_else(ledger_now);
        let pair = StockPair::new(warehouse_id, part_id);

        let txn = db::snapshot(self.db.as_ref()).await?;
        let level = compute_stock_on(&txn, pair, as_of).await?;
        txn.commit().await?;

        histogram!("stockledger.compute.duration", start.elapsed().as_secs_f64(), "scope" => "pair");
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TransactionType;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    const W: Uuid = Uuid::from_u128(1);
    const OTHER_W: Uuid = Uuid::from_u128(2);
    const P: Uuid = Uuid::from_u128(10);

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn tx(
        from: Option<Uuid>,
        to: Option<Uuid>,
        qty: Decimal,
        at: DateTime<Utc>,
    ) -> inventory_transaction::Model {
        inventory_transaction::Model {
            id: Uuid::new_v4(),
            part_id: P,
            from_warehouse_id: from,
            to_warehouse_id: to,
            quantity: qty,
            transaction_type: if from.is_some() && to.is_some() {
                TransactionType::Transfer
            } else if to.is_some() {
                TransactionType::Receipt
            } else {
                TransactionType::Consumption
            },
            occurred_at: at,
            recorded_at: at,
            performed_by: None,
            reference: None,
            notes: None,
            adjustment_id: None,
        }
    }

    fn checkpoint(before: Decimal, after: Decimal, at: DateTime<Utc>) -> stock_adjustment::Model {
        stock_adjustment::Model {
            id: Uuid::new_v4(),
            warehouse_id: W,
            part_id: P,
            quantity_before: before,
            quantity_after: after,
            occurred_at: at,
            recorded_at: at,
            reason: "count".into(),
            notes: None,
            performed_by: None,
        }
    }

    fn pair() -> StockPair {
        StockPair::new(W, P)
    }

    #[test]
    fn empty_history_is_zero() {
        assert_eq!(replay(pair(), None, &[], t(0)), Decimal::ZERO);
    }

    #[test]
    fn worked_example() {
        let rows = vec![
            tx(None, Some(W), dec!(10), t(1)),
            tx(None, Some(W), dec!(5), t(2)),
            tx(Some(W), None, dec!(4), t(3)),
        ];
        assert_eq!(replay(pair(), None, &rows, t(3)), dec!(11));
        assert_eq!(replay(pair(), None, &rows, t(2)), dec!(15));

        let reset = checkpoint(dec!(11), dec!(0), t(4));
        assert_eq!(replay(pair(), Some(&reset), &rows, t(4)), dec!(0));
    }

    #[test]
    fn transaction_at_checkpoint_instant_counts_after_it() {
        let cp = checkpoint(dec!(3), dec!(7), t(5));
        let rows = vec![
            tx(None, Some(W), dec!(100), t(4)),
            tx(None, Some(W), dec!(2), t(5)),
        ];
        assert_eq!(replay(pair(), Some(&cp), &rows, t(5)), dec!(9));
    }

    #[test]
    fn audit_mirrors_are_never_replayed() {
        let cp = checkpoint(dec!(0), dec!(5), t(1));
        let mut mirror = tx(None, Some(W), dec!(5), t(1));
        mirror.adjustment_id = Some(cp.id);
        assert_eq!(replay(pair(), Some(&cp), &[mirror], t(2)), dec!(5));
    }

    #[test]
    fn negative_results_are_not_clamped() {
        let rows = vec![tx(Some(W), None, dec!(4), t(1))];
        let quantity = replay(pair(), None, &rows, t(1));
        assert_eq!(quantity, dec!(-4));

        let level = StockLevel {
            warehouse_id: W,
            part_id: P,
            quantity,
            as_of: t(1),
            checkpoint_id: None,
        };
        assert!(level.is_negative());
    }

    #[test]
    fn transfers_move_stock_between_pairs() {
        let rows = vec![
            tx(None, Some(W), dec!(10), t(1)),
            tx(Some(W), Some(OTHER_W), dec!(3), t(2)),
        ];
        assert_eq!(replay(pair(), None, &rows, t(2)), dec!(7));
        assert_eq!(
            replay(StockPair::new(OTHER_W, P), None, &rows, t(2)),
            dec!(3)
        );
    }

    #[test]
    fn latest_recorded_checkpoint_wins_a_tie() {
        let first = checkpoint(dec!(0), dec!(4), t(1));
        let mut second = checkpoint(dec!(4), dec!(9), t(1));
        second.recorded_at = t(1) + Duration::microseconds(1);

        let picked = pick_checkpoint(pair(), [&second, &first], t(1)).unwrap();
        assert_eq!(picked.id, second.id);
        assert!(pick_checkpoint(pair(), [&first], t(0)).is_none());
    }

    #[test]
    fn batch_matches_single_pair_replay() {
        let adjustments = vec![checkpoint(dec!(10), dec!(6), t(2))];
        let rows = vec![
            tx(None, Some(W), dec!(10), t(1)),
            tx(Some(W), Some(OTHER_W), dec!(1), t(3)),
            tx(None, Some(Uuid::from_u128(99)), dec!(50), t(3)),
        ];

        let levels = replay_batch(&[W, OTHER_W], &adjustments, &rows, t(4));
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[&pair()].quantity, dec!(5));
        assert_eq!(levels[&pair()].checkpoint_id, Some(adjustments[0].id));
        assert_eq!(levels[&StockPair::new(OTHER_W, P)].quantity, dec!(1));
    }
}
