use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::common::{ledger_now, StockPair};

/// Types of ledger transactions
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "consumption")]
    Consumption,
    #[sea_orm(string_value = "receipt")]
    Receipt,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "stocktake")]
    Stocktake,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "inventory_transactions")]
#[schema(as = LedgerTransaction)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub part_id: Uuid,
    pub from_warehouse_id: Option<Uuid>,
    pub to_warehouse_id: Option<Uuid>,
    /// Always positive; direction comes from the warehouse columns
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: Decimal,
    pub transaction_type: TransactionType,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub performed_by: Option<String>,
    pub reference: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    /// Set when this row mirrors a stock adjustment for the audit trail
    pub adjustment_id: Option<Uuid>,
}

impl Model {
    /// Signed effect of this transaction on `warehouse_id`'s stock of `part_id`.
    pub fn effect_on(&self, warehouse_id: Uuid) -> Decimal {
        let mut effect = Decimal::ZERO;
        if self.to_warehouse_id == Some(warehouse_id) {
            effect += self.quantity;
        }
        if self.from_warehouse_id == Some(warehouse_id) {
            effect -= self.quantity;
        }
        effect
    }

    /// Audit mirrors are folded into their adjustment and never replayed.
    pub fn is_audit_mirror(&self) -> bool {
        self.adjustment_id.is_some()
    }

    /// Every pair whose stock this transaction moves.
    pub fn touched_pairs(&self) -> Vec<StockPair> {
        crate::common::touched_pairs(self.part_id, self.from_warehouse_id, self.to_warehouse_id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_adjustment::Entity",
        from = "Column::AdjustmentId",
        to = "super::stock_adjustment::Column::Id"
    )]
    StockAdjustment,
}

impl Related<super::stock_adjustment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockAdjustment.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            return Err(DbErr::Custom(
                "inventory transactions are immutable; record a correcting transaction".into(),
            ));
        }
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.recorded_at {
            active_model.recorded_at = Set(ledger_now());
        }
        Ok(active_model)
    }

    async fn before_delete<C>(self, _db: &C) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        Err(DbErr::Custom("inventory transactions are immutable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn row(from: Option<Uuid>, to: Option<Uuid>) -> Model {
        Model {
            id: Uuid::new_v4(),
            part_id: Uuid::from_u128(42),
            from_warehouse_id: from,
            to_warehouse_id: to,
            quantity: dec!(4),
            transaction_type: TransactionType::Transfer,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            performed_by: None,
            reference: None,
            notes: None,
            adjustment_id: None,
        }
    }

    #[test]
    fn transfer_moves_stock_between_both_sides() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let tx = row(Some(a), Some(b));
        assert_eq!(tx.effect_on(a), dec!(-4));
        assert_eq!(tx.effect_on(b), dec!(4));
        assert_eq!(tx.effect_on(Uuid::from_u128(3)), Decimal::ZERO);
        assert_eq!(tx.touched_pairs().len(), 2);
    }

    #[test]
    fn transaction_type_round_trips_through_strings() {
        assert_eq!(TransactionType::Consumption.to_string(), "consumption");
        assert_eq!(
            TransactionType::from_str("stocktake").unwrap(),
            TransactionType::Stocktake
        );
        assert!(TransactionType::from_str("teleport").is_err());
    }
}
