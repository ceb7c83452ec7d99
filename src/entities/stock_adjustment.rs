use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::common::{ledger_now, StockPair};

/// Authoritative checkpoint: as of `occurred_at` the pair holds exactly `quantity_after`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "stock_adjustments")]
#[schema(as = StockAdjustment)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub part_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity_before: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity_after: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub reason: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub performed_by: Option<String>,
}

impl Model {
    pub fn pair(&self) -> StockPair {
        StockPair::new(self.warehouse_id, self.part_id)
    }

    pub fn delta(&self) -> Decimal {
        self.quantity_after - self.quantity_before
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::inventory_transaction::Entity")]
    AuditTransactions,
}

impl Related<super::inventory_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AuditTransactions.def()
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
                "stock adjustments are immutable; record a new adjustment".into(),
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
        Err(DbErr::Custom("stock adjustments are immutable".into()))
    }
}
