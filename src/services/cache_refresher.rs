//! Best-effort denormalized stock.
//!
//! `derived_stock` is rewritten from the aggregator on demand or on a timer. It is
//! display-only: no correctness-sensitive path reads it, and a failed refresh leaves the
//! previous rows in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::ledger_now;
use crate::db::{self, DbPool};
use crate::entities::{derived_stock, DerivedStock};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender, RefreshScope};
use crate::services::aggregator::Aggregator;

const UPSERT_CHUNK: usize = 500;

/// Outcome of a successful refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RefreshReport {
    pub scope: RefreshScope,
    pub pairs_written: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheRefresher {
    db: Arc<DbPool>,
    aggregator: Aggregator,
    event_sender: EventSender,
}

impl CacheRefresher {
    pub fn new(db: Arc<DbPool>, aggregator: Aggregator, event_sender: EventSender) -> Self {
        Self {
            db,
            aggregator,
            event_sender,
        }
    }

    /// Recomputes the scope and overwrites its `derived_stock` rows.
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn refresh(&self, scope: RefreshScope) -> Result<RefreshReport, ServiceError> {
        let computed_at = ledger_now();

        let rows: Vec<derived_stock::ActiveModel> = match scope {
            RefreshScope::Warehouse(warehouse_id) => self
                .aggregator
                .compute_warehouse_stock(warehouse_id, Some(computed_at))
                .await?
                .into_iter()
                .map(|(part_id, quantity)| row(warehouse_id, part_id, quantity, computed_at))
                .collect(),
            RefreshScope::Organization(organization_id) => self
                .aggregator
                .compute_organization_stock(organization_id, Some(computed_at))
                .await?
                .into_iter()
                .flat_map(|(warehouse_id, parts)| {
                    parts.into_iter().map(move |(part_id, quantity)| {
                        row(warehouse_id, part_id, quantity, computed_at)
                    })
                })
                .collect(),
        };

        let pairs_written = rows.len();
        if !rows.is_empty() {
            let chunks: Vec<Vec<derived_stock::ActiveModel>> = rows
                .chunks(UPSERT_CHUNK)
                .map(<[_]>::to_vec)
                .collect();

            db::with_transaction(self.db.as_ref(), move |txn| {
                Box::pin(async move {
                    for chunk in chunks {
                        DerivedStock::insert_many(chunk)
                            .on_conflict(
                                OnConflict::columns([
                                    derived_stock::Column::WarehouseId,
                                    derived_stock::Column::PartId,
                                ])
                                .update_columns([
                                    derived_stock::Column::CachedQuantity,
                                    derived_stock::Column::ComputedAt,
                                ])
                                .to_owned(),
                            )
                            .exec_without_returning(txn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await?;
        }

        counter!("stockledger.cache.refresh.ok", 1);
        info!(pairs_written, %computed_at, "Derived stock refreshed");

        let report = RefreshReport {
            scope,
            pairs_written,
            computed_at,
        };
        self.event_sender
            .send_or_log(Event::CacheRefreshed {
                scope,
                pairs_written,
                computed_at,
            })
            .await;
        Ok(report)
    }

    /// `refresh` for callers that must not fail: errors are logged and reported as an
    /// event, and the previous cache stays in place.
    pub async fn refresh_quietly(&self, scope: RefreshScope) -> Option<RefreshReport> {
        match self.refresh(scope).await {
            Ok(report) => Some(report),
            Err(e) => {
                counter!("stockledger.cache.refresh.failed", 1);
                warn!(%scope, error = %e, "Derived stock refresh failed; keeping previous values");
                self.event_sender
                    .send_or_log(Event::CacheRefreshFailed {
                        scope,
                        error: e.to_string(),
                    })
                    .await;
                None
            }
        }
    }

    /// Cached rows for a warehouse. Stale-tolerant; for display only.
    pub async fn cached_warehouse_stock(
        &self,
        warehouse_id: Uuid,
    ) -> Result<Vec<derived_stock::Model>, ServiceError> {
        Ok(DerivedStock::find()
            .filter(derived_stock::Column::WarehouseId.eq(warehouse_id))
            .order_by_asc(derived_stock::Column::PartId)
            .all(self.db.as_ref())
            .await?)
    }

    /// Refreshes every known organization once per `interval`.
    pub fn start_worker(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting derived stock refresher");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.refresh_all().await;
            }
        })
    }

    async fn refresh_all(&self) {
        let organizations = match self.aggregator.organizations().await {
            Ok(ids) => ids,
            Err(e) => {
                counter!("stockledger.cache.refresh.failed", 1);
                warn!(error = %e, "Could not list organizations for refresh");
                return;
            }
        };

        debug!(organizations = organizations.len(), "Refreshing derived stock");
        for organization_id in organizations {
            self.refresh_quietly(RefreshScope::Organization(organization_id))
                .await;
        }
    }
}

fn row(
    warehouse_id: Uuid,
    part_id: Uuid,
    quantity: rust_decimal::Decimal,
    computed_at: DateTime<Utc>,
) -> derived_stock::ActiveModel {
    derived_stock::ActiveModel {
        warehouse_id: Set(warehouse_id),
        part_id: Set(part_id),
        cached_quantity: Set(quantity),
        computed_at: Set(computed_at),
    }
}
