use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::TransactionType;

/// Sending half of the domain event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event after a committed write; a closed channel is logged, never surfaced.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Scope a cache refresh ran over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RefreshScope {
    Warehouse(Uuid),
    Organization(Uuid),
}

impl std::fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warehouse(id) => write!(f, "warehouse {}", id),
            Self::Organization(id) => write!(f, "organization {}", id),
        }
    }
}

/// Domain events emitted by the engine after a write commits or a read finds something notable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TransactionRecorded {
        transaction_id: Uuid,
        part_id: Uuid,
        from_warehouse_id: Option<Uuid>,
        to_warehouse_id: Option<Uuid>,
        quantity: Decimal,
        transaction_type: TransactionType,
        occurred_at: DateTime<Utc>,
    },
    StockReset {
        adjustment_id: Uuid,
        warehouse_id: Uuid,
        part_id: Uuid,
        quantity_before: Decimal,
        quantity_after: Decimal,
        reason: String,
    },
    NegativeStockDetected {
        warehouse_id: Uuid,
        part_id: Uuid,
        quantity: Decimal,
        as_of: DateTime<Utc>,
    },
    CacheRefreshed {
        scope: RefreshScope,
        pairs_written: usize,
        computed_at: DateTime<Utc>,
    },
    CacheRefreshFailed {
        scope: RefreshScope,
        error: String,
    },
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::TransactionRecorded {
                transaction_id,
                part_id,
                from_warehouse_id,
                to_warehouse_id,
                quantity,
                transaction_type,
                occurred_at,
            } => {
                info!(
                    %transaction_id,
                    %part_id,
                    from_warehouse_id = ?from_warehouse_id,
                    to_warehouse_id = ?to_warehouse_id,
                    %quantity,
                    %transaction_type,
                    %occurred_at,
                    "Ledger transaction recorded"
                );
            }
            Event::StockReset {
                adjustment_id,
                warehouse_id,
                part_id,
                quantity_before,
                quantity_after,
                reason,
            } => {
                info!(
                    %adjustment_id,
                    %warehouse_id,
                    %part_id,
                    %quantity_before,
                    %quantity_after,
                    delta = %(quantity_after - quantity_before),
                    reason = %reason,
                    "Stock checkpoint written"
                );
            }
            Event::NegativeStockDetected {
                warehouse_id,
                part_id,
                quantity,
                as_of,
            } => {
                warn!(
                    %warehouse_id,
                    %part_id,
                    %quantity,
                    %as_of,
                    "Derived stock is negative; ledger needs review"
                );
            }
            Event::CacheRefreshed {
                scope,
                pairs_written,
                computed_at,
            } => {
                info!(%scope, pairs_written, %computed_at, "Derived stock cache refreshed");
            }
            Event::CacheRefreshFailed { scope, error } => {
                error!(%scope, error = %error, "Derived stock cache refresh failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn events_reach_the_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let warehouse_id = Uuid::new_v4();

        sender
            .send(Event::NegativeStockDetected {
                warehouse_id,
                part_id: Uuid::new_v4(),
                quantity: dec!(-3),
                as_of: Utc::now(),
            })
            .await
            .unwrap();

        match rx.recv().await {
            Some(Event::NegativeStockDetected {
                warehouse_id: got,
                quantity,
                ..
            }) => {
                assert_eq!(got, warehouse_id);
                assert_eq!(quantity, dec!(-3));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_survives_a_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender
            .send_or_log(Event::CacheRefreshFailed {
                scope: RefreshScope::Warehouse(Uuid::nil()),
                error: "boom".into(),
            })
            .await;
        assert!(sender.send(Event::CacheRefreshFailed {
            scope: RefreshScope::Warehouse(Uuid::nil()),
            error: "boom".into(),
        })
        .await
        .is_err());
    }

    #[test]
    fn refresh_scope_serializes_with_kind_tag() {
        let id = Uuid::from_u128(5);
        let json = serde_json::to_value(RefreshScope::Organization(id)).unwrap();
        assert_eq!(json["kind"], "organization");
        assert_eq!(json["id"], id.to_string());
    }
}
