#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use stockledger::{
    app_router,
    common::{ledger_now, StockPair},
    config::AppConfig,
    db::{self, DbPool},
    entities::{inventory_transaction, warehouse},
    services::{ledger::NewTransaction, InventoryEngine},
    spawn_event_processor, AppState,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

/// Application state backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _dir: TempDir,
    _event_task: JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application after letting the caller tweak the configuration.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let db_path = dir.path().join("stockledger_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.cache_refresh_interval_secs = 0;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (event_sender, event_task) = spawn_event_processor(cfg.event_channel_capacity);
        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = app_router(state.clone());

        Self {
            router,
            state,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub fn engine(&self) -> &InventoryEngine {
        &self.state.engine
    }

    pub fn db(&self) -> &DbPool {
        self.state.db.as_ref()
    }

    pub async fn add_warehouse(&self, organization_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        warehouse::ActiveModel {
            id: Set(id),
            organization_id: Set(organization_id),
            name: Set(format!("WH-{}", &id.to_string()[..8])),
            created_at: Set(ledger_now()),
        }
        .insert(self.db())
        .await
        .expect("failed to insert warehouse");
        id
    }

    pub async fn receive(
        &self,
        warehouse_id: Uuid,
        part_id: Uuid,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> inventory_transaction::Model {
        self.record(NewTransaction::receipt(warehouse_id, part_id, quantity).at(occurred_at))
            .await
    }

    pub async fn consume(
        &self,
        warehouse_id: Uuid,
        part_id: Uuid,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> inventory_transaction::Model {
        self.record(NewTransaction::consumption(warehouse_id, part_id, quantity).at(occurred_at))
            .await
    }

    pub async fn record(&self, new: NewTransaction) -> inventory_transaction::Model {
        self.engine()
            .ledger
            .record_transaction(new)
            .await
            .expect("failed to record transaction")
    }

    pub async fn stock(&self, pair: StockPair, as_of: Option<DateTime<Utc>>) -> Decimal {
        self.engine()
            .calculator
            .compute_stock(pair.warehouse_id, pair.part_id, as_of)
            .await
            .expect("failed to compute stock")
            .quantity
    }

    /// Sends a request through the full router and decodes the JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router call failed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

/// An instant `minutes` before now, at ledger precision.
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    ledger_now() - Duration::minutes(minutes)
}

pub fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}
