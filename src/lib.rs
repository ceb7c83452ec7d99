//! stockledger
//!
//! Calculated inventory engine: on-hand stock per (warehouse, part) derived from an
//! append-only ledger of transactions and checkpoints.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod common;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod http_trace;
pub mod migrator;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;

use handlers::inventory::InventoryHandlerState;
use services::InventoryEngine;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub engine: InventoryEngine,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let engine = InventoryEngine::from_config(db.clone(), event_sender.clone(), &config);
        Self {
            db,
            config,
            event_sender,
            engine,
        }
    }
}

impl InventoryHandlerState for AppState {
    fn engine(&self) -> &InventoryEngine {
        &self.engine
    }
}

/// Event channel plus the task draining it
pub fn spawn_event_processor(capacity: usize) -> (events::EventSender, JoinHandle<()>) {
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(events::process_events(event_rx));
    (events::EventSender::new(event_tx), handle)
}

/// Engine routes under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    handlers::api_router::<AppState>()
}

/// Full application router: API, health, OpenAPI document and the HTTP layers
pub fn app_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();
    let db = state.db.clone();

    Router::new()
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
        .nest("/health", health::health_routes(db))
        .merge(openapi::openapi_routes())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(http_trace::propagate_request_id_layer())
        .layer(http_trace::configure_http_tracing())
        .layer(http_trace::set_request_id_layer())
}
