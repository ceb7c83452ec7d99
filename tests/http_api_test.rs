mod common;

use axum::http::{Method, StatusCode};
use common::{decimal_field, minutes_ago, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn health_and_readiness_report_up() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");

    let (status, body) = app.request(Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let (status, body) = app.request(Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]
        .get("/api/v1/warehouses/{warehouse_id}/parts/{part_id}/stock")
        .is_some());
}

#[tokio::test]
async fn record_then_read_stock_over_http() {
    let app = TestApp::new().await;
    let w = app.add_warehouse(Uuid::new_v4()).await;
    let p = Uuid::new_v4();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/transactions",
            Some(json!({
                "part_id": p,
                "to_warehouse_id": w,
                "quantity": "12",
                "transaction_type": "receipt",
                "occurred_at": minutes_ago(5),
                "reference": "PO-1001"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["transaction_type"], "receipt");

    let uri = format!("/api/v1/warehouses/{w}/parts/{p}/stock");
    let (status, body) = app.request(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal_field(&body["quantity"]), dec!(12));

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/warehouses/{w}/stock"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal_field(&body["parts"][p.to_string()]), dec!(12));
}

#[tokio::test]
async fn invalid_transaction_is_unprocessable() {
    let app = TestApp::new().await;
    let w = app.add_warehouse(Uuid::new_v4()).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/transactions",
            Some(json!({
                "part_id": Uuid::new_v4(),
                "from_warehouse_id": w,
                "to_warehouse_id": w,
                "quantity": "1",
                "transaction_type": "transfer"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn reset_endpoint_returns_per_line_results() {
    let app = TestApp::new().await;
    let w = app.add_warehouse(Uuid::new_v4()).await;
    let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
    app.receive(w, p1, dec!(11), minutes_ago(20)).await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/warehouses/{w}/reset"),
            Some(json!({
                "items": [
                    { "part_id": p1, "new_quantity": "0", "reason": "write-off" },
                    { "part_id": p2, "new_quantity": "0", "reason": "write-off" }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(decimal_field(&results[0]["delta"]), dec!(-11));
    assert!(results[0]["adjustment_id"].is_string());
    assert!(results[1]["adjustment_id"].is_null());

    let (_, history) = app
        .request(
            Method::GET,
            &format!("/api/v1/warehouses/{w}/parts/{p1}/history"),
            None,
        )
        .await;
    assert_eq!(history["adjustments"].as_array().unwrap().len(), 1);
    assert_eq!(history["transactions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn empty_reset_batch_is_a_bad_request() {
    let app = TestApp::new().await;
    let w = app.add_warehouse(Uuid::new_v4()).await;

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/warehouses/{w}/reset"),
            Some(json!({ "items": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn organization_stock_and_cache_over_http() {
    let app = TestApp::new().await;
    let org = Uuid::new_v4();
    let w = app.add_warehouse(org).await;
    let empty = app.add_warehouse(org).await;
    let p = Uuid::new_v4();
    app.receive(w, p, dec!(4), minutes_ago(2)).await;

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/organizations/{org}/stock"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal_field(&body["warehouses"][w.to_string()][p.to_string()]), dec!(4));
    assert_eq!(body["warehouses"][empty.to_string()], json!({}));

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/cache/refresh",
            Some(json!({ "organization_id": org })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["refreshed"], true);
    assert_eq!(body["report"]["pairs_written"], 1);

    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/warehouses/{w}/stock/cached"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(decimal_field(&rows[0]["cached_quantity"]), dec!(4));
}

#[tokio::test]
async fn cache_refresh_needs_exactly_one_scope() {
    let app = TestApp::new().await;

    let (status, _) = app
        .request(Method::POST, "/api/v1/cache/refresh", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/cache/refresh",
            Some(json!({ "warehouse_id": Uuid::new_v4(), "organization_id": Uuid::new_v4() })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
