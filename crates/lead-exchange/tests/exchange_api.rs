//! HTTP contract tests for the exchange router: status codes and payload
//! shapes for the purchase, refund, outcome, and read endpoints.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use lead_exchange::exchange::{exchange_router, ExchangeConfig, LeadExchangeService};

fn build_router() -> (axum::Router, Arc<LeadExchangeService>) {
    let service = Arc::new(LeadExchangeService::new(ExchangeConfig::default()));
    (exchange_router(service.clone()), service)
}

async fn send(router: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(payload) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&payload).expect("serialize payload"),
            ))
            .expect("request"),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router dispatch");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn register_account(router: &axum::Router, tier: &str) -> String {
    let (status, body) = send(
        router,
        "POST",
        "/api/v1/exchange/accounts",
        Some(json!({
            "display_name": "Route Test Provider",
            "tier": tier,
            "categories": ["plumbing"],
            "city": "Zadar",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body.get("id")
        .and_then(|id| id.as_str())
        .expect("account id present")
        .to_string()
}

async fn post_lead(router: &axum::Router, price: i64) -> String {
    let (status, body) = send(
        router,
        "POST",
        "/api/v1/exchange/leads",
        Some(json!({
            "title": "Boiler replacement",
            "category": "plumbing",
            "city": "Zadar",
            "budget": { "min": 800, "max": 2000 },
            "urgency": "Normal",
            "price": price,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body.get("id")
        .and_then(|id| id.as_str())
        .expect("lead id present")
        .to_string()
}

async fn grant(router: &axum::Router, account_id: &str, amount: i64) {
    let (status, _) = send(
        router,
        "POST",
        &format!("/api/v1/exchange/accounts/{account_id}/credits/grants"),
        Some(json!({ "amount": amount })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn purchase_flow_over_http_sells_exactly_once() {
    let (router, _service) = build_router();
    let account_id = register_account(&router, "Basic").await;
    grant(&router, &account_id, 100).await;
    let lead_id = post_lead(&router, 30).await;

    let (status, claimable) = send(
        &router,
        "GET",
        &format!("/api/v1/exchange/accounts/{account_id}/claimable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimable.as_array().map(Vec::len), Some(1));

    let (status, purchase) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/accounts/{account_id}/purchases"),
        Some(json!({ "lead_id": lead_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(purchase.get("amount").and_then(Value::as_i64), Some(30));
    assert_eq!(
        purchase.get("funding").and_then(Value::as_str),
        Some("credit")
    );
    assert_eq!(
        purchase.get("outcome").and_then(Value::as_str),
        Some("active")
    );

    // The losing side of the race sees a plain conflict.
    let rival_id = register_account(&router, "Basic").await;
    grant(&router, &rival_id, 100).await;
    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/accounts/{rival_id}/purchases"),
        Some(json!({ "lead_id": lead_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.get("error").is_some());
}

#[tokio::test]
async fn insufficient_funds_surface_the_balance_for_topup() {
    let (router, _service) = build_router();
    let account_id = register_account(&router, "Basic").await;
    grant(&router, &account_id, 10).await;
    let lead_id = post_lead(&router, 30).await;

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/accounts/{account_id}/purchases"),
        Some(json!({ "lead_id": lead_id })),
    )
    .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body.get("balance").and_then(Value::as_i64), Some(10));
    assert_eq!(body.get("price").and_then(Value::as_i64), Some(30));
}

#[tokio::test]
async fn refund_and_outcome_transitions_map_to_statuses() {
    let (router, _service) = build_router();
    let account_id = register_account(&router, "Premium").await;
    grant(&router, &account_id, 100).await;
    let lead_id = post_lead(&router, 30).await;

    let (_, purchase) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/accounts/{account_id}/purchases"),
        Some(json!({ "lead_id": lead_id })),
    )
    .await;
    let purchase_id = purchase
        .get("purchase_id")
        .and_then(Value::as_str)
        .expect("purchase id")
        .to_string();

    let (status, contacted) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/purchases/{purchase_id}/outcome"),
        Some(json!({ "outcome": "contacted" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        contacted.get("outcome").and_then(Value::as_str),
        Some("contacted")
    );

    let (status, refunded) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/purchases/{purchase_id}/refund"),
        Some(json!({ "reason": "bad_contact_info" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        refunded.get("outcome").and_then(Value::as_str),
        Some("refunded")
    );

    let (status, body) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/purchases/{purchase_id}/refund"),
        Some(json!({ "reason": "other" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.get("error").is_some());
}

#[tokio::test]
async fn roi_and_addon_views_read_back() {
    let (router, _service) = build_router();
    let account_id = register_account(&router, "Pro").await;
    grant(&router, &account_id, 100).await;
    let lead_id = post_lead(&router, 30).await;

    let (_, purchase) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/accounts/{account_id}/purchases"),
        Some(json!({ "lead_id": lead_id })),
    )
    .await;
    let purchase_id = purchase
        .get("purchase_id")
        .and_then(Value::as_str)
        .expect("purchase id")
        .to_string();
    send(
        &router,
        "POST",
        &format!("/api/v1/exchange/purchases/{purchase_id}/outcome"),
        Some(json!({ "outcome": "converted", "revenue": 1500 })),
    )
    .await;

    let (status, roi) = send(
        &router,
        "GET",
        &format!("/api/v1/exchange/accounts/{account_id}/roi"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roi.get("purchased").and_then(Value::as_u64), Some(1));
    assert_eq!(roi.get("converted").and_then(Value::as_u64), Some(1));
    assert_eq!(
        roi.get("recorded_revenue").and_then(Value::as_i64),
        Some(1500)
    );

    let (status, _) = send(
        &router,
        "POST",
        &format!("/api/v1/exchange/accounts/{account_id}/addons"),
        Some(json!({ "display_name": "Pack", "units": 10, "valid_days": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, addons) = send(
        &router,
        "GET",
        &format!("/api/v1/exchange/accounts/{account_id}/addon"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let addons = addons.as_array().expect("addon list");
    assert_eq!(addons.len(), 1);
    assert_eq!(
        addons[0].get("status").and_then(Value::as_str),
        Some("active")
    );
    assert_eq!(
        addons[0].get("remaining_units").and_then(Value::as_i64),
        Some(10)
    );
}

#[tokio::test]
async fn unknown_rows_return_not_found() {
    let (router, _service) = build_router();
    let (status, _) = send(
        &router,
        "GET",
        "/api/v1/exchange/accounts/acct-unknown/claimable",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/exchange/purchases/pur-unknown/refund",
        Some(json!({ "reason": "other" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transactions_history_lists_grants_and_debits() {
    let (router, _service) = build_router();
    let account_id = register_account(&router, "Basic").await;
    grant(&router, &account_id, 100).await;
    let lead_id = post_lead(&router, 30).await;
    send(
        &router,
        "POST",
        &format!("/api/v1/exchange/accounts/{account_id}/purchases"),
        Some(json!({ "lead_id": lead_id })),
    )
    .await;

    let (status, transactions) = send(
        &router,
        "GET",
        &format!("/api/v1/exchange/accounts/{account_id}/transactions"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = transactions.as_array().expect("transaction list");
    assert_eq!(rows.len(), 2);
    let reasons: Vec<_> = rows
        .iter()
        .filter_map(|row| row.get("reason").and_then(Value::as_str))
        .collect();
    assert!(reasons.contains(&"grant"));
    assert!(reasons.contains(&"purchase"));
}
