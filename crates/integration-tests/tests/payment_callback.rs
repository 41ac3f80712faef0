//! Gateway callback settlement over HTTP.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use serde_json::json;

use kumas_core::{OrderId, OrderStatus};
use kumas_integration_tests::{ERROR_URL, SUCCESS_URL, TestApp, body_json, dec, location};
use kumas_storefront::models::PaymentDetails;
use kumas_storefront::payment::PaymentStatus;
use kumas_storefront::payment::mock::ScriptedRetrieve;
use kumas_storefront::services::notifications::Notification;

/// Start a checkout for two lines and return the order id and gateway token.
async fn started_checkout(app: &TestApp) -> (OrderId, String) {
    let linen = app.product("Keten Kumaş", "100", None);
    let velvet = app.product("Kadife", "80", None);

    let response = app
        .post_json(
            "/api/checkout/start",
            &json!({
                "items": [
                    { "id": linen.id.to_string(), "quantity": 2 },
                    { "id": velvet.id.to_string(), "quantity": "0.5" }
                ],
                "customer": {
                    "name": "Mehmet",
                    "surname": "Demir",
                    "email": "mehmet@kumas.com.tr",
                    "address": "Atatürk Blv. 5",
                    "city": "Bursa"
                }
            }),
        )
        .await;
    let body = body_json(response).await;
    let order_id = body["orderId"].as_str().unwrap().parse().unwrap();
    let token = body["token"].as_str().unwrap().to_string();
    (order_id, token)
}

fn paid() -> PaymentStatus {
    PaymentStatus::Success(PaymentDetails {
        payment_id: Some("pay-9001".to_string()),
        paid_price: Some(dec("269.90")),
        card_association: Some("MASTER_CARD".to_string()),
        last_four_digits: Some("0008".to_string()),
        ..PaymentDetails::default()
    })
}

#[tokio::test]
async fn test_unknown_token_redirects_without_mutation() {
    let app = TestApp::new();
    let (order_id, _token) = started_checkout(&app).await;

    let response = app
        .post_form("/api/payment/callback", "token=not-a-real-token")
        .await;
    assert_eq!(
        location(&response),
        format!("{ERROR_URL}?reason=order_not_found")
    );

    let order = app.store.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(app.store.movements().is_empty());
    assert_eq!(app.gateway.retrieve_calls(), 0);
}

#[tokio::test]
async fn test_successful_payment_settles_order() {
    let app = TestApp::new();
    let (order_id, token) = started_checkout(&app).await;
    app.gateway.script(&token, paid());

    let response = app
        .post_form("/api/payment/callback", &format!("token={token}"))
        .await;
    assert_eq!(
        location(&response),
        format!("{SUCCESS_URL}?orderId={order_id}")
    );

    let order = app.store.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.paid_at.is_some());
    assert!(order.stock_applied_at.is_some());
    assert_eq!(order.payment_data.as_ref().unwrap()["paymentId"], "pay-9001");

    let movements = app.store.movements();
    assert_eq!(movements.len(), 2);
    assert!(movements.iter().all(|m| m.order_id == order_id));
    let quantities: Vec<_> = movements.iter().map(|m| m.quantity).collect();
    assert!(quantities.contains(&dec("2")));
    assert!(quantities.contains(&dec("0.5")));

    tokio::time::timeout(Duration::from_secs(2), app.notifier.wait_for(1))
        .await
        .unwrap();
    let Notification::OrderConfirmation(confirmation) = &app.notifier.sent()[0];
    assert_eq!(confirmation.order_id, order_id);
    assert_eq!(confirmation.customer_email, "mehmet@kumas.com.tr");
    assert_eq!(confirmation.lines.len(), 2);
}

#[tokio::test]
async fn test_repeated_callback_does_not_reapply_stock() {
    let app = TestApp::new();
    let (order_id, token) = started_checkout(&app).await;
    app.gateway.script(&token, paid());

    let first = app
        .post_form("/api/payment/callback", &format!("token={token}"))
        .await;
    let second = app
        .post_form("/api/payment/callback", &format!("token={token}"))
        .await;

    let success = format!("{SUCCESS_URL}?orderId={order_id}");
    assert_eq!(location(&first), success);
    assert_eq!(location(&second), success);
    assert_eq!(app.store.movements().len(), 2);
    assert_eq!(app.gateway.retrieve_calls(), 1);
}

#[tokio::test]
async fn test_paid_order_ignores_later_failure_report() {
    let app = TestApp::new();
    let (order_id, token) = started_checkout(&app).await;
    app.gateway.script(&token, paid());
    app.post_form("/api/payment/callback", &format!("token={token}"))
        .await;

    app.gateway
        .script(&token, PaymentStatus::Failure("Card declined".to_string()));
    let response = app
        .post_form("/api/payment/callback", &format!("token={token}"))
        .await;

    assert_eq!(
        location(&response),
        format!("{SUCCESS_URL}?orderId={order_id}")
    );
    assert_eq!(app.store.order(order_id).unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_declined_payment_marks_order_failed() {
    let app = TestApp::new();
    let (order_id, token) = started_checkout(&app).await;
    app.gateway
        .script(&token, PaymentStatus::Failure("Kart limiti yetersiz".to_string()));

    let response = app
        .send(
            Request::get(format!("/api/payment/callback?token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let url = location(&response);
    assert!(url.starts_with(&format!("{ERROR_URL}?reason=payment_failed&message=")));
    assert!(url.contains("Kart%20limiti%20yetersiz"));

    let order = app.store.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    assert_eq!(order.payment_error.as_deref(), Some("Kart limiti yetersiz"));
    assert!(app.store.movements().is_empty());

    // A failed order stays failed, and the gateway is not asked again.
    app.gateway.script(&token, paid());
    let retry = app
        .post_form("/api/payment/callback", &format!("token={token}"))
        .await;
    assert!(location(&retry).starts_with(&format!("{ERROR_URL}?reason=payment_failed")));
    assert_eq!(
        app.store.order(order_id).unwrap().status,
        OrderStatus::PaymentFailed
    );
    assert_eq!(app.gateway.retrieve_calls(), 1);
}

#[tokio::test]
async fn test_conversation_mismatch_fails_payment() {
    let app = TestApp::new();
    let (order_id, token) = started_checkout(&app).await;
    app.gateway.script_raw(
        &token,
        ScriptedRetrieve::Result {
            conversation_id: Some("someone-else".to_string()),
            status: paid(),
        },
    );

    let response = app
        .post_form("/api/payment/callback", &format!("token={token}"))
        .await;
    assert!(location(&response).starts_with(&format!("{ERROR_URL}?reason=payment_error")));
    assert_eq!(
        app.store.order(order_id).unwrap().status,
        OrderStatus::PaymentFailed
    );
    assert!(app.store.movements().is_empty());
}

#[tokio::test]
async fn test_gateway_error_marks_order_failed() {
    let app = TestApp::new();
    let (order_id, token) = started_checkout(&app).await;
    app.gateway
        .script_raw(&token, ScriptedRetrieve::Error("System error".to_string()));

    let response = app
        .post_form("/api/payment/callback", &format!("token={token}"))
        .await;
    assert!(location(&response).starts_with(&format!("{ERROR_URL}?reason=payment_error")));
    assert_eq!(
        app.store.order(order_id).unwrap().status,
        OrderStatus::PaymentFailed
    );
}

#[tokio::test]
async fn test_missing_token_redirects_with_no_token() {
    let app = TestApp::new();

    let post = app.post_form("/api/payment/callback", "").await;
    assert_eq!(location(&post), format!("{ERROR_URL}?reason=no_token"));

    let get = app.get("/api/payment/callback").await;
    assert_eq!(location(&get), format!("{ERROR_URL}?reason=no_token"));

    let unparseable = app
        .send(
            Request::post("/api/payment/callback")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(location(&unparseable), format!("{ERROR_URL}?reason=no_token"));
}
