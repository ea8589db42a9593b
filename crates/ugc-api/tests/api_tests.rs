//! HTTP-level tests against in-memory stores.

mod common;

use axum::body::Body;
use axum::http::Request;
use serde_json::json;

use common::{authed, test_app, USER, WEBHOOK_SECRET};
use ugc_api::security::sign_payload;

fn webhook(body: &serde_json::Value, secret: &str) -> Request<Body> {
    let raw = body.to_string();
    Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json")
        .header("x-signature", sign_payload(secret, raw.as_bytes()))
        .body(Body::from(raw))
        .unwrap()
}

fn generate_body() -> serde_json::Value {
    json!({
        "productData": {
            "title": "Travel Mug",
            "images": ["https://cdn.shop/mug.png"],
            "sku": "MUG-01"
        },
        "style": "PRODUCT_SHOWCASE"
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let (status, body) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_reports_queue_outage() {
    let app = test_app();
    let ready = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

    let (status, _) = app.send(ready()).await;
    assert_eq!(status, 200);

    app.queue.set_unavailable(true);
    let (status, body) = app.send(ready()).await;
    assert_eq!(status, 503);
    assert_eq!(body["checks"]["queue"]["status"], "error");
}

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let app = test_app();
    let (status, body) = app
        .send(Request::builder().uri("/api/videos").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, 401);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .send(
            Request::builder()
                .uri("/api/credits/balance")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_generate_script_debits_and_reports_balance() {
    let app = test_app();
    app.fund(USER, 5).await;

    let (status, created) = app
        .send(authed("POST", "/api/videos/generate-script", USER, Some(generate_body())))
        .await;
    assert_eq!(status, 201);
    assert_eq!(created["creditsRemaining"], 4);
    let video_id = created["videoId"].as_str().unwrap().to_string();

    let (status, video) = app
        .send(authed("GET", &format!("/api/videos/{}", video_id), USER, None))
        .await;
    assert_eq!(status, 200);
    assert_eq!(video["status"], "SCRIPT_READY");
    assert_eq!(video["productData"]["sku"], "MUG-01");

    let (_, balance) = app.send(authed("GET", "/api/credits/balance", USER, None)).await;
    assert_eq!(balance["balance"], 4);

    let (_, history) = app
        .send(authed("GET", "/api/credits/history?limit=1", USER, None))
        .await;
    assert_eq!(history["total"], 2);
    assert_eq!(history["limit"], 1);
    assert_eq!(history["hasMore"], true);
    assert_eq!(history["transactions"][0]["type"], "CONSUMPTION");
}

#[tokio::test]
async fn test_generate_script_without_credits_is_402() {
    let app = test_app();
    let (status, body) = app
        .send(authed("POST", "/api/videos/generate-script", USER, Some(generate_body())))
        .await;
    assert_eq!(status, 402);
    assert_eq!(body["code"], "INSUFFICIENT_CREDITS");
}

#[tokio::test]
async fn test_generate_script_validates_product() {
    let app = test_app();
    app.fund(USER, 1).await;
    let body = json!({ "productData": { "title": "" } });

    let (status, body) = app
        .send(authed("POST", "/api/videos/generate-script", USER, Some(body)))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(app.ledger.balance(USER).await.unwrap(), 1);
}

#[tokio::test]
async fn test_confirm_cancel_over_http() {
    let app = test_app();
    app.fund(USER, 5).await;
    let (_, created) = app
        .send(authed("POST", "/api/videos/generate-script", USER, Some(generate_body())))
        .await;
    let video_id = created["videoId"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(authed("PUT", &format!("/api/videos/{}/script", video_id), USER, Some(json!({"script": "Short and sweet."}))))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["video"]["finalScript"], "Short and sweet.");

    let (status, body) = app
        .send(authed("POST", &format!("/api/videos/{}/confirm", video_id), "someone-else", None))
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "ACCESS_DENIED");

    let (status, body) = app
        .send(authed("POST", &format!("/api/videos/{}/confirm", video_id), USER, None))
        .await;
    assert_eq!(status, 202);
    assert_eq!(body["video"]["status"], "QUEUED");
    assert_eq!(app.queue.len(), 1);

    let (status, body) = app
        .send(authed("POST", &format!("/api/videos/{}/confirm", video_id), USER, None))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "INVALID_VIDEO_STATUS");

    let (status, body) = app
        .send(authed("DELETE", &format!("/api/videos/{}", video_id), USER, None))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["video"]["status"], "CANCELLED");
    assert!(app.queue.is_empty());
    assert_eq!(app.ledger.balance(USER).await.unwrap(), 5);

    let (status, body) = app
        .send(authed("GET", &format!("/api/videos/{}/download", video_id), USER, None))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "INVALID_VIDEO_STATUS");
}

#[tokio::test]
async fn test_unknown_video_is_404() {
    let app = test_app();
    let (status, body) = app
        .send(authed("GET", "/api/videos/does-not-exist", USER, None))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "VIDEO_NOT_FOUND");
}

#[tokio::test]
async fn test_confirm_with_queue_down_is_503() {
    let app = test_app();
    app.fund(USER, 2).await;
    let (_, created) = app
        .send(authed("POST", "/api/videos/generate-script", USER, Some(generate_body())))
        .await;
    let video_id = created["videoId"].as_str().unwrap().to_string();
    app.queue.set_unavailable(true);

    let (status, body) = app
        .send(authed("POST", &format!("/api/videos/{}/confirm", video_id), USER, None))
        .await;
    assert_eq!(status, 503);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(app.ledger.balance(USER).await.unwrap(), 1);
}

#[tokio::test]
async fn test_payment_webhook_grants_once() {
    let app = test_app();
    let event = json!({
        "id": "evt_100",
        "type": "purchase.completed",
        "data": { "userId": USER, "credits": 10, "bonusCredits": 2 }
    });

    let (status, body) = app.send(webhook(&event, WEBHOOK_SECRET)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["balance"], 12);

    let (status, body) = app.send(webhook(&event, WEBHOOK_SECRET)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(app.ledger.balance(USER).await.unwrap(), 12);

    let types: Vec<String> = app
        .ledger_store
        .all_transactions(USER)
        .await
        .into_iter()
        .map(|t| t.tx_type.as_str().to_string())
        .collect();
    assert_eq!(types.len(), 2);
    assert!(types.contains(&"PURCHASE".to_string()));
    assert!(types.contains(&"BONUS".to_string()));
}

#[tokio::test]
async fn test_payment_refund_claws_back_to_zero() {
    let app = test_app();
    app.fund(USER, 3).await;
    let event = json!({
        "id": "evt_200",
        "type": "refund.issued",
        "data": { "userId": USER, "credits": 5 }
    });

    let (status, body) = app.send(webhook(&event, WEBHOOK_SECRET)).await;
    assert_eq!(status, 200);
    assert_eq!(body["balance"], 0);

    let (_, body) = app.send(webhook(&event, WEBHOOK_SECRET)).await;
    assert_eq!(body["status"], "duplicate");
    assert_eq!(app.ledger.balance(USER).await.unwrap(), 0);
}

#[tokio::test]
async fn test_payment_webhook_rejects_bad_signature() {
    let app = test_app();
    let event = json!({
        "id": "evt_300",
        "type": "purchase.completed",
        "data": { "userId": USER, "credits": 10 }
    });

    let (status, body) = app.send(webhook(&event, "wrong-secret")).await;
    assert_eq!(status, 401);
    assert_eq!(body["code"], "INVALID_SIGNATURE");
    assert_eq!(app.ledger.balance(USER).await.unwrap(), 0);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = test_app();
    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        Request::builder()
            .uri("/health")
            .header("x-request-id", "req-123")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}
