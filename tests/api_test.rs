mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use bitebank::api::create_app;
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn app() -> anyhow::Result<Router> {
    let ctx = context(Some(FakeProvider::new())).await?;
    Ok(create_app(Arc::new(ctx), Arc::new(test_settings())))
}

async fn send(app: &Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn json_request(method: &str, uri: &str, body: Value, actor: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(actor) = actor {
        builder = builder.header("x-actor-id", actor.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_health_check() -> anyhow::Result<()> {
    let app = app().await?;

    let (status, body) = send(&app, Request::get("/health").body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, Request::get("/").body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payments_enabled"], true);

    Ok(())
}

#[tokio::test]
async fn test_staff_routes_require_actor() -> anyhow::Result<()> {
    let app = app().await?;
    let voucher_id = Uuid::new_v4();
    let uri = format!("/api/vouchers/{}/claim", voucher_id);

    let (status, _) = send(&app, json_request("POST", &uri, json!({}), None)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut bad = json_request("POST", &uri, json!({}), None);
    bad.headers_mut().insert("x-actor-id", "not-a-uuid".parse()?);
    let (status, _) = send(&app, bad).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, json_request("POST", &uri, json!({}), Some(Uuid::new_v4()))).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_time_slot_routes() -> anyhow::Result<()> {
    let app = app().await?;
    let admin = Uuid::new_v4();
    let lunch = json!({ "display_name": "Lunch", "start_time": "11:00", "end_time": "13:00" });

    let (status, _) = send(&app, json_request("POST", "/api/time-slots", lunch.clone(), None)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, json_request("POST", "/api/time-slots", lunch, Some(admin))).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["start_time"], "11:00");
    assert_eq!(body["is_active"], true);

    let clash = json!({ "display_name": "Brunch", "start_time": "10:30", "end_time": "11:30" });
    let (status, _) = send(&app, json_request("POST", "/api/time-slots", clash, Some(admin))).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, Request::get("/api/time-slots").body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    Ok(())
}

#[tokio::test]
async fn test_malformed_reference_is_unprocessable() -> anyhow::Result<()> {
    let app = app().await?;

    let (status, body) = send(
        &app,
        Request::get("/api/vouchers/reference/nope").body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_donation_completed_by_webhook() -> anyhow::Result<()> {
    let app = app().await?;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/donations",
            json!({
                "donor_id": Uuid::new_v4(),
                "amount_centavos": 19500,
                "payment_method": "gcash",
                "customer_email": "donor@example.com"
            }),
            None,
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["donation"]["meal_count"], 3);
    assert_eq!(body["donation"]["payment_status"], "pending");
    let donation_id = body["donation"]["id"].as_str().unwrap_or_default().to_string();
    let session_id = body["session_id"].as_str().unwrap_or_default().to_string();
    assert!(body["checkout_url"].as_str().is_some());

    let payload = webhook_payload(
        "checkout.session.completed",
        json!({ "id": session_id, "payment_status": "paid", "amount_total": 19500 }),
    );
    let request = Request::post("/webhooks/paymongo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.clone()))?;
    let (status, body) = send(&app, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "completed");
    assert_eq!(body["donation_id"], donation_id.as_str());

    // Redelivery is acknowledged without doing anything
    let request = Request::post("/webhooks/paymongo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))?;
    let (status, body) = send(&app, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_completed");

    let (status, body) = send(
        &app,
        Request::get(format!("/api/donations/{}", donation_id)).body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_status"], "completed");

    Ok(())
}

#[tokio::test]
async fn test_malformed_webhook_is_rejected() -> anyhow::Result<()> {
    let app = app().await?;

    let request = Request::post("/webhooks/paymongo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("not json"))?;
    let (status, _) = send(&app, request).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}
