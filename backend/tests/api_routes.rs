//! HTTP surface: routing, JSON envelope and error status mapping.

mod support;

use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};
use uuid::Uuid;

use registration_backend::api;
use registration_backend::config::AppConfig;
use registration_backend::websocket::WsRegistry;
use registration_backend::AppState;

use support::{epoch, Harness};

fn app_state(h: &Harness) -> Arc<AppState> {
    let config = AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://localhost/registrations_test".to_string()),
        "PAYMENT_API_KEY" => Some("sk_test".to_string()),
        _ => None,
    })
    .unwrap();

    Arc::new(AppState {
        db: None,
        catalog: h.catalog.clone(),
        orchestrator: h.orchestrator.clone(),
        clock: h.clock.clone(),
        config,
        ws_registry: WsRegistry::new(),
    })
}

#[actix_web::test]
async fn test_program_registration_and_cancellation_over_http() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h)))
            .configure(api::configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/programs")
        .set_json(json!({
            "title": "Goalkeeping basics",
            "startDate": (epoch() + chrono::Duration::days(30)).to_rfc3339(),
            "priceCents": 12000,
            "maxParticipants": 1,
            "waitlistEnabled": true
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "draft");
    assert_eq!(body["data"]["priceDisplay"], "120.00 USD");
    let program_id = body["data"]["id"].as_str().unwrap().to_string();

    let player = Uuid::new_v4();
    let register = json!({ "programId": program_id, "playerId": player });

    // Draft programs take no registrations
    let req = test::TestRequest::post().uri("/registrations").set_json(&register).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "PROGRAM_NOT_PUBLISHED");

    let req = test::TestRequest::patch()
        .uri(&format!("/programs/{}/status", program_id))
        .set_json(json!({ "status": "published" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::post().uri("/registrations").set_json(&register).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let registration_id = body["data"]["registration"]["id"].as_str().unwrap().to_string();
    let payment_id = body["data"]["payments"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["registration"]["status"], "pending");

    let req = test::TestRequest::post()
        .uri(&format!("/registrations/{}/payments/{}/succeeded", registration_id, payment_id))
        .set_json(json!({ "paymentIntentId": "pi_http" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["newlyConfirmed"], true);
    assert_eq!(body["data"]["registration"]["balanceDueCents"], 0);

    let waiting = Uuid::new_v4();
    let req = test::TestRequest::post()
        .uri(&format!("/programs/{}/waitlist", program_id))
        .set_json(json!({ "playerId": waiting }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["position"], 1);
    assert_eq!(body["data"]["state"], "queued");

    let req = test::TestRequest::get()
        .uri(&format!("/registrations/{}/refund-preview", registration_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["refundAmountCents"], 12000);

    let req = test::TestRequest::post()
        .uri(&format!("/registrations/{}/cancel", registration_id))
        .set_json(json!({ "reason": "Schedule conflict" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["registration"]["status"], "refunded");
    assert_eq!(body["data"]["refundedAmountCents"], 12000);
    assert_eq!(body["data"]["partialFailure"], false);
    assert_eq!(body["data"]["promotion"]["promoted"], true);

    let req = test::TestRequest::get()
        .uri(&format!("/programs/{}/waitlist", program_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["entries"][0]["state"], "promoted");

    let req = test::TestRequest::get()
        .uri(&format!("/players/{}/registrations", player))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"].as_array().map(|a| a.len()), Some(1));
}

#[actix_web::test]
async fn test_error_statuses() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(app_state(&h)))
            .configure(api::configure_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/registrations/{}", Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "REGISTRATION_NOT_FOUND");

    let req = test::TestRequest::post()
        .uri(&format!("/waitlist/{}/claim", Uuid::new_v4()))
        .set_json(json!({ "playerId": Uuid::new_v4() }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post().uri("/waitlist/sweep").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["expired"], 0);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "healthy");
}
