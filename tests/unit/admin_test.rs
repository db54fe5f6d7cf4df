#[path = "../test_utils.rs"]
mod test_utils;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use request_shield::service::downstream_routes;
use serde_json::json;
use test_utils::{body_json, get_from, memory_state, random_ip, router, test_settings};
use tower::ServiceExt;

const ADMIN_IP: &str = "10.255.0.1";

fn admin_request(method: Method, path: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(path)
        // Fresh address per call so admin traffic never trips the burst threshold
        .header("x-forwarded-for", random_ip())
        .header("authorization", "Bearer test-key");
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_missing_or_wrong_key_is_rejected() {
    let settings = test_settings(100);
    let app = router(memory_state(&settings), &settings, downstream_routes());

    let response = app.clone().oneshot(get_from(ADMIN_IP, "/admin/blocks")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/admin/blocks")
        .header("x-forwarded-for", ADMIN_IP)
        .header("authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["statusCode"], 401);
}

#[tokio::test]
async fn test_admin_block_lifecycle() {
    let settings = test_settings(100);
    let app = router(memory_state(&settings), &settings, downstream_routes());
    let ip = random_ip();

    let response = app
        .clone()
        .oneshot(admin_request(
            Method::POST,
            "/admin/blocks",
            Some(json!({ "clientKey": format!(" {} ", ip), "reason": "Manual review" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let entry = body_json(response).await;
    assert_eq!(entry["clientKey"], ip.as_str());
    assert_eq!(entry["source"], "manual");
    assert!(entry["expiresAt"].is_null());

    let response = app.clone().oneshot(get_from(&ip, "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["reason"], "Manual review");

    let response = app
        .clone()
        .oneshot(admin_request(Method::GET, "/admin/blocks", None))
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert!(listed
        .as_array()
        .unwrap()
        .iter()
        .any(|entry| entry["clientKey"] == ip.as_str()));

    let response = app
        .clone()
        .oneshot(admin_request(Method::DELETE, &format!("/admin/blocks/{}", ip), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["removed"], true);

    let response = app.oneshot(get_from(&ip, "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_block_request() {
    let settings = test_settings(100);
    let app = router(memory_state(&settings), &settings, downstream_routes());

    let response = app
        .oneshot(admin_request(
            Method::POST,
            "/admin/blocks",
            Some(json!({ "clientKey": "   ", "reason": "x" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_removal_lifts_ddos_block() {
    let settings = test_settings(2);
    let app = router(memory_state(&settings), &settings, downstream_routes());
    let ip = random_ip();

    for _ in 0..3 {
        app.clone().oneshot(get_from(&ip, "/")).await.unwrap();
    }

    let response = app
        .clone()
        .oneshot(admin_request(Method::GET, &format!("/admin/traffic/{}", ip), None))
        .await
        .unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["offenses"], 1);
    assert_eq!(stats["ddosBlocked"], true);

    app.clone()
        .oneshot(admin_request(Method::DELETE, &format!("/admin/blocks/{}", ip), None))
        .await
        .unwrap();

    let response = app
        .oneshot(admin_request(Method::GET, &format!("/admin/traffic/{}", ip), None))
        .await
        .unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["offenses"], 0);
    assert_eq!(stats["ddosBlocked"], false);
}
