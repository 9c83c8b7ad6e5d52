//! Admin API tests
//!
//! Token auth, link record upsert/read, visit stats and block management.

mod common;

use std::sync::Arc;

use actix_web::App;
use actix_web::http::StatusCode;
use actix_web::http::header::AUTHORIZATION;
use actix_web::test::{self, TestRequest};
use serde_json::{Value, json};

use shortgate::api::configure_app;
use shortgate::storage::StoredLink;
use shortgate::utils::password::verify_password;

use common::{ADMIN_TOKEN, CHROME_UA, StaticForwarder, app_state, default_state, memory_adapter};

fn bearer() -> (actix_web::http::header::HeaderName, String) {
    (AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
}

#[actix_web::test]
async fn test_admin_requires_token() {
    let state = default_state(memory_adapter());
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    let resp = test::call_service(&app, TestRequest::get().uri("/admin/blocks").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"]["message"].as_str().unwrap().contains("Unauthorized"));

    let req = TestRequest::get()
        .uri("/admin/blocks")
        .insert_header((AUTHORIZATION, "Bearer not-the-token"))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let req = TestRequest::get()
        .uri("/admin/blocks")
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_admin_disabled_without_token() {
    let mut state = default_state(memory_adapter());
    state.admin.token.clear();
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    // 管理路由未挂载，请求落到访客路由
    let req = TestRequest::get()
        .uri("/admin/blocks")
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_upsert_and_read_link() {
    let adapter = memory_adapter();
    let state = default_state(adapter.clone());
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    let req = TestRequest::put()
        .uri("/admin/links/promo")
        .insert_header(bearer())
        .set_json(json!({
            "targetUrl": "https://example.com/promo",
            "accessMode": "warning",
            "password": "pa55",
            "visitLimits": { "perDevice": 3 }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["shortKey"], "promo");
    assert_eq!(body["data"]["hasPassword"], true);
    assert!(body["data"].get("passwordHash").is_none());

    // 存储中保存的是哈希而不是明文
    match adapter.load_link("promo").await.unwrap() {
        Some(StoredLink::Record(record)) => {
            let hash = record.password_hash().unwrap();
            assert_ne!(hash, "pa55");
            assert!(verify_password("pa55", hash).unwrap());
            assert_eq!(record.visit_limits.unwrap().per_device, Some(3));
        }
        other => panic!("unexpected: {:?}", other),
    }

    // 局部更新保留其他字段
    let req = TestRequest::put()
        .uri("/admin/links/promo")
        .insert_header(bearer())
        .set_json(json!({ "isActive": false }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["isActive"], false);
    assert_eq!(body["data"]["accessMode"], "warning");
    assert_eq!(body["data"]["hasPassword"], true);

    let req = TestRequest::get()
        .uri("/admin/links/promo")
        .insert_header(bearer())
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["targetUrl"], "https://example.com/promo");

    let req = TestRequest::get()
        .uri("/admin/links/missing")
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_upsert_rejects_invalid_target() {
    let state = default_state(memory_adapter());
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    let req = TestRequest::put()
        .uri("/admin/links/bad")
        .insert_header(bearer())
        .set_json(json!({ "targetUrl": "javascript:alert(1)" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn test_upsert_rejects_invalid_code() {
    let adapter = memory_adapter();
    let state = default_state(adapter.clone());
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    for code in ["a:x", "a*b", "a%3Fb"] {
        let req = TestRequest::put()
            .uri(&format!("/admin/links/{}", code))
            .insert_header(bearer())
            .set_json(json!({ "targetUrl": "https://example.com" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", code);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("Invalid short code"));
    }
    assert!(adapter.load_link("a:x").await.unwrap().is_none());

    let req = TestRequest::put()
        .uri("/admin/links/intro-v1.2")
        .insert_header(bearer())
        .set_json(json!({ "url": "https://example.com/docs" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["targetUrl"], "https://example.com/docs");
}

#[actix_web::test]
async fn test_stats_reflect_visits() {
    let adapter = memory_adapter();
    let state = default_state(adapter);
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    let req = TestRequest::put()
        .uri("/admin/links/counted")
        .insert_header(bearer())
        .set_json(json!({ "targetUrl": "https://example.com/c" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    for language in ["en-US", "de-DE"] {
        let req = TestRequest::get()
            .uri("/counted")
            .insert_header(("user-agent", CHROME_UA))
            .insert_header(("accept-language", language))
            .insert_header(("cf-connecting-ip", "198.51.100.4"))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::TEMPORARY_REDIRECT
        );
    }

    let req = TestRequest::get()
        .uri("/admin/links/counted/stats")
        .insert_header(bearer())
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let data = &body["data"];
    assert_eq!(data["currentVisits"], 2);
    assert_eq!(data["totalVisits"], 2);
    assert_eq!(data["knownDevices"], 2);
    assert_eq!(data["visitHistory"].as_array().unwrap().len(), 2);
    assert_eq!(data["visitHistory"][0]["ip"], "198.51.100.4");
    assert!(data["lastVisitAt"].is_string());
}

#[actix_web::test]
async fn test_block_lifecycle() {
    let adapter = memory_adapter();
    let state = default_state(adapter.clone());
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    let req = TestRequest::put()
        .uri("/admin/links/guarded")
        .insert_header(bearer())
        .set_json(json!({ "targetUrl": "https://example.com/g" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = TestRequest::post()
        .uri("/admin/blocks")
        .insert_header(bearer())
        .set_json(json!({
            "subject": "192.0.2.10",
            "kind": "ip",
            "reason": "Scraping",
            "expires": "1h"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["subjectId"], "192.0.2.10");
    assert!(body["data"]["expiresAt"].is_string());

    let visit = || {
        TestRequest::get()
            .uri("/guarded")
            .insert_header(("user-agent", CHROME_UA))
            .insert_header(("cf-connecting-ip", "192.0.2.10"))
            .to_request()
    };
    let resp = test::call_service(&app, visit()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Scraping");

    let req = TestRequest::get()
        .uri("/admin/blocks")
        .insert_header(bearer())
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let req = TestRequest::delete()
        .uri("/admin/blocks/ip/192.0.2.10")
        .insert_header(bearer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    assert!(
        adapter
            .find_block("unused", Some("192.0.2.10"))
            .await
            .unwrap()
            .is_none()
    );

    let resp = test::call_service(&app, visit()).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[actix_web::test]
async fn test_block_validation() {
    let state = default_state(memory_adapter());
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    let bad_kind = TestRequest::post()
        .uri("/admin/blocks")
        .insert_header(bearer())
        .set_json(json!({ "subject": "x", "kind": "account" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, bad_kind).await.status(),
        StatusCode::BAD_REQUEST
    );

    let bad_expiry = TestRequest::post()
        .uri("/admin/blocks")
        .insert_header(bearer())
        .set_json(json!({ "subject": "x", "kind": "device", "expires": "soon" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, bad_expiry).await.status(),
        StatusCode::BAD_REQUEST
    );

    let bad_delete = TestRequest::delete()
        .uri("/admin/blocks/account/x")
        .insert_header(bearer())
        .to_request();
    assert_eq!(
        test::call_service(&app, bad_delete).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[actix_web::test]
async fn test_admin_without_store_returns_500() {
    let state = app_state(None, Arc::new(StaticForwarder { body: "" }));
    let app = test::init_service(App::new().configure(|cfg| configure_app(&state, cfg))).await;

    let req = TestRequest::get()
        .uri("/admin/blocks")
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Storage not configured");
}
