//! End-to-end HTTP tests through the router.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{TestApp, STRONG_PASSWORD};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn register(app: &TestApp, email: &str) -> Value {
    let (status, body) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "email": email, "password": STRONG_PASSWORD, "name": "Test User" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn register_returns_user_and_tokens() {
    let app = TestApp::new();
    let body = register(&app, "alice@example.com").await;

    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["display_name"], "Test User");
    assert_eq!(body["user"]["email_verified"], false);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn invalid_payloads_are_rejected() {
    let app = TestApp::new();

    let (status, body) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "email": "not-an-email", "password": STRONG_PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "email": "bob@example.com", "password": "password123" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Password must contain at least one special character"
    );

    let (status, _) = app
        .request("POST", "/auth/login", None, Some(json!({ "email": "x@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::new();
    register(&app, "carol@example.com").await;

    let (status, _) = app
        .request(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "email": "CAROL@example.com", "password": STRONG_PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let app = TestApp::new();

    let (status, body) = app.request("GET", "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing or invalid Authorization header");

    let (status, _) = app.request("GET", "/auth/me", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let tokens = register(&app, "dave@example.com").await;
    let access = tokens["access_token"].as_str().unwrap();
    let (status, body) = app.request("GET", "/auth/me", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "dave@example.com");
    assert_eq!(body["has_password"], true);
}

#[tokio::test]
async fn logout_revokes_access_token_immediately() {
    let app = TestApp::new();
    let tokens = register(&app, "erin@example.com").await;
    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let (status, body) = app
        .request(
            "POST",
            "/auth/logout",
            Some(access),
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out successfully");

    let (status, body) = app.request("GET", "/auth/me", Some(access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token has been revoked");

    let (status, _) = app
        .request("POST", "/auth/refresh", None, Some(json!({ "refresh_token": refresh })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_rotates_and_rejects_replay() {
    let app = TestApp::new();
    let tokens = register(&app, "frank@example.com").await;
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let (status, rotated) = app
        .request("POST", "/auth/refresh", None, Some(json!({ "refresh_token": refresh })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["refresh_token"], tokens["refresh_token"]);

    let (status, body) = app
        .request("POST", "/auth/refresh", None, Some(json!({ "refresh_token": refresh })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired session");
}

#[tokio::test]
async fn sessions_endpoint_lists_devices() {
    let app = TestApp::new();
    let tokens = register(&app, "grace@example.com").await;
    let access = tokens["access_token"].as_str().unwrap();

    let (status, body) = app
        .request("GET", "/auth/sessions", Some(access), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_sessions"], 3);
    assert_eq!(body["sessions"].as_array().map(|s| s.len()), Some(1));
    assert!(body["sessions"][0].get("refresh_token_hash").is_none());

    let (status, body) = app
        .request("POST", "/auth/logout-all", Some(access), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions_terminated"], 1);

    // Access tokens are not revoked, but no sessions remain.
    let (status, body) = app
        .request("GET", "/auth/sessions", Some(access), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"].as_array().map(|s| s.len()), Some(0));
}

#[tokio::test]
async fn locked_account_returns_forbidden() {
    let app = TestApp::new();
    register(&app, "bob@example.com").await;

    for _ in 0..5 {
        let (status, _) = app
            .request(
                "POST",
                "/auth/login",
                None,
                Some(json!({ "email": "bob@example.com", "password": "wrong-Passw0rd!" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = app
        .request(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "bob@example.com", "password": STRONG_PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["error"],
        "Account is temporarily locked due to too many failed login attempts"
    );
}

#[tokio::test]
async fn verification_and_reset_links_work_over_http() {
    let app = TestApp::new();
    register(&app, "heidi@example.com").await;

    let token = app
        .email
        .last_token("heidi@example.com", "verification")
        .unwrap();
    let (status, _) = app
        .request("GET", &format!("/auth/verify-email/{}", token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request("GET", "/auth/verify-email/not-a-token", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            "POST",
            "/auth/forgot-password",
            None,
            Some(json!({ "email": "heidi@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let reset = app
        .email
        .last_token("heidi@example.com", "password_reset")
        .unwrap();
    let (status, body) = app
        .request(
            "POST",
            &format!("/auth/reset-password/{}", reset),
            None,
            Some(json!({ "password": "N3w-passphrase" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn google_sign_in_creates_account() {
    let app = TestApp::new();
    app.register_google_identity("id-token", "g-1", "ivan@example.com");

    let (status, body) = app
        .request("POST", "/auth/google", None, Some(json!({ "id_token": "id-token" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email_verified"], true);
    assert_eq!(body["user"]["has_password"], false);

    let (status, _) = app
        .request("POST", "/auth/google", None, Some(json!({ "id_token": "id-token" })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request("POST", "/auth/google", None, Some(json!({ "id_token": "forged" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_is_rate_limited_per_ip() {
    let app = TestApp::new();
    let router = app.router();

    let mut statuses = Vec::new();
    for i in 0..6 {
        let request = Request::builder()
            .method("POST")
            .uri("/auth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(
                json!({ "email": format!("user{}@example.com", i), "password": STRONG_PASSWORD })
                    .to_string(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        statuses.push(response.status());
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::CREATED));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn resend_verification_is_rate_limited_per_ip() {
    let app = TestApp::new();
    let router = app.router();
    let limit = app.config.rate_limit.email_verification_attempts as usize;

    let mut statuses = Vec::new();
    for _ in 0..=limit {
        let request = Request::builder()
            .method("POST")
            .uri("/auth/resend-verification")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.21")
            .body(Body::from(json!({ "email": "victim@example.com" }).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        statuses.push(response.status());
    }

    assert!(statuses[..limit]
        .iter()
        .all(|s| *s != StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(statuses[limit], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn google_sign_in_shares_the_login_budget() {
    let app = TestApp::new();
    let router = app.router();
    let limit = app.config.rate_limit.login_attempts as usize;

    let mut statuses = Vec::new();
    for _ in 0..=limit {
        let request = Request::builder()
            .method("POST")
            .uri("/auth/google")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.22")
            .body(Body::from(json!({ "id_token": "forged" }).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        statuses.push(response.status());
    }

    assert!(statuses[..limit]
        .iter()
        .all(|s| *s == StatusCode::UNAUTHORIZED));
    assert_eq!(statuses[limit], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let app = TestApp::new();

    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app
        .request("GET", "/.well-known/openapi.json", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/auth/refresh").is_some());
}
