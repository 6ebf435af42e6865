//! Shared setup for auth-service integration tests.
//!
//! Assembles the full application over in-memory stores, a recording mailer
//! and a scripted identity provider, so no external services are needed.

#![allow(dead_code)]

use auth_service::{
    build_auth_service, build_router,
    config::AuthConfig,
    models::ClientInfo,
    services::{
        AuthService, FederatedIdentity, InMemoryBlacklist, InMemoryStore, MockEmailService,
        MockIdentityProvider,
    },
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const ACCESS_SECRET: &str = "test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &str = "test-refresh-secret-fedcba9876543210";
pub const STRONG_PASSWORD: &str = "Secr3t!pass";

pub struct TestApp {
    pub config: AuthConfig,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub blacklist: Arc<InMemoryBlacklist>,
    pub email: Arc<MockEmailService>,
    pub identity: Arc<MockIdentityProvider>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AuthConfig::development(ACCESS_SECRET, REFRESH_SECRET))
    }

    pub fn with_session_cap(cap: usize) -> Self {
        let mut config = AuthConfig::development(ACCESS_SECRET, REFRESH_SECRET);
        config.session.max_sessions_per_user = cap;
        Self::with_config(config)
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let blacklist = Arc::new(InMemoryBlacklist::new());
        let email = Arc::new(MockEmailService::new());
        let identity = Arc::new(MockIdentityProvider::new());

        let auth_service = build_auth_service(
            &config,
            store.clone(),
            store.clone(),
            blacklist.clone(),
            email.clone(),
            identity.clone(),
        )
        .expect("Failed to build auth service");

        let state = AppState::new(config.clone(), auth_service);

        Self {
            config,
            state,
            store,
            blacklist,
            email,
            identity,
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.state.auth_service
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn register_google_identity(&self, id_token: &str, external_id: &str, email: &str) {
        self.identity.register(
            id_token,
            FederatedIdentity {
                external_id: external_id.to_string(),
                email: email.to_string(),
                name: None,
                avatar_url: Some(format!("https://example.com/{}.png", external_id)),
            },
        );
    }

    /// Send a JSON request through the router and return status and body.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router()
            .oneshot(request)
            .await
            .expect("Router failed");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }
}

pub fn device(user_agent: &str) -> ClientInfo {
    ClientInfo {
        user_agent: Some(user_agent.to_string()),
        ip_address: Some("198.51.100.10".to_string()),
    }
}

pub const CHROME_DESKTOP: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
pub const SAFARI_IPHONE: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
pub const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
pub const SAFARI_IPAD: &str =
    "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
