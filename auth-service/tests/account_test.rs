//! Registration, email verification, password reset, password change and
//! federated sign-in.

mod common;

use auth_service::{
    build_auth_service,
    config::AuthConfig,
    models::{ClientInfo, TerminationReason},
    services::{
        EmailTemplate, InMemoryBlacklist, InMemoryStore, MockEmailService, MockIdentityProvider,
        ServiceError, UserStore,
    },
};
use common::{device, TestApp, ACCESS_SECRET, CHROME_DESKTOP, REFRESH_SECRET, SAFARI_IPHONE, STRONG_PASSWORD};
use std::sync::Arc;

#[tokio::test]
async fn register_normalizes_email_and_rejects_duplicates() {
    let app = TestApp::new();
    let outcome = app
        .auth()
        .register("  Grace@Example.COM ", STRONG_PASSWORD, Some("Grace".into()), &ClientInfo::default())
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.user.email, "grace@example.com");
    assert!(!outcome.user.email_verified);
    assert!(outcome.session_id.is_some());

    let duplicate = app
        .auth()
        .register("grace@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await;
    assert!(matches!(duplicate, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn register_enforces_password_policy() {
    let app = TestApp::new();
    for weak in ["short1!", "no-digits-here!", "n0special1234"] {
        let result = app
            .auth()
            .register("weak@example.com", weak, None, &ClientInfo::default())
            .await;
        assert!(
            matches!(result, Err(ServiceError::ValidationFailed(_))),
            "accepted {}",
            weak
        );
    }
    assert!(app
        .store
        .find_by_email("weak@example.com")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn stored_password_is_hashed() {
    let app = TestApp::new();
    app.auth()
        .register("hash@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await
        .unwrap();

    let user = app
        .store
        .find_by_email("hash@example.com")
        .await
        .unwrap()
        .unwrap();
    let hash = user.password_hash.expect("password hash");
    assert_ne!(hash, STRONG_PASSWORD);
    assert!(hash.starts_with("$argon2"));
}

#[tokio::test]
async fn mail_failure_does_not_fail_registration() {
    let config = AuthConfig::development(ACCESS_SECRET, REFRESH_SECRET);
    let store = Arc::new(InMemoryStore::new());
    let auth = build_auth_service(
        &config,
        store.clone(),
        store.clone(),
        Arc::new(InMemoryBlacklist::new()),
        Arc::new(MockEmailService::failing()),
        Arc::new(MockIdentityProvider::new()),
    )
    .unwrap();

    let outcome = auth
        .register("offline@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await
        .expect("registration succeeds without mail delivery");
    assert!(auth.refresh(&outcome.tokens.refresh_token).await.is_ok());
}

#[tokio::test]
async fn email_verification_flow() {
    let app = TestApp::new();
    let auth = app.auth();
    auth.register("heidi@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await
        .unwrap();

    let token = app
        .email
        .last_token("heidi@example.com", "verification")
        .expect("verification email sent");

    let stored = app
        .store
        .find_by_email("heidi@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_ne!(stored.email_verification_hash.as_deref(), Some(token.as_str()));

    let user = auth.confirm_email_verification(&token).await.unwrap();
    assert!(user.email_verified);
    assert!(user.email_verification_hash.is_none());

    // Single use.
    assert!(matches!(
        auth.confirm_email_verification(&token).await,
        Err(ServiceError::ValidationFailed(_))
    ));
    assert!(matches!(
        auth.request_email_verification("heidi@example.com").await,
        Err(ServiceError::ValidationFailed(_))
    ));
}

#[tokio::test]
async fn verification_link_of_deleted_account_is_rejected() {
    let app = TestApp::new();
    app.auth()
        .register("judy@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await
        .unwrap();
    let token = app
        .email
        .last_token("judy@example.com", "verification")
        .expect("verification email sent");

    let mut user = app
        .store
        .find_by_email("judy@example.com")
        .await
        .unwrap()
        .unwrap();
    user.is_deleted = true;
    app.store.save(&user).await.unwrap();

    assert!(matches!(
        app.auth().confirm_email_verification(&token).await,
        Err(ServiceError::ValidationFailed(_))
    ));
    let stored = app.store.find_by_id(user.user_id).await.unwrap().unwrap();
    assert!(!stored.email_verified);
}

#[tokio::test]
async fn resend_verification_replaces_the_token() {
    let app = TestApp::new();
    let auth = app.auth();
    auth.register("ivan@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await
        .unwrap();
    let first = app.email.last_token("ivan@example.com", "verification").unwrap();

    auth.request_email_verification("IVAN@example.com").await.unwrap();
    let second = app.email.last_token("ivan@example.com", "verification").unwrap();
    assert_ne!(first, second);

    assert!(auth.confirm_email_verification(&first).await.is_err());
    assert!(auth.confirm_email_verification(&second).await.is_ok());

    assert!(matches!(
        auth.request_email_verification("nobody@example.com").await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn password_reset_ends_existing_sessions() {
    let app = TestApp::with_session_cap(5);
    let auth = app.auth();
    let desktop = auth
        .register("judy@example.com", STRONG_PASSWORD, None, &device(CHROME_DESKTOP))
        .await
        .unwrap();
    let phone = auth
        .login("judy@example.com", STRONG_PASSWORD, &device(SAFARI_IPHONE))
        .await
        .unwrap();

    auth.request_password_reset("judy@example.com").await.unwrap();
    let token = app
        .email
        .last_token("judy@example.com", "password_reset")
        .expect("reset email sent");

    let new_password = "N3w-passphrase";
    let outcome = auth
        .confirm_password_reset(&token, new_password, &device(CHROME_DESKTOP))
        .await
        .unwrap();
    assert!(outcome.session_id.is_some());

    for old in [&desktop.tokens.refresh_token, &phone.tokens.refresh_token] {
        assert!(matches!(
            auth.refresh(old).await,
            Err(ServiceError::InvalidSession)
        ));
    }
    assert!(auth.refresh(&outcome.tokens.refresh_token).await.is_ok());

    let terminated: Vec<_> = app
        .store
        .sessions_for(desktop.user.user_id)
        .unwrap()
        .into_iter()
        .filter(|s| !s.is_active)
        .collect();
    assert_eq!(terminated.len(), 2);
    assert!(terminated
        .iter()
        .all(|s| s.termination_reason() == Some(TerminationReason::ForcedLogout)));

    assert!(matches!(
        auth.login("judy@example.com", STRONG_PASSWORD, &ClientInfo::default())
            .await,
        Err(ServiceError::InvalidCredentials)
    ));
    assert!(auth
        .login("judy@example.com", new_password, &ClientInfo::default())
        .await
        .is_ok());

    // The link works once.
    assert!(matches!(
        auth.confirm_password_reset(&token, "An0ther-pass", &ClientInfo::default())
            .await,
        Err(ServiceError::ValidationFailed(_))
    ));
}

#[tokio::test]
async fn password_reset_does_not_reveal_unknown_email() {
    let app = TestApp::new();
    app.auth()
        .request_password_reset("ghost@example.com")
        .await
        .expect("unknown email succeeds");
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn change_password_requires_current_password() {
    let app = TestApp::new();
    let auth = app.auth();
    let outcome = auth
        .register("ken@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await
        .unwrap();
    let user_id = outcome.user.user_id;

    assert!(matches!(
        auth.change_password(user_id, "wrong-Passw0rd!", "N3w-passphrase").await,
        Err(ServiceError::InvalidCredentials)
    ));
    assert!(matches!(
        auth.change_password(user_id, STRONG_PASSWORD, "weakpass").await,
        Err(ServiceError::ValidationFailed(_))
    ));

    auth.change_password(user_id, STRONG_PASSWORD, "N3w-passphrase")
        .await
        .unwrap();
    assert!(auth
        .login("ken@example.com", "N3w-passphrase", &ClientInfo::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn federated_sign_in_creates_then_reuses_account() {
    let app = TestApp::new();
    app.register_google_identity("google-token-1", "g-123", "leo@example.com");

    let first = app
        .auth()
        .federated_sign_in("google-token-1", &ClientInfo::default())
        .await
        .unwrap();
    assert!(first.created);
    assert!(first.user.email_verified);
    assert!(!first.user.has_password());
    assert_eq!(first.user.display_name.as_deref(), Some("leo"));
    assert!(app
        .email
        .sent()
        .iter()
        .any(|(to, t)| to == "leo@example.com" && matches!(t, EmailTemplate::Welcome { .. })));

    let second = app
        .auth()
        .federated_sign_in("google-token-1", &ClientInfo::default())
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.user.user_id, first.user.user_id);

    // No password to change, and the password path never matches.
    assert!(matches!(
        app.auth()
            .change_password(first.user.user_id, "anything", "N3w-passphrase")
            .await,
        Err(ServiceError::UnsupportedOperation(_))
    ));
    for _ in 0..8 {
        assert!(matches!(
            app.auth()
                .login("leo@example.com", "anything", &ClientInfo::default())
                .await,
            Err(ServiceError::InvalidCredentials)
        ));
    }

    // The password path never counts attempts against a federated-only account.
    let stored = app.store.find_by_id(first.user.user_id).await.unwrap().unwrap();
    assert_eq!(stored.failed_login_attempts, 0);
    assert!(stored.lock_until_utc.is_none());
}

#[tokio::test]
async fn federated_sign_in_links_existing_password_account() {
    let app = TestApp::new();
    let registered = app
        .auth()
        .register("mia@example.com", STRONG_PASSWORD, None, &ClientInfo::default())
        .await
        .unwrap();
    app.register_google_identity("google-token-2", "g-456", "mia@example.com");

    let linked = app
        .auth()
        .federated_sign_in("google-token-2", &ClientInfo::default())
        .await
        .unwrap();
    assert!(!linked.created);
    assert_eq!(linked.user.user_id, registered.user.user_id);
    assert_eq!(linked.user.external_id.as_deref(), Some("g-456"));
    assert!(linked.user.email_verified);

    // Password login keeps working on the linked account.
    assert!(app
        .auth()
        .login("mia@example.com", STRONG_PASSWORD, &ClientInfo::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn federated_sign_in_rejects_unknown_token_and_deleted_account() {
    let app = TestApp::new();
    assert!(matches!(
        app.auth()
            .federated_sign_in("forged", &ClientInfo::default())
            .await,
        Err(ServiceError::IdentityVerificationFailed)
    ));

    app.register_google_identity("google-token-3", "g-789", "nina@example.com");
    let outcome = app
        .auth()
        .federated_sign_in("google-token-3", &ClientInfo::default())
        .await
        .unwrap();

    let mut user = outcome.user;
    user.soft_delete();
    app.store.save(&user).await.unwrap();

    assert!(matches!(
        app.auth()
            .federated_sign_in("google-token-3", &ClientInfo::default())
            .await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(matches!(
        app.auth().authenticate(&outcome.tokens.access_token).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(matches!(
        app.auth().refresh(&outcome.tokens.refresh_token).await,
        Err(ServiceError::InvalidSession)
    ));
}
