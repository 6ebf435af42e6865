//! Verification of externally issued identity tokens.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Identity asserted by a verified provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub external_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity token rejected: {0}")]
    Rejected(String),

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct GoogleTokenInfo {
    sub: String,
    email: Option<String>,
    /// Google returns this as the string "true" or "false".
    email_verified: Option<String>,
    name: Option<String>,
    picture: Option<String>,
    aud: String,
    iss: String,
}

/// Verifies Google ID tokens against the tokeninfo endpoint.
#[derive(Clone)]
pub struct GoogleIdentityProvider {
    client: reqwest::Client,
    client_id: String,
}

impl GoogleIdentityProvider {
    pub fn new(client_id: String) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, client_id })
    }

    fn check(&self, info: GoogleTokenInfo) -> Result<FederatedIdentity, IdentityError> {
        if self.client_id.is_empty() || info.aud != self.client_id {
            return Err(IdentityError::Rejected("audience mismatch".into()));
        }
        if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
            return Err(IdentityError::Rejected("unexpected issuer".into()));
        }
        let email = info
            .email
            .ok_or_else(|| IdentityError::Rejected("token carries no email".into()))?;
        if info.email_verified.as_deref() != Some("true") {
            return Err(IdentityError::Rejected("email not verified".into()));
        }

        Ok(FederatedIdentity {
            external_id: info.sub,
            email,
            name: info.name,
            avatar_url: info.picture,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity, IdentityError> {
        let res = self
            .client
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to reach Google tokeninfo");
                IdentityError::Unavailable(e.to_string())
            })?;

        let status = res.status();
        if status.is_client_error() {
            return Err(IdentityError::Rejected(format!("tokeninfo returned {}", status)));
        }
        if !status.is_success() {
            tracing::error!(status = %status, "Google tokeninfo error");
            return Err(IdentityError::Unavailable(format!(
                "tokeninfo returned {}",
                status
            )));
        }

        let info: GoogleTokenInfo = res.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Google tokeninfo response");
            IdentityError::Unavailable(e.to_string())
        })?;

        self.check(info)
    }
}

/// Fixed token-to-identity table.
#[derive(Default)]
pub struct MockIdentityProvider {
    identities: Mutex<HashMap<String, FederatedIdentity>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id_token: &str, identity: FederatedIdentity) {
        if let Ok(mut identities) = self.identities.lock() {
            identities.insert(id_token.to_string(), identity);
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity, IdentityError> {
        self.identities
            .lock()
            .ok()
            .and_then(|identities| identities.get(id_token).cloned())
            .ok_or_else(|| IdentityError::Rejected("unknown token".into()))
    }
}
