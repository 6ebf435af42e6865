use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::Role;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Invalid token")]
    Malformed,

    #[error("Token expired")]
    Expired,

    #[error("Wrong token type")]
    WrongType,

    #[error("{0} signing secret is not configured")]
    MissingSecret(&'static str),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Wire claims shared by both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    #[serde(rename = "type")]
    token_type: TokenType,
    exp: i64,
    iat: i64,
    /// Unique per token, so two tokens issued in the same second still differ.
    jti: String,
}

/// Verified claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: i64,
    pub jti: String,
}

/// Verified claims of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenClaims {
    pub sub: Uuid,
    pub exp: i64,
    pub jti: String,
}

/// Freshly issued access and refresh tokens.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub refresh_expires_utc: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ExpiryOnly {
    exp: i64,
}

/// HS256 token codec with independent access and refresh secrets.
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, TokenError> {
        let access = config.access_secret.expose_secret();
        let refresh = config.refresh_secret.expose_secret();
        if access.is_empty() {
            return Err(TokenError::MissingSecret("Access"));
        }
        if refresh.is_empty() {
            return Err(TokenError::MissingSecret("Refresh"));
        }

        Ok(Self {
            access_encoding: EncodingKey::from_secret(access.as_bytes()),
            access_decoding: DecodingKey::from_secret(access.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh.as_bytes()),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    pub fn issue_access(&self, user_id: Uuid, role: Role) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role: Some(role),
            token_type: TokenType::Access,
            exp: (now + self.access_ttl()).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        sign(&claims, &self.access_encoding)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role: None,
            token_type: TokenType::Refresh,
            exp: (now + self.refresh_ttl()).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        sign(&claims, &self.refresh_encoding)
    }

    pub fn issue_pair(&self, user_id: Uuid, role: Role) -> Result<TokenPair, TokenError> {
        let access_token = self.issue_access(user_id, role)?;
        let refresh_token = self.issue_refresh(user_id)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_token_expiry_seconds(),
            refresh_expires_utc: self.refresh_expires_at(),
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let claims = verify(token, &self.access_decoding, TokenType::Access)?;
        let role = claims.role.ok_or(TokenError::Malformed)?;
        Ok(AccessTokenClaims {
            sub: parse_subject(&claims.sub)?,
            role,
            exp: claims.exp,
            jti: claims.jti,
        })
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, TokenError> {
        let claims = verify(token, &self.refresh_decoding, TokenType::Refresh)?;
        Ok(RefreshTokenClaims {
            sub: parse_subject(&claims.sub)?,
            exp: claims.exp,
            jti: claims.jti,
        })
    }

    /// Best-effort expiry read without signature verification.
    ///
    /// Only sizes blacklist entries. Undecodable tokens get now plus the
    /// access lifetime, which is never earlier than a real access token's
    /// expiry.
    pub fn expiry_of(&self, token: &str) -> DateTime<Utc> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<ExpiryOnly>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .and_then(|data| DateTime::from_timestamp(data.claims.exp, 0))
            .unwrap_or_else(|| Utc::now() + self.access_ttl())
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    /// Absolute expiry of a refresh token issued now.
    pub fn refresh_expires_at(&self) -> DateTime<Utc> {
        Utc::now() + self.refresh_ttl()
    }

    fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_expiry_days)
    }

    fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_token_expiry_minutes)
    }
}

fn sign(claims: &Claims, key: &EncodingKey) -> Result<String, TokenError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| TokenError::Signing(e.to_string()))
}

fn verify(token: &str, key: &DecodingKey, expected: TokenType) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    })?;

    if data.claims.token_type != expected {
        return Err(TokenError::WrongType);
    }
    Ok(data.claims)
}

fn parse_subject(sub: &str) -> Result<Uuid, TokenError> {
    Uuid::parse_str(sub).map_err(|_| TokenError::Malformed)
}
