use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub lockout: LockoutConfig,
    pub blacklist: BlacklistConfig,
    pub smtp: SmtpConfig,
    pub google: GoogleConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: SecretString,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_sessions_per_user: usize,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub lock_duration_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct BlacklistConfig {
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub from: String,
    /// Base URL used to build verification and reset links.
    pub frontend_url: String,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
    pub email_verification_attempts: u32,
    pub email_verification_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        common_config.shutdown_grace_seconds =
            parse_env("SHUTDOWN_GRACE_SECONDS", common_config.shutdown_grace_seconds)?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_secret("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redis: env::var("REDIS_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|url| RedisConfig {
                    url: SecretString::new(url),
                }),
            jwt: JwtConfig {
                access_secret: get_secret("JWT_ACCESS_SECRET", None, is_prod)?,
                refresh_secret: get_secret("JWT_REFRESH_SECRET", None, is_prod)?,
                access_token_expiry_minutes: parse_env("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", 15)?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", 30)?,
            },
            session: SessionConfig {
                max_sessions_per_user: parse_env("SESSION_MAX_PER_USER", 3)?,
            },
            lockout: LockoutConfig {
                max_attempts: parse_env("LOCKOUT_MAX_ATTEMPTS", 5)?,
                lock_duration_minutes: parse_env("LOCKOUT_DURATION_MINUTES", 120)?,
            },
            blacklist: BlacklistConfig {
                sweep_interval_seconds: parse_env("BLACKLIST_SWEEP_INTERVAL_SECONDS", 900)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", 587)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_secret("SMTP_PASSWORD", Some(""), is_prod)?,
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
                frontend_url: get_env("FRONTEND_URL", Some("http://localhost:3000"), is_prod)?,
            },
            google: GoogleConfig {
                client_id: get_env("GOOGLE_CLIENT_ID", Some(""), false)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", 10)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", 60)?,
                register_attempts: parse_env("RATE_LIMIT_REGISTER_ATTEMPTS", 5)?,
                register_window_seconds: parse_env("RATE_LIMIT_REGISTER_WINDOW_SECONDS", 3600)?,
                password_reset_attempts: parse_env("RATE_LIMIT_PASSWORD_RESET_ATTEMPTS", 3)?,
                password_reset_window_seconds: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    3600,
                )?,
                email_verification_attempts: parse_env("RATE_LIMIT_EMAIL_VERIFICATION_ATTEMPTS", 5)?,
                email_verification_window_seconds: parse_env(
                    "RATE_LIMIT_EMAIL_VERIFICATION_WINDOW_SECONDS",
                    3600,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", 100)?,
                global_ip_window_seconds: parse_env("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", 60)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Local-development settings with the given signing secrets and no
    /// external collaborators configured.
    pub fn development(access_secret: &str, refresh_secret: &str) -> Self {
        AuthConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "auth-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: SecretString::new("postgres://localhost/auth".to_string()),
                max_connections: 10,
            },
            redis: None,
            jwt: JwtConfig {
                access_secret: SecretString::new(access_secret.to_string()),
                refresh_secret: SecretString::new(refresh_secret.to_string()),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 30,
            },
            session: SessionConfig {
                max_sessions_per_user: 3,
            },
            lockout: LockoutConfig {
                max_attempts: 5,
                lock_duration_minutes: 120,
            },
            blacklist: BlacklistConfig {
                sweep_interval_seconds: 900,
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 587,
                user: String::new(),
                password: SecretString::new(String::new()),
                from: "no-reply@localhost".to_string(),
                frontend_url: "http://localhost:3000".to_string(),
            },
            google: GoogleConfig {
                client_id: String::new(),
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            rate_limit: RateLimitConfig {
                login_attempts: 10,
                login_window_seconds: 60,
                register_attempts: 5,
                register_window_seconds: 3600,
                password_reset_attempts: 3,
                password_reset_window_seconds: 3600,
                email_verification_attempts: 5,
                email_verification_window_seconds: 3600,
                global_ip_limit: 100,
                global_ip_window_seconds: 60,
            },
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        let access = self.jwt.access_secret.expose_secret();
        let refresh = self.jwt.refresh_secret.expose_secret();
        if access.is_empty() || refresh.is_empty() {
            return Err(config_error(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must be set",
            ));
        }
        if access == refresh {
            return Err(config_error(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ",
            ));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(config_error(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive",
            ));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(config_error("JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"));
        }

        // A revoked access token must not outlive a sweep period unnoticed.
        let sweep = self.blacklist.sweep_interval_seconds;
        if sweep == 0 || sweep as i64 > self.jwt.access_token_expiry_minutes * 60 {
            return Err(config_error(
                "BLACKLIST_SWEEP_INTERVAL_SECONDS must be positive and at most the access token lifetime",
            ));
        }

        if self.session.max_sessions_per_user == 0 {
            return Err(config_error("SESSION_MAX_PER_USER must be at least 1"));
        }

        if self.lockout.max_attempts == 0 {
            return Err(config_error("LOCKOUT_MAX_ATTEMPTS must be at least 1"));
        }

        if self.lockout.lock_duration_minutes <= 0 {
            return Err(config_error("LOCKOUT_DURATION_MINUTES must be positive"));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error(
                    "Wildcard CORS origin not allowed in production",
                ));
            }

            if self.google.client_id.is_empty() {
                tracing::warn!("GOOGLE_CLIENT_ID is not set; Google sign-in will reject every token");
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_secret(key: &str, default: Option<&str>, is_prod: bool) -> Result<SecretString, AppError> {
    get_env(key, default, is_prod).map(SecretString::new)
}

/// Tunables: optional in every environment, but malformed values are fatal.
fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> AuthConfig {
        AuthConfig::development("access-secret-for-tests", "refresh-secret-for-tests")
    }

    #[test]
    fn development_config_is_valid() {
        assert!(dev().validate().is_ok());
    }

    #[test]
    fn rejects_shared_secret() {
        let config = AuthConfig::development("same", "same");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn rejects_empty_secret() {
        let config = AuthConfig::development("", "refresh");
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_ttls() {
        let mut config = dev();
        config.jwt.access_token_expiry_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = dev();
        config.jwt.refresh_token_expiry_days = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sweep_interval_bounded_by_access_ttl() {
        let mut config = dev();
        config.blacklist.sweep_interval_seconds = 15 * 60;
        assert!(config.validate().is_ok());

        config.blacklist.sweep_interval_seconds = 15 * 60 + 1;
        assert!(config.validate().is_err());

        config.blacklist.sweep_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_session_cap_and_threshold() {
        let mut config = dev();
        config.session.max_sessions_per_user = 0;
        assert!(config.validate().is_err());

        let mut config = dev();
        config.lockout.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn prod_rejects_wildcard_origin() {
        let mut config = dev();
        config.environment = Environment::Prod;
        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }
}
