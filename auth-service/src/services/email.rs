use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Outbound messages the auth flows send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTemplate {
    Verification { name: Option<String>, token: String },
    PasswordReset { name: Option<String>, token: String },
    Welcome { name: Option<String> },
}

/// Rendered message parts.
pub struct RenderedEmail {
    pub subject: &'static str,
    pub plain_body: String,
    pub html_body: String,
}

impl EmailTemplate {
    pub fn kind(&self) -> &'static str {
        match self {
            EmailTemplate::Verification { .. } => "verification",
            EmailTemplate::PasswordReset { .. } => "password_reset",
            EmailTemplate::Welcome { .. } => "welcome",
        }
    }

    pub fn render(&self, frontend_url: &str) -> RenderedEmail {
        let base = frontend_url.trim_end_matches('/');
        match self {
            EmailTemplate::Verification { name, token } => {
                let link = format!("{}/verify-email/{}", base, token);
                RenderedEmail {
                    subject: "Verify Your Email",
                    plain_body: format!(
                        "Hi {},\n\nPlease verify your email address by visiting:\n\n{}\n\nThis link expires in 24 hours.",
                        greeting(name),
                        link
                    ),
                    html_body: action_html(
                        &greeting(name),
                        "Please verify your email address.",
                        &link,
                        "Verify Email",
                        "This link expires in 24 hours.",
                    ),
                }
            }
            EmailTemplate::PasswordReset { name, token } => {
                let link = format!("{}/reset-password/{}", base, token);
                RenderedEmail {
                    subject: "Reset Your Password",
                    plain_body: format!(
                        "Hi {},\n\nWe received a request to reset your password. Set a new one at:\n\n{}\n\nThis link expires in 1 hour. If you didn't request this, ignore this email.",
                        greeting(name),
                        link
                    ),
                    html_body: action_html(
                        &greeting(name),
                        "We received a request to reset your password.",
                        &link,
                        "Reset Password",
                        "This link expires in 1 hour. If you didn't request this, ignore this email.",
                    ),
                }
            }
            EmailTemplate::Welcome { name } => RenderedEmail {
                subject: "Welcome!",
                plain_body: format!(
                    "Hi {},\n\nWelcome aboard! Your account is ready.",
                    greeting(name)
                ),
                html_body: format!(
                    r#"<html><body style="font-family: Arial, sans-serif;"><h2>Welcome!</h2><p>Hi {},</p><p>Your account is ready.</p></body></html>"#,
                    greeting(name)
                ),
            },
        }
    }
}

fn greeting(name: &Option<String>) -> String {
    name.as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("there")
        .to_string()
}

fn action_html(greeting: &str, intro: &str, link: &str, label: &str, footer: &str) -> String {
    format!(
        r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <p>Hi {greeting},</p>
        <p>{intro}</p>
        <p>
            <a href="{link}" style="background-color: #2563eb; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">{label}</a>
        </p>
        <p style="color: #666; font-size: 12px;">{footer}</p>
    </body>
</html>"#
    )
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, to_email: &str, template: EmailTemplate) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
    frontend_url: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let mut builder = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)));

        if !config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.user.clone(),
                config.password.expose_secret().clone(),
            ));
        }

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer: builder.build(),
            from_email: config.from.clone(),
            frontend_url: config.frontend_url.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send(&self, to_email: &str, template: EmailTemplate) -> Result<(), AppError> {
        let rendered = template.render(&self.frontend_url);

        let email = Message::builder()
            .from(self.from_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .subject(rendered.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(rendered.plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(rendered.html_body),
                    ),
            )?;

        // Send email in blocking thread pool to avoid blocking async runtime
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(kind = template.kind(), "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, kind = template.kind(), "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

/// Records sends instead of delivering them.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<(String, EmailTemplate)>>,
    fail: bool,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, EmailTemplate)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Token of the most recent message of the given kind sent to `to_email`.
    pub fn last_token(&self, to_email: &str, kind: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .filter(|(to, t)| to == to_email && t.kind() == kind)
            .find_map(|(_, t)| match t {
                EmailTemplate::Verification { token, .. }
                | EmailTemplate::PasswordReset { token, .. } => Some(token),
                EmailTemplate::Welcome { .. } => None,
            })
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send(&self, to_email: &str, template: EmailTemplate) -> Result<(), AppError> {
        if self.fail {
            return Err(AppError::EmailError("mock mailer is down".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to_email.to_string(), template));
        }
        Ok(())
    }
}
