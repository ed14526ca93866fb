use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_days: i64,
}

/// Which outbound transport delivers verification and reset emails.
#[derive(Debug, Clone)]
pub enum MailTransport {
    SendGrid {
        api_key: String,
    },
    Smtp {
        host: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    },
    /// Logs the message instead of sending it.
    Log,
    /// Nothing configured: every send fails.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from: String,
    pub transport: MailTransport,
}

/// Uploaded files live below `root` and are served under `/uploads`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    pub google: Option<OAuthClientConfig>,
    pub github: Option<OAuthClientConfig>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// `APP_HOST:APP_PORT`.
    pub bind_addr: String,
    pub jwt: JwtConfig,
    /// Allowed SPA origins; the first one is used to build links.
    pub frontend_urls: Vec<String>,
    /// Echo verification/reset tokens in API responses (development only).
    pub expose_dev_tokens: bool,
    pub mail: MailConfig,
    pub storage: StorageConfig,
    pub oauth: OAuthConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "lawpal".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "lawpal-users".into()),
            ttl_days: std::env::var("JWT_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(7),
        };
        let frontend_urls = parse_frontend_urls(
            &std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".into()),
        );
        let expose_dev_tokens = std::env::var("APP_ENV")
            .map(|v| v == "development")
            .unwrap_or(false);

        let bind_addr = format!(
            "{}:{}",
            var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            var("APP_PORT").unwrap_or_else(|| "5000".into())
        );

        Ok(Self {
            database_url,
            bind_addr,
            jwt,
            frontend_urls,
            expose_dev_tokens,
            mail: mail_from_env()?,
            storage: StorageConfig {
                root: var("UPLOADS_DIR").unwrap_or_else(|| "uploads".into()).into(),
            },
            oauth: OAuthConfig {
                google: oauth_client_from_env("GOOGLE", "http://localhost:5000/auth/google/callback"),
                github: oauth_client_from_env("GITHUB", "http://localhost:5000/auth/github/callback"),
            },
        })
    }

    /// Base URL used in verification, reset and OAuth redirect links.
    pub fn frontend_url(&self) -> &str {
        self.frontend_urls
            .first()
            .map(String::as_str)
            .unwrap_or("http://localhost:5173")
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn parse_frontend_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn mail_from_env() -> anyhow::Result<MailConfig> {
    let from = var("MAIL_FROM").unwrap_or_else(|| "LawPal <no-reply@lawpal.app>".into());
    let smtp = || -> anyhow::Result<MailTransport> {
        Ok(MailTransport::Smtp {
            host: var("SMTP_HOST").context("SMTP_HOST is not set")?,
            port: var("SMTP_PORT")
                .map(|p| p.parse::<u16>())
                .transpose()
                .context("SMTP_PORT is not a valid port")?
                .unwrap_or(587),
            username: var("SMTP_USERNAME"),
            password: var("SMTP_PASSWORD"),
        })
    };

    let transport = match var("MAIL_TRANSPORT").as_deref() {
        Some("sendgrid") => MailTransport::SendGrid {
            api_key: var("SENDGRID_API_KEY").context("SENDGRID_API_KEY is not set")?,
        },
        Some("smtp") => smtp()?,
        Some("log") => MailTransport::Log,
        Some(other) => anyhow::bail!("unknown MAIL_TRANSPORT {other:?}"),
        None => match (var("SENDGRID_API_KEY"), var("SMTP_HOST")) {
            (Some(api_key), _) => MailTransport::SendGrid { api_key },
            (None, Some(_)) => smtp()?,
            (None, None) => MailTransport::Disabled,
        },
    };
    Ok(MailConfig { from, transport })
}

fn oauth_client_from_env(prefix: &str, default_callback: &str) -> Option<OAuthClientConfig> {
    Some(OAuthClientConfig {
        client_id: var(&format!("{prefix}_CLIENT_ID"))?,
        client_secret: var(&format!("{prefix}_CLIENT_SECRET"))?,
        callback_url: var(&format!("{prefix}_CALLBACK_URL"))
            .unwrap_or_else(|| default_callback.to_string()),
    })
}
