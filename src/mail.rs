//! Outbound email: one [`Mailer`] capability, one implementation per
//! transport, picked from [`MailConfig`] at start-up.

use std::sync::Arc;

use anyhow::Context;
use axum::async_trait;
use lazy_static::lazy_static;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use regex::Regex;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::config::{MailConfig, MailTransport};

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
    /// The call-to-action URL embedded in `html`.
    pub link: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> anyhow::Result<()>;
}

pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    let mailer: Arc<dyn Mailer> = match &cfg.transport {
        MailTransport::SendGrid { api_key } => {
            Arc::new(SendGridMailer::new(api_key.clone(), &cfg.from))
        }
        MailTransport::Smtp {
            host,
            port,
            username,
            password,
        } => Arc::new(SmtpMailer::new(
            host,
            *port,
            username.clone().zip(password.clone()),
            &cfg.from,
        )?),
        MailTransport::Log => Arc::new(LogMailer),
        MailTransport::Disabled => {
            warn!("no mail transport configured; verification and reset emails will fail");
            Arc::new(DisabledMailer)
        }
    };
    Ok(mailer)
}

/// Splits `"Name <addr>"` into its parts; a bare address gets the default name.
fn split_sender(from: &str) -> (String, String) {
    lazy_static! {
        static ref SENDER_RE: Regex = Regex::new(r"^\s*([^<]*?)\s*<([^>]+)>\s*$").unwrap();
    }
    match SENDER_RE.captures(from) {
        Some(c) => {
            let name = c[1].trim();
            let name = if name.is_empty() { "LawPal" } else { name };
            (name.to_string(), c[2].trim().to_string())
        }
        None => ("LawPal".to_string(), from.trim().to_string()),
    }
}

pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    from_name: String,
    from_email: String,
}

impl SendGridMailer {
    pub fn new(api_key: String, from: &str) -> Self {
        let (from_name, from_email) = split_sender(from);
        Self {
            client: reqwest::Client::new(),
            api_key,
            from_name,
            from_email,
        }
    }

    fn payload(&self, email: &Email) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [{ "email": email.to }], "subject": email.subject }],
            "from": { "email": self.from_email, "name": self.from_name },
            "content": [{ "type": "text/html", "value": email.html }],
        })
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        let res = self
            .client
            .post(SENDGRID_URL)
            .bearer_auth(&self.api_key)
            .json(&self.payload(email))
            .send()
            .await
            .context("sendgrid request")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("SendGrid API failed: {} - {}", status.as_u16(), body);
        }
        info!("email sent via sendgrid");
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<(String, String)>,
        from: &str,
    ) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("smtp relay")?
            .port(port);
        if let Some((user, pass)) = credentials {
            builder = builder.credentials(Credentials::new(user, pass));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.parse().context("invalid MAIL_FROM")?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse().context("invalid recipient")?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .context("build email")?;
        self.transport.send(message).await.context("smtp send")?;
        info!("email sent via smtp");
        Ok(())
    }
}

/// Local development transport: the link ends up in the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, link = %email.link, "email (log transport)");
        Ok(())
    }
}

pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: &Email) -> anyhow::Result<()> {
        anyhow::bail!("mail transport not configured")
    }
}

fn button_email(to: &str, subject: &str, heading: &str, intro: &str, label: &str, link: &str) -> Email {
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; line-height: 1.6; color: #111">
    <h2>{heading}</h2>
    <p>{intro}</p>
    <p>
      <a href="{link}" style="display:inline-block;padding:10px 16px;background:#2563eb;color:#fff;border-radius:8px;text-decoration:none">{label}</a>
    </p>
    <p>If the button doesn't work, copy and paste this link into your browser:</p>
    <p style="word-break: break-all;">{link}</p>
    <p style="color:#666">If you didn't request this, you can ignore this email.</p>
  </div>"#
    );
    Email {
        to: to.to_string(),
        subject: subject.to_string(),
        html,
        link: link.to_string(),
    }
}

pub fn verification_email(to: &str, frontend_url: &str, token: &str) -> Email {
    let link = format!("{frontend_url}/#/signup?token={token}");
    button_email(
        to,
        "Verify your LawPal account",
        "Verify your email",
        "Welcome to LawPal! Please verify your email address to activate your account.",
        "Verify Email",
        &link,
    )
}

pub fn password_reset_email(to: &str, frontend_url: &str, token: &str) -> Email {
    let link = format!("{frontend_url}/#/reset-password?token={token}");
    button_email(
        to,
        "Reset your LawPal password",
        "Reset your password",
        "We received a request to reset your LawPal password. If this was you, click the button below.",
        "Reset Password",
        &link,
    )
}
