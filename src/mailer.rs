//! Outbound email over SMTP (lettre).

use crate::config::EmailConfig;
use anyhow::{Context, Result};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

pub const EMAIL_SUBJECT: &str = "Extracted Persian Text";

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("SMTP authentication failed: {0}")]
    Auth(String),
    #[error("email delivery failed: {0}")]
    Delivery(String),
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EmailError>;
}

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    /// TLS from the first byte (port 465).
    Implicit,
    /// Plain connect, then mandatory STARTTLS (submission ports 587 and 25).
    StartTls,
}

impl TlsMode {
    fn for_port(port: u16) -> Self {
        match port {
            587 | 25 => Self::StartTls,
            _ => Self::Implicit,
        }
    }
}

/// SMTP relay with the sender's credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config
            .sender
            .parse()
            .with_context(|| format!("EMAIL_ADDRESS is not a valid mailbox: {}", config.sender))?;

        let mode = TlsMode::for_port(config.smtp_port);
        let builder = match mode {
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host),
            TlsMode::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            }
        }
        .with_context(|| format!("Failed to configure SMTP relay {}", config.smtp_host))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender.clone(),
                config.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        debug!(
            "SMTP relay {}:{} ({:?})",
            config.smtp_host, config.smtp_port, mode
        );
        Ok(Self { transport, from })
    }
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EmailError> {
        let recipient: Mailbox = to
            .parse()
            .map_err(|_| EmailError::InvalidAddress(to.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| EmailError::Delivery(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent to {}", to);
                Ok(())
            }
            Err(e) if is_auth_failure(&e) => {
                error!("Authentication error. Please check your email and password: {}", e);
                Err(EmailError::Auth(e.to_string()))
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to, e);
                Err(EmailError::Delivery(e.to_string()))
            }
        }
    }
}

/// 535 is "authentication credentials invalid"; 530 is "authentication required".
fn is_auth_failure(e: &lettre::transport::smtp::Error) -> bool {
    e.status()
        .map(|code| matches!(code.to_string().as_str(), "530" | "534" | "535"))
        .unwrap_or(false)
}
