//! Outbound mail transports.
//!
//! [`MailDispatcher`] is the seam the notifier sends through. Three backends:
//! - [`SmtpMailer`]: `lettre` async SMTP
//! - [`HttpRelayMailer`]: JSON POST to an HTTP mail relay
//! - [`ConsoleMailer`]: logs the message and sends nothing
//!
//! Every message is a single batch: the sender is the visible `To` and all
//! recipients go in `Bcc`, so subscribers never see each other's addresses.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{MailBackend, MailConfig};

/// Transport-level timeout for the HTTP relay. The notifier applies its own,
/// usually shorter, dispatch timeout on top.
const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid email address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The relay answered with a non-success status
    #[error("Mail relay rejected message: status {0}")]
    Rejected(u16),

    #[error("Insecure relay URL: HTTPS required (except localhost for testing)")]
    InsecureRelayUrl,

    #[error("Invalid relay URL: {0}")]
    InvalidRelayUrl(#[from] url::ParseError),

    #[error("Mail backend misconfigured: {0}")]
    Config(String),
}

// ============================================================================
// Message + Dispatcher trait
// ============================================================================

/// One outgoing message addressed to a batch of recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub recipients: Vec<String>,
}

#[async_trait]
pub trait MailDispatcher: Send + Sync {
    /// Deliver `mail` in a single attempt.
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Build the dispatcher selected by `[mail] backend`.
pub fn build_dispatcher(config: &MailConfig) -> Result<Arc<dyn MailDispatcher>, MailError> {
    match config.backend {
        MailBackend::Console => Ok(Arc::new(ConsoleMailer)),
        MailBackend::Smtp => {
            let host = config
                .smtp_host
                .as_deref()
                .ok_or_else(|| MailError::Config("smtp_host is not set".into()))?;
            let credentials = match (&config.smtp_user, config.smtp_password()) {
                (Some(user), Some(password)) => Some((user.clone(), password)),
                (Some(_), None) => {
                    tracing::warn!("smtp_user set without a password, connecting unauthenticated");
                    None
                }
                _ => None,
            };
            Ok(Arc::new(SmtpMailer::new(host, config.smtp_port, credentials)?))
        }
        MailBackend::Http => {
            let relay = config
                .relay_url
                .as_deref()
                .ok_or_else(|| MailError::Config("relay_url is not set".into()))?;
            let client = reqwest::Client::builder()
                .timeout(RELAY_TIMEOUT)
                .build()?;
            Ok(Arc::new(HttpRelayMailer::new(client, relay)?))
        }
    }
}

// ============================================================================
// SMTP
// ============================================================================

pub struct SmtpMailer {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl SmtpMailer {
    /// Port 465 uses implicit TLS; any other port upgrades with STARTTLS.
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<(String, SecretString)>,
    ) -> Result<Self, MailError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, Tokio1Executor};

        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
        }
        .port(port);

        if let Some((user, password)) = credentials {
            builder = builder.credentials(Credentials::new(
                user,
                password.expose_secret().to_string(),
            ));
        }

        tracing::debug!(host = %host, port = port, "SMTP transport configured");
        Ok(Self {
            transport: builder.build(),
        })
    }
}

fn parse_mailbox(address: &str) -> Result<lettre::message::Mailbox, MailError> {
    address.parse().map_err(|source| MailError::Address {
        address: address.to_string(),
        source,
    })
}

/// Assemble the MIME message: visible `To` is the sender, recipients are `Bcc`.
///
/// A recipient lettre cannot parse is dropped with a warning so the rest of
/// the batch still goes out. An unparseable sender fails the whole message.
fn build_message(mail: &OutgoingMail) -> Result<lettre::Message, MailError> {
    use lettre::message::header::ContentType;

    let from = parse_mailbox(&mail.from)?;
    let mut builder = lettre::Message::builder()
        .from(from.clone())
        .to(from)
        .subject(mail.subject.as_str())
        .header(ContentType::TEXT_PLAIN);
    let mut accepted = 0;
    for recipient in &mail.recipients {
        match parse_mailbox(recipient) {
            Ok(mailbox) => {
                builder = builder.bcc(mailbox);
                accepted += 1;
            }
            Err(e) => tracing::warn!(error = %e, "Skipping undeliverable recipient"),
        }
    }
    if accepted == 0 && !mail.recipients.is_empty() {
        return Err(MailError::Build("no deliverable recipients".into()));
    }
    builder
        .body(mail.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl MailDispatcher for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        use lettre::AsyncTransport;

        let message = build_message(mail)?;
        self.transport.send(message).await?;
        tracing::info!(
            recipients = mail.recipients.len(),
            subject = %mail.subject,
            "Mail sent via SMTP"
        );
        Ok(())
    }
}

// ============================================================================
// HTTP relay
// ============================================================================

pub struct HttpRelayMailer {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpRelayMailer {
    /// Create a relay client. Plain HTTP is accepted only for localhost.
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self, MailError> {
        let endpoint = url::Url::parse(endpoint)?;
        match endpoint.scheme() {
            "https" => {}
            "http" if matches!(endpoint.host_str(), Some("localhost" | "127.0.0.1")) => {
                tracing::warn!(
                    relay_url = %endpoint,
                    "Using non-HTTPS mail relay (localhost only)"
                );
            }
            _ => {
                tracing::error!(relay_url = %endpoint, "Rejecting non-HTTPS mail relay URL");
                return Err(MailError::InsecureRelayUrl);
            }
        }
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl MailDispatcher for HttpRelayMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(mail)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Mail relay returned error status");
            return Err(MailError::Rejected(status.as_u16()));
        }

        tracing::info!(
            recipients = mail.recipients.len(),
            subject = %mail.subject,
            "Mail accepted by relay"
        );
        Ok(())
    }
}

// ============================================================================
// Console
// ============================================================================

/// Development backend: writes the message to the log instead of sending it.
pub struct ConsoleMailer;

#[async_trait]
impl MailDispatcher for ConsoleMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        tracing::info!(
            from = %mail.from,
            recipients = ?mail.recipients,
            subject = %mail.subject,
            "Mail (console backend)"
        );
        tracing::debug!(body = %mail.body, "Mail body");
        Ok(())
    }
}
