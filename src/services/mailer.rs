// src/services/mailer.rs

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("SMTP is not configured")]
    NotConfigured,

    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Invalid attachment: {0}")]
    Attachment(String),
}

#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl MailAttachment {
    pub fn pdf(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: "application/pdf",
            bytes,
        }
    }
}

/// A rendered email: both a plain-text and an HTML body, plus attachments.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<MailAttachment>,
}

/// Mail transport seam. Handlers and services only see this trait.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

pub type SharedMailer = Arc<dyn Mailer>;

/// SMTP delivery through lettre's tokio transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Port 465 uses implicit TLS, every other port STARTTLS.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.pass.clone()))
            .build();

        Ok(Self {
            transport,
            from: config.from.parse()?,
        })
    }

    fn build_message(&self, mail: OutgoingMail) -> Result<Message, MailError> {
        let body = MultiPart::alternative_plain_html(mail.text, mail.html);

        let body = if mail.attachments.is_empty() {
            body
        } else {
            let mut mixed = MultiPart::mixed().multipart(body);
            for attachment in mail.attachments {
                let content_type = ContentType::parse(attachment.content_type)
                    .map_err(|e| MailError::Attachment(e.to_string()))?;
                mixed = mixed.singlepart(
                    Attachment::new(attachment.file_name).body(attachment.bytes, content_type),
                );
            }
            mixed
        };

        Ok(Message::builder()
            .from(self.from.clone())
            .to(mail.to.parse()?)
            .subject(mail.subject)
            .multipart(body)?)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let to = mail.to.clone();
        let message = self.build_message(mail)?;
        self.transport.send(message).await?;
        tracing::info!("Mail sent to {}", to);
        Ok(())
    }
}

/// Stand-in used when SMTP settings are missing: every send fails and the
/// caller logs it like any other delivery failure.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        tracing::debug!("Dropping mail to {} ({})", mail.to, mail.subject);
        Err(MailError::NotConfigured)
    }
}

/// Picks the SMTP transport when configured, the disabled one otherwise.
pub fn build_mailer(smtp: Option<&SmtpConfig>) -> SharedMailer {
    match smtp.map(SmtpMailer::new) {
        Some(Ok(mailer)) => Arc::new(mailer),
        Some(Err(e)) => {
            tracing::error!("Invalid SMTP configuration, mail disabled: {}", e);
            Arc::new(DisabledMailer)
        }
        None => Arc::new(DisabledMailer),
    }
}
