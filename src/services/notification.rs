//! Invoice delivery by email
//!
//! `NotificationDispatcher::send` never fails past its boundary: every problem is
//! logged and reported as `false`, so delivery can never affect order or payment state.

use crate::config::MailConfig;
use crate::logging::mask_email;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("mail transport is not configured")]
    NotConfigured,

    #[error("invalid email address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("could not read attachment {path}: {message}")]
    Attachment { path: String, message: String },

    #[error("could not build message: {0}")]
    Build(String),

    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Transport-independent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachment: Option<MailAttachment>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: OutgoingMail) -> Result<(), NotificationError>;
}

/// SMTP with STARTTLS and login, built once from `MailConfig`
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailTransport {
    pub fn new(config: &MailConfig) -> Result<Self, NotificationError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::InvalidAddress {
                address: config.from.clone(),
                message: e.to_string(),
            })?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| NotificationError::Transport(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { mailer, from })
    }

    fn build_message(&self, mail: OutgoingMail) -> Result<Message, NotificationError> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .map_err(|e| NotificationError::InvalidAddress {
                address: mail.to.clone(),
                message: e.to_string(),
            })?;

        let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
            mail.text_body,
            mail.html_body,
        ));

        if let Some(attachment) = mail.attachment {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| NotificationError::Build(e.to_string()))?;
            body = body.singlepart(
                Attachment::new(attachment.file_name).body(attachment.bytes, content_type),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .multipart(body)
            .map_err(|e| NotificationError::Build(e.to_string()))
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, mail: OutgoingMail) -> Result<(), NotificationError> {
        let message = self.build_message(mail)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Used when no SMTP server is configured
pub struct DisabledMailTransport;

#[async_trait]
impl MailTransport for DisabledMailTransport {
    async fn deliver(&self, _mail: OutgoingMail) -> Result<(), NotificationError> {
        Err(NotificationError::NotConfigured)
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    company_name: String,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn MailTransport>, company_name: impl Into<String>) -> Self {
        Self {
            transport,
            company_name: company_name.into(),
        }
    }

    /// SMTP when configured, otherwise a transport that reports every send as failed
    pub fn from_config(mail: Option<&MailConfig>, company_name: impl Into<String>) -> Self {
        let transport: Arc<dyn MailTransport> = match mail {
            Some(config) => match SmtpMailTransport::new(config) {
                Ok(smtp) => Arc::new(smtp),
                Err(e) => {
                    error!(error = %e, "❌ Invalid mail configuration, invoice emails disabled");
                    Arc::new(DisabledMailTransport)
                }
            },
            None => {
                warn!("MAIL_SERVER not set, invoice emails disabled");
                Arc::new(DisabledMailTransport)
            }
        };
        Self::new(transport, company_name)
    }

    /// Email the invoice at `document_path` to `recipient_email`
    pub async fn send(&self, recipient_email: &str, invoice_number: &str, document_path: &Path) -> bool {
        match self.try_send(recipient_email, invoice_number, document_path).await {
            Ok(()) => {
                info!(
                    invoice_number = %invoice_number,
                    recipient = %mask_email(recipient_email),
                    "📧 Invoice email sent"
                );
                true
            }
            Err(e) => {
                error!(
                    invoice_number = %invoice_number,
                    recipient = %mask_email(recipient_email),
                    error = %e,
                    "Invoice email could not be delivered"
                );
                false
            }
        }
    }

    async fn try_send(
        &self,
        recipient_email: &str,
        invoice_number: &str,
        document_path: &Path,
    ) -> Result<(), NotificationError> {
        if recipient_email.trim().is_empty() || !recipient_email.contains('@') {
            return Err(NotificationError::InvalidAddress {
                address: recipient_email.to_string(),
                message: "missing '@'".to_string(),
            });
        }

        let bytes = tokio::fs::read(document_path)
            .await
            .map_err(|e| NotificationError::Attachment {
                path: document_path.display().to_string(),
                message: e.to_string(),
            })?;

        let mail = self.compose(recipient_email, invoice_number, bytes);
        self.transport.deliver(mail).await
    }

    fn compose(&self, recipient_email: &str, invoice_number: &str, pdf: Vec<u8>) -> OutgoingMail {
        let company = &self.company_name;
        OutgoingMail {
            to: recipient_email.to_string(),
            subject: format!("Your {} Invoice - {}", company, invoice_number),
            text_body: format!(
                "Thank you for your order!\n\n\
                 Your invoice {} is attached to this email.\n\n\
                 {}",
                invoice_number, company
            ),
            html_body: format!(
                "<html><body>\
                 <h2>Thank you for your order!</h2>\
                 <p>Your invoice <strong>{}</strong> is attached to this email.</p>\
                 <p>{}</p>\
                 </body></html>",
                invoice_number, company
            ),
            attachment: Some(MailAttachment {
                file_name: format!("Invoice_{}.pdf", invoice_number),
                content_type: "application/pdf".to_string(),
                bytes: pdf,
            }),
        }
    }
}
