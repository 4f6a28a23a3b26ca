//! Verification e-mail delivery

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::SmtpSettings;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// Channel that delivers verification codes to new account holders.
#[async_trait]
pub trait VerificationMailer: Send + Sync {
    async fn send_verification(
        &self,
        email: &str,
        fullname: &str,
        code: &str,
        valid_for: chrono::Duration,
    ) -> Result<(), MailError>;
}

fn validity_text(valid_for: chrono::Duration) -> String {
    if valid_for.num_hours() >= 1 && valid_for.num_minutes() % 60 == 0 {
        format!("{} hours", valid_for.num_hours())
    } else {
        format!("{} minutes", valid_for.num_minutes())
    }
}

/// SMTP delivery through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Port 465 uses implicit TLS, port 25 plain SMTP, anything else STARTTLS.
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| MailError::Address(format!("{}: {}", settings.from, e)))?;

        let builder = match settings.port {
            465 => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
            25 => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
        }
        .port(settings.port);

        let builder = match (&settings.user, &settings.password) {
            // App passwords are often pasted with spaces
            (Some(user), Some(password)) => builder.credentials(Credentials::new(
                user.clone(),
                password.split_whitespace().collect(),
            )),
            _ => builder,
        };

        tracing::info!(host = %settings.host, port = settings.port, "SMTP mailer initialized");

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl VerificationMailer for SmtpMailer {
    async fn send_verification(
        &self,
        email: &str,
        fullname: &str,
        code: &str,
        valid_for: chrono::Duration,
    ) -> Result<(), MailError> {
        let to: Mailbox = email
            .parse()
            .map_err(|e| MailError::Address(format!("{}: {}", email, e)))?;
        let validity = validity_text(valid_for);

        let plain = format!(
            "Hello {},\n\nYour MedCore verification code is {}.\nIt is valid for {}.\n",
            fullname, code, validity
        );
        let html = format!(
            "<div style=\"font-family:sans-serif\">\
             <h1 style=\"font-size:20px\">Hello {},</h1>\
             <p>Use this code to verify your e-mail and activate your account:</p>\
             <p style=\"font-size:28px;font-weight:700;letter-spacing:6px\">{}</p>\
             <p>The code is valid for {}.</p></div>",
            fullname, code, validity
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("MedCore | Verify your e-mail to activate your account")
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        tracing::info!(email = %email, "Verification email sent");
        Ok(())
    }
}

/// Development mailer: logs instead of sending.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl VerificationMailer for LogMailer {
    async fn send_verification(
        &self,
        email: &str,
        _fullname: &str,
        _code: &str,
        valid_for: chrono::Duration,
    ) -> Result<(), MailError> {
        tracing::info!(
            email = %email,
            valid_minutes = valid_for.num_minutes(),
            "SMTP not configured, verification code issued without delivery"
        );
        Ok(())
    }
}
