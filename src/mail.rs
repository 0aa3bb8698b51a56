use std::sync::Mutex;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::config::MailConfig;

/// Outbound mail seam. The lifecycle service hands over the plaintext
/// one-time token; delivery details stay behind this trait.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_confirmation(
        &self,
        to: &str,
        first_name: Option<&str>,
        token: &str,
    ) -> anyhow::Result<()>;
    async fn send_password_reset(
        &self,
        to: &str,
        first_name: Option<&str>,
        token: &str,
    ) -> anyhow::Result<()>;
}

/// SMTP mailer over a pooled STARTTLS relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    client_url: String,
}

impl SmtpMailer {
    pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)?.port(cfg.smtp_port);
        if !cfg.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.smtp_user.clone(),
                cfg.smtp_password.clone(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            from: cfg.from_address.parse()?,
            client_url: cfg.client_url.clone(),
        })
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;
        self.transport.send(message).await?;
        info!(to = %to, subject = %subject, "mail sent");
        Ok(())
    }
}

fn greeting(first_name: Option<&str>) -> &str {
    first_name.unwrap_or("there")
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_confirmation(
        &self,
        to: &str,
        first_name: Option<&str>,
        token: &str,
    ) -> anyhow::Result<()> {
        let body = format!(
            "Hi {},\n\nConfirm your email address by opening the link below:\n\n\
             {}/confirm-email?token={}\n\n\
             The link expires in 24 hours. If you did not create an account, \
             you can ignore this message.\n",
            greeting(first_name),
            self.client_url,
            token
        );
        self.send(to, "Confirm your email address", body).await
    }

    async fn send_password_reset(
        &self,
        to: &str,
        first_name: Option<&str>,
        token: &str,
    ) -> anyhow::Result<()> {
        let body = format!(
            "Hi {},\n\nYou requested a password reset. Open the link below to \
             choose a new password:\n\n\
             {}/reset-password?token={}\n\n\
             The link expires in 24 hours. If you did not request this, you can \
             ignore this message.\n",
            greeting(first_name),
            self.client_url,
            token
        );
        self.send(to, "Reset your password", body).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Confirmation,
    PasswordReset,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub kind: MailKind,
    pub token: String,
}

/// Records outbound mail instead of sending it. Tests read the delivered
/// plaintext tokens back out of it.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<SentMail> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send_confirmation(
        &self,
        to: &str,
        _first_name: Option<&str>,
        token: &str,
    ) -> anyhow::Result<()> {
        debug!(to = %to, "recording confirmation mail");
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            kind: MailKind::Confirmation,
            token: token.to_string(),
        });
        Ok(())
    }

    async fn send_password_reset(
        &self,
        to: &str,
        _first_name: Option<&str>,
        token: &str,
    ) -> anyhow::Result<()> {
        debug!(to = %to, "recording password reset mail");
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            kind: MailKind::PasswordReset,
            token: token.to_string(),
        });
        Ok(())
    }
}
