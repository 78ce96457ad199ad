//! Outgoing mail
//!
//! SMTP through lettre when a host is configured, otherwise the message is
//! written to the log so local installs can still confirm accounts.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

use crate::config::{MailConfig, SiteConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<()>;
}

pub type DynMailer = Arc<dyn Mailer>;

/// Pick the SMTP mailer when configured, the log mailer otherwise
pub fn from_config(config: &MailConfig) -> Result<DynMailer> {
    if config.is_enabled() {
        Ok(Arc::new(SmtpMailer::new(config)?))
    } else {
        tracing::info!("SMTP host not configured, mails will be logged");
        Ok(Arc::new(LogMailer))
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from: format!("{} <{}>", config.from_name, config.from_address),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: Mail) -> Result<()> {
        let message = Message::builder()
            .from(self.from.parse().map_err(|e| anyhow!("Invalid from address: {}", e))?)
            .to(mail.to.parse().map_err(|e| anyhow!("Invalid to address: {}", e))?)
            .subject(mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;

        tracing::info!("Mail sent to {}", mail.to);
        Ok(())
    }
}

pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> Result<()> {
        tracing::info!(to = %mail.to, subject = %mail.subject, "Mail not sent (no SMTP host):\n{}", mail.body);
        Ok(())
    }
}

/// Keeps every mail in memory
#[derive(Default)]
pub struct MemoryMailer {
    sent: std::sync::Mutex<Vec<Mail>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Text following `marker` in the last mail body, up to the end of line
    pub fn last_token_after(&self, marker: &str) -> Option<String> {
        let last = self.sent().pop()?;
        let start = last.body.find(marker)? + marker.len();
        last.body[start..].lines().next().map(str::to_string)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, mail: Mail) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("Mail store poisoned"))?
            .push(mail);
        Ok(())
    }
}

pub fn confirmation_mail(site: &SiteConfig, to: &str, username: &str, token: &str) -> Mail {
    Mail {
        to: to.to_string(),
        subject: format!("[{}] Confirm your account", site.name),
        body: format!(
            "Hello {username},\n\n\
             Thanks for joining {site}. Open the link below to confirm your account:\n\n\
             {base}/confirm-account/?confirmed_token={token}\n\n\
             If you did not create an account you can ignore this mail.\n",
            username = username,
            site = site.name,
            base = site.base_url.trim_end_matches('/'),
            token = urlencoding::encode(token),
        ),
    }
}

pub fn reset_password_mail(site: &SiteConfig, to: &str, username: &str, token: &str) -> Mail {
    Mail {
        to: to.to_string(),
        subject: format!("[{}] Reset your password", site.name),
        body: format!(
            "Hello {username},\n\n\
             Someone asked to reset the password of your {site} account.\n\
             The link below is valid for one hour:\n\n\
             {base}/reset-password/?reset_token={token}\n\n\
             If you did not ask for it you can ignore this mail.\n",
            username = username,
            site = site.name,
            base = site.base_url.trim_end_matches('/'),
            token = urlencoding::encode(token),
        ),
    }
}
