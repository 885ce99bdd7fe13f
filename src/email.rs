use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::EmailConfig;

/// Delivers transactional mail. Callers only care whether it went out.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_password_reset_email(
        &self,
        email: &str,
        reset_token: &str,
        user_name: &str,
        expiration_hours: i64,
    ) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

pub fn password_reset_message(
    cfg: &EmailConfig,
    email: &str,
    reset_token: &str,
    user_name: &str,
    expiration_hours: i64,
) -> OutgoingEmail {
    let link = format!("{}?token={}", cfg.password_reset_url, reset_token);
    let unit = if expiration_hours == 1 { "hour" } else { "hours" };
    let text = format!(
        "Hello {user_name},\n\n\
         We received a request to reset the password of your CVFast account.\n\
         Open the link below to choose a new password:\n\n\
         {link}\n\n\
         The link is valid for {expiration_hours} {unit} and can be used once.\n\
         If you did not ask for this, you can ignore this email.\n"
    );
    OutgoingEmail {
        from: cfg.from_address.clone(),
        to: email.to_string(),
        subject: "Reset your CVFast password".into(),
        text,
    }
}

/// Writes mail to the log instead of sending it. Used when no e-mail API is configured.
#[derive(Debug, Clone)]
pub struct LogEmailSender {
    cfg: EmailConfig,
}

impl LogEmailSender {
    pub fn new(cfg: EmailConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_password_reset_email(
        &self,
        email: &str,
        reset_token: &str,
        user_name: &str,
        expiration_hours: i64,
    ) -> bool {
        let msg =
            password_reset_message(&self.cfg, email, reset_token, user_name, expiration_hours);
        warn!("e-mail API not configured, logging message instead of sending");
        info!(
            from = %msg.from,
            to = %msg.to,
            subject = %msg.subject,
            body = %msg.text,
            "email (not sent)"
        );
        true
    }
}

/// Posts messages as JSON to an HTTP e-mail relay.
#[derive(Clone)]
pub struct HttpEmailSender {
    client: reqwest::Client,
    cfg: EmailConfig,
    api_url: String,
    api_key: Option<String>,
}

impl HttpEmailSender {
    pub fn new(cfg: EmailConfig, api_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build e-mail http client")?;
        let api_key = cfg.api_key.clone();
        Ok(Self { client, cfg, api_url, api_key })
    }

    async fn deliver(&self, msg: &OutgoingEmail) -> anyhow::Result<()> {
        let mut req = self.client.post(&self.api_url).json(msg);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .context("e-mail api request")?
            .error_for_status()
            .context("e-mail api status")?;
        Ok(())
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send_password_reset_email(
        &self,
        email: &str,
        reset_token: &str,
        user_name: &str,
        expiration_hours: i64,
    ) -> bool {
        let msg =
            password_reset_message(&self.cfg, email, reset_token, user_name, expiration_hours);
        match self.deliver(&msg).await {
            Ok(()) => {
                info!(to = %msg.to, "password reset email sent");
                true
            }
            Err(e) => {
                error!(error = ?e, to = %msg.to, "password reset email failed");
                false
            }
        }
    }
}

/// Picks the sender matching the configuration.
pub fn from_config(cfg: &EmailConfig) -> anyhow::Result<std::sync::Arc<dyn EmailSender>> {
    Ok(match cfg.api_url.clone() {
        Some(url) => std::sync::Arc::new(HttpEmailSender::new(cfg.clone(), url)?),
        None => std::sync::Arc::new(LogEmailSender::new(cfg.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EmailConfig {
        EmailConfig {
            reset_token_expiration_hours: 2,
            password_reset_url: "https://cvfast.app/reset".into(),
            from_address: "no-reply@cvfast.app".into(),
            api_url: None,
            api_key: None,
        }
    }

    #[test]
    fn message_carries_link_name_and_validity() {
        let msg = password_reset_message(&cfg(), "a@x.com", "tok123", "Ada", 2);
        assert_eq!(msg.to, "a@x.com");
        assert_eq!(msg.from, "no-reply@cvfast.app");
        assert!(msg.text.contains("https://cvfast.app/reset?token=tok123"));
        assert!(msg.text.contains("Hello Ada"));
        assert!(msg.text.contains("2 hours"));
    }

    #[tokio::test]
    async fn log_sender_reports_success() {
        let sender = LogEmailSender::new(cfg());
        assert!(sender.send_password_reset_email("a@x.com", "t", "Ada", 1).await);
    }

    #[tokio::test]
    async fn http_sender_reports_failure_when_relay_unreachable() {
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        let sender = HttpEmailSender::new(cfg(), "http://127.0.0.1:9/send".into()).unwrap();
        assert!(!sender.send_password_reset_email("a@x.com", "t", "Ada", 1).await);
    }
}
