use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::error::DeliveryError;
use crate::notify::NotificationSender;

/// Delivers notices through an SMTP relay.
pub struct SmtpSender {
    config: SmtpConfig,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let builder = if self.config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.server)
        }
        .map_err(|e| DeliveryError::Transport(format!("SMTP relay error: {e}")))?;
        Ok(builder.port(self.config.port).credentials(creds).build())
    }
}

#[async_trait]
impl NotificationSender for SmtpSender {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let message = build_message(&self.config.from, recipient, subject, body)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        log::info!("Sent '{subject}' to {recipient}");
        Ok(())
    }
}

fn parse_address(addr: &str) -> Result<Mailbox, DeliveryError> {
    addr.trim()
        .parse()
        .map_err(|_| DeliveryError::InvalidAddress(addr.to_string()))
}

pub(crate) fn build_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<Message, DeliveryError> {
    Message::builder()
        .from(parse_address(from)?)
        .to(parse_address(to)?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            server: "smtp.company.com".into(),
            port: 587,
            username: "me@company.com".into(),
            password: "secret".into(),
            from: "Tasks <tasks@company.com>".into(),
            use_starttls: true,
        }
    }

    #[test]
    fn builds_plain_text_message() {
        let message = build_message(
            "Tasks <tasks@company.com>",
            "bob@acme.test",
            "Task Reminder: Weekly report",
            "Hello Bob",
        )
        .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: bob@acme.test"));
        assert!(raw.contains("Subject: Task Reminder: Weekly report"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        let err = build_message("tasks@company.com", "not an address", "s", "b").unwrap_err();
        assert_eq!(err, DeliveryError::InvalidAddress("not an address".into()));

        let err = build_message("", "bob@acme.test", "s", "b").unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn invalid_recipient_fails_before_connecting() {
        let sender = SmtpSender::new(config());
        let err = sender.send("bob at acme", "s", "b").await.unwrap_err();
        assert_eq!(err, DeliveryError::InvalidAddress("bob at acme".into()));
    }
}
