use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{AlertTemplate, Notifier};
use crate::config::{SmtpSettings, SmtpTls};
use crate::error::ForecastError;
use crate::models::Alert;
use crate::Result;

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let host = settings
            .host
            .as_deref()
            .ok_or_else(|| ForecastError::Config("SMTP_HOST not set".into()))?;
        let from: Mailbox = settings
            .from
            .as_deref()
            .ok_or_else(|| ForecastError::Config("SMTP_FROM_ADDRESS not set".into()))?
            .parse()
            .map_err(|e| ForecastError::Config(format!("invalid from address: {}", e)))?;

        let to: Vec<Mailbox> = settings
            .to
            .iter()
            .filter_map(|addr| addr.parse().ok())
            .collect();
        if to.is_empty() {
            return Err(ForecastError::Config("no valid ALERT_EMAIL_TO addresses".into()));
        }

        let mut builder = match settings.tls {
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
            SmtpTls::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)),
        }
        .map_err(|e| ForecastError::Notification(format!("SMTP transport error: {}", e)))?
        .port(settings.port);

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let body = AlertTemplate::html(alert);
        let subject = AlertTemplate::subject(alert);

        for recipient in &self.to {
            let email = Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(subject.clone())
                .header(ContentType::TEXT_HTML)
                .body(body.clone())
                .map_err(|e| ForecastError::Notification(format!("failed to build email: {}", e)))?;

            self.transport
                .send(email)
                .await
                .map_err(|e| ForecastError::Notification(format!("failed to send email: {}", e)))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: Some("smtp.example.com".into()),
            port: 2525,
            username: None,
            password: None,
            from: Some("alerts@example.com".into()),
            to: vec!["ops@example.com".into()],
            tls: SmtpTls::None,
        }
    }

    #[tokio::test]
    async fn test_builds_from_settings() {
        let notifier = SmtpNotifier::new(&settings()).unwrap();
        assert_eq!(notifier.name(), "smtp");
        assert_eq!(notifier.to.len(), 1);
    }

    #[test]
    fn test_rejects_missing_recipients() {
        let mut s = settings();
        s.to = vec!["not an address".into()];
        assert!(matches!(SmtpNotifier::new(&s), Err(ForecastError::Config(_))));
        s.host = None;
        assert!(SmtpNotifier::new(&s).is_err());
    }
}
