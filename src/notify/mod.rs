//! Alert delivery
//!
//! Alerts leave the platform only through a [`Notifier`]. SMTP is used when
//! it is configured; otherwise alerts are written to the log.

mod smtp;
mod templates;

pub use smtp::SmtpNotifier;
pub use templates::AlertTemplate;

use crate::config::SmtpSettings;
use crate::models::{Alert, Severity};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A delivery channel for alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
    fn name(&self) -> &str;
}

/// Writes alerts to the tracing log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let text = AlertTemplate::plain_text(alert);
        match alert.severity {
            Severity::Critical => error!(alert_id = %alert.alert_id, trigger = %alert.trigger, "{}", text),
            Severity::Warning => warn!(alert_id = %alert.alert_id, trigger = %alert.trigger, "{}", text),
            Severity::Info => info!(alert_id = %alert.alert_id, trigger = %alert.trigger, "{}", text),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// SMTP when configured and buildable, the log otherwise.
pub fn notifier_from_settings(smtp: &SmtpSettings) -> Arc<dyn Notifier> {
    if smtp.is_configured() {
        match SmtpNotifier::new(smtp) {
            Ok(notifier) => {
                info!(recipients = smtp.to.len(), "email alerts enabled");
                return Arc::new(notifier);
            }
            Err(e) => warn!(error = %e, "failed to initialise SMTP notifier, alerts go to the log"),
        }
    }
    Arc::new(LogNotifier)
}

/// Send a pending alert and record the outcome on it. Terminal alerts are
/// not sent again.
pub async fn deliver(notifier: &dyn Notifier, alert: &mut Alert) -> bool {
    if alert.is_terminal() {
        return false;
    }
    let delivered = match notifier.send(alert).await {
        Ok(()) => true,
        Err(e) => {
            warn!(channel = notifier.name(), alert_id = %alert.alert_id, error = %e, "alert delivery failed");
            false
        }
    };
    alert.resolve(delivered);
    delivered
}
