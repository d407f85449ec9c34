use crate::models::{Alert, Severity};

pub struct AlertTemplate;

impl AlertTemplate {
    pub fn subject(alert: &Alert) -> String {
        format!("[{}] Olive oil platform: {}", severity_label(alert.severity), alert.subject)
    }

    pub fn plain_text(alert: &Alert) -> String {
        format!(
            "{}\n\n{}\n\nTrigger: {}\nRaised: {}",
            Self::subject(alert),
            alert.message,
            alert.trigger,
            alert.created_at.format("%Y-%m-%d %H:%M UTC")
        )
    }

    pub fn html(alert: &Alert) -> String {
        let color = match alert.severity {
            Severity::Critical => "#ef4444",
            Severity::Warning => "#f97316",
            Severity::Info => "#3b82f6",
        };
        let message = escape(&alert.message).replace('\n', "<br>");
        format!(
            r#"<div style="font-family:sans-serif;max-width:600px;">
<div style="background:{color};color:#fff;padding:12px 20px;border-radius:8px 8px 0 0;font-size:18px;font-weight:700;">{label}: {subject}</div>
<div style="padding:16px 20px;color:#334155;">{message}</div>
<table style="width:100%;border-collapse:collapse;">
  <tr><td style="padding:8px 12px;color:#94a3b8;">Trigger</td><td style="padding:8px 12px;font-weight:600;">{trigger}</td></tr>
  <tr style="background:#f8fafc;"><td style="padding:8px 12px;color:#94a3b8;">Raised</td><td style="padding:8px 12px;">{raised}</td></tr>
</table>
</div>"#,
            label = severity_label(alert.severity),
            subject = escape(&alert.subject),
            trigger = escape(&alert.trigger),
            raised = alert.created_at.format("%Y-%m-%d %H:%M UTC"),
        )
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "CRITICAL",
        Severity::Warning => "WARNING",
        Severity::Info => "INFO",
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
