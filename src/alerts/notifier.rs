use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

use super::models::UsageAlert;
use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email notifications are not configured")]
    Disabled,
    #[error("SMTP configuration error: {0}")]
    Configuration(String),
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("failed to send email: {0}")]
    SendFailed(String),
}

/// key: alert-notifier -> outbound channel for usage alerts
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotifyError::Configuration(format!("failed to create SMTP relay: {e}")))?
            .port(config.port);
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let from = config
            .from_email
            .parse()
            .map_err(|e| NotifyError::Configuration(format!("invalid from address: {e}")))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl AlertNotifier for SmtpNotifier {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::InvalidRecipient(format!("{e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| NotifyError::SendFailed(format!("failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Used when no SMTP relay is configured.
pub struct DisabledNotifier;

#[async_trait]
impl AlertNotifier for DisabledNotifier {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), NotifyError> {
        Err(NotifyError::Disabled)
    }
}

pub fn alert_subject(alert: &UsageAlert) -> String {
    format!("[Simbotix] Usage {}: {}", alert.alert_type, alert.resource)
}

pub fn alert_body(alert: &UsageAlert) -> String {
    let mut body = format!(
        "<h3>Usage Alert: {}</h3>\n\
         <p><strong>Resource:</strong> {}</p>\n\
         <p><strong>Current Usage:</strong> {}</p>\n\
         <p><strong>Limit:</strong> {}</p>\n\
         <p><strong>Usage:</strong> {:.1}%</p>\n",
        alert.alert_type, alert.resource, alert.current_usage, alert.limit_value, alert.usage_percent,
    );
    if let Some(amount) = alert.overage_amount.filter(|amount| *amount > 0.0) {
        body.push_str(&format!(
            "<p><strong>Estimated Overage:</strong> ${amount:.2}</p>\n"
        ));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn alert(overage: Option<f64>) -> UsageAlert {
        UsageAlert {
            id: Uuid::new_v4(),
            resource: "api_calls".to_string(),
            alert_type: "Exceeded".to_string(),
            threshold_percent: 100.0,
            current_usage: 64_000.0,
            limit_value: 50_000.0,
            usage_percent: 128.0,
            overage_amount: overage,
            overage_rate: None,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            notification_sent: false,
            email_sent_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn subject_names_kind_and_resource() {
        assert_eq!(alert_subject(&alert(None)), "[Simbotix] Usage Exceeded: api_calls");
    }

    #[test]
    fn body_includes_overage_only_when_present() {
        let body = alert_body(&alert(Some(0.7)));
        assert!(body.contains("<p><strong>Usage:</strong> 128.0%</p>"));
        assert!(body.contains("Estimated Overage:</strong> $0.70"));

        let body = alert_body(&alert(None));
        assert!(!body.contains("Estimated Overage"));
    }

    #[tokio::test]
    async fn disabled_notifier_refuses_to_send() {
        let result = DisabledNotifier.send("ops@example.com", "s", "b").await;
        assert!(matches!(result, Err(NotifyError::Disabled)));
    }
}
