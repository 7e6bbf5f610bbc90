use async_trait::async_trait;
use handlebars::Handlebars;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServiceError;

/// One message handed to the provider. The provider renders the template;
/// we only carry its name, the substituted variables and the campaign tag
/// that later joins webhook events back to our records.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub template_name: String,
    pub variables: HashMap<String, String>,
    pub campaign_tag: String,
}

/// Opaque mail provider. Returns the provider-assigned message id, the sole
/// join key between send-time records and webhook events.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<String, ServiceError>;
}

/// Builds the transport selected by `MAIL_TRANSPORT`.
pub fn from_config(config: &Config) -> Result<std::sync::Arc<dyn MailTransport>, ServiceError> {
    match config.mail_transport.as_str() {
        "api" => {
            let url = config.provider_api_url.clone().ok_or_else(|| {
                ServiceError::Validation("PROVIDER_API_URL required for api transport".into())
            })?;
            Ok(std::sync::Arc::new(HttpApiTransport::new(url, config.provider_api_token.clone())))
        }
        "smtp" => {
            let host = config.smtp_host.clone().ok_or_else(|| {
                ServiceError::Validation("SMTP_HOST required for smtp transport".into())
            })?;
            Ok(std::sync::Arc::new(SmtpMailTransport::new(
                host,
                config.smtp_port.unwrap_or(587),
                config.smtp_username.clone().unwrap_or_default(),
                config.smtp_password.clone().unwrap_or_default(),
            )?))
        }
        "log" => Ok(std::sync::Arc::new(LogMailTransport::default())),
        other => Err(ServiceError::Validation(format!("unknown mail transport: {}", other))),
    }
}

/// Provider HTTP API transport (templated-send endpoint).
pub struct HttpApiTransport {
    client: reqwest::Client,
    api_url: String,
    api_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ProviderSendResponse {
    #[serde(alias = "MessageId", alias = "messageId")]
    message_id: String,
}

impl HttpApiTransport {
    pub fn new(api_url: String, api_token: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), api_url, api_token }
    }
}

#[async_trait]
impl MailTransport for HttpApiTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "from": email.from,
            "to": email.to,
            "template": email.template_name,
            "templateData": email.variables,
            "tags": { "X-Campaign-ID": [email.campaign_tag] },
        });

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::TransientIo(format!(
                "provider returned {}: {}",
                status, text
            )));
        }

        let parsed: ProviderSendResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::TransientIo(format!("bad provider response: {}", e)))?;
        Ok(parsed.message_id)
    }
}

/// SMTP transport for self-hosted relays. The subject and body come from the
/// `subject` / `body` template variables and are rendered with handlebars in
/// non-strict mode.
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn new(
        host: String,
        port: u16,
        username: String,
        password: String,
    ) -> Result<Self, ServiceError> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .map_err(|e| ServiceError::TransientIo(format!("smtp transport: {}", e)))?
            .credentials(Credentials::new(username, password))
            .port(port)
            .build();
        Ok(Self { mailer })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, ServiceError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);

        let subject_template = email
            .variables
            .get("subject")
            .cloned()
            .unwrap_or_else(|| email.template_name.clone());
        let body_template = email
            .variables
            .get("body")
            .cloned()
            .unwrap_or_else(|| "Hello {{recipientName}},".to_string());

        let subject = handlebars
            .render_template(&subject_template, &email.variables)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        let body = handlebars
            .render_template(&body_template, &email.variables)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let message = Message::builder()
            .from(email.from.parse().map_err(|e| {
                ServiceError::Validation(format!("invalid from address: {}", e))
            })?)
            .to(email.to.parse().map_err(|e| {
                ServiceError::Validation(format!("invalid to address: {}", e))
            })?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ServiceError::Validation(format!("failed to build email: {}", e)))?;

        let response = self
            .mailer
            .send(message)
            .await
            .map_err(|e| ServiceError::TransientIo(format!("smtp error: {}", e)))?;

        Ok(response.message().collect::<Vec<_>>().join(""))
    }
}

/// Dev/test transport: logs the send and fabricates a message id.
#[derive(Default)]
pub struct LogMailTransport {
    pub sent: std::sync::Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, ServiceError> {
        tracing::info!(to = %email.to, template = %email.template_name, "log transport send");
        self.sent.lock().unwrap().push(email.clone());
        Ok(format!("log-{}", Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_transport_records_sends() {
        let transport = LogMailTransport::default();
        let email = OutboundEmail {
            from: "sender@example.com".into(),
            to: "user@example.com".into(),
            template_name: "warmup-1".into(),
            variables: HashMap::new(),
            campaign_tag: "tag".into(),
        };
        let id = transport.send(&email).await.unwrap();
        assert!(id.starts_with("log-"));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
