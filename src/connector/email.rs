// flowlink — SMTP email connector

use super::{
    override_bool, override_port, override_str, parse_params, require_non_empty, Connector,
    ConnectorError,
};
use crate::config::EmailConfig;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Port that speaks TLS from the first byte instead of upgrading via STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmailAction {
    SendEmail,
}

impl EmailAction {
    fn parse(action: &str) -> Result<Self, ConnectorError> {
        match action {
            "send_email" => Ok(Self::SendEmail),
            other => Err(ConnectorError::UnknownAction {
                service: "email".into(),
                action: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendEmailParams {
    recipient_email: String,
    subject: String,
    body: String,
    #[serde(default)]
    is_html: bool,
}

/// Effective SMTP settings after applying per-action overrides.
#[derive(Debug, Clone)]
struct SmtpSettings {
    host: String,
    port: u16,
    user: String,
    password: String,
    sender: String,
    use_tls: bool,
    timeout: Duration,
}

impl SmtpSettings {
    fn resolve(cfg: &EmailConfig, overrides: &Map<String, Value>) -> Result<Self, ConnectorError> {
        let user = override_str(overrides, "smtp_user").unwrap_or_else(|| cfg.smtp_user.clone());
        let sender = override_str(overrides, "sender_email")
            .or_else(|| Some(cfg.sender_email.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| user.clone());

        Ok(Self {
            host: override_str(overrides, "smtp_host").unwrap_or_else(|| cfg.smtp_host.clone()),
            port: override_port(overrides, "smtp_port")?.unwrap_or(cfg.smtp_port),
            password: override_str(overrides, "smtp_password")
                .unwrap_or_else(|| cfg.smtp_password.clone()),
            use_tls: override_bool(overrides, "use_tls").unwrap_or(cfg.use_tls),
            timeout: Duration::from_secs(cfg.timeout_secs),
            user,
            sender,
        })
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.is_empty() {
            missing.push("smtp_host");
        }
        if self.user.is_empty() {
            missing.push("smtp_user");
        }
        if self.password.is_empty() {
            missing.push("smtp_password");
        }
        missing
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, ConnectorError> {
        let builder = if self.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
                .map_err(|e| ConnectorError::Smtp(e.to_string()))?
        } else if self.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
                .map_err(|e| ConnectorError::Smtp(e.to_string()))?
        } else {
            tracing::warn!(host = %self.host, "SMTP connection is not encrypted");
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
        };

        Ok(builder
            .port(self.port)
            .credentials(Credentials::new(self.user.clone(), self.password.clone()))
            .timeout(Some(self.timeout))
            .build())
    }
}

pub struct EmailConnector {
    settings: SmtpSettings,
    simulate: bool,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailConnector {
    pub fn from_config(
        cfg: &EmailConfig,
        overrides: &Map<String, Value>,
    ) -> Result<Self, ConnectorError> {
        let settings = SmtpSettings::resolve(cfg, overrides)?;
        let simulate = override_bool(overrides, "simulate").unwrap_or(cfg.simulate);

        let transport = if simulate {
            None
        } else {
            let missing = settings.missing_fields();
            if !missing.is_empty() {
                return Err(ConnectorError::Config(format!(
                    "email connector is missing {}",
                    missing.join(", ")
                )));
            }
            Some(settings.transport()?)
        };

        Ok(Self {
            settings,
            simulate,
            transport,
        })
    }

    async fn send_email(&self, params: SendEmailParams) -> Result<(), ConnectorError> {
        for (name, value) in [
            ("recipient_email", &params.recipient_email),
            ("subject", &params.subject),
            ("body", &params.body),
        ] {
            require_non_empty("send_email", name, value)?;
        }

        let recipient: Mailbox = params.recipient_email.parse().map_err(|e| {
            ConnectorError::InvalidParams {
                action: "send_email".into(),
                reason: format!("invalid recipient '{}': {}", params.recipient_email, e),
            }
        })?;

        let Some(transport) = self.transport.as_ref().filter(|_| !self.simulate) else {
            tracing::info!(
                to = %recipient,
                subject = %params.subject,
                html = params.is_html,
                body_len = params.body.len(),
                "Simulating email send"
            );
            return Ok(());
        };

        let sender: Mailbox = self
            .settings
            .sender
            .parse()
            .map_err(|e| ConnectorError::Config(format!("invalid sender address: {}", e)))?;

        let content_type = if params.is_html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        let message = Message::builder()
            .from(sender)
            .to(recipient.clone())
            .subject(params.subject)
            .header(content_type)
            .body(params.body)
            .map_err(|e| ConnectorError::InvalidParams {
                action: "send_email".into(),
                reason: e.to_string(),
            })?;

        let start = std::time::Instant::now();
        transport
            .send(message)
            .await
            .map_err(|e| ConnectorError::Smtp(e.to_string()))?;

        tracing::info!(
            to = %recipient,
            host = %self.settings.host,
            duration_ms = %start.elapsed().as_millis(),
            "Email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Connector for EmailConnector {
    fn service(&self) -> &str {
        "email"
    }

    async fn execute_action(
        &self,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ConnectorError> {
        match EmailAction::parse(action)? {
            EmailAction::SendEmail => {
                let params: SendEmailParams = parse_params(action, params)?;
                self.send_email(params).await?;
                Ok(json!({ "status": "sent" }))
            }
        }
    }
}
