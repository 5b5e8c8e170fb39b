// flowlink — OpenAI-compatible text generation connector

use super::{override_bool, override_str, parse_params, require_non_empty, Connector, ConnectorError};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenAIAction {
    GenerateText,
}

impl OpenAIAction {
    fn parse(action: &str) -> Result<Self, ConnectorError> {
        match action {
            "generate_text" => Ok(Self::GenerateText),
            other => Err(ConnectorError::UnknownAction {
                service: "openai".into(),
                action: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateTextParams {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f64>,
}

/// Speaks the chat completions API (OpenAI, or any compatible endpoint via
/// `api_base`).
pub struct OpenAIConnector {
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    simulate: bool,
    client: Client,
}

impl OpenAIConnector {
    pub fn from_config(
        cfg: &OpenAIConfig,
        overrides: &Map<String, Value>,
    ) -> Result<Self, ConnectorError> {
        let api_key = override_str(overrides, "api_key").unwrap_or_else(|| cfg.api_key.clone());
        let simulate = override_bool(overrides, "simulate").unwrap_or(cfg.simulate);

        if api_key.is_empty() && !simulate {
            return Err(ConnectorError::Config(
                "OpenAI API key is not set (OPENAI_API_KEY or connector_config.api_key)".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            api_key,
            api_base: override_str(overrides, "api_base").unwrap_or_else(|| cfg.api_base.clone()),
            model: override_str(overrides, "model").unwrap_or_else(|| cfg.model.clone()),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            simulate,
            client,
        })
    }

    async fn generate_text(&self, params: GenerateTextParams) -> Result<String, ConnectorError> {
        require_non_empty("generate_text", "prompt", &params.prompt)?;
        let model = params.model.as_deref().unwrap_or(&self.model);

        if self.simulate {
            tracing::info!(model = %model, "Simulating OpenAI text generation");
            return Ok(format!(
                "This is a simulated response for the prompt: '{}' using model {}.",
                params.prompt, model
            ));
        }

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": params.prompt}],
            "max_tokens": params.max_tokens.unwrap_or(self.max_tokens),
            "temperature": params.temperature.unwrap_or(self.temperature),
        });

        tracing::debug!(url = %url, model = %model, "Sending completion request");
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_body = response.text().await?;
        tracing::debug!(
            status = %status,
            body_len = response_body.len(),
            duration_ms = %start.elapsed().as_millis(),
            "Completion response received"
        );

        if !status.is_success() {
            let msg = serde_json::from_str::<Value>(&response_body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(ConnectorError::api(
                format!("OpenAI API error ({}): {}", status.as_u16(), msg),
                response_body,
            ));
        }

        parse_response(&response_body)
    }
}

#[async_trait]
impl Connector for OpenAIConnector {
    fn service(&self) -> &str {
        "openai"
    }

    async fn execute_action(
        &self,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ConnectorError> {
        match OpenAIAction::parse(action)? {
            OpenAIAction::GenerateText => {
                let params: GenerateTextParams = parse_params(action, params)?;
                let text = self.generate_text(params).await?;
                Ok(json!({ "generated_text": text }))
            }
        }
    }
}

/// Extract the first choice's message content from a completion body.
fn parse_response(body: &str) -> Result<String, ConnectorError> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| ConnectorError::api(format!("invalid OpenAI response: {}", e), body))?;

    if let Some(err) = v.get("error") {
        let msg = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(ConnectorError::api(format!("OpenAI API error: {}", msg), body));
    }

    v.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            ConnectorError::api(
                "invalid response structure from OpenAI API: choices, message or content missing",
                body,
            )
        })
}
