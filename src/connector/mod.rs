// flowlink — Service connectors

pub mod email;
pub mod google_auth;
pub mod openai;
pub mod sheets;

use crate::config::{parse_flag, Config};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("unknown action '{action}' for service '{service}'")]
    UnknownAction { service: String, action: String },
    #[error("invalid parameters for '{action}': {reason}")]
    InvalidParams { action: String, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Api {
        message: String,
        details: Option<String>,
    },
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Extra context recorded next to the message in a failure entry.
    pub fn details(&self) -> Option<String> {
        match self {
            ConnectorError::Api { details, .. } => details.clone(),
            ConnectorError::Http(e) => e
                .status()
                .map(|s| format!("HTTP status {}", s))
                .or_else(|| e.url().map(|u| format!("request to {}", u))),
            ConnectorError::InvalidParams { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }

    pub(crate) fn api(message: impl Into<String>, details: impl Into<String>) -> Self {
        ConnectorError::Api {
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector trait
// ---------------------------------------------------------------------------

/// A configured handle to one external service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Service name this connector was registered under.
    fn service(&self) -> &str;

    /// Run a named action with already-resolved parameters.
    async fn execute_action(
        &self,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ConnectorError>;
}

/// Hands out connectors to the executor.
pub trait ConnectorFactory: Send + Sync {
    fn get_connector(
        &self,
        service: &str,
        connector_id: &str,
        connector_config: &Map<String, Value>,
    ) -> Result<Arc<dyn Connector>, ConnectorError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Constructor = Arc<
    dyn Fn(&Config, &Map<String, Value>) -> Result<Arc<dyn Connector>, ConnectorError>
        + Send
        + Sync,
>;

/// Maps service names to connector constructors.
pub struct ConnectorRegistry {
    config: Arc<Config>,
    constructors: HashMap<String, Constructor>,
    reuse: bool,
    instances: Mutex<HashMap<(String, String), Arc<dyn Connector>>>,
}

impl ConnectorRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        let reuse = config.engine.reuse_connectors;
        Self {
            config,
            constructors: HashMap::new(),
            reuse,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the built-in `openai`, `google_sheets` and `email` services.
    pub fn with_defaults(config: Arc<Config>) -> Self {
        let mut registry = Self::new(config);
        registry.register("openai", |cfg, overrides| {
            Ok(Arc::new(openai::OpenAIConnector::from_config(&cfg.openai, overrides)?))
        });
        registry.register("google_sheets", |cfg, overrides| {
            Ok(Arc::new(sheets::SheetsConnector::from_config(
                &cfg.google_sheets,
                overrides,
            )?))
        });
        registry.register("email", |cfg, overrides| {
            Ok(Arc::new(email::EmailConnector::from_config(&cfg.email, overrides)?))
        });
        registry
    }

    pub fn register<F>(&mut self, service: &str, constructor: F)
    where
        F: Fn(&Config, &Map<String, Value>) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(service.to_string(), Arc::new(constructor));
    }

    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ConnectorFactory for ConnectorRegistry {
    fn get_connector(
        &self,
        service: &str,
        connector_id: &str,
        connector_config: &Map<String, Value>,
    ) -> Result<Arc<dyn Connector>, ConnectorError> {
        let key = (service.to_string(), connector_id.to_string());
        if self.reuse {
            let instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = instances.get(&key) {
                tracing::debug!(service = %service, connector_id = %connector_id, "Reusing connector");
                return Ok(existing.clone());
            }
        }

        let constructor = self
            .constructors
            .get(service)
            .ok_or_else(|| ConnectorError::UnknownService(service.to_string()))?;

        tracing::debug!(service = %service, connector_id = %connector_id, "Creating connector");
        let connector = constructor(&self.config, connector_config)?;

        if self.reuse {
            self.instances
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, connector.clone());
        }
        Ok(connector)
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by connectors
// ---------------------------------------------------------------------------

/// Deserialize action parameters into a typed struct.
pub(crate) fn parse_params<T: DeserializeOwned>(
    action: &str,
    params: &Map<String, Value>,
) -> Result<T, ConnectorError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| {
        ConnectorError::InvalidParams {
            action: action.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Fail with `InvalidParams` when a required string parameter is blank.
pub(crate) fn require_non_empty(
    action: &str,
    name: &str,
    value: &str,
) -> Result<(), ConnectorError> {
    if value.trim().is_empty() {
        return Err(ConnectorError::InvalidParams {
            action: action.to_string(),
            reason: format!("'{}' cannot be empty", name),
        });
    }
    Ok(())
}

/// Non-empty string override from an action's `connector_config`.
pub(crate) fn override_str(overrides: &Map<String, Value>, key: &str) -> Option<String> {
    overrides
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Boolean override; accepts JSON booleans or flag strings such as `"true"`.
pub(crate) fn override_bool(overrides: &Map<String, Value>, key: &str) -> Option<bool> {
    match overrides.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(parse_flag(s)),
        _ => None,
    }
}

/// Port override; accepts a number or a numeric string.
pub(crate) fn override_port(
    overrides: &Map<String, Value>,
    key: &str,
) -> Result<Option<u16>, ConnectorError> {
    let Some(raw) = overrides.get(key) else {
        return Ok(None);
    };
    let parsed = match raw {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| ConnectorError::Config(format!("invalid {}: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl Connector for Echo {
        fn service(&self) -> &str {
            "echo"
        }

        async fn execute_action(
            &self,
            action: &str,
            params: &Map<String, Value>,
        ) -> Result<Value, ConnectorError> {
            Ok(json!({"action": action, "params": params}))
        }
    }

    fn counting_registry(reuse: bool) -> (ConnectorRegistry, Arc<AtomicUsize>) {
        let mut config = Config::default();
        config.engine.reuse_connectors = reuse;
        let mut registry = ConnectorRegistry::new(Arc::new(config));
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        registry.register("echo", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Echo))
        });
        (registry, built)
    }

    #[test]
    fn test_unknown_service() {
        let registry = ConnectorRegistry::new(Arc::new(Config::default()));
        let err = registry
            .get_connector("fax", "fax_1", &Map::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::UnknownService(ref s) if s == "fax"));
    }

    #[test]
    fn test_fresh_connector_per_call_by_default() {
        let (registry, built) = counting_registry(false);
        registry.get_connector("echo", "shared", &Map::new()).unwrap();
        registry.get_connector("echo", "shared", &Map::new()).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reuse_by_connector_id() {
        let (registry, built) = counting_registry(true);
        registry.get_connector("echo", "shared", &Map::new()).unwrap();
        registry.get_connector("echo", "shared", &Map::new()).unwrap();
        registry.get_connector("echo", "other", &Map::new()).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_services() {
        let registry = ConnectorRegistry::with_defaults(Arc::new(Config::default()));
        assert_eq!(registry.services(), vec!["email", "google_sheets", "openai"]);
    }

    #[derive(Debug, Deserialize)]
    struct Params {
        prompt: String,
        #[serde(default)]
        limit: Option<u32>,
    }

    #[test]
    fn test_parse_params() {
        let params = json!({"prompt": "hi", "limit": 3});
        let parsed: Params = parse_params("generate_text", params.as_object().unwrap()).unwrap();
        assert_eq!(parsed.prompt, "hi");
        assert_eq!(parsed.limit, Some(3));

        let err = parse_params::<Params>("generate_text", &Map::new()).unwrap_err();
        assert!(err.to_string().contains("prompt"));
        assert!(err.details().is_some());
    }

    #[test]
    fn test_overrides() {
        let cc = json!({
            "smtp_port": "465",
            "alt_port": 2525,
            "bad_port": "abc",
            "use_tls": "true",
            "plain": false,
            "model": "",
        });
        let cc = cc.as_object().unwrap();

        assert_eq!(override_port(cc, "smtp_port").unwrap(), Some(465));
        assert_eq!(override_port(cc, "alt_port").unwrap(), Some(2525));
        assert_eq!(override_port(cc, "missing").unwrap(), None);
        assert!(override_port(cc, "bad_port").is_err());

        assert_eq!(override_bool(cc, "use_tls"), Some(true));
        assert_eq!(override_bool(cc, "plain"), Some(false));
        assert_eq!(override_str(cc, "model"), None);
    }

    #[test]
    fn test_api_error_details() {
        let err = ConnectorError::api("quota exceeded", r#"{"error":{}}"#);
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(err.details().as_deref(), Some(r#"{"error":{}}"#));
    }
}
