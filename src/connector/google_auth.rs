// flowlink — Google OAuth credentials for the Sheets connector
//
// The consent flow runs ahead of time (`flowlink sheets-auth`). At run time the
// Sheets connector only loads the stored token and refreshes it when expired.

use super::ConnectorError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use url::Url;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Loopback redirect used for installed apps. The browser lands on an error
/// page whose address bar carries the `code` parameter.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Tokens are refreshed this long before their recorded expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Client secret (downloaded from the Google Cloud console)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}
fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Load an `installed` (or `web`) client secret file.
    pub fn load(path: &Path) -> Result<Self, ConnectorError> {
        if !path.exists() {
            return Err(ConnectorError::Config(format!(
                "client secret file not found at {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConnectorError> {
        let file: ClientSecretFile = serde_json::from_str(content)
            .map_err(|e| ConnectorError::Config(format!("invalid client secret file: {}", e)))?;
        file.installed.or(file.web).ok_or_else(|| {
            ConnectorError::Config("client secret file has no 'installed' or 'web' section".into())
        })
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    /// Consent page URL requesting offline access to spreadsheets.
    pub fn consent_url(&self) -> Result<Url, ConnectorError> {
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("response_type", "code"),
                ("scope", SHEETS_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| ConnectorError::Config(format!("invalid auth_uri '{}': {}", self.auth_uri, e)))
    }

    /// Trade an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        client: &Client,
        code: &str,
    ) -> Result<StoredToken, ConnectorError> {
        let form = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri()),
            ("grant_type", "authorization_code"),
        ];
        let grant = post_token_request(client, &self.token_uri, &form).await?;
        let expiry = grant.expires_in.map(expiry_from_now).transpose()?;

        Ok(StoredToken {
            token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_uri: self.token_uri.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: vec![SHEETS_SCOPE.to_string()],
            expiry,
        })
    }
}

/// Accept either a bare authorization code or the full redirect URL.
pub fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    match Url::parse(input) {
        Ok(url) => url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned()),
        Err(_) => Some(input.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Stored token (authorized-user file)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn load(path: &Path) -> Result<Self, ConnectorError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ConnectorError::Auth(format!("invalid token file {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConnectorError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConnectorError::Auth(format!("failed to serialize token: {}", e)))?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Saved Google token");
        Ok(())
    }

    /// A token without a recorded expiry is treated as valid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|exp| {
            exp.checked_sub_signed(ChronoDuration::seconds(EXPIRY_SKEW_SECS))
                .map_or(true, |refresh_at| refresh_at <= now)
        })
    }

    /// Refresh the access token in place.
    pub async fn refresh(&mut self, client: &Client) -> Result<(), ConnectorError> {
        let refresh_token = self.refresh_token.clone().ok_or_else(|| {
            ConnectorError::Auth(
                "token expired and no refresh token is stored; run `flowlink sheets-auth`".into(),
            )
        })?;

        tracing::info!("Refreshing expired Google access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let grant = post_token_request(client, &self.token_uri, &form).await?;
        let expiry = grant.expires_in.map(expiry_from_now).transpose()?;

        self.token = grant.access_token;
        if grant.refresh_token.is_some() {
            self.refresh_token = grant.refresh_token;
        }
        self.expiry = expiry;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn expiry_from_now(expires_in: i64) -> Result<DateTime<Utc>, ConnectorError> {
    ChronoDuration::try_seconds(expires_in)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            ConnectorError::Auth(format!(
                "token endpoint returned an out-of-range expires_in: {}",
                expires_in
            ))
        })
}

async fn post_token_request(
    client: &Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenGrant, ConnectorError> {
    let response = client.post(token_uri).form(form).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let reason = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                let error = v.get("error")?.as_str()?.to_string();
                let description = v
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default();
                Some(format!("{}{}", error, description))
            })
            .unwrap_or_else(|| status.to_string());
        return Err(ConnectorError::Auth(format!(
            "token request failed ({}): {}",
            status.as_u16(),
            reason
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| ConnectorError::Auth(format!("invalid token response: {}", e)))
}
