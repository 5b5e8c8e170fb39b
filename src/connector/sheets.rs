// flowlink — Google Sheets connector

use super::google_auth::{ClientSecret, StoredToken};
use super::{override_bool, override_str, parse_params, require_non_empty, Connector, ConnectorError};
use crate::config::GoogleSheetsConfig;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetsAction {
    GetSheetData,
    GetNewRows,
    AppendRow,
    UpdateCell,
}

impl SheetsAction {
    fn parse(action: &str) -> Result<Self, ConnectorError> {
        match action {
            "get_sheet_data" => Ok(Self::GetSheetData),
            "get_new_rows" => Ok(Self::GetNewRows),
            "append_row" => Ok(Self::AppendRow),
            "update_cell" => Ok(Self::UpdateCell),
            other => Err(ConnectorError::UnknownAction {
                service: "google_sheets".into(),
                action: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetSheetDataParams {
    sheet_id: String,
    range_name: String,
}

#[derive(Debug, Deserialize)]
struct GetNewRowsParams {
    sheet_id: String,
    tab_name: String,
    #[serde(default)]
    last_processed_row_index: u64,
}

#[derive(Debug, Deserialize)]
struct AppendRowParams {
    sheet_id: String,
    tab_name: String,
    values: Value,
}

#[derive(Debug, Deserialize)]
struct UpdateCellParams {
    sheet_id: String,
    range_name: String,
    value: Value,
}

pub struct SheetsConnector {
    api_base: String,
    token_path: PathBuf,
    simulate: bool,
    client: Client,
    token: Mutex<Option<StoredToken>>,
}

impl SheetsConnector {
    pub fn from_config(
        cfg: &GoogleSheetsConfig,
        overrides: &Map<String, Value>,
    ) -> Result<Self, ConnectorError> {
        let simulate = override_bool(overrides, "simulate").unwrap_or(cfg.simulate);
        let token_path = PathBuf::from(
            override_str(overrides, "token_file_path").unwrap_or_else(|| cfg.token_file.clone()),
        );

        let token = if simulate {
            None
        } else {
            if !token_path.exists() {
                return Err(ConnectorError::Config(format!(
                    "Google token file not found at {}; run `flowlink sheets-auth` first",
                    token_path.display()
                )));
            }
            let token = StoredToken::load(&token_path)?;
            Some(complete_token(token, cfg, overrides)?)
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            api_base: override_str(overrides, "api_base").unwrap_or_else(|| cfg.api_base.clone()),
            token_path,
            simulate,
            client,
            token: Mutex::new(token),
        })
    }

    /// Current access token, refreshed (and persisted) when expired.
    async fn access_token(&self) -> Result<String, ConnectorError> {
        let mut guard = self.token.lock().await;
        let token = guard
            .as_mut()
            .ok_or_else(|| ConnectorError::Auth("no Google credentials loaded".into()))?;

        if token.is_expired(chrono::Utc::now()) {
            token.refresh(&self.client).await?;
            token.save(&self.token_path)?;
        }
        Ok(token.token.clone())
    }

    fn values_url(&self, sheet_id: &str, range: &str) -> Result<Url, ConnectorError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ConnectorError::Config(format!("invalid Sheets api_base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ConnectorError::Config("Sheets api_base cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(["spreadsheets", sheet_id, "values", range]);
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ConnectorError> {
        let token = self.access_token().await?;
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        tracing::debug!(method = %method, url = %url, "Calling Sheets API");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let msg = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(ConnectorError::api(
                format!("Google Sheets API error ({}): {}", status.as_u16(), msg),
                text,
            ));
        }

        serde_json::from_str(&text)
            .map_err(|e| ConnectorError::api(format!("invalid Sheets API response: {}", e), text))
    }

    async fn get_sheet_data(
        &self,
        sheet_id: &str,
        range_name: &str,
    ) -> Result<Vec<Value>, ConnectorError> {
        tracing::info!(sheet_id = %sheet_id, range = %range_name, "Fetching sheet data");

        if self.simulate {
            return Ok(simulated_values(sheet_id, range_name));
        }

        let url = self.values_url(sheet_id, range_name)?;
        let response = self.call(Method::GET, url, &[], None).await?;
        Ok(response
            .get("values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_new_rows(
        &self,
        sheet_id: &str,
        tab_name: &str,
        last_processed_row_index: u64,
    ) -> Result<(Vec<Value>, u64), ConnectorError> {
        // Sheet rows are 1-indexed.
        let range = format!("{}!A{}:Z", tab_name, last_processed_row_index + 1);
        let rows = self.get_sheet_data(sheet_id, &range).await?;
        let last = last_processed_row_index + rows.len() as u64;
        Ok((rows, last))
    }

    async fn append_row(
        &self,
        sheet_id: &str,
        tab_name: &str,
        rows: Vec<Value>,
    ) -> Result<Value, ConnectorError> {
        tracing::info!(sheet_id = %sheet_id, tab = %tab_name, rows = rows.len(), "Appending rows");

        if self.simulate {
            let updated_range = format!(
                "{}!A100:Z{}",
                tab_name,
                (100 + rows.len()).saturating_sub(1)
            );
            return Ok(json!({
                "spreadsheetId": sheet_id,
                "tableRange": tab_name,
                "updates": update_summary(sheet_id, &updated_range, &rows),
            }));
        }

        let url = self.values_url(sheet_id, &format!("{}:append", tab_name))?;
        self.call(
            Method::POST,
            url,
            &[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ],
            Some(json!({ "values": rows })),
        )
        .await
    }

    async fn update_cell(
        &self,
        sheet_id: &str,
        range_name: &str,
        rows: Vec<Value>,
    ) -> Result<Value, ConnectorError> {
        tracing::info!(sheet_id = %sheet_id, range = %range_name, "Updating cells");

        if self.simulate {
            return Ok(update_summary(sheet_id, range_name, &rows));
        }

        let url = self.values_url(sheet_id, range_name)?;
        self.call(
            Method::PUT,
            url,
            &[("valueInputOption", "USER_ENTERED")],
            Some(json!({ "range": range_name, "values": rows })),
        )
        .await
    }
}

#[async_trait]
impl Connector for SheetsConnector {
    fn service(&self) -> &str {
        "google_sheets"
    }

    async fn execute_action(
        &self,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ConnectorError> {
        match SheetsAction::parse(action)? {
            SheetsAction::GetSheetData => {
                let p: GetSheetDataParams = parse_params(action, params)?;
                require_non_empty(action, "sheet_id", &p.sheet_id)?;
                let values = self.get_sheet_data(&p.sheet_id, &p.range_name).await?;
                Ok(json!({ "values": values }))
            }
            SheetsAction::GetNewRows => {
                let p: GetNewRowsParams = parse_params(action, params)?;
                require_non_empty(action, "sheet_id", &p.sheet_id)?;
                let (rows, last) = self
                    .get_new_rows(&p.sheet_id, &p.tab_name, p.last_processed_row_index)
                    .await?;
                Ok(json!({ "new_rows": rows, "last_row_index": last }))
            }
            SheetsAction::AppendRow => {
                let p: AppendRowParams = parse_params(action, params)?;
                require_non_empty(action, "sheet_id", &p.sheet_id)?;
                let rows = into_rows(action, "values", p.values)?;
                let response = self.append_row(&p.sheet_id, &p.tab_name, rows).await?;
                Ok(json!({ "append_response": response }))
            }
            SheetsAction::UpdateCell => {
                let p: UpdateCellParams = parse_params(action, params)?;
                require_non_empty(action, "sheet_id", &p.sheet_id)?;
                let rows = into_rows(action, "value", p.value)?;
                let response = self.update_cell(&p.sheet_id, &p.range_name, rows).await?;
                Ok(json!({ "update_response": response }))
            }
        }
    }
}

/// Fill what a token file may leave out: the token endpoint comes from config,
/// the OAuth client from the client secret file.
fn complete_token(
    mut token: StoredToken,
    cfg: &GoogleSheetsConfig,
    overrides: &Map<String, Value>,
) -> Result<StoredToken, ConnectorError> {
    if token.token_uri.is_empty() {
        token.token_uri = cfg.token_uri.clone();
    }
    if token.client_id.is_empty() || token.client_secret.is_empty() {
        let path = override_str(overrides, "client_secret_file_path")
            .unwrap_or_else(|| cfg.client_secret_file.clone());
        let secret = ClientSecret::load(Path::new(&path))?;
        token.client_id = secret.client_id;
        token.client_secret = secret.client_secret;
    }
    Ok(token)
}

/// Shape a value as the API's list-of-rows. A list of lists passes through,
/// a flat list becomes one row, anything else becomes a single cell.
fn into_rows(action: &str, name: &str, value: Value) -> Result<Vec<Value>, ConnectorError> {
    match value {
        Value::Array(items) if items.is_empty() => Err(ConnectorError::InvalidParams {
            action: action.to_string(),
            reason: format!("'{}' must not be an empty list", name),
        }),
        Value::Array(items) if items.iter().all(Value::is_array) => Ok(items),
        Value::Array(items) => Ok(vec![Value::Array(items)]),
        other => Ok(vec![json!([other])]),
    }
}

fn update_summary(sheet_id: &str, range: &str, rows: &[Value]) -> Value {
    let columns = rows
        .first()
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    let cells: usize = rows
        .iter()
        .map(|r| r.as_array().map(Vec::len).unwrap_or(0))
        .sum();
    json!({
        "spreadsheetId": sheet_id,
        "updatedRange": range,
        "updatedRows": rows.len(),
        "updatedColumns": columns,
        "updatedCells": cells,
    })
}

fn simulated_values(sheet_id: &str, range_name: &str) -> Vec<Value> {
    match sheet_id {
        "YOUR_GOOGLE_SHEET_ID_PLACEHOLDER" if range_name.starts_with("Sheet1!A1:A1") => {
            vec![json!(["Simulated Text for Summary"])]
        }
        "test_sheet_id" if range_name == "Sheet1!A1:B2" => {
            vec![json!(["Header1", "Header2"]), json!(["Data1", "Data2"])]
        }
        _ => {
            tracing::info!(sheet_id = %sheet_id, range = %range_name, "No simulated data for range");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated() -> SheetsConnector {
        let cfg = GoogleSheetsConfig {
            simulate: true,
            ..GoogleSheetsConfig::default()
        };
        SheetsConnector::from_config(&cfg, &Map::new()).unwrap()
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_simulated_get_sheet_data() {
        let c = simulated();
        let out = c
            .execute_action(
                "get_sheet_data",
                &params(json!({"sheet_id": "YOUR_GOOGLE_SHEET_ID_PLACEHOLDER", "range_name": "Sheet1!A1:A1"})),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"values": [["Simulated Text for Summary"]]}));

        let out = c
            .execute_action(
                "get_sheet_data",
                &params(json!({"sheet_id": "test_sheet_id", "range_name": "Sheet1!A1:B2"})),
            )
            .await
            .unwrap();
        assert_eq!(out["values"][1][1], "Data2");

        let out = c
            .execute_action(
                "get_sheet_data",
                &params(json!({"sheet_id": "other", "range_name": "Sheet1!A1:B2"})),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"values": []}));
    }

    #[tokio::test]
    async fn test_simulated_get_new_rows() {
        let out = simulated()
            .execute_action(
                "get_new_rows",
                &params(json!({"sheet_id": "abc", "tab_name": "Sheet1", "last_processed_row_index": 4})),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"new_rows": [], "last_row_index": 4}));
    }

    #[tokio::test]
    async fn test_simulated_append_and_update() {
        let c = simulated();
        let out = c
            .execute_action(
                "append_row",
                &params(json!({"sheet_id": "abc", "tab_name": "Sheet1", "values": [["a", "b", "c"]]})),
            )
            .await
            .unwrap();
        assert_eq!(out["append_response"]["updates"]["updatedCells"], 3);
        assert_eq!(out["append_response"]["updates"]["updatedRange"], "Sheet1!A100:Z100");

        let out = c
            .execute_action(
                "update_cell",
                &params(json!({"sheet_id": "abc", "range_name": "Sheet1!C1", "value": "done"})),
            )
            .await
            .unwrap();
        assert_eq!(out["update_response"]["updatedRange"], "Sheet1!C1");
        assert_eq!(out["update_response"]["updatedCells"], 1);
    }

    #[tokio::test]
    async fn test_missing_params() {
        let err = simulated()
            .execute_action("get_sheet_data", &params(json!({"sheet_id": "abc"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidParams { .. }));
        assert!(err.to_string().contains("range_name"));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let err = simulated()
            .execute_action("delete_sheet", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownAction { .. }));
    }

    #[test]
    fn test_sparse_token_file_is_completed_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let token_path = tmp.path().join("token.json");
        let secret_path = tmp.path().join("secret.json");
        std::fs::write(&token_path, r#"{"token": "t", "refresh_token": "r"}"#).unwrap();
        std::fs::write(
            &secret_path,
            r#"{"installed": {"client_id": "cid", "client_secret": "shh"}}"#,
        )
        .unwrap();

        let cfg = GoogleSheetsConfig {
            token_file: token_path.display().to_string(),
            token_uri: "https://tokens.example/token".into(),
            ..GoogleSheetsConfig::default()
        };
        let overrides = params(json!({"client_secret_file_path": secret_path.display().to_string()}));
        let token = StoredToken::load(&token_path).unwrap();
        let token = complete_token(token, &cfg, &overrides).unwrap();
        assert_eq!(token.token_uri, "https://tokens.example/token");
        assert_eq!(token.client_id, "cid");
        assert_eq!(token.client_secret, "shh");

        // Without a readable client secret the connector cannot refresh.
        let missing = params(json!({"client_secret_file_path": tmp.path().join("nope.json").display().to_string()}));
        let err = SheetsConnector::from_config(&cfg, &missing).err().unwrap();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn test_missing_token_file_points_at_sheets_auth() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = GoogleSheetsConfig {
            token_file: tmp.path().join("token.json").display().to_string(),
            ..GoogleSheetsConfig::default()
        };
        let err = SheetsConnector::from_config(&cfg, &Map::new()).err().unwrap();
        assert!(err.to_string().contains("flowlink sheets-auth"));
    }

    #[test]
    fn test_into_rows() {
        let rows = |v| into_rows("append_row", "values", v).unwrap();
        assert_eq!(rows(json!("x")), vec![json!(["x"])]);
        assert_eq!(rows(json!(7)), vec![json!([7])]);
        assert_eq!(rows(json!(["a", "b"])), vec![json!(["a", "b"])]);
        assert_eq!(rows(json!([["a"], ["b"]])), vec![json!(["a"]), json!(["b"])]);
    }

    #[tokio::test]
    async fn test_empty_values_are_rejected() {
        let err = simulated()
            .execute_action(
                "append_row",
                &params(json!({"sheet_id": "abc", "tab_name": "Sheet1", "values": []})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidParams { .. }));
        assert!(err.details().unwrap().contains("empty list"));

        let err = simulated()
            .execute_action(
                "update_cell",
                &params(json!({"sheet_id": "abc", "range_name": "Sheet1!A1", "value": []})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidParams { .. }));
    }

    #[test]
    fn test_values_url_escapes_range() {
        let c = simulated();
        let url = c.values_url("abc", "My Tab!A1:B2").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/My%20Tab!A1:B2"
        );
    }
}
