use chrono::{Duration, Utc};
use flowlink::config::Config;
use flowlink::connector::google_auth::StoredToken;
use flowlink::connector::{ConnectorFactory, ConnectorRegistry};
use flowlink::metrics::Metrics;
use flowlink::workflow::{load_definition, parse_definition, WorkflowExecutor};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor(config: Config) -> WorkflowExecutor {
    let factory: Arc<dyn ConnectorFactory> =
        Arc::new(ConnectorRegistry::with_defaults(Arc::new(config)));
    WorkflowExecutor::new(factory)
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "model": "gpt-3.5-turbo",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13}
    })
}

#[tokio::test]
async fn test_sheet_to_openai_to_email() {
    flowlink::logger::init_test();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_string_contains(
            "Summarize the following text: Simulated Text for Summary",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("A crisp summary.")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.openai.api_key = "sk-test".into();
    config.openai.api_base = mock_server.uri();
    config.google_sheets.simulate = true;
    config.email.simulate = true;

    let definition = load_definition(
        &Path::new(env!("CARGO_MANIFEST_DIR")).join("workflows/example.json"),
    )
    .unwrap();
    let cache = executor(config).run(&definition).await;

    let ids: Vec<_> = cache.step_ids().collect();
    assert_eq!(
        ids,
        vec!["trigger", "sheet_reader", "summarizer", "sheet_writer", "notifier"]
    );
    assert!(cache.failures().is_empty(), "failures: {:?}", cache.failures());

    assert_eq!(
        cache.get("summarizer").unwrap(),
        &json!({"generated_text": "A crisp summary."})
    );
    assert_eq!(
        cache.get("sheet_writer").unwrap()["update_response"]["updatedRange"],
        "Sheet1!B1"
    );
    assert_eq!(cache.get("notifier").unwrap(), &json!({"status": "sent"}));
}

#[tokio::test]
async fn test_api_error_is_recorded_and_run_continues() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "requests"}
        })))
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.openai.api_key = "sk-test".into();
    config.openai.api_base = mock_server.uri();
    config.email.simulate = true;

    let definition = parse_definition(
        r#"{
        "name": "rate limited",
        "trigger": {"id": "trigger", "service": "manual", "event": "start", "config": {"topic": "rust"}},
        "actions": [
            {"id": "write", "service": "openai", "action": "generate_text",
             "config": {"prompt": "Write about {trigger.config.topic}"}},
            {"id": "mail", "service": "email", "action": "send_email",
             "config": {"recipient_email": "a@example.com", "subject": "s", "body": "{write.generated_text}"}},
            {"id": "mail_static", "service": "email", "action": "send_email",
             "config": {"recipient_email": "a@example.com", "subject": "s", "body": "static"}}
        ]
    }"#,
    )
    .unwrap();

    let metrics = Metrics::new();
    let cache = executor(config)
        .with_metrics(metrics.clone())
        .run(&definition)
        .await;

    let write = cache.get("write").unwrap();
    assert_eq!(write["error_kind"], "connector_execution_error");
    assert!(write["error_message"]
        .as_str()
        .unwrap()
        .contains("OpenAI API error (429): Rate limit reached"));
    assert!(write["details"].as_str().unwrap().contains("requests"));

    // `write.generated_text` does not exist on a failure entry.
    let mail = cache.get("mail").unwrap();
    assert_eq!(mail["error_kind"], "template_resolution_error");

    assert_eq!(cache.get("mail_static").unwrap(), &json!({"status": "sent"}));

    let report = metrics.report().await;
    assert_eq!(report.total_action_calls, 2);
    assert_eq!(report.total_action_errors, 1);
}

#[tokio::test]
async fn test_missing_credentials_are_init_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.google_sheets.token_file = tmp.path().join("token.json").display().to_string();

    let definition = parse_definition(
        r#"{
        "name": "unconfigured",
        "trigger": {"id": "t", "service": "manual", "event": "start", "config": {}},
        "actions": [
            {"id": "ai", "service": "openai", "action": "generate_text", "config": {"prompt": "hi"}},
            {"id": "sheet", "service": "google_sheets", "action": "get_sheet_data",
             "config": {"sheet_id": "abc", "range_name": "A1"}},
            {"id": "mail", "service": "email", "action": "send_email",
             "config": {"recipient_email": "a@example.com", "subject": "s", "body": "b"}},
            {"id": "ai_override", "service": "openai", "action": "generate_text",
             "connector_config": {"simulate": true}, "config": {"prompt": "hi"}}
        ]
    }"#,
    )
    .unwrap();

    let cache = executor(config).run(&definition).await;

    for step in ["ai", "sheet", "mail"] {
        assert_eq!(
            cache.get(step).unwrap()["error_kind"],
            "connector_init_error",
            "step {}",
            step
        );
    }
    assert!(cache.get("sheet").unwrap()["error_message"]
        .as_str()
        .unwrap()
        .contains("sheets-auth"));
    assert!(!cache.is_failure("ai_override"));
}

#[tokio::test]
async fn test_sheets_refreshes_expired_token() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let token_path = tmp.path().join("token.json");

    StoredToken {
        token: "stale".into(),
        refresh_token: Some("refresh-123".into()),
        token_uri: format!("{}/token", mock_server.uri()),
        client_id: "cid".into(),
        client_secret: "secret".into(),
        scopes: vec![],
        expiry: Some(Utc::now() - Duration::minutes(5)),
    }
    .save(&token_path)
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=refresh-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/spreadsheets/abc/values/Sheet1!A1:B2"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "range": "Sheet1!A1:B2",
            "majorDimension": "ROWS",
            "values": [["Name", "Score"], ["Ada", "10"]]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/spreadsheets/abc/values/Sheet1:append"))
        .and(query_param("valueInputOption", "USER_ENTERED"))
        .and(query_param("insertDataOption", "INSERT_ROWS"))
        .and(body_string_contains("Ada"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": "abc",
            "updates": {"updatedRows": 1}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.google_sheets.api_base = mock_server.uri();
    config.google_sheets.token_file = token_path.display().to_string();

    let definition = parse_definition(
        r#"{
        "name": "copy row",
        "trigger": {"id": "trigger", "service": "google_sheets", "event": "new_row", "config": {"sheet": "abc"}},
        "actions": [
            {"id": "read", "service": "google_sheets", "action": "get_sheet_data",
             "config": {"sheet_id": "{trigger.config.sheet}", "range_name": "Sheet1!A1:B2"}},
            {"id": "copy", "service": "google_sheets", "action": "append_row",
             "config": {"sheet_id": "abc", "tab_name": "Sheet1", "values": ["{read.values.1.0}", "{read.values.1.1}"]}}
        ]
    }"#,
    )
    .unwrap();

    let cache = executor(config).run(&definition).await;
    assert!(cache.failures().is_empty(), "failures: {:?}", cache.failures());
    assert_eq!(cache.get("read").unwrap()["values"][1][0], "Ada");
    assert_eq!(
        cache.get("copy").unwrap()["append_response"]["updates"]["updatedRows"],
        1
    );

    let saved = StoredToken::load(&token_path).unwrap();
    assert_eq!(saved.token, "fresh");
    assert!(!saved.is_expired(Utc::now()));
}

#[tokio::test]
async fn test_reused_connector_refreshes_once() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let token_path = tmp.path().join("token.json");

    StoredToken {
        token: "stale".into(),
        refresh_token: Some("r".into()),
        token_uri: format!("{}/token", mock_server.uri()),
        client_id: "cid".into(),
        client_secret: "secret".into(),
        scopes: vec![],
        expiry: Some(Utc::now() - Duration::minutes(1)),
    }
    .save(&token_path)
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": [["x"]]})))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.engine.reuse_connectors = true;
    config.google_sheets.api_base = mock_server.uri();
    config.google_sheets.token_file = token_path.display().to_string();

    let definition = parse_definition(
        r#"{
        "name": "two reads",
        "trigger": {"id": "t", "service": "manual", "event": "start", "config": {}},
        "actions": [
            {"id": "a", "service": "google_sheets", "action": "get_sheet_data", "connector_id": "sheets",
             "config": {"sheet_id": "abc", "range_name": "Sheet1!A1"}},
            {"id": "b", "service": "google_sheets", "action": "get_sheet_data", "connector_id": "sheets",
             "config": {"sheet_id": "abc", "range_name": "Sheet1!A2"}}
        ]
    }"#,
    )
    .unwrap();

    let cache = executor(config).run(&definition).await;
    assert_eq!(cache.get("a").unwrap(), &json!({"values": [["x"]]}));
    assert_eq!(cache.get("b").unwrap(), &json!({"values": [["x"]]}));
}
