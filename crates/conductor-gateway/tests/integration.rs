//! Gateway integration tests: start a real gateway and drive it over HTTP.
//!
//! Run with: `cargo test -p conductor-gateway --test integration`

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use conductor_core::config::{Config, IntegrationConfig, ServerConfig, WorkspaceConfig};
use conductor_core::session_store::MemorySessionStore;
use conductor_gateway::GatewayState;
use conductor_providers::LlmClient;
use conductor_providers::credentials::StaticCredentialStore;
use conductor_providers::scripted::ScriptedClient;
use conductor_stream::sse::SseParser;

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct TestGateway {
    base: String,
    _dir: tempfile::TempDir,
}

async fn start_test_gateway(llm: Arc<dyn LlmClient>) -> TestGateway {
    let port = find_free_port();
    let dir = tempfile::tempdir().unwrap();

    let config = Config {
        server: Some(ServerConfig {
            port,
            bind: Some("127.0.0.1".into()),
            cors_origins: Vec::new(),
        }),
        workspace: Some(WorkspaceConfig {
            root: Some(dir.path().join("workspaces").display().to_string()),
            uploads_dir: Some(dir.path().join("uploads").display().to_string()),
            ..WorkspaceConfig::default()
        }),
        integrations: vec![IntegrationConfig {
            id: "gh-main".into(),
            provider: "github".into(),
            token: None,
            token_env: None,
            settings: Default::default(),
        }],
        ..Config::default()
    };
    let credentials = StaticCredentialStore::new().with_token("gh-main", "ghp_test");

    let state = Arc::new(
        GatewayState::new(
            Arc::new(config),
            Arc::new(MemorySessionStore::new()),
            llm,
            Arc::new(credentials),
        )
        .unwrap(),
    );

    tokio::spawn(async move {
        let _ = conductor_gateway::start_gateway(state, port).await;
    });

    let base = format!("http://127.0.0.1:{port}");
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("{base}/health")).await.is_ok() {
            break;
        }
    }
    TestGateway { base, _dir: dir }
}

fn scripted_reply() -> Arc<dyn LlmClient> {
    Arc::new(ScriptedClient::new(vec![
        json!({"type": "system", "subtype": "init", "session_id": "llm-1"}),
        json!({"type": "assistant", "session_id": "llm-1", "message": {"content": [
            {"type": "text", "text": "hello there"}
        ]}}),
        json!({"type": "result", "subtype": "success", "session_id": "llm-1",
            "usage": {"input_tokens": 3, "output_tokens": 5}}),
    ]))
}

async fn create_session(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{base}/api/sessions"))
        .json(&json!({"project_id": "proj-1", "agent_id": "agent-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

fn chat_body(text: &str) -> Value {
    json!({"messages": [{"role": "user", "content": text}]})
}

fn sse_chunks(body: &[u8]) -> Vec<String> {
    let mut parser = SseParser::new();
    let mut events = parser.push(body);
    events.extend(parser.finish());
    events.into_iter().map(|e| e.data).collect()
}

#[tokio::test]
async fn test_health_endpoint() {
    let gw = start_test_gateway(scripted_reply()).await;
    let resp = reqwest::get(format!("{}/health", gw.base)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeExecutions"], 0);
    let workflows = body["workflows"].as_array().unwrap();
    let assistant = workflows.iter().find(|w| w["id"] == "assistant").unwrap();
    assert!(!assistant["description"].as_str().unwrap().is_empty());
    let integrations = body["integrations"].as_array().unwrap();
    let github = integrations.iter().find(|i| i["id"] == "github").unwrap();
    assert_eq!(github["name"], "GitHub");
}

#[tokio::test]
async fn test_session_crud() {
    let gw = start_test_gateway(scripted_reply()).await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &gw.base).await;

    let resp = client
        .get(format!("{}/api/sessions/{id}", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["project_id"], "proj-1");

    let list: Value = client
        .get(format!("{}/api/sessions", gw.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);

    let resp = client
        .delete(format!("{}/api/sessions/{id}", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("{}/api/sessions/{id}", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/api/sessions", gw.base))
        .json(&json!({"project_id": "p", "agent_id": "a", "workflow": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_chat_ui_message_stream() {
    let gw = start_test_gateway(scripted_reply()).await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &gw.base).await;

    let resp = client
        .post(format!("{}/api/sessions/{id}/chat", gw.base))
        .json(&chat_body("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["x-accel-buffering"], "no");
    assert_eq!(resp.headers()["cache-control"], "no-cache, no-store, must-revalidate");

    let body = resp.bytes().await.unwrap();
    let chunks = sse_chunks(&body);
    assert_eq!(chunks.last().unwrap(), "[DONE]");

    let parsed: Vec<Value> = chunks[..chunks.len() - 1]
        .iter()
        .map(|c| serde_json::from_str(c).unwrap())
        .collect();
    assert_eq!(parsed[0]["type"], "start");
    let finish = parsed.last().unwrap();
    assert_eq!(finish["type"], "finish");
    assert_eq!(parsed.iter().filter(|c| c["type"] == "finish").count(), 1);
    assert!(
        parsed
            .iter()
            .any(|c| c["type"] == "text-delta" && c["delta"] == "hello there")
    );
    assert!(!parsed.iter().any(|c| c["type"] == "error"));

    let session: Value = client
        .get(format!("{}/api/sessions/{id}", gw.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["llm_session_id"], "llm-1");
}

#[tokio::test]
async fn test_chat_legacy_data_stream() {
    let gw = start_test_gateway(scripted_reply()).await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &gw.base).await;

    let resp = client
        .post(format!("{}/api/sessions/{id}/chat?protocol=v4", gw.base))
        .json(&chat_body("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/octet-stream");
    assert_eq!(resp.headers()["x-vercel-ai-data-stream"], "v1");

    let body = resp.text().await.unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert!(lines.iter().any(|l| l.starts_with("9:") && l.contains("hello there")));
    assert_eq!(lines.iter().filter(|l| l.starts_with("d:")).count(), 1);
    assert!(lines.last().unwrap().starts_with("d:"));
}

#[tokio::test]
async fn test_chat_failure_is_in_band() {
    let gw = start_test_gateway(Arc::new(ScriptedClient::failing("model unavailable"))).await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &gw.base).await;

    let resp = client
        .post(format!("{}/api/sessions/{id}/chat?protocol=v4", gw.base))
        .json(&chat_body("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.text().await.unwrap();
    let lines: Vec<&str> = body.lines().collect();
    let errors: Vec<_> = lines.iter().filter(|l| l.starts_with("3:")).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("model unavailable"));
    assert!(lines.last().unwrap().starts_with("d:"));
}

#[tokio::test]
async fn test_chat_rejections_before_streaming() {
    let gw = start_test_gateway(scripted_reply()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/sessions/missing/chat", gw.base))
        .json(&chat_body("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let id = create_session(&client, &gw.base).await;
    let resp = client
        .post(format!("{}/api/sessions/{id}/chat", gw.base))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}], "mcps": ["myspace"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("myspace"));

    let resp = client
        .post(format!("{}/api/sessions/{id}/chat", gw.base))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}], "workflow": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let session: Value = client
        .get(format!("{}/api/sessions/{id}", gw.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["messages"].as_array().unwrap().len(), 0);
    assert_eq!(session["mcps"], json!([]));

    let resp = client
        .post(format!("{}/api/sessions/{id}/chat", gw.base))
        .json(&chat_body("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.bytes().await.unwrap();
    let session: Value = client
        .get(format!("{}/api/sessions/{id}", gw.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["messages"].as_array().unwrap().len(), 1);

    let id = create_session(&client, &gw.base).await;
    let resp = client
        .post(format!("{}/api/sessions/{id}/chat?protocol=v9", gw.base))
        .json(&chat_body("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/sessions/{id}/chat", gw.base))
        .json(&json!({"messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_cancel_execution_ends_stream() {
    let gw = start_test_gateway(Arc::new(ScriptedClient::new(Vec::new()).hanging())).await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &gw.base).await;

    let resp = client
        .post(format!("{}/api/sessions/{id}/chat", gw.base))
        .json(&chat_body("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut execution_id = None;
    for _ in 0..50 {
        let list: Value = client
            .get(format!("{}/api/executions", gw.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if let Some(first) = list.as_array().and_then(|l| l.first()) {
            execution_id = first["execution_id"].as_str().map(String::from);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let execution_id = execution_id.expect("execution registered");

    let cancel = client
        .post(format!("{}/api/executions/{execution_id}/cancel", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(cancel.status(), 202);

    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    let read = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
    })
    .await;
    assert!(read.is_ok(), "stream did not end after cancel");

    let chunks = sse_chunks(&body);
    assert_eq!(chunks.last().unwrap(), "[DONE]");
    let finish: Value = serde_json::from_str(&chunks[chunks.len() - 2]).unwrap();
    assert_eq!(finish["type"], "finish");
    assert!(!chunks.iter().any(|c| c.contains("\"type\":\"error\"")));

    let again = client
        .post(format!("{}/api/executions/unknown/cancel", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}
