use std::sync::Arc;
use std::time::Duration;

use a2ascope_agents::a2a::A2ATransport;
use a2ascope_agents::chat::LogStatus;
use a2ascope_agents::{
    AgentAuthConfig, AgentStore, HttpTransport, MessageStatus, RpcMethod, SessionDriver,
    TaskClient, TaskState, normalize_agent_card, well_known_card_url,
};
use a2ascope_common::AgentId;
use a2ascope_config::ClientConfig;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(timeout_secs: u64) -> Arc<HttpTransport> {
    let config = ClientConfig {
        request_timeout_secs: timeout_secs,
        ..ClientConfig::default()
    };
    Arc::new(HttpTransport::new(&config).unwrap())
}

fn driver_for(
    server: &MockServer,
    streaming: bool,
    timeout_secs: u64,
) -> (SessionDriver<HttpTransport>, AgentId) {
    let card = normalize_agent_card(
        &json!({
            "name": "Mocked",
            "url": format!("{}/rpc", server.uri()),
            "capabilities": { "streaming": streaming }
        }),
        None,
    )
    .unwrap();
    let store = Arc::new(AgentStore::default());
    let id = store.register(card, AgentAuthConfig::None);
    (SessionDriver::new(transport(timeout_secs), store), id)
}

fn sse(frames: &[&str]) -> String {
    frames
        .iter()
        .map(|f| format!("data: {f}\n\n"))
        .collect()
}

#[tokio::test]
async fn discovers_card_at_well_known_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/agent-card.json"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Echo",
            "url": format!("{}/rpc", server.uri()),
            "skills": [{ "id": "echo", "name": "Echo back" }],
            "capabilities": { "streaming": true }
        })))
        .mount(&server)
        .await;

    let url = well_known_card_url(&server.uri());
    let headers = [("Authorization".to_string(), "Bearer tok".to_string())]
        .into_iter()
        .collect();
    let payload = transport(5).fetch_card(&url, &headers).await.unwrap();
    let card = normalize_agent_card(&payload, Some(&url)).unwrap();

    assert_eq!(card.id.as_str(), url);
    assert_eq!(card.endpoints[0].url, format!("{}/rpc", server.uri()));
    assert!(card.supports_streaming());
    assert_eq!(card.skills[0].name, "Echo back");
}

#[tokio::test]
async fn non_streaming_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(header("content-type", "application/json"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "message/send",
            "params": { "message": { "role": "user", "parts": [{ "kind": "text", "text": "ping" }] } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {
                "kind": "message",
                "contextId": "ctx-1",
                "parts": [{ "kind": "text", "text": "pong" }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (driver, id) = driver_for(&server, false, 5);
    let outcome = driver.send(&id, "ping").await.unwrap();

    assert_eq!(outcome.status, MessageStatus::Complete);
    assert_eq!(outcome.content, "pong");
    assert_eq!(driver.store().context_id(&id).as_deref(), Some("ctx-1"));
    let log = &driver.store().logs(&id)[0];
    assert_eq!(log.http_status, Some(200));
    assert_eq!(log.status, Some(LogStatus::Success));
}

#[tokio::test]
async fn streaming_exchange_skips_malformed_frames() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"jsonrpc":"2.0","id":"1","result":{"kind":"status-update","taskId":"t1","contextId":"c1","status":{"state":"working"}}}"#,
        r#"{not json"#,
        r#"{"jsonrpc":"2.0","id":"1","result":{"kind":"task","id":"t1","contextId":"c1","status":{"state":"completed","message":{"kind":"message","role":"agent","parts":[{"kind":"text","text":"All done"}]}}}}"#,
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({ "method": "message/stream" })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let (driver, id) = driver_for(&server, true, 5);
    let outcome = driver.send(&id, "go").await.unwrap();

    assert!(outcome.streamed);
    assert_eq!(outcome.status, MessageStatus::Complete);
    assert_eq!(outcome.content, "All done");

    let store = driver.store();
    assert_eq!(store.context_id(&id).as_deref(), Some("c1"));
    assert_eq!(store.active_task_id(&id), None);
    let tasks = store.tasks(&id);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::Completed);

    let frames = store.logs(&id)[0].response_payload.clone().unwrap();
    assert_eq!(frames.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn stream_request_answered_with_plain_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(json!({ "method": "message/stream" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "kind": "message", "parts": [{ "kind": "text", "text": "no sse here" }] }
        })))
        .mount(&server)
        .await;

    let (driver, id) = driver_for(&server, false, 5);
    driver.store().set_method(&id, RpcMethod::MessageStream).unwrap();
    let outcome = driver.send(&id, "hi").await.unwrap();

    assert!(outcome.streamed);
    assert_eq!(outcome.status, MessageStatus::Complete);
    assert_eq!(outcome.content, "no sse here");
    let frames = driver.store().logs(&id)[0].response_payload.clone().unwrap();
    assert_eq!(frames.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn slow_agent_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "result": "late" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let (driver, id) = driver_for(&server, false, 1);
    let outcome = driver.send(&id, "hi").await.unwrap();

    assert!(outcome.is_error());
    assert_eq!(
        outcome.content,
        "Request failed: The agent did not respond within 1 seconds."
    );
    assert_eq!(driver.store().logs(&id)[0].status, Some(LogStatus::Error));
}

#[tokio::test]
async fn http_error_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let (driver, id) = driver_for(&server, false, 5);
    let outcome = driver.send(&id, "hi").await.unwrap();

    assert!(outcome.is_error());
    assert_eq!(
        driver.store().last_error(&id).as_deref(),
        Some("The agent responded with HTTP status 503.")
    );
    assert_eq!(driver.store().logs(&id)[0].http_status, Some(503));
}

#[tokio::test]
async fn fetches_task_through_card_url() {
    let server = MockServer::start().await;
    let card_url = well_known_card_url(&server.uri());
    Mock::given(method("GET"))
        .and(path("/.well-known/agent-card.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Tasker",
            "url": format!("{}/rpc", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({
            "method": "tasks/get",
            "params": { "id": "t-42", "historyLength": 3 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {
                "kind": "task",
                "id": "t-42",
                "contextId": "ctx",
                "status": { "state": "input-required", "message": "Which date?" }
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let store = AgentStore::default();
    let card = normalize_agent_card(
        &json!({ "name": "Tasker", "url": format!("{}/rpc", server.uri()) }),
        Some(&card_url),
    )
    .unwrap();
    let id = store.register(card, AgentAuthConfig::None);

    let client = TaskClient::new(transport(5), Some(10));
    let first = client
        .fetch_task(&store, &id, &card_url, "t-42", Some(3), None)
        .await
        .unwrap()
        .unwrap();
    let again = client
        .fetch_task(&store, &id, &card_url, "t-42", Some(3), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.state, TaskState::InputRequired);
    assert_eq!(first.message.as_deref(), Some("Which date?"));
    assert_eq!(again.created_at, first.created_at);
    assert_eq!(store.tasks(&id).len(), 1);
    assert_eq!(store.logs(&id).len(), 2);
}

#[tokio::test]
async fn request_log_replays_as_curl() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "ok" })))
        .mount(&server)
        .await;

    let (driver, id) = driver_for(&server, false, 5);
    driver
        .store()
        .set_auth(&id, AgentAuthConfig::Bearer { token: "s3cret".into() });
    driver.send(&id, "it's me").await.unwrap();

    let log = &driver.store().logs(&id)[0];
    let curl = a2ascope_agents::to_curl(log);
    assert!(curl.starts_with(&format!("curl -X POST '{}/rpc'", server.uri())));
    assert!(curl.contains("-H 'Authorization: Bearer s3cret'"));
    assert!(curl.contains(r"it'\''s me"));

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["params"]["message"]["parts"][0]["text"], "it's me");
}
