//! Integration tests for the registryd HTTP RPC surface.
//!
//! Each test binds an ephemeral loopback port, serves the router in-process
//! and talks to it through the real `RegistryClient`.

use std::sync::Arc;
use std::time::Duration;

use registry_core::facade::*;
use registry_core::*;
use registryd::{serve, AppState};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    client: RegistryClient,
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(config: RegistryConfig) -> Self {
        let state = Arc::new(AppState::connect(&config).await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, state, async move {
            rx.await.ok();
        }));

        TestServer {
            client: RegistryClient::new(base_url.clone()).unwrap(),
            base_url,
            shutdown: Some(tx),
            task,
        }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        self.task.await.unwrap().unwrap();
    }
}

fn config(error_mode: ErrorMode, execution_mode: ExecutionMode) -> RegistryConfig {
    RegistryConfig {
        error_mode,
        execution_mode,
        ..RegistryConfig::default()
    }
}

#[tokio::test]
async fn health_and_model_round_trip() {
    let server = TestServer::start(config(ErrorMode::Envelope, ExecutionMode::Inline)).await;
    let client = &server.client;
    client.health().await.unwrap();

    let created = client
        .create_model(&CreateModelRequest {
            name: "gpt".to_string(),
            model_type: "llm".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created.created_at, created.updated_at);

    let loaded = client.get_model(&created.id.to_string()).await.unwrap();
    assert_eq!(loaded.body.name, "gpt");
    assert_eq!(loaded.body.model_type, "llm");

    let page = client.list_models(&ListRequest::new(10, "")).await.unwrap();
    assert!(page.models.iter().any(|m| m.id == created.id));

    server.stop().await;
}

#[tokio::test]
async fn execute_then_poll_status() {
    let server =
        TestServer::start(config(ErrorMode::Envelope, ExecutionMode::Background)).await;
    let client = &server.client;

    let started = client
        .execute_protocol(&ExecuteProtocolRequest {
            protocol_id: "p1".to_string(),
            context_id: "c1".to_string(),
            input: "hello".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(started.status, ExecutionStatus::Pending);

    let mut previous = ExecutionStatus::Pending;
    let mut finished = None;
    for _ in 0..200 {
        let status = client.get_protocol_status(&started.execution_id).await.unwrap();
        assert!(status.status.rank() >= previous.rank());
        previous = status.status;
        if status.status.is_terminal() {
            finished = Some(status);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let finished = finished.expect("execution never finished");
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert!(!finished.result.is_empty());
    assert_eq!(finished.metadata.get("input").map(String::as_str), Some("hello"));

    let listed = client
        .list_executions(&ListExecutionsRequest {
            protocol_id: "p1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.executions.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn data_lifecycle_over_http() {
    let server = TestServer::start(config(ErrorMode::Envelope, ExecutionMode::Inline)).await;
    let client = &server.client;

    let payload = vec![0u8, 1, 2, 254, 255];
    let added = client
        .add_data(&AddDataRequest {
            data_type: "binary".to_string(),
            content: payload.clone(),
            metadata: Metadata::new(),
        })
        .await
        .unwrap();
    assert!(added.body.verify_digest());

    let fetched = client.get_data(&added.id.to_string()).await.unwrap();
    assert_eq!(fetched.body.content, payload);

    let listed = client
        .list_data(&ListDataRequest {
            data_type: "binary".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.data.len(), 1);

    assert!(client.delete_data(&added.id.to_string()).await.unwrap().success);
    let err = client.delete_data(&added.id.to_string()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    server.stop().await;
}

#[tokio::test]
async fn envelope_mode_reports_errors_with_200() {
    let server = TestServer::start(config(ErrorMode::Envelope, ExecutionMode::Inline)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/rpc/GetData", server.base_url))
        .json(&serde_json::json!({ "id": "not-an-id" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body.get("payload").is_none());
    assert_eq!(body["error"]["code"], "invalid_id");
    assert_eq!(body["error"]["retryable"], false);

    let err = server.client.get_data("not-an-id").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidId);

    server.stop().await;
}

#[tokio::test]
async fn status_mode_maps_codes_to_http() {
    let server = TestServer::start(config(ErrorMode::Status, ExecutionMode::Inline)).await;
    let http = reqwest::Client::new();

    let missing = http
        .post(format!("{}/rpc/DeleteData", server.base_url))
        .json(&serde_json::json!({ "id": ResourceId::new().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let malformed = http
        .post(format!("{}/rpc/CreateModel", server.base_url))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = malformed.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_argument");

    // The client decodes the same envelope regardless of status.
    let err = server.client.get_model("bogus").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidId);

    server.stop().await;
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let server = TestServer::start(config(ErrorMode::Envelope, ExecutionMode::Inline)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/rpc/DropEverything", server.base_url))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn pagination_over_http_visits_every_context_once() {
    let server = TestServer::start(config(ErrorMode::Envelope, ExecutionMode::Inline)).await;
    let client = &server.client;

    let mut created = Vec::new();
    for i in 0..9 {
        let ctx = client
            .create_context(&CreateContextRequest {
                name: format!("ctx-{i}"),
                content: Some(format!("body {i}")),
                ..Default::default()
            })
            .await
            .unwrap();
        created.push(ctx.id);
    }

    let mut seen = Vec::new();
    let mut token = String::new();
    loop {
        let page = client
            .list_contexts(&ListRequest::new(4, token.clone()))
            .await
            .unwrap();
        seen.extend(page.contexts.iter().map(|c| c.id));
        if page.contexts.is_empty() || page.next_page_token.is_empty() {
            break;
        }
        token = page.next_page_token;
    }
    assert_eq!(seen, created);

    server.stop().await;
}
