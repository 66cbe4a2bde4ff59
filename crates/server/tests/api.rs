//! HTTP surface tests against the full router with a fixed-draft planner.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use orra_engine::{ChannelConfig, SchedulerConfig};
use orra_ports::planner::{DraftTask, PlanDraft, Planner, PlannerError, ServiceDescriptor};
use orra_ports::webhook::{WebhookError, WebhookTransport};
use orra_server::{build_state, router, VERSION_HEADER};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct FixedPlanner(PlanDraft);

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(
        &self,
        _action: &str,
        _input: &Value,
        _services: &[ServiceDescriptor],
    ) -> Result<PlanDraft, PlannerError> {
        Ok(self.0.clone())
    }
}

struct NullWebhooks;

#[async_trait]
impl WebhookTransport for NullWebhooks {
    async fn post(&self, _url: &str, _payload: &Value) -> Result<(), WebhookError> {
        Ok(())
    }
}

fn chain_draft() -> PlanDraft {
    PlanDraft {
        tasks: vec![
            DraftTask {
                key: "A".into(),
                service_name: "A".into(),
                inputs: [("url".to_string(), json!("$input.url"))].into_iter().collect(),
            },
            DraftTask {
                key: "B".into(),
                service_name: "B".into(),
                inputs: [("doc".to_string(), json!("$tasks.A.doc"))].into_iter().collect(),
            },
        ],
        output: json!("$tasks.B.summary"),
    }
}

fn app() -> Router {
    let state = build_state(
        Arc::new(FixedPlanner(chain_draft())),
        Arc::new(NullWebhooks),
        ChannelConfig::default(),
        SchedulerConfig::default(),
    );
    router(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value, axum::http::HeaderMap) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body, headers)
}

fn post(path: &str, api_key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(path: &str, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

async fn register_project(app: &Router) -> (String, String) {
    let (status, body, _) = send(app, post("/register/project", None, json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["id"].as_str().unwrap().to_string(),
        body["apiKey"].as_str().unwrap().to_string(),
    )
}

async fn register_service(app: &Router, api_key: &str, name: &str, input: Value, output: Value) -> String {
    let (status, body, _) = send(
        app,
        post(
            "/register/service",
            Some(api_key),
            json!({
                "name": name,
                "inputSchema": input,
                "outputSchema": output,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("registered"));
    body["id"].as_str().unwrap().to_string()
}

fn url_doc_schemas() -> (Value, Value) {
    (
        json!({"properties": {"url": {"type": "string"}}, "required": ["url"]}),
        json!({"properties": {"doc": {"type": "string"}}, "required": ["doc"]}),
    )
}

#[tokio::test]
async fn project_registration_returns_key_and_version_header() {
    let app = app();
    let (status, body, headers) = send(&app, post("/register/project", None, json!({}))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body["id"].as_str().unwrap().starts_with("p-"));
    assert!(body["apiKey"].as_str().unwrap().starts_with("sk-orra-"));
    assert!(headers.contains_key(VERSION_HEADER));
}

#[tokio::test]
async fn authenticated_routes_reject_missing_or_bad_keys() {
    let app = app();
    let (status, body, headers) = send(&app, post("/apikeys", None, json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], json!("unauthorized"));
    assert!(headers.contains_key(VERSION_HEADER));

    let (status, _, _) = send(&app, post("/apikeys", Some("sk-orra-bogus"), json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn additional_api_keys_are_equally_privileged() {
    let app = app();
    let (_, primary) = register_project(&app).await;

    let (status, body, _) = send(&app, post("/apikeys", Some(&primary), json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let minted = body["apiKey"].as_str().unwrap().to_string();

    // the minted key can itself mint keys
    let (status, _, _) = send(&app, post("/apikeys", Some(&minted), json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn webhook_urls_must_be_absolute() {
    let app = app();
    let (_, key) = register_project(&app).await;

    let (status, _, _) = send(
        &app,
        post("/webhooks", Some(&key), json!({"url": "/relative/hook"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = send(
        &app,
        post("/webhooks", Some(&key), json!({"url": "https://hooks.example/x"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["url"], json!("https://hooks.example/x"));
}

#[tokio::test]
async fn service_reregistration_keeps_id() {
    let app = app();
    let (_, key) = register_project(&app).await;
    let (input, output) = url_doc_schemas();

    let first = register_service(&app, &key, "A", input.clone(), output.clone()).await;
    let second = register_service(&app, &key, "A", input, output).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn agent_registration_uses_same_shape() {
    let app = app();
    let (_, key) = register_project(&app).await;
    let (input, output) = url_doc_schemas();

    let (status, body, _) = send(
        &app,
        post(
            "/register/agent",
            Some(&key),
            json!({"name": "researcher", "inputSchema": input, "outputSchema": output}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("registered"));
}

#[tokio::test]
async fn orchestration_with_unknown_service_is_422() {
    let app = app();
    let (_, key) = register_project(&app).await;
    // only A registered; the draft also needs B
    let (input, output) = url_doc_schemas();
    register_service(&app, &key, "A", input, output).await;

    let (status, body, _) = send(
        &app,
        post(
            "/orchestrations",
            Some(&key),
            json!({"action": "summarise", "data": {"url": "u"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], json!("NotActionable"));
    assert!(body["error"].as_str().unwrap().contains('B'));
}

#[tokio::test]
async fn executable_orchestration_is_accepted_and_listed() {
    let app = app();
    let (_, key) = register_project(&app).await;
    let (input, output) = url_doc_schemas();
    register_service(&app, &key, "A", input, output).await;
    register_service(
        &app,
        &key,
        "B",
        json!({"properties": {"doc": {"type": "string"}}, "required": ["doc"]}),
        json!({"properties": {"summary": {"type": "string"}}, "required": ["summary"]}),
    )
    .await;

    let (status, body, _) = send(
        &app,
        post(
            "/orchestrations",
            Some(&key),
            json!({"action": "summarise", "data": {"url": "u"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], json!("Processing"));
    let id = body["id"].as_str().unwrap().to_string();

    let (status, listed, _) = send(&app, get("/orchestrations", Some(&key))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, inspection, _) = send(
        &app,
        get(&format!("/orchestrations/inspections/{id}"), Some(&key)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inspection["tasks"].as_array().unwrap().len(), 2);
    assert_eq!(inspection["tasks"][0]["serviceName"], json!("A"));
}

#[tokio::test]
async fn inspection_is_project_scoped() {
    let app = app();
    let (_, owner_key) = register_project(&app).await;
    let (_, intruder_key) = register_project(&app).await;
    let (input, output) = url_doc_schemas();
    register_service(&app, &owner_key, "A", input, output).await;
    register_service(
        &app,
        &owner_key,
        "B",
        json!({"properties": {"doc": {"type": "string"}}, "required": ["doc"]}),
        json!({"properties": {"summary": {"type": "string"}}, "required": ["summary"]}),
    )
    .await;

    let (_, body, _) = send(
        &app,
        post(
            "/orchestrations",
            Some(&owner_key),
            json!({"action": "summarise", "data": {"url": "u"}}),
        ),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, _, _) = send(
        &app,
        get(&format!("/orchestrations/inspections/{id}"), Some(&intruder_key)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(
        &app,
        get("/orchestrations/inspections/orch-missing", Some(&owner_key)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_action_is_a_validation_error() {
    let app = app();
    let (_, key) = register_project(&app).await;

    let (status, body, _) = send(
        &app,
        post("/orchestrations", Some(&key), json!({"action": "", "data": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], json!("validation"));
}
