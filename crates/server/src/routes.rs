//! HTTP surface: project/service registration, orchestration submission and
//! inspection, and the worker channel upgrade.

use crate::auth::AuthenticatedProject;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use orra_core::schema::Schema;
use orra_core::service::{IdempotencyBehavior, ServiceType};
use orra_core::{ApiKey, OrchestrationId, ServiceId, ServiceInfo};
use orra_engine::{ChannelManager, OrchestrationInspection};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub const VERSION_HEADER: &str = "Orra-Version";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register/project", post(register_project))
        .route("/apikeys", post(create_api_key))
        .route("/webhooks", post(add_webhook))
        .route("/register/service", post(register_service))
        .route("/register/agent", post(register_agent))
        .route("/orchestrations", post(submit_orchestration).get(list_orchestrations))
        .route("/orchestrations/inspections/{id}", get(inspect_orchestration))
        .route("/ws", get(worker_channel))
        .layer(axum::middleware::map_response(stamp_version))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn stamp_version(mut response: Response) -> Response {
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

async fn register_project(State(state): State<AppState>) -> impl IntoResponse {
    let project = state.projects.create().await;
    (
        StatusCode::CREATED,
        Json(json!({"id": project.id, "apiKey": project.api_key})),
    )
}

async fn create_api_key(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
) -> Result<impl IntoResponse, ApiError> {
    let key = state.projects.mint_api_key(&project.id).await?;
    Ok((StatusCode::CREATED, Json(json!({"apiKey": key}))))
}

#[derive(Deserialize)]
struct WebhookRequest {
    url: String,
}

async fn add_webhook(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(request): Json<WebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.projects.add_webhook(&project.id, &request.url).await?;
    Ok((StatusCode::CREATED, Json(json!({"url": request.url}))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterServiceRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_schema: Schema,
    #[serde(default)]
    output_schema: Schema,
    #[serde(default)]
    idempotency_behavior: IdempotencyBehavior,
    #[serde(default)]
    revertible: bool,
    #[serde(default)]
    compensation_input_schema: Option<Schema>,
    #[serde(default)]
    task_timeout_secs: Option<u64>,
}

async fn register_worker_kind(
    state: AppState,
    project: orra_core::Project,
    request: RegisterServiceRequest,
    service_type: ServiceType,
) -> Result<Response, ApiError> {
    let service = state
        .services
        .register_or_update(ServiceInfo {
            id: ServiceId::generate(),
            project_id: project.id,
            name: request.name,
            service_type,
            description: request.description,
            input_schema: request.input_schema,
            output_schema: request.output_schema,
            version: 1,
            idempotency_behavior: request.idempotency_behavior,
            revertible: request.revertible,
            compensation_input_schema: request.compensation_input_schema,
            task_timeout_secs: request.task_timeout_secs,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({"id": service.id, "name": service.name, "status": "registered"})),
    )
        .into_response())
}

async fn register_service(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(request): Json<RegisterServiceRequest>,
) -> Result<Response, ApiError> {
    register_worker_kind(state, project, request, ServiceType::Service).await
}

async fn register_agent(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(request): Json<RegisterServiceRequest>,
) -> Result<Response, ApiError> {
    register_worker_kind(state, project, request, ServiceType::Agent).await
}

#[derive(Deserialize)]
struct OrchestrationRequest {
    action: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// 202 with the orchestration record when executable; 422 with the record
/// (carrying the compile error) otherwise.
async fn submit_orchestration(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
    Json(request): Json<OrchestrationRequest>,
) -> Result<Response, ApiError> {
    if request.action.is_empty() {
        return Err(ApiError::validation("action must not be empty"));
    }
    let data = if request.data.is_null() {
        json!({})
    } else {
        request.data
    };

    let prepared = state.engine.prepare(&project.id, &request.action, data).await?;
    if !prepared.executable() {
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(prepared)).into_response());
    }

    state.engine.execute(&prepared.id).await?;
    let snapshot = state.store.get(&prepared.id).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)).into_response())
}

async fn list_orchestrations(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
) -> Result<impl IntoResponse, ApiError> {
    let list = state.store.list_for_project(&project.id).await;
    Ok(Json(list))
}

async fn inspect_orchestration(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = OrchestrationId::from(id);
    if !state.store.belongs_to_project(&id, &project.id).await {
        return Err(ApiError(orra_core::DomainError::NotFound(format!(
            "orchestration {id}"
        ))));
    }
    let orchestration = state.store.get(&id).await?;
    Ok(Json(OrchestrationInspection::project(&orchestration)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelQuery {
    api_key: String,
    service_id: String,
}

/// Worker channel upgrade: the API key must resolve and the service must
/// belong to that project before the socket is accepted.
async fn worker_channel(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let project = state
        .projects
        .authenticate(&ApiKey::from(query.api_key))
        .await
        .map_err(|e| {
            warn!(error = %e, "channel connection with invalid api key");
            e
        })?;

    let service_id = ServiceId::from(query.service_id);
    if !state
        .services
        .belongs_to_project(&service_id, &project.id)
        .await
    {
        warn!(service_id = %service_id, project_id = %project.id,
            "channel connection for foreign service");
        return Err(ApiError::unauthorized("service does not belong to project"));
    }

    let channel = Arc::clone(&state.channel);
    Ok(ws.on_upgrade(move |socket| pump_session(channel, service_id, socket)))
}

/// Bridge one WebSocket to the channel manager until either side closes.
async fn pump_session(channel: Arc<ChannelManager>, service_id: ServiceId, socket: WebSocket) {
    let session = channel.connect(&service_id);
    let session_id = session.session_id;
    let mut outbound = session.outbound;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = channel.handle_message(&service_id, session_id, &text) {
                    warn!(service_id = %service_id, error = %e, "inbound frame rejected");
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    writer.abort();
    channel.disconnect(&service_id, session_id);
    info!(service_id = %service_id, "channel session ended");
}
