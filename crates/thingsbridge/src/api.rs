use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::bridge::Bridge;
use crate::hub::CharValue;
use crate::hub::Characteristic;
use crate::hub::HubError;
use crate::hub::MemoryHub;
use crate::hub::ServiceKey;
use crate::smartthings::DeviceEvent;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
    version: String,
}

/// Body of POST /v1/events
#[derive(Debug, Deserialize)]
struct EventBatch {
    events: Vec<DeviceEvent>,
}

#[derive(Serialize)]
struct EventsResponse {
    accepted: usize,
    dropped: usize,
}

/// Characteristic value as read or written over HTTP
#[derive(Debug, Serialize, Deserialize)]
struct ValueBody {
    value: CharValue,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    bridge: Arc<Bridge>,
    hub: Arc<MemoryHub>,
}

/// Host-facing failures rendered as HTTP errors
struct ApiFailure(StatusCode, String);

impl From<HubError> for ApiFailure {
    fn from(error: HubError) -> Self {
        let status = match error {
            HubError::CommunicationFailure => StatusCode::SERVICE_UNAVAILABLE,
            HubError::UnknownService(_) => StatusCode::NOT_FOUND,
            HubError::UnsupportedCharacteristic(_) | HubError::InvalidValue { .. } => {
                StatusCode::BAD_REQUEST
            }
        };
        ApiFailure(status, error.to_string())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument(skip(state))]
async fn ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
            version: state.version.to_string(),
        }),
    )
}

/// Handler for POST /v1/events
#[tracing::instrument(skip_all)]
async fn events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(batch): Json<EventBatch>,
) -> Result<Json<EventsResponse>, ApiFailure> {
    if let Some(token) = state.bridge.webhook_token() {
        let expected = format!("Bearer {}", token);
        let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            tracing::warn!("Rejecting event batch with bad credentials");
            return Err(ApiFailure(
                StatusCode::UNAUTHORIZED,
                "invalid webhook token".to_string(),
            ));
        }
    }

    let mut accepted = 0;
    for event in &batch.events {
        if state.bridge.dispatch_event(event) {
            accepted += 1;
        }
    }
    tracing::debug!("Dispatched {} of {} events", accepted, batch.events.len());
    Ok(Json(EventsResponse {
        accepted,
        dropped: batch.events.len() - accepted,
    }))
}

/// Handler for GET /v1/accessories
#[tracing::instrument(skip(state))]
async fn accessories(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.services())
}

fn target(id: String, subtype: String, name: &str) -> Result<(ServiceKey, Characteristic), ApiFailure> {
    let characteristic = name.parse::<Characteristic>().map_err(|_| {
        ApiFailure(
            StatusCode::NOT_FOUND,
            format!("unknown characteristic {}", name),
        )
    })?;
    Ok((ServiceKey::new(id, subtype), characteristic))
}

/// Handler for GET /v1/accessories/:id/services/:subtype/characteristics/:name
#[tracing::instrument(skip(state))]
async fn read_characteristic(
    State(state): State<Arc<AppState>>,
    Path((id, subtype, name)): Path<(String, String, String)>,
) -> Result<Json<ValueBody>, ApiFailure> {
    let (key, characteristic) = target(id, subtype, &name)?;
    let value = state.bridge.get(&key, characteristic).await?;
    Ok(Json(ValueBody { value }))
}

/// Handler for PUT /v1/accessories/:id/services/:subtype/characteristics/:name
#[tracing::instrument(skip(state))]
async fn write_characteristic(
    State(state): State<Arc<AppState>>,
    Path((id, subtype, name)): Path<(String, String, String)>,
    Json(body): Json<ValueBody>,
) -> Result<StatusCode, ApiFailure> {
    let (key, characteristic) = target(id, subtype, &name)?;
    state.bridge.set(&key, characteristic, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/events", post(events))
        .route("/v1/accessories", get(accessories))
        .route(
            "/v1/accessories/:id/services/:subtype/characteristics/:name",
            get(read_characteristic).put(write_characteristic),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Serves until `shutdown_rx` fires, then shuts down gracefully.
///
/// # Arguments
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8565)
/// * `bridge` - Accessory registry that handles events and characteristic access
/// * `hub` - Hub whose published services are listed by /v1/accessories
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
pub async fn serve(
    listen: String,
    port: u16,
    bridge: Arc<Bridge>,
    hub: Arc<MemoryHub>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState {
        version,
        bridge,
        hub,
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
