//! HTTP API for the tradepost daemon.
//!
//! The World adapter and admin tooling talk to the coordinator through these
//! routes:
//! - Health check and session status
//! - Endpoint administration (create, link, unlink, delete, find, info)
//! - Trade actions (start, ready, accept, reject, cancel, exit)
//! - Presence (connect, disconnect, lost-and-found claim)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use tradepost_domain::{ActorId, ActorRef, ContainerRef, EndpointName, Location};
use tradepost_engine::{LinkReport, RegistryError, UnlinkReport};
use tradepost_exec::{ExecError, PreviewView, WorldPort};
use tradepost_store::Store;

use crate::coordinator::Coordinator;
use crate::error::DaemonError;
use crate::views::{
    ClaimSummary, ConnectReport, ContainerAccess, DisconnectReport, EndpointInfo, NearbyEndpoint,
    OfferView, Reply, SessionSummary, TradeUpdate,
};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<W: WorldPort + 'static, S: Store + 'static> {
    pub coordinator: Arc<RwLock<Coordinator<W, S>>>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub active_sessions: usize,
    pub sessions: Vec<SessionSummary>,
}

/// Request to register an endpoint.
#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    pub name: String,
    pub container: String,
    #[serde(default)]
    pub location: Option<Location>,
}

/// Request to link an endpoint to a partner.
#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub partner: String,
}

/// Query for `GET /endpoints/near`.
#[derive(Debug, Deserialize)]
pub struct NearQuery {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub radius: f64,
}

/// Request to start (or resume) trading at an endpoint.
#[derive(Debug, Deserialize)]
pub struct StartTradeRequest {
    pub actor_id: ActorId,
    pub name: String,
    pub endpoint: String,
}

/// Request carrying only the acting actor.
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: ActorId,
}

/// Request sent when an actor comes online.
#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub name: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<W, S>(state: Arc<ApiState<W, S>>) -> Router
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/endpoints", get(list_endpoints_handler).post(create_endpoint_handler))
        .route("/endpoints/near", get(find_endpoints_handler))
        .route(
            "/endpoints/:name",
            get(endpoint_info_handler).delete(delete_endpoint_handler),
        )
        .route(
            "/endpoints/:name/link",
            post(link_handler).delete(unlink_handler),
        )
        .route("/endpoints/:name/access/:actor_id", get(access_handler))
        .route("/trades/start", post(start_handler))
        .route("/trades/ready", post(ready_handler))
        .route("/trades/accept", post(accept_handler))
        .route("/trades/reject", post(reject_handler))
        .route("/trades/cancel", post(cancel_handler))
        .route("/trades/exit", post(exit_handler))
        .route("/trades/exit/confirm", post(confirm_exit_handler))
        .route("/actors/:actor_id/offer", get(offer_handler))
        .route("/actors/:actor_id/preview", get(preview_handler))
        .route("/actors/:actor_id/connect", post(connect_handler))
        .route("/actors/:actor_id/disconnect", post(disconnect_handler))
        .route("/actors/:actor_id/claim", post(claim_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// =============================================================================
// Handlers: status
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Every active session.
async fn status_handler<W, S>(State(state): State<Arc<ApiState<W, S>>>) -> Json<StatusResponse>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let coordinator = state.coordinator.read().await;
    let sessions = coordinator.status();

    Json(StatusResponse {
        active_sessions: sessions.len(),
        sessions,
    })
}

// =============================================================================
// Handlers: endpoints
// =============================================================================

async fn list_endpoints_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
) -> Json<Vec<EndpointInfo>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    Json(state.coordinator.read().await.list_endpoints())
}

/// Register a new endpoint.
async fn create_endpoint_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<CreateEndpointRequest>,
) -> Result<(StatusCode, Json<Reply<EndpointInfo>>), (StatusCode, Json<ErrorResponse>)>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let name = parse_name(&req.name)?;
    if req.container.trim().is_empty() {
        return Err(to_error_response(DaemonError::Validation(
            "container must not be empty".to_string(),
        )));
    }

    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .create_endpoint(name, ContainerRef(req.container), req.location)
        .await
        .map_err(to_error_response)?;

    Ok((StatusCode::CREATED, Json(reply)))
}

async fn find_endpoints_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Query(query): Query<NearQuery>,
) -> ApiResult<Vec<NearbyEndpoint>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let origin = Location::new(query.world, query.x, query.y, query.z);
    let coordinator = state.coordinator.read().await;
    let found = coordinator
        .find_endpoints(&origin, query.radius)
        .map_err(to_error_response)?;

    Ok(Json(found))
}

async fn endpoint_info_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(name): Path<String>,
) -> ApiResult<EndpointInfo>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let name = parse_name(&name)?;
    let coordinator = state.coordinator.read().await;
    let info = coordinator.endpoint_info(&name).map_err(to_error_response)?;

    Ok(Json(info))
}

async fn delete_endpoint_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(name): Path<String>,
) -> ApiResult<Reply<UnlinkReport>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let name = parse_name(&name)?;
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .delete_endpoint(&name)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn link_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(name): Path<String>,
    Json(req): Json<LinkRequest>,
) -> ApiResult<Reply<LinkReport>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let name = parse_name(&name)?;
    let partner = parse_name(&req.partner)?;
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .link_endpoints(&name, &partner)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn unlink_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(name): Path<String>,
) -> ApiResult<Reply<UnlinkReport>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let name = parse_name(&name)?;
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .unlink_endpoint(&name)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

/// May the actor open or modify this endpoint's container?
async fn access_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path((name, actor_id)): Path<(String, ActorId)>,
) -> ApiResult<ContainerAccess>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let name = parse_name(&name)?;
    let coordinator = state.coordinator.read().await;
    let access = coordinator
        .container_access(actor_id, &name)
        .map_err(to_error_response)?;

    Ok(Json(access))
}

// =============================================================================
// Handlers: trades
// =============================================================================

/// Start or resume trading at an endpoint.
async fn start_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<StartTradeRequest>,
) -> ApiResult<Reply<TradeUpdate>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let endpoint = parse_name(&req.endpoint)?;
    let actor = ActorRef::new(req.actor_id, req.name)
        .map_err(|e| to_error_response(e.into()))?;

    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .begin_use(actor, &endpoint)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn ready_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Reply<TradeUpdate>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .declare_locked(req.actor_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn accept_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Reply<TradeUpdate>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .decide(req.actor_id, true)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn reject_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Reply<TradeUpdate>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .decide(req.actor_id, false)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn cancel_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Reply<TradeUpdate>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .cancel(req.actor_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

/// First half of the two-step exit; the trade stays open.
async fn exit_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Reply<TradeUpdate>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .request_exit(req.actor_id)
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn confirm_exit_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<Reply<TradeUpdate>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .confirm_exit(req.actor_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

// =============================================================================
// Handlers: actors
// =============================================================================

async fn offer_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(actor_id): Path<ActorId>,
) -> ApiResult<OfferView>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let coordinator = state.coordinator.read().await;
    let offer = coordinator
        .current_offer(actor_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(offer))
}

async fn preview_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(actor_id): Path<ActorId>,
) -> ApiResult<PreviewView>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let coordinator = state.coordinator.read().await;
    let view = coordinator
        .preview(actor_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(view))
}

async fn connect_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(actor_id): Path<ActorId>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Reply<ConnectReport>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let actor = ActorRef::new(actor_id, req.name).map_err(|e| to_error_response(e.into()))?;
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .actor_connected(actor)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn disconnect_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(actor_id): Path<ActorId>,
) -> ApiResult<Reply<DisconnectReport>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .actor_disconnected(actor_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

async fn claim_handler<W, S>(
    State(state): State<Arc<ApiState<W, S>>>,
    Path(actor_id): Path<ActorId>,
) -> ApiResult<Reply<ClaimSummary>>
where
    W: WorldPort + 'static,
    S: Store + 'static,
{
    let mut coordinator = state.coordinator.write().await;
    let reply = coordinator
        .claim_lost_and_found(actor_id)
        .await
        .map_err(to_error_response)?;

    Ok(Json(reply))
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_name(raw: &str) -> Result<EndpointName, (StatusCode, Json<ErrorResponse>)> {
    EndpointName::new(raw).map_err(|e| to_error_response(e.into()))
}

fn to_error_response(error: DaemonError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        DaemonError::NotFound(_)
        | DaemonError::NotTrading(_)
        | DaemonError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
        DaemonError::Registry(_)
        | DaemonError::Precondition { .. }
        | DaemonError::NotLinked(_)
        | DaemonError::EndpointInUse { .. }
        | DaemonError::InvariantViolation { .. }
        | DaemonError::Exec(ExecError::ActorOffline(_))
        | DaemonError::Exec(ExecError::ContentsChanged(_)) => StatusCode::CONFLICT,
        DaemonError::Domain(_) | DaemonError::Validation(_) => StatusCode::BAD_REQUEST,
        DaemonError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

// =============================================================================
// Tests
// =============================================================================
