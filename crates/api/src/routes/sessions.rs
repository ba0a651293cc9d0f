//! Design session endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use common::AggregateId;
use domain::{
    Aggregate, AssetId, DesignSession, DomainError, ProductSelection, SessionError, Stage,
    StyleHints, VariantRef,
};
use event_store::EventStore;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use status::SessionSnapshot;

use super::{caller, ensure_owner, parse_aggregate_id};
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub prompt: String,
    #[serde(default)]
    pub style_hints: Vec<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "en".to_string()
}

#[derive(Deserialize)]
pub struct SelectProductRequest {
    pub product_slug: String,
    pub variant: String,
    /// Picks one of the generated assets at the same time.
    #[serde(default)]
    pub asset_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub consent: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct SessionCreatedResponse {
    pub session_id: String,
    pub stage: Stage,
}

#[derive(Serialize)]
pub struct ApprovalResponse {
    pub session_id: String,
    pub approval_token: String,
}

// -- Handlers --

/// POST /sessions: create a session and start generating in the background.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionCreatedResponse>), ApiError> {
    let result = state
        .sessions
        .create_session(
            caller(&headers),
            req.prompt,
            StyleHints::new(req.style_hints),
            req.locale,
        )
        .await?;
    let session = result.aggregate;
    let session_id = session
        .id()
        .ok_or_else(|| ApiError::Internal("created session has no id".to_string()))?;

    state.spawn_generation(session_id);
    tracing::info!(%session_id, "session created");

    Ok((
        StatusCode::CREATED,
        Json(SessionCreatedResponse {
            session_id: session_id.to_string(),
            stage: session.stage(),
        }),
    ))
}

/// GET /sessions/{id}: current session snapshot.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session_id = parse_aggregate_id(&id)?;
    load_owned(&state, session_id, &headers, false).await?;
    Ok(Json(state.notifier.snapshot(session_id).await?))
}

/// GET /sessions/{id}/events: server-sent stage updates.
///
/// Starts with the current state and ends once the session is ready.
#[tracing::instrument(skip(state, headers))]
pub async fn events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let session_id = parse_aggregate_id(&id)?;
    load_owned(&state, session_id, &headers, false).await?;

    let stream = state
        .notifier
        .subscribe(session_id)
        .await?
        .map(|event| Event::default().event("stage").json_data(&event));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /sessions/{id}/retry: requeue a failed session.
#[tracing::instrument(skip(state, headers))]
pub async fn retry<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let session_id = parse_aggregate_id(&id)?;
    let session = load_owned(&state, session_id, &headers, true).await?;
    if session.is_abandoned() {
        return Err(DomainError::from(SessionError::Abandoned).into());
    }

    state.worker.retry(session_id).await?;
    state.spawn_generation(session_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(state.notifier.snapshot(session_id).await?),
    ))
}

/// PUT /sessions/{id}/product: choose the product, and optionally the asset.
#[tracing::instrument(skip(state, headers, req))]
pub async fn select_product<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SelectProductRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session_id = parse_aggregate_id(&id)?;
    load_owned(&state, session_id, &headers, true).await?;

    if let Some(asset_id) = req.asset_id {
        state
            .sessions
            .select_asset(session_id, AssetId::new(asset_id))
            .await?;
    }
    state
        .sessions
        .select_product(
            session_id,
            ProductSelection {
                product_slug: req.product_slug,
                variant: VariantRef::new(req.variant),
            },
        )
        .await?;

    Ok(Json(state.notifier.snapshot(session_id).await?))
}

/// POST /sessions/{id}/approve: record print consent and issue a token.
#[tracing::instrument(skip(state, headers, req))]
pub async fn approve<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let session_id = parse_aggregate_id(&id)?;
    load_owned(&state, session_id, &headers, true).await?;

    let token = state.approvals.approve(session_id, req.consent).await?;
    Ok(Json(ApprovalResponse {
        session_id: session_id.to_string(),
        approval_token: token.to_string(),
    }))
}

/// POST /sessions/{id}/abandon: the customer walked away.
#[tracing::instrument(skip(state, headers))]
pub async fn abandon<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session_id = parse_aggregate_id(&id)?;
    load_owned(&state, session_id, &headers, false).await?;

    state.sessions.abandon(session_id).await?;
    Ok(Json(state.notifier.snapshot(session_id).await?))
}

/// Loads a session the caller may act on. With `claim`, a signed-in caller
/// becomes the owner of an anonymous session.
async fn load_owned<S: EventStore + Clone + 'static>(
    state: &AppState<S>,
    session_id: AggregateId,
    headers: &HeaderMap,
    claim: bool,
) -> Result<DesignSession, ApiError> {
    let session = state
        .sessions
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session {session_id} not found")))?;

    let caller = caller(headers);
    ensure_owner(session.owner(), caller.as_ref())?;

    if claim
        && session.owner().is_none()
        && let Some(owner) = caller
    {
        let claimed = state.sessions.assign_owner(session_id, owner).await?;
        return Ok(claimed.aggregate);
    }
    Ok(session)
}
