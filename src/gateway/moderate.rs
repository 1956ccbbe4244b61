// POST /api/moderate
//
// Received -> SessionChecked -> RoleChecked -> PayloadParsed -> Dispatched -> Responded.
// Any failure jumps straight to Responded with an `{ "error": ... }` body.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::Instrument;
use uuid::Uuid;

use super::state::AppState;
use crate::error::ApiError;
use crate::moderation::{ClassifierError, ModerationOutcome, ModerationPayload, PayloadError};

/// Step at which a request stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStage {
    SessionCheck,
    RoleCheck,
    PayloadParse,
    Dispatch,
}

impl GatewayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStage::SessionCheck => "session_check",
            GatewayStage::RoleCheck => "role_check",
            GatewayStage::PayloadParse => "payload_parse",
            GatewayStage::Dispatch => "dispatch",
        }
    }
}

#[derive(Debug)]
pub struct Rejection {
    pub stage: GatewayStage,
    pub error: ApiError,
}

impl Rejection {
    fn at(stage: GatewayStage) -> impl FnOnce(ApiError) -> Rejection {
        move |error| Rejection { stage, error }
    }
}

/// Body read failures, including the size limit, surface only after the
/// session and role checks.
pub async fn moderate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "moderate",
        %request_id,
        identity = tracing::field::Empty,
        stage = tracing::field::Empty
    );

    async move {
        let body = body.map_err(body_error);
        match handle(&state, &headers, body).await {
            Ok(outcome) => {
                tracing::info!("Moderation request completed");
                outcome.into_response()
            }
            Err(Rejection { stage, error }) => {
                tracing::Span::current().record("stage", stage.as_str());
                tracing::info!(status = error.status_code().as_u16(), "Moderation request rejected");
                error.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

fn body_error(rejection: BytesRejection) -> PayloadError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PayloadError::BodyTooLarge
    } else {
        PayloadError::Unreadable(rejection.body_text())
    }
}

/// Runs the request through every gate in order; never revisits a step.
pub async fn handle(
    state: &AppState,
    headers: &HeaderMap,
    body: Result<Bytes, PayloadError>,
) -> Result<ModerationOutcome, Rejection> {
    let identity = state
        .sessions
        .resolve(headers)
        .await
        .map_err(ApiError::from)
        .map_err(Rejection::at(GatewayStage::SessionCheck))?;
    tracing::Span::current().record("identity", identity.id.as_str());

    state
        .authorizer
        .authorize(&identity)
        .await
        .map_err(ApiError::from)
        .map_err(Rejection::at(GatewayStage::RoleCheck))?;

    let payload = body
        .and_then(|body| ModerationPayload::parse(&body, state.max_batch_items))
        .map_err(ApiError::from)
        .map_err(Rejection::at(GatewayStage::PayloadParse))?;
    tracing::debug!(
        batch = payload.is_batch(),
        items = payload.item_count(),
        "Dispatching to classifier"
    );

    let dispatched = match state.request_timeout {
        Some(limit) => tokio::time::timeout(limit, state.forwarder.dispatch(&payload))
            .await
            .unwrap_or(Err(ClassifierError::Timeout(limit.as_millis() as u64))),
        None => state.forwarder.dispatch(&payload).await,
    };

    dispatched
        .map_err(ApiError::from)
        .map_err(Rejection::at(GatewayStage::Dispatch))
}
