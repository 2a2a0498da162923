//! HTTP API endpoints.
//!
//! Login issues credentials and seats the player in the current match; the
//! socket at `/ws` then attaches a live stream with the issued token.

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth;
use crate::error::MatchError;
use crate::state::AppState;
use crate::types::{MatchSnapshot, PlayerInfo, RoundNo};
use crate::ws;

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    // Operator routes (with HTTP Basic Auth)
    let operator_routes = Router::new()
        .route("/api/match/advance", post(advance_round))
        .layer(middleware::from_fn_with_state(
            Arc::new(state.config.auth.clone()),
            auth::operator_auth_middleware,
        ));

    Router::new()
        .route("/api/login", post(login))
        .route("/api/match", get(get_match))
        .route("/ws", get(ws::ws_handler))
        .merge(operator_routes)
        .with_state(state)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub player: PlayerInfo,
    pub match_state: MatchSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResponse {
    pub round: RoundNo,
}

/// Error body shared by all endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: String,
    pub msg: String,
}

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            MatchError::GameFull | MatchError::JoinAfterStart => StatusCode::CONFLICT,
            MatchError::DuplicateName(_) | MatchError::DuplicatePlayer(_) => StatusCode::CONFLICT,
            MatchError::WrongPhase { .. } | MatchError::NoRoundsLeft => StatusCode::CONFLICT,
            MatchError::InvalidName => StatusCode::BAD_REQUEST,
            MatchError::UnknownIdentity(_) => StatusCode::UNAUTHORIZED,
            MatchError::UnknownPlayer(_) => StatusCode::NOT_FOUND,
            MatchError::MatchClosed => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = ApiError {
            code: self.code().to_string(),
            msg: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Log in and take a seat in the current match.
///
/// POST /api/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, MatchError> {
    let handle = state.current_match().await;
    let creds = state.identities.issue();

    let player = match handle
        .join(creds.player_id.clone(), req.display_name, None)
        .await
    {
        Ok(player) => player,
        Err(e) => {
            // A rejected login leaves no identity behind
            state.identities.revoke(&creds.token);
            return Err(e);
        }
    };
    let match_state = handle.snapshot().await?;

    tracing::info!("Player {} logged in to match {}", player.id, handle.id());
    Ok(Json(LoginResponse {
        token: creds.token,
        player,
        match_state,
    }))
}

/// Current match snapshot.
///
/// GET /api/match
pub async fn get_match(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MatchSnapshot>, MatchError> {
    let handle = state.current_match().await;
    Ok(Json(handle.snapshot().await?))
}

/// Stop waiting for outstanding submissions and load the next round.
///
/// POST /api/match/advance
pub async fn advance_round(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AdvanceResponse>, MatchError> {
    let handle = state.current_match().await;
    let round = handle.advance_round().await?;
    tracing::info!("Operator advanced match {} to round {}", handle.id(), round);
    Ok(Json(AdvanceResponse { round }))
}
