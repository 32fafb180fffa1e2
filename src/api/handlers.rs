//! Request handlers for the game surface.

use super::errors::ApiError;
use crate::errors::EngineError;
use crate::events::EventBus;
use crate::round::engine::CrashRoundEngine;
use crate::round::fairness;
use crate::round::types::{RoundSnapshot, RoundSummary};
use crate::scheduler::RoundScheduler;
use crate::settlement::coordinator::{
    CashoutOutcome, PendingSettlement, PlacedBet, SettlementCoordinator, SettlementError,
};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    pub engine: Arc<CrashRoundEngine>,
    pub coordinator: Arc<SettlementCoordinator>,
    pub scheduler: Arc<RoundScheduler>,
    pub events: EventBus,
    pub version: String,
}

fn next_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn settlement_error(request_id: String, err: SettlementError) -> ApiError {
    match err {
        SettlementError::Validation(engine_err) | SettlementError::RegistrationFailed(engine_err) => {
            match engine_err {
                EngineError::NoBetFound(_) => ApiError::not_found(request_id, engine_err.to_string()),
                EngineError::DuplicateBet(_) | EngineError::AlreadyCashedOut(_) => {
                    ApiError::conflict(request_id, engine_err.to_string())
                }
                other => ApiError::bad_request(request_id, other.to_string()),
            }
        }
        SettlementError::DebitFailed(ledger_err) => {
            ApiError::upstream_failed(request_id, ledger_err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
    })
}

/// GET /state - current round view for newly-joining observers.
pub async fn state_handler(State(state): State<Arc<AppState>>) -> Json<RoundSnapshot> {
    Json(state.scheduler.snapshot())
}

/// GET /history - recent completed rounds, newest first.
pub async fn history_handler(State(state): State<Arc<AppState>>) -> Json<Vec<RoundSummary>> {
    Json(state.scheduler.history())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyParams {
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
}

/// GET /verify - recompute the crash point from revealed material.
pub async fn verify_handler(
    Query(params): Query<VerifyParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<fairness::VerifiedRound>, ApiError> {
    let request_id = next_request_id();
    let verified = fairness::verify(
        &params.server_seed,
        &params.client_seed,
        params.nonce,
        state.engine.max_crash_hundredths(),
    )
    .map_err(|e| ApiError::bad_request(request_id, format!("invalid server seed: {}", e)))?;
    Ok(Json(verified))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetRequest {
    pub player_id: String,
    pub session_id: String,
    pub amount: f64,
}

/// POST /bet - settle and register a stake in the current betting window.
pub async fn place_bet_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlaceBetRequest>,
) -> Result<Json<PlacedBet>, ApiError> {
    let request_id = next_request_id();
    let placed = state
        .coordinator
        .place_bet(&request.player_id, &request.session_id, request.amount)
        .await
        .map_err(|e| settlement_error(request_id, e))?;
    Ok(Json(placed))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutRequest {
    pub player_id: String,
}

/// POST /cashout - lock in the current multiplier and credit the win.
pub async fn cashout_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CashoutRequest>,
) -> Result<Json<CashoutOutcome>, ApiError> {
    let request_id = next_request_id();
    let outcome = state
        .coordinator
        .cashout(&request.player_id)
        .await
        .map_err(|e| settlement_error(request_id, e))?;
    Ok(Json(outcome))
}

/// GET /settlements/unresolved - records needing manual reconciliation.
pub async fn unresolved_settlements_handler(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<PendingSettlement>> {
    Json(state.coordinator.unresolved())
}
