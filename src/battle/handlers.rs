use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{info, instrument};

use super::{
    models::BattleDetail,
    types::{CancelBattleRequest, CreateBattleRequest, JoinBattleRequest},
};
use crate::game::GameInfo;
use crate::shared::{Actor, AppError, AppState, BattleId};

/// GET /games
pub async fn list_games(State(state): State<AppState>) -> Json<Vec<GameInfo>> {
    Json(state.orchestrator.registry().list())
}

/// Creates a battle and seats the caller at position 1
///
/// POST /battles
#[instrument(skip(state, request), fields(user_id = actor.user_id))]
pub async fn create_battle(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateBattleRequest>,
) -> Result<Json<BattleDetail>, AppError> {
    let detail = state.orchestrator.create_battle(actor, request).await?;
    info!(battle_id = detail.battle.id, "Battle created via API");
    Ok(Json(detail))
}

/// GET /battles/:id
pub async fn get_battle(
    State(state): State<AppState>,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<BattleDetail>, AppError> {
    Ok(Json(state.orchestrator.get_battle(battle_id).await?))
}

/// POST /battles/:id/join
#[instrument(skip(state, request), fields(user_id = actor.user_id))]
pub async fn join_battle(
    State(state): State<AppState>,
    actor: Actor,
    Path(battle_id): Path<BattleId>,
    request: Option<Json<JoinBattleRequest>>,
) -> Result<Json<BattleDetail>, AppError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    Ok(Json(
        state
            .orchestrator
            .join_battle(actor, battle_id, request)
            .await?,
    ))
}

/// Starts the battle and plays it to completion before responding
///
/// POST /battles/:id/play
#[instrument(skip(state), fields(user_id = actor.user_id))]
pub async fn play_battle(
    State(state): State<AppState>,
    actor: Actor,
    Path(battle_id): Path<BattleId>,
) -> Result<Json<BattleDetail>, AppError> {
    let detail = state.orchestrator.play_battle(actor, battle_id).await?;
    info!(battle_id, status = %detail.battle.status, "Battle played via API");
    Ok(Json(detail))
}

/// POST /battles/:id/cancel
#[instrument(skip(state, request), fields(user_id = actor.user_id))]
pub async fn cancel_battle(
    State(state): State<AppState>,
    actor: Actor,
    Path(battle_id): Path<BattleId>,
    request: Option<Json<CancelBattleRequest>>,
) -> Result<Json<BattleDetail>, AppError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    Ok(Json(
        state
            .orchestrator
            .cancel_battle(actor, battle_id, request)
            .await?,
    ))
}
