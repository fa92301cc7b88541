use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{info, instrument};

use super::models::AiCode;
use crate::shared::{Actor, AiCodeId, AppError, AppState};

/// Makes the code the caller's active one for its game type
///
/// POST /ai-codes/:id/activate
#[instrument(skip(state), fields(user_id = actor.user_id))]
pub async fn activate_code(
    State(state): State<AppState>,
    actor: Actor,
    Path(ai_code_id): Path<AiCodeId>,
) -> Result<Json<AiCode>, AppError> {
    let code = state.ai_codes.activate(actor.user_id, ai_code_id).await?;
    info!(ai_code_id, game_type = %code.game_type, "AI code activated");
    Ok(Json(code))
}
