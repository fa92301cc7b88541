use async_trait::async_trait;
use thiserror::Error;

use crate::game::GameRegistry;
use crate::shared::{AiCodeId, BattleId, UserId};

/// What a seat is asked to decide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub battle_id: BattleId,
    pub game_type: String,
    pub user_id: UserId,
    pub ai_code_id: Option<AiCodeId>,
    pub position: i32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MoveError {
    #[error("AI program crashed: {0}")]
    Crashed(String),

    #[error("AI program produced unusable output: {0}")]
    Malformed(String),
}

/// Source of moves for seated AI codes. Time limits are enforced by the
/// caller, so implementations may simply await their program.
#[async_trait]
pub trait MoveProvider: Send + Sync {
    async fn request_move(&self, request: &MoveRequest) -> Result<String, MoveError>;
}

/// Plays a uniformly random legal move for every seat
pub struct RandomMoveProvider {
    registry: GameRegistry,
}

impl RandomMoveProvider {
    pub fn new(registry: GameRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MoveProvider for RandomMoveProvider {
    async fn request_move(&self, request: &MoveRequest) -> Result<String, MoveError> {
        self.registry
            .lookup(&request.game_type)
            .map(|referee| referee.random_move())
            .map_err(|e| MoveError::Malformed(e.to_string()))
    }
}
