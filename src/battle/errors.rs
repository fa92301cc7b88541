use thiserror::Error;

use super::models::BattleStatus;
use crate::ai_code::AiCodeError;
use crate::game::RegistryError;
use crate::rating::RatingError;
use crate::shared::{AiCodeId, BattleId, UserId};

/// Caller mistakes; the battle is left as it was
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unsupported game type: {0}")]
    UnsupportedGameType(String),

    #[error("battle needs {required} players but has {seated}")]
    SeatsNotFilled { required: usize, seated: usize },

    #[error("battle is full")]
    BattleFull,

    #[error("user {0} already has a seat in this battle")]
    AlreadySeated(UserId),

    #[error("battle is {0} and can no longer be joined")]
    NotJoinable(BattleStatus),

    #[error("seat {position} has no AI code selected")]
    MissingAiCode { position: i32 },

    #[error("AI code {0} does not exist")]
    UnknownAiCode(AiCodeId),

    #[error("AI code {ai_code_id} does not belong to user {user_id}")]
    NotOwner { user_id: UserId, ai_code_id: AiCodeId },

    #[error("AI code {0} is not a runnable code file or archive")]
    NotExecutable(AiCodeId),

    #[error("AI code {ai_code_id} plays {actual}, not {expected}")]
    WrongGameType {
        ai_code_id: AiCodeId,
        expected: String,
        actual: String,
    },

    #[error("moves must come from exactly the seated players")]
    ParticipantMismatch,

    #[error("ratings were already applied to this battle")]
    RatingsAlreadyApplied,
}

#[derive(Debug, Error)]
pub enum BattleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Battle {0} was modified concurrently")]
    ConcurrencyConflict(BattleId),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Referee fault: {0}")]
    RefereeFault(String),

    #[error("Battle {0} not found")]
    NotFound(BattleId),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cannot move battle from {from} to {to}")]
    InvalidTransition { from: BattleStatus, to: BattleStatus },

    #[error("Battle {0} was cancelled")]
    Cancelled(BattleId),
}

impl From<sqlx::Error> for BattleError {
    fn from(err: sqlx::Error) -> Self {
        BattleError::Persistence(err.to_string())
    }
}

impl From<RegistryError> for BattleError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(game_type) => {
                ValidationError::UnsupportedGameType(game_type).into()
            }
            RegistryError::Duplicate(game_type) => {
                BattleError::Persistence(format!("game type registered twice: {game_type}"))
            }
        }
    }
}

impl From<AiCodeError> for BattleError {
    fn from(err: AiCodeError) -> Self {
        match err {
            AiCodeError::NotFound(id) => ValidationError::UnknownAiCode(id).into(),
            AiCodeError::Forbidden {
                user_id,
                ai_code_id,
            } => ValidationError::NotOwner {
                user_id,
                ai_code_id,
            }
            .into(),
            AiCodeError::Repository(msg) => BattleError::Persistence(msg),
        }
    }
}

impl From<RatingError> for BattleError {
    fn from(err: RatingError) -> Self {
        BattleError::Persistence(err.to_string())
    }
}
