use thiserror::Error;

use super::models::UpdateKey;
use crate::game::Outcome;
use crate::shared::AiCodeId;

#[derive(Debug, Error)]
pub enum RatingError {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Concurrent updates kept conflicting for {0:?}")]
    ConcurrencyConflict(UpdateKey),

    #[error("Outcome {0} cannot be scored")]
    Unscorable(Outcome),

    #[error("AI code {0} not found")]
    CodeNotFound(AiCodeId),
}

impl From<sqlx::Error> for RatingError {
    fn from(err: sqlx::Error) -> Self {
        RatingError::Repository(err.to_string())
    }
}

impl From<crate::ai_code::AiCodeError> for RatingError {
    fn from(err: crate::ai_code::AiCodeError) -> Self {
        match err {
            crate::ai_code::AiCodeError::NotFound(id) => RatingError::CodeNotFound(id),
            other => RatingError::Repository(other.to_string()),
        }
    }
}
