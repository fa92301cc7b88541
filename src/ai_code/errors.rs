use thiserror::Error;

use crate::shared::{AiCodeId, UserId};

#[derive(Debug, Error)]
pub enum AiCodeError {
    #[error("AI code {0} not found")]
    NotFound(AiCodeId),

    #[error("User {user_id} does not own AI code {ai_code_id}")]
    Forbidden {
        user_id: UserId,
        ai_code_id: AiCodeId,
    },

    #[error("Repository error: {0}")]
    Repository(String),
}

impl From<sqlx::Error> for AiCodeError {
    fn from(err: sqlx::Error) -> Self {
        AiCodeError::Repository(err.to_string())
    }
}
