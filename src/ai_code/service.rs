use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{models::AiCode, repository::AiCodeRepository, AiCodeError};
use crate::shared::{AiCodeId, UserId};

/// Answers "does this user own this AI code?" for the battle layer
#[async_trait]
pub trait OwnershipVerifier: Send + Sync {
    async fn verify_ownership(&self, user_id: UserId, ai_code_id: AiCodeId) -> Result<bool, AiCodeError>;
}

/// Service for AI code lookups and activation
pub struct AiCodeService {
    repository: Arc<dyn AiCodeRepository>,
}

impl AiCodeService {
    pub fn new(repository: Arc<dyn AiCodeRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> Arc<dyn AiCodeRepository> {
        Arc::clone(&self.repository)
    }

    /// Registers the metadata of an already stored upload
    #[instrument(skip(self, code), fields(user_id = code.user_id, game_type = %code.game_type))]
    pub async fn register_code(&self, code: AiCode) -> Result<AiCode, AiCodeError> {
        let created = self.repository.create_code(code).await?;
        info!(ai_code_id = created.id, "AI code registered");
        Ok(created)
    }

    pub async fn get_code(&self, ai_code_id: AiCodeId) -> Result<AiCode, AiCodeError> {
        self.repository
            .get_code(ai_code_id)
            .await?
            .ok_or(AiCodeError::NotFound(ai_code_id))
    }

    pub async fn list_codes(&self, user_id: UserId, game_type: &str) -> Result<Vec<AiCode>, AiCodeError> {
        self.repository.list_codes(user_id, game_type).await
    }

    /// Makes `ai_code_id` the caller's only active code for its game type
    #[instrument(skip(self))]
    pub async fn activate(&self, user_id: UserId, ai_code_id: AiCodeId) -> Result<AiCode, AiCodeError> {
        let code = self.get_code(ai_code_id).await?;
        if code.user_id != user_id {
            warn!(owner_id = code.user_id, "Refusing to activate AI code owned by another user");
            return Err(AiCodeError::Forbidden {
                user_id,
                ai_code_id,
            });
        }

        self.repository.activate(user_id, ai_code_id).await
    }
}

#[async_trait]
impl OwnershipVerifier for AiCodeService {
    async fn verify_ownership(&self, user_id: UserId, ai_code_id: AiCodeId) -> Result<bool, AiCodeError> {
        Ok(self
            .repository
            .get_code(ai_code_id)
            .await?
            .is_some_and(|code| code.user_id == user_id))
    }
}
