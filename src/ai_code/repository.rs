use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{models::AiCode, AiCodeError};
use crate::rating::repository::{claim_ledger_key, ledger_change};
use crate::rating::{CasResult, UpdateKey};
use crate::shared::{AiCodeId, UserId};

#[async_trait]
pub trait AiCodeRepository: Send + Sync {
    /// Stores a new code and returns it with its assigned id
    async fn create_code(&self, code: AiCode) -> Result<AiCode, AiCodeError>;
    async fn get_code(&self, ai_code_id: AiCodeId) -> Result<Option<AiCode>, AiCodeError>;
    async fn list_codes(&self, user_id: UserId, game_type: &str) -> Result<Vec<AiCode>, AiCodeError>;

    /// Atomically deactivates every code of the owner for the same game
    /// type and activates `ai_code_id`
    async fn activate(&self, user_id: UserId, ai_code_id: AiCodeId) -> Result<AiCode, AiCodeError>;

    async fn applied_change(&self, key: &UpdateKey) -> Result<Option<i32>, AiCodeError>;

    /// Versioned write of the rating columns, guarded by the update ledger
    async fn compare_and_swap_rating(
        &self,
        expected_version: i64,
        code: &AiCode,
        key: UpdateKey,
        elo_change: i32,
    ) -> Result<CasResult, AiCodeError>;
}

#[derive(Default)]
struct CodeState {
    codes: HashMap<AiCodeId, AiCode>,
    ledger: HashMap<UpdateKey, i32>,
    next_id: AiCodeId,
}

/// In-memory implementation of AiCodeRepository for development and testing
#[derive(Default)]
pub struct InMemoryAiCodeRepository {
    state: Mutex<CodeState>,
}

impl InMemoryAiCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AiCodeRepository for InMemoryAiCodeRepository {
    #[instrument(skip(self, code))]
    async fn create_code(&self, mut code: AiCode) -> Result<AiCode, AiCodeError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        code.id = state.next_id;
        state.codes.insert(code.id, code.clone());

        debug!(ai_code_id = code.id, user_id = code.user_id, "AI code stored in memory");
        Ok(code)
    }

    async fn get_code(&self, ai_code_id: AiCodeId) -> Result<Option<AiCode>, AiCodeError> {
        let state = self.state.lock().unwrap();
        Ok(state.codes.get(&ai_code_id).cloned())
    }

    async fn list_codes(&self, user_id: UserId, game_type: &str) -> Result<Vec<AiCode>, AiCodeError> {
        let state = self.state.lock().unwrap();
        let mut codes: Vec<AiCode> = state
            .codes
            .values()
            .filter(|c| c.user_id == user_id && c.game_type == game_type)
            .cloned()
            .collect();
        codes.sort_by_key(|c| c.id);
        Ok(codes)
    }

    #[instrument(skip(self))]
    async fn activate(&self, user_id: UserId, ai_code_id: AiCodeId) -> Result<AiCode, AiCodeError> {
        let mut state = self.state.lock().unwrap();

        let game_type = match state.codes.get(&ai_code_id) {
            Some(code) if code.user_id == user_id => code.game_type.clone(),
            Some(_) => {
                return Err(AiCodeError::Forbidden {
                    user_id,
                    ai_code_id,
                })
            }
            None => return Err(AiCodeError::NotFound(ai_code_id)),
        };

        let now = Utc::now();
        for code in state
            .codes
            .values_mut()
            .filter(|c| c.user_id == user_id && c.game_type == game_type)
        {
            let active = code.id == ai_code_id;
            if code.is_active != active {
                code.is_active = active;
                code.updated_at = now;
            }
        }

        info!(user_id, ai_code_id, game_type = %game_type, "AI code activated");
        state
            .codes
            .get(&ai_code_id)
            .cloned()
            .ok_or(AiCodeError::NotFound(ai_code_id))
    }

    async fn applied_change(&self, key: &UpdateKey) -> Result<Option<i32>, AiCodeError> {
        let state = self.state.lock().unwrap();
        Ok(state.ledger.get(key).copied())
    }

    #[instrument(skip(self, code))]
    async fn compare_and_swap_rating(
        &self,
        expected_version: i64,
        code: &AiCode,
        key: UpdateKey,
        elo_change: i32,
    ) -> Result<CasResult, AiCodeError> {
        let mut state = self.state.lock().unwrap();

        if state.ledger.contains_key(&key) {
            return Ok(CasResult::AlreadyApplied);
        }

        let stored = state
            .codes
            .get_mut(&code.id)
            .ok_or(AiCodeError::NotFound(code.id))?;
        if stored.rating_version != expected_version {
            debug!(stored_version = stored.rating_version, "AI code rating version moved");
            return Ok(CasResult::Conflict);
        }

        stored.win_count = code.win_count;
        stored.loss_count = code.loss_count;
        stored.draw_count = code.draw_count;
        stored.total_games = code.total_games;
        stored.win_rate = code.win_rate;
        stored.elo_score = code.elo_score;
        stored.last_used = code.last_used;
        stored.updated_at = code.updated_at;
        stored.rating_version = code.rating_version;

        state.ledger.insert(key, elo_change);
        Ok(CasResult::Applied)
    }
}

const CODE_COLUMNS: &str = "id, user_id, name, description, game_type, file_name, file_path, file_size, file_hash, version, is_active, is_public, last_used, win_count, loss_count, draw_count, total_games, win_rate, elo_score, rating_version, created_at, updated_at";

/// PostgreSQL implementation of AiCodeRepository
pub struct PostgresAiCodeRepository {
    pool: PgPool,
}

impl PostgresAiCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AiCodeRepository for PostgresAiCodeRepository {
    #[instrument(skip(self, code))]
    async fn create_code(&self, code: AiCode) -> Result<AiCode, AiCodeError> {
        let sql = format!(
            "INSERT INTO ai_code (user_id, name, description, game_type, file_name, file_path, file_size, file_hash, version, is_active, is_public, elo_score) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {CODE_COLUMNS}"
        );
        let created = sqlx::query_as::<_, AiCode>(&sql)
            .bind(code.user_id)
            .bind(&code.name)
            .bind(&code.description)
            .bind(&code.game_type)
            .bind(&code.file_name)
            .bind(&code.file_path)
            .bind(code.file_size)
            .bind(&code.file_hash)
            .bind(code.version)
            .bind(code.is_active)
            .bind(code.is_public)
            .bind(code.elo_score)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to create AI code in database");
                AiCodeError::from(e)
            })?;
        Ok(created)
    }

    async fn get_code(&self, ai_code_id: AiCodeId) -> Result<Option<AiCode>, AiCodeError> {
        let sql = format!("SELECT {CODE_COLUMNS} FROM ai_code WHERE id = $1");
        Ok(sqlx::query_as::<_, AiCode>(&sql)
            .bind(ai_code_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_codes(&self, user_id: UserId, game_type: &str) -> Result<Vec<AiCode>, AiCodeError> {
        let sql = format!(
            "SELECT {CODE_COLUMNS} FROM ai_code WHERE user_id = $1 AND game_type = $2 ORDER BY id"
        );
        Ok(sqlx::query_as::<_, AiCode>(&sql)
            .bind(user_id)
            .bind(game_type)
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    async fn activate(&self, user_id: UserId, ai_code_id: AiCodeId) -> Result<AiCode, AiCodeError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {CODE_COLUMNS} FROM ai_code WHERE id = $1 FOR UPDATE");
        let code = sqlx::query_as::<_, AiCode>(&sql)
            .bind(ai_code_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AiCodeError::NotFound(ai_code_id))?;
        if code.user_id != user_id {
            return Err(AiCodeError::Forbidden {
                user_id,
                ai_code_id,
            });
        }

        sqlx::query(
            "UPDATE ai_code SET is_active = (id = $3), updated_at = now() WHERE user_id = $1 AND game_type = $2",
        )
        .bind(user_id)
        .bind(&code.game_type)
        .bind(ai_code_id)
        .execute(&mut *tx)
        .await?;

        let sql = format!("SELECT {CODE_COLUMNS} FROM ai_code WHERE id = $1");
        let activated = sqlx::query_as::<_, AiCode>(&sql)
            .bind(ai_code_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(user_id, ai_code_id, "AI code activated in database");
        Ok(activated)
    }

    async fn applied_change(&self, key: &UpdateKey) -> Result<Option<i32>, AiCodeError> {
        Ok(ledger_change(&self.pool, key).await?)
    }

    #[instrument(skip(self, code))]
    async fn compare_and_swap_rating(
        &self,
        expected_version: i64,
        code: &AiCode,
        key: UpdateKey,
        elo_change: i32,
    ) -> Result<CasResult, AiCodeError> {
        let mut tx = self.pool.begin().await?;

        if !claim_ledger_key(&mut tx, &key, elo_change).await? {
            tx.rollback().await?;
            return Ok(CasResult::AlreadyApplied);
        }

        let written = sqlx::query(
            "UPDATE ai_code SET win_count = $2, loss_count = $3, draw_count = $4, total_games = $5, win_rate = $6, elo_score = $7, last_used = $8, updated_at = $9, rating_version = $10 WHERE id = $1 AND rating_version = $11",
        )
        .bind(code.id)
        .bind(code.win_count)
        .bind(code.loss_count)
        .bind(code.draw_count)
        .bind(code.total_games)
        .bind(code.win_rate)
        .bind(code.elo_score)
        .bind(code.last_used)
        .bind(code.updated_at)
        .bind(code.rating_version)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if written == 0 {
            tx.rollback().await?;
            return Ok(CasResult::Conflict);
        }

        tx.commit().await?;
        Ok(CasResult::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(repo: &InMemoryAiCodeRepository, user_id: UserId, game_type: &str) -> AiCode {
        repo.create_code(AiCode::new(user_id, "bot", game_type, "bot.py", 1200))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let repo = InMemoryAiCodeRepository::new();
        let first = seed(&repo, 1, "rock_paper_scissors").await;
        let second = seed(&repo, 1, "rock_paper_scissors").await;

        assert_ne!(first.id, second.id);
        assert_eq!(repo.list_codes(1, "rock_paper_scissors").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_activation_deactivates_siblings_only() {
        let repo = InMemoryAiCodeRepository::new();
        let x = seed(&repo, 1, "rock_paper_scissors").await;
        let y = seed(&repo, 1, "rock_paper_scissors").await;
        let other_game = seed(&repo, 1, "avalon").await;
        let other_user = seed(&repo, 2, "rock_paper_scissors").await;

        repo.activate(1, y.id).await.unwrap();
        repo.activate(1, other_game.id).await.unwrap();
        repo.activate(2, other_user.id).await.unwrap();

        let activated = repo.activate(1, x.id).await.unwrap();
        assert!(activated.is_active);

        let repo = &repo;
        let get = |id| async move { repo.get_code(id).await.unwrap().unwrap() };
        assert!(!get(y.id).await.is_active);
        assert!(get(other_game.id).await.is_active);
        assert!(get(other_user.id).await.is_active);
    }

    #[tokio::test]
    async fn test_activation_checks_owner() {
        let repo = InMemoryAiCodeRepository::new();
        let code = seed(&repo, 1, "rock_paper_scissors").await;

        let result = repo.activate(2, code.id).await;
        assert!(matches!(result, Err(AiCodeError::Forbidden { user_id: 2, .. })));

        let result = repo.activate(1, 999).await;
        assert!(matches!(result, Err(AiCodeError::NotFound(999))));
    }

    #[tokio::test]
    async fn test_rating_cas_is_versioned_and_deduplicated() {
        let repo = InMemoryAiCodeRepository::new();
        let mut code = seed(&repo, 1, "rock_paper_scissors").await;
        code.elo_score = 1216;
        code.rating_version = 1;

        let key = UpdateKey::code(5, code.id);
        assert_eq!(
            repo.compare_and_swap_rating(0, &code, key, 16).await.unwrap(),
            CasResult::Applied
        );
        assert_eq!(
            repo.compare_and_swap_rating(1, &code, key, 16).await.unwrap(),
            CasResult::AlreadyApplied
        );
        assert_eq!(
            repo.compare_and_swap_rating(0, &code, UpdateKey::code(6, code.id), 16)
                .await
                .unwrap(),
            CasResult::Conflict
        );
        assert_eq!(repo.applied_change(&key).await.unwrap(), Some(16));
    }
}
