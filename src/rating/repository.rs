use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::models::{CasResult, GameStats, StatsKey, UpdateKey};
use super::RatingError;

#[async_trait]
pub trait GameStatsRepository: Send + Sync {
    async fn get_stats(&self, key: &StatsKey) -> Result<Option<GameStats>, RatingError>;

    /// ELO change recorded for `key`, if the update was already applied
    async fn applied_change(&self, key: &UpdateKey) -> Result<Option<i32>, RatingError>;

    /// Writes `stats` only if the stored row is still at `expected_version`
    /// (`None`: the row must not exist yet) and `key` is not yet in the
    /// ledger. Both checks and both writes happen atomically.
    async fn compare_and_swap(
        &self,
        expected_version: Option<i64>,
        stats: &GameStats,
        key: UpdateKey,
        elo_change: i32,
    ) -> Result<CasResult, RatingError>;

    /// Bumps `cancelled_games` on an existing row; never creates one
    async fn increment_cancelled(&self, key: &StatsKey) -> Result<bool, RatingError>;

    /// Rows for one game type and ranking, best ELO first
    async fn leaderboard(
        &self,
        game_type: &str,
        ranking_id: i32,
        limit: usize,
    ) -> Result<Vec<GameStats>, RatingError>;
}

#[derive(Debug, Default)]
struct StatsState {
    rows: HashMap<StatsKey, GameStats>,
    ledger: HashMap<UpdateKey, i32>,
}

#[derive(Debug, Default)]
pub struct InMemoryGameStatsRepository {
    state: Arc<RwLock<StatsState>>,
}

impl InMemoryGameStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row directly, bypassing the ledger
    pub async fn insert(&self, stats: GameStats) {
        let mut state = self.state.write().await;
        state.rows.insert(stats.key(), stats);
    }

    pub async fn row_count(&self) -> usize {
        self.state.read().await.rows.len()
    }
}

#[async_trait]
impl GameStatsRepository for InMemoryGameStatsRepository {
    async fn get_stats(&self, key: &StatsKey) -> Result<Option<GameStats>, RatingError> {
        let state = self.state.read().await;
        Ok(state.rows.get(key).cloned())
    }

    async fn applied_change(&self, key: &UpdateKey) -> Result<Option<i32>, RatingError> {
        let state = self.state.read().await;
        Ok(state.ledger.get(key).copied())
    }

    #[instrument(skip(self, stats))]
    async fn compare_and_swap(
        &self,
        expected_version: Option<i64>,
        stats: &GameStats,
        key: UpdateKey,
        elo_change: i32,
    ) -> Result<CasResult, RatingError> {
        let mut state = self.state.write().await;

        if state.ledger.contains_key(&key) {
            debug!("Rating update already in ledger");
            return Ok(CasResult::AlreadyApplied);
        }

        let stored_version = state.rows.get(&stats.key()).map(|s| s.version);
        if stored_version != expected_version {
            debug!(?stored_version, "Stats row version moved");
            return Ok(CasResult::Conflict);
        }

        state.rows.insert(stats.key(), stats.clone());
        state.ledger.insert(key, elo_change);
        Ok(CasResult::Applied)
    }

    async fn increment_cancelled(&self, key: &StatsKey) -> Result<bool, RatingError> {
        let mut state = self.state.write().await;
        match state.rows.get_mut(key) {
            Some(stats) => {
                stats.cancelled_games += 1;
                stats.version += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn leaderboard(
        &self,
        game_type: &str,
        ranking_id: i32,
        limit: usize,
    ) -> Result<Vec<GameStats>, RatingError> {
        let state = self.state.read().await;
        let mut rows: Vec<GameStats> = state
            .rows
            .values()
            .filter(|s| s.game_type == game_type && s.ranking_id == ranking_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.elo_score
                .cmp(&a.elo_score)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }
}

/// Inserts `key` into `rating_ledger`; false if it was already there
pub(crate) async fn claim_ledger_key(
    tx: &mut Transaction<'_, Postgres>,
    key: &UpdateKey,
    elo_change: i32,
) -> Result<bool, sqlx::Error> {
    let (kind, subject_id) = key.subject_columns();
    let inserted = sqlx::query(
        "INSERT INTO rating_ledger (battle_id, subject_kind, subject_id, elo_change) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
    )
    .bind(key.battle_id)
    .bind(kind)
    .bind(subject_id)
    .bind(elo_change)
    .execute(&mut **tx)
    .await?
    .rows_affected();
    Ok(inserted == 1)
}

pub(crate) async fn ledger_change(pool: &PgPool, key: &UpdateKey) -> Result<Option<i32>, sqlx::Error> {
    let (kind, subject_id) = key.subject_columns();
    let row = sqlx::query(
        "SELECT elo_change FROM rating_ledger WHERE battle_id = $1 AND subject_kind = $2 AND subject_id = $3",
    )
    .bind(key.battle_id)
    .bind(kind)
    .bind(subject_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| r.try_get::<i32, _>("elo_change")).transpose()
}

const STATS_COLUMNS: &str = "user_id, game_type, ranking_id, elo_score, best_elo, wins, losses, draws, games_played, cancelled_games, win_rate, current_streak, longest_win_streak, longest_lose_streak, last_game_at, total_play_time, average_game_time, version";

/// PostgreSQL implementation of the GameStats store
pub struct PostgresGameStatsRepository {
    pool: PgPool,
}

impl PostgresGameStatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GameStatsRepository for PostgresGameStatsRepository {
    #[instrument(skip(self))]
    async fn get_stats(&self, key: &StatsKey) -> Result<Option<GameStats>, RatingError> {
        let sql = format!(
            "SELECT {STATS_COLUMNS} FROM game_stats WHERE user_id = $1 AND game_type = $2 AND ranking_id = $3"
        );
        let stats = sqlx::query_as::<_, GameStats>(&sql)
            .bind(key.user_id)
            .bind(&key.game_type)
            .bind(key.ranking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to fetch game stats");
                RatingError::from(e)
            })?;
        Ok(stats)
    }

    async fn applied_change(&self, key: &UpdateKey) -> Result<Option<i32>, RatingError> {
        Ok(ledger_change(&self.pool, key).await?)
    }

    #[instrument(skip(self, stats))]
    async fn compare_and_swap(
        &self,
        expected_version: Option<i64>,
        stats: &GameStats,
        key: UpdateKey,
        elo_change: i32,
    ) -> Result<CasResult, RatingError> {
        let mut tx = self.pool.begin().await?;

        if !claim_ledger_key(&mut tx, &key, elo_change).await? {
            tx.rollback().await?;
            return Ok(CasResult::AlreadyApplied);
        }

        let query = match expected_version {
            Some(_) => sqlx::query(
                "UPDATE game_stats SET elo_score = $4, best_elo = $5, wins = $6, losses = $7, draws = $8, games_played = $9, cancelled_games = $10, win_rate = $11, current_streak = $12, longest_win_streak = $13, longest_lose_streak = $14, last_game_at = $15, total_play_time = $16, average_game_time = $17, version = $18 WHERE user_id = $1 AND game_type = $2 AND ranking_id = $3 AND version = $19",
            ),
            None => sqlx::query(
                "INSERT INTO game_stats (user_id, game_type, ranking_id, elo_score, best_elo, wins, losses, draws, games_played, cancelled_games, win_rate, current_streak, longest_win_streak, longest_lose_streak, last_game_at, total_play_time, average_game_time, version) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) ON CONFLICT DO NOTHING",
            ),
        };

        let mut query = query
            .bind(stats.user_id)
            .bind(&stats.game_type)
            .bind(stats.ranking_id)
            .bind(stats.elo_score)
            .bind(stats.best_elo)
            .bind(stats.wins)
            .bind(stats.losses)
            .bind(stats.draws)
            .bind(stats.games_played)
            .bind(stats.cancelled_games)
            .bind(stats.win_rate)
            .bind(stats.current_streak)
            .bind(stats.longest_win_streak)
            .bind(stats.longest_lose_streak)
            .bind(stats.last_game_at)
            .bind(stats.total_play_time)
            .bind(stats.average_game_time)
            .bind(stats.version);
        if let Some(version) = expected_version {
            query = query.bind(version);
        }

        let written = query.execute(&mut *tx).await?.rows_affected();
        if written == 0 {
            tx.rollback().await?;
            return Ok(CasResult::Conflict);
        }

        tx.commit().await?;
        Ok(CasResult::Applied)
    }

    async fn increment_cancelled(&self, key: &StatsKey) -> Result<bool, RatingError> {
        let updated = sqlx::query(
            "UPDATE game_stats SET cancelled_games = cancelled_games + 1, version = version + 1 WHERE user_id = $1 AND game_type = $2 AND ranking_id = $3",
        )
        .bind(key.user_id)
        .bind(&key.game_type)
        .bind(key.ranking_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn leaderboard(
        &self,
        game_type: &str,
        ranking_id: i32,
        limit: usize,
    ) -> Result<Vec<GameStats>, RatingError> {
        let sql = format!(
            "SELECT {STATS_COLUMNS} FROM game_stats WHERE game_type = $1 AND ranking_id = $2 ORDER BY elo_score DESC, user_id ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, GameStats>(&sql)
            .bind(game_type)
            .bind(ranking_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Outcome;
    use chrono::Utc;

    fn key() -> StatsKey {
        StatsKey::new(1, "rock_paper_scissors", 0)
    }

    fn scored(version: i64, elo: i32) -> GameStats {
        let mut stats = GameStats::new(key(), 1200);
        stats.record(Outcome::Win, elo, Utc::now(), 0).unwrap();
        stats.version = version;
        stats
    }

    #[tokio::test]
    async fn creates_row_when_absent() {
        let repo = InMemoryGameStatsRepository::new();

        let result = repo
            .compare_and_swap(None, &scored(1, 1216), UpdateKey::user(10, 1), 16)
            .await
            .unwrap();

        assert_eq!(result, CasResult::Applied);
        assert_eq!(repo.get_stats(&key()).await.unwrap().unwrap().elo_score, 1216);
        assert_eq!(repo.applied_change(&UpdateKey::user(10, 1)).await.unwrap(), Some(16));
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let repo = InMemoryGameStatsRepository::new();
        repo.compare_and_swap(None, &scored(1, 1216), UpdateKey::user(10, 1), 16)
            .await
            .unwrap();

        let result = repo
            .compare_and_swap(None, &scored(1, 1230), UpdateKey::user(11, 1), 14)
            .await
            .unwrap();

        assert_eq!(result, CasResult::Conflict);
        assert_eq!(repo.get_stats(&key()).await.unwrap().unwrap().elo_score, 1216);
        assert_eq!(repo.applied_change(&UpdateKey::user(11, 1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ledger_key_blocks_second_application() {
        let repo = InMemoryGameStatsRepository::new();
        repo.compare_and_swap(None, &scored(1, 1216), UpdateKey::user(10, 1), 16)
            .await
            .unwrap();

        let result = repo
            .compare_and_swap(Some(1), &scored(2, 1230), UpdateKey::user(10, 1), 14)
            .await
            .unwrap();

        assert_eq!(result, CasResult::AlreadyApplied);
    }

    #[tokio::test]
    async fn cancellation_only_touches_existing_rows() {
        let repo = InMemoryGameStatsRepository::new();
        assert!(!repo.increment_cancelled(&key()).await.unwrap());
        assert_eq!(repo.row_count().await, 0);

        repo.insert(scored(1, 1216)).await;
        assert!(repo.increment_cancelled(&key()).await.unwrap());

        let stats = repo.get_stats(&key()).await.unwrap().unwrap();
        assert_eq!(stats.cancelled_games, 1);
        assert_eq!(stats.games_played, 1);
    }

    #[tokio::test]
    async fn leaderboard_orders_by_elo() {
        let repo = InMemoryGameStatsRepository::new();
        for (user_id, elo) in [(1, 1180), (2, 1260), (3, 1210)] {
            let mut stats = GameStats::new(StatsKey::new(user_id, "rock_paper_scissors", 0), elo);
            stats.version = 1;
            repo.insert(stats).await;
        }
        repo.insert(GameStats::new(StatsKey::new(4, "avalon", 0), 1500))
            .await;

        let board = repo.leaderboard("rock_paper_scissors", 0, 2).await.unwrap();
        let ids: Vec<i64> = board.iter().map(|s| s.user_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
