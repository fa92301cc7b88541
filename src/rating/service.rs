use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    elo,
    models::{CasResult, GameStats, StatsKey, UpdateKey},
    repository::GameStatsRepository,
    RatingError,
};
use crate::ai_code::AiCodeRepository;
use crate::config::RatingConfig;
use crate::game::Outcome;
use crate::shared::{AiCodeId, BattleId, UserId};

/// One seat's contribution to the ratings after a battle
#[derive(Debug, Clone)]
pub struct RatingUpdate {
    pub battle_id: BattleId,
    pub user_id: UserId,
    pub ai_code_id: Option<AiCodeId>,
    pub game_type: String,
    pub ranking_id: i32,
    pub outcome: Outcome,
    /// Opponents' user ELO as of battle start
    pub opponent_elos: Vec<i32>,
    /// Opponents' AI code ELO as of battle start
    pub opponent_code_elos: Vec<i32>,
    pub played_at: DateTime<Utc>,
    pub play_time_secs: i64,
}

impl RatingUpdate {
    pub fn stats_key(&self) -> StatsKey {
        StatsKey::new(self.user_id, self.game_type.clone(), self.ranking_id)
    }
}

#[derive(Debug, Clone)]
pub struct RatingChange {
    pub stats: GameStats,
    pub elo_change: i32,
    /// False when the update had already been applied earlier
    pub applied: bool,
}

/// Applies ELO updates with optimistic concurrency and per-battle idempotence
pub struct RatingEngine {
    stats: Arc<dyn GameStatsRepository>,
    codes: Arc<dyn AiCodeRepository>,
    config: RatingConfig,
}

impl RatingEngine {
    pub fn new(
        stats: Arc<dyn GameStatsRepository>,
        codes: Arc<dyn AiCodeRepository>,
        config: RatingConfig,
    ) -> Self {
        Self {
            stats,
            codes,
            config,
        }
    }

    pub fn config(&self) -> RatingConfig {
        self.config
    }

    /// User ELO for a game type, or the initial rating when no row exists
    pub async fn current_elo(
        &self,
        user_id: UserId,
        game_type: &str,
        ranking_id: i32,
    ) -> Result<i32, RatingError> {
        let key = StatsKey::new(user_id, game_type, ranking_id);
        Ok(self
            .stats
            .get_stats(&key)
            .await?
            .map_or(self.config.initial_elo, |s| s.elo_score))
    }

    pub async fn code_elo(&self, ai_code_id: AiCodeId) -> Result<i32, RatingError> {
        self.codes
            .get_code(ai_code_id)
            .await?
            .map(|code| code.elo_score)
            .ok_or(RatingError::CodeNotFound(ai_code_id))
    }

    pub async fn get_stats(&self, key: &StatsKey) -> Result<Option<GameStats>, RatingError> {
        self.stats.get_stats(key).await
    }

    pub async fn leaderboard(
        &self,
        game_type: &str,
        ranking_id: i32,
        limit: usize,
    ) -> Result<Vec<GameStats>, RatingError> {
        self.stats.leaderboard(game_type, ranking_id, limit).await
    }

    /// Counts a cancelled battle against an existing stats row. Users without
    /// a row are left alone.
    pub async fn record_cancellation(
        &self,
        user_id: UserId,
        game_type: &str,
        ranking_id: i32,
    ) -> Result<bool, RatingError> {
        let key = StatsKey::new(user_id, game_type, ranking_id);
        let counted = self.stats.increment_cancelled(&key).await?;
        if !counted {
            debug!(user_id, game_type, "No stats row to count cancellation against");
        }
        Ok(counted)
    }

    /// Applies one seat's outcome to the user's GameStats and, when the seat
    /// played with AI code, to that code's own rating. Safe to call again for
    /// the same battle: already-applied parts are skipped.
    #[instrument(skip(self, update), fields(battle_id = update.battle_id, user_id = update.user_id, outcome = %update.outcome))]
    pub async fn apply_outcome(&self, update: &RatingUpdate) -> Result<RatingChange, RatingError> {
        let score = update
            .outcome
            .score()
            .ok_or(RatingError::Unscorable(update.outcome))?;

        let change = self.apply_user_outcome(update, score).await?;

        if let Some(ai_code_id) = update.ai_code_id {
            self.apply_code_outcome(update, ai_code_id, score).await?;
        }

        Ok(change)
    }

    async fn apply_user_outcome(
        &self,
        update: &RatingUpdate,
        score: f64,
    ) -> Result<RatingChange, RatingError> {
        let key = UpdateKey::user(update.battle_id, update.user_id);
        let stats_key = update.stats_key();

        for attempt in 1..=self.config.max_retries.max(1) {
            if let Some(elo_change) = self.stats.applied_change(&key).await? {
                debug!(elo_change, "User rating already updated for this battle");
                let stats = self
                    .stats
                    .get_stats(&stats_key)
                    .await?
                    .unwrap_or_else(|| GameStats::new(stats_key.clone(), self.config.initial_elo));
                return Ok(RatingChange {
                    stats,
                    elo_change,
                    applied: false,
                });
            }

            let current = self.stats.get_stats(&stats_key).await?;
            let expected_version = current.as_ref().map(|s| s.version);
            let mut next = current
                .unwrap_or_else(|| GameStats::new(stats_key.clone(), self.config.initial_elo));

            let old_elo = next.elo_score;
            let new_elo = elo::updated_rating(old_elo, &update.opponent_elos, score, self.config.k_factor);
            next.record(update.outcome, new_elo, update.played_at, update.play_time_secs)?;
            next.version = expected_version.unwrap_or(0) + 1;
            let elo_change = new_elo - old_elo;

            match self
                .stats
                .compare_and_swap(expected_version, &next, key, elo_change)
                .await?
            {
                CasResult::Applied => {
                    info!(old_elo, new_elo, "User rating updated");
                    return Ok(RatingChange {
                        stats: next,
                        elo_change,
                        applied: true,
                    });
                }
                // picked up by the ledger check on the next pass
                CasResult::AlreadyApplied => continue,
                CasResult::Conflict => {
                    debug!(attempt, "Stats row changed underneath, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(retries = self.config.max_retries, "Giving up on user rating update");
        Err(RatingError::ConcurrencyConflict(key))
    }

    async fn apply_code_outcome(
        &self,
        update: &RatingUpdate,
        ai_code_id: AiCodeId,
        score: f64,
    ) -> Result<i32, RatingError> {
        let key = UpdateKey::code(update.battle_id, ai_code_id);
        let opponents = if update.opponent_code_elos.is_empty() {
            &update.opponent_elos
        } else {
            &update.opponent_code_elos
        };

        for attempt in 1..=self.config.max_retries.max(1) {
            if let Some(elo_change) = self.codes.applied_change(&key).await? {
                return Ok(elo_change);
            }

            let mut code = self
                .codes
                .get_code(ai_code_id)
                .await?
                .ok_or(RatingError::CodeNotFound(ai_code_id))?;
            let expected_version = code.rating_version;

            let old_elo = code.elo_score;
            let new_elo = elo::updated_rating(old_elo, opponents, score, self.config.k_factor);
            code.record_result(update.outcome, new_elo, update.played_at)?;
            code.rating_version = expected_version + 1;
            let elo_change = new_elo - old_elo;

            match self
                .codes
                .compare_and_swap_rating(expected_version, &code, key, elo_change)
                .await?
            {
                CasResult::Applied => {
                    info!(ai_code_id, old_elo, new_elo, "AI code rating updated");
                    return Ok(elo_change);
                }
                CasResult::AlreadyApplied => continue,
                CasResult::Conflict => {
                    debug!(attempt, ai_code_id, "AI code row changed underneath, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(ai_code_id, "Giving up on AI code rating update");
        Err(RatingError::ConcurrencyConflict(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_code::{AiCode, InMemoryAiCodeRepository};
    use crate::rating::InMemoryGameStatsRepository;
    use async_trait::async_trait;

    const RPS: &str = "rock_paper_scissors";

    struct Fixture {
        stats: Arc<InMemoryGameStatsRepository>,
        codes: Arc<InMemoryAiCodeRepository>,
        engine: RatingEngine,
    }

    fn fixture() -> Fixture {
        let stats = Arc::new(InMemoryGameStatsRepository::new());
        let codes = Arc::new(InMemoryAiCodeRepository::new());
        let engine = RatingEngine::new(stats.clone(), codes.clone(), RatingConfig::default());
        Fixture {
            stats,
            codes,
            engine,
        }
    }

    fn update(battle_id: BattleId, user_id: UserId, outcome: Outcome, opponent_elo: i32) -> RatingUpdate {
        RatingUpdate {
            battle_id,
            user_id,
            ai_code_id: None,
            game_type: RPS.to_string(),
            ranking_id: 0,
            outcome,
            opponent_elos: vec![opponent_elo],
            opponent_code_elos: Vec::new(),
            played_at: Utc::now(),
            play_time_secs: 3,
        }
    }

    #[tokio::test]
    async fn fresh_players_move_sixteen_points() {
        let f = fixture();

        let winner = f.engine.apply_outcome(&update(1, 1, Outcome::Win, 1200)).await.unwrap();
        let loser = f.engine.apply_outcome(&update(1, 2, Outcome::Loss, 1200)).await.unwrap();

        assert_eq!(winner.stats.elo_score, 1216);
        assert_eq!(winner.elo_change, 16);
        assert_eq!(loser.stats.elo_score, 1184);
        assert_eq!(loser.elo_change, -16);
        assert_eq!(winner.stats.current_streak, 1);
        assert_eq!(loser.stats.current_streak, -1);
        assert!(winner.stats.is_consistent());
    }

    #[tokio::test]
    async fn reapplying_a_battle_is_a_no_op() {
        let f = fixture();
        let first = f.engine.apply_outcome(&update(7, 1, Outcome::Win, 1200)).await.unwrap();

        let second = f.engine.apply_outcome(&update(7, 1, Outcome::Win, 1200)).await.unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.elo_change, 16);
        assert_eq!(second.stats, first.stats);
        assert_eq!(second.stats.games_played, 1);
    }

    #[tokio::test]
    async fn error_outcomes_are_not_rated() {
        let f = fixture();

        let result = f.engine.apply_outcome(&update(1, 1, Outcome::Error, 1200)).await;

        assert!(matches!(result, Err(RatingError::Unscorable(Outcome::Error))));
        assert_eq!(f.stats.row_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_battles_for_one_user_both_land() {
        let f = fixture();
        let a = update(1, 1, Outcome::Win, 1200);
        let b = update(2, 1, Outcome::Loss, 1200);

        let (ra, rb) = tokio::join!(f.engine.apply_outcome(&a), f.engine.apply_outcome(&b));
        ra.unwrap();
        rb.unwrap();

        let stats = f
            .engine
            .get_stats(&StatsKey::new(1, RPS, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.version, 2);
    }

    #[tokio::test]
    async fn ai_code_rating_follows_code_opponents() {
        let f = fixture();
        let code = f
            .codes
            .create_code(AiCode::new(1, "bot", RPS, "bot.py", 1200))
            .await
            .unwrap();
        let mut seat = update(3, 1, Outcome::Win, 1400);
        seat.ai_code_id = Some(code.id);
        seat.opponent_code_elos = vec![1200];

        let change = f.engine.apply_outcome(&seat).await.unwrap();
        f.engine.apply_outcome(&seat).await.unwrap();

        // user rating is computed against the stronger user
        assert!(change.elo_change > 16);
        let code = f.codes.get_code(code.id).await.unwrap().unwrap();
        assert_eq!(code.elo_score, 1216);
        assert_eq!(code.win_count, 1);
        assert_eq!(code.total_games, 1);
    }

    #[tokio::test]
    async fn cancellation_counts_existing_rows_only() {
        let f = fixture();
        assert!(!f.engine.record_cancellation(1, RPS, 0).await.unwrap());
        assert_eq!(f.stats.row_count().await, 0);

        f.engine.apply_outcome(&update(1, 1, Outcome::Draw, 1200)).await.unwrap();
        assert!(f.engine.record_cancellation(1, RPS, 0).await.unwrap());

        let stats = f.engine.get_stats(&StatsKey::new(1, RPS, 0)).await.unwrap().unwrap();
        assert_eq!(stats.cancelled_games, 1);
        assert_eq!(stats.games_played, 1);
    }

    #[tokio::test]
    async fn current_elo_defaults_to_initial_rating() {
        let f = fixture();
        assert_eq!(f.engine.current_elo(9, RPS, 0).await.unwrap(), 1200);
        assert!(matches!(
            f.engine.code_elo(404).await,
            Err(RatingError::CodeNotFound(404))
        ));
    }

    /// Store whose rows always move before the write lands
    struct AlwaysConflicting;

    #[async_trait]
    impl GameStatsRepository for AlwaysConflicting {
        async fn get_stats(&self, _key: &StatsKey) -> Result<Option<GameStats>, RatingError> {
            Ok(None)
        }
        async fn applied_change(&self, _key: &UpdateKey) -> Result<Option<i32>, RatingError> {
            Ok(None)
        }
        async fn compare_and_swap(
            &self,
            _expected_version: Option<i64>,
            _stats: &GameStats,
            _key: UpdateKey,
            _elo_change: i32,
        ) -> Result<CasResult, RatingError> {
            Ok(CasResult::Conflict)
        }
        async fn increment_cancelled(&self, _key: &StatsKey) -> Result<bool, RatingError> {
            Ok(false)
        }
        async fn leaderboard(
            &self,
            _game_type: &str,
            _ranking_id: i32,
            _limit: usize,
        ) -> Result<Vec<GameStats>, RatingError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_a_conflict() {
        let engine = RatingEngine::new(
            Arc::new(AlwaysConflicting),
            Arc::new(InMemoryAiCodeRepository::new()),
            RatingConfig {
                max_retries: 3,
                ..RatingConfig::default()
            },
        );

        let result = engine.apply_outcome(&update(1, 1, Outcome::Win, 1200)).await;

        assert!(matches!(
            result,
            Err(RatingError::ConcurrencyConflict(key)) if key == UpdateKey::user(1, 1)
        ));
    }
}
