use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use arena::{
    battle::{
        Battle, BattleError, BattlePlayer, BattleRepository, InMemoryBattleRepository,
        JoinBattleResult, MoveError, MoveProvider, MoveRequest,
    },
    rating::{
        CasResult, GameStats, GameStatsRepository, InMemoryGameStatsRepository, RatingError,
        StatsKey, UpdateKey,
    },
    shared::{AiCodeId, BattleId, UserId},
};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// What a scripted seat does when asked for a move
#[derive(Debug, Clone)]
pub enum Script {
    Play(String),
    Crash,
    Hang,
}

/// Move provider answering from a per-user script; unscripted users crash
#[derive(Clone, Default)]
pub struct ScriptedMoveProvider {
    scripts: Arc<RwLock<HashMap<UserId, Script>>>,
}

impl ScriptedMoveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: UserId, script: Script) {
        self.scripts.write().await.insert(user_id, script);
    }

    pub async fn play(&self, user_id: UserId, value: &str) {
        self.set(user_id, Script::Play(value.to_string())).await;
    }
}

#[async_trait]
impl MoveProvider for ScriptedMoveProvider {
    async fn request_move(&self, request: &MoveRequest) -> Result<String, MoveError> {
        let script = self.scripts.read().await.get(&request.user_id).cloned();
        match script {
            Some(Script::Play(value)) => Ok(value),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Crash) | None => Err(MoveError::Crashed(format!(
                "no script for user {}",
                request.user_id
            ))),
        }
    }
}

/// In-memory stats store whose writes fail for selected users
#[derive(Clone, Default)]
pub struct FailingStatsRepository {
    inner: Arc<InMemoryGameStatsRepository>,
    failing: Arc<RwLock<HashSet<UserId>>>,
}

impl FailingStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_writes_for(&self, user_id: UserId) {
        self.failing.write().await.insert(user_id);
    }

    pub async fn recover(&self) {
        self.failing.write().await.clear();
    }
}

#[async_trait]
impl GameStatsRepository for FailingStatsRepository {
    async fn get_stats(&self, key: &StatsKey) -> Result<Option<GameStats>, RatingError> {
        self.inner.get_stats(key).await
    }

    async fn applied_change(&self, key: &UpdateKey) -> Result<Option<i32>, RatingError> {
        self.inner.applied_change(key).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: Option<i64>,
        stats: &GameStats,
        key: UpdateKey,
        elo_change: i32,
    ) -> Result<CasResult, RatingError> {
        if self.failing.read().await.contains(&stats.user_id) {
            return Err(RatingError::Repository("storage unavailable".to_string()));
        }
        self.inner
            .compare_and_swap(expected_version, stats, key, elo_change)
            .await
    }

    async fn increment_cancelled(&self, key: &StatsKey) -> Result<bool, RatingError> {
        self.inner.increment_cancelled(key).await
    }

    async fn leaderboard(
        &self,
        game_type: &str,
        ranking_id: i32,
        limit: usize,
    ) -> Result<Vec<GameStats>, RatingError> {
        self.inner.leaderboard(game_type, ranking_id, limit).await
    }
}

/// In-memory battle store whose next few seat saves fail
#[derive(Clone, Default)]
pub struct FlakyBattleRepository {
    inner: Arc<InMemoryBattleRepository>,
    failing_saves: Arc<AtomicUsize>,
}

impl FlakyBattleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_seat_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl BattleRepository for FlakyBattleRepository {
    async fn create_battle(&self, battle: Battle) -> Result<Battle, BattleError> {
        self.inner.create_battle(battle).await
    }

    async fn get_battle(&self, battle_id: BattleId) -> Result<Option<Battle>, BattleError> {
        self.inner.get_battle(battle_id).await
    }

    async fn list_players(&self, battle_id: BattleId) -> Result<Vec<BattlePlayer>, BattleError> {
        self.inner.list_players(battle_id).await
    }

    async fn try_join(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        ai_code_id: Option<AiCodeId>,
        capacity: usize,
    ) -> Result<JoinBattleResult, BattleError> {
        self.inner
            .try_join(battle_id, user_id, ai_code_id, capacity)
            .await
    }

    async fn compare_and_swap(&self, expected_version: i64, battle: &Battle) -> Result<bool, BattleError> {
        self.inner.compare_and_swap(expected_version, battle).await
    }

    async fn save_players(&self, players: &[BattlePlayer]) -> Result<(), BattleError> {
        let tripped = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(BattleError::Persistence("storage hiccup".to_string()));
        }
        self.inner.save_players(players).await
    }

    async fn record_elo_change(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        elo_change: i32,
    ) -> Result<(), BattleError> {
        self.inner.record_elo_change(battle_id, user_id, elo_change).await
    }

    async fn clear_pending_reconciliation(&self, battle_id: BattleId) -> Result<(), BattleError> {
        self.inner.clear_pending_reconciliation(battle_id).await
    }

    async fn list_pending_reconciliation(&self) -> Result<Vec<Battle>, BattleError> {
        self.inner.list_pending_reconciliation().await
    }
}
