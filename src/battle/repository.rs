use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    models::{Battle, BattlePlayer, BattleResults, BattleStatus},
    BattleError,
};
use crate::game::Outcome;
use crate::shared::{AiCodeId, BattleId, UserId};

/// Result of attempting to take a seat
#[derive(Debug, Clone, PartialEq)]
pub enum JoinBattleResult {
    /// Seated at the returned position
    Success(BattlePlayer),
    /// The user already holds this seat
    AlreadySeated(BattlePlayer),
    BattleFull,
    /// Battle has left `waiting`
    NotJoinable(BattleStatus),
    BattleNotFound,
}

#[async_trait]
pub trait BattleRepository: Send + Sync {
    /// Stores a new battle and returns it with its assigned id
    async fn create_battle(&self, battle: Battle) -> Result<Battle, BattleError>;
    async fn get_battle(&self, battle_id: BattleId) -> Result<Option<Battle>, BattleError>;

    /// Seats ordered by position
    async fn list_players(&self, battle_id: BattleId) -> Result<Vec<BattlePlayer>, BattleError>;

    /// Atomically takes the next free position while the battle is waiting
    /// and has fewer than `capacity` seats
    async fn try_join(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        ai_code_id: Option<AiCodeId>,
        capacity: usize,
    ) -> Result<JoinBattleResult, BattleError>;

    /// Writes `battle` only if the stored row is still at `expected_version`
    async fn compare_and_swap(&self, expected_version: i64, battle: &Battle) -> Result<bool, BattleError>;

    /// Overwrites the mutable columns of existing seats
    async fn save_players(&self, players: &[BattlePlayer]) -> Result<(), BattleError>;

    async fn record_elo_change(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        elo_change: i32,
    ) -> Result<(), BattleError>;

    async fn clear_pending_reconciliation(&self, battle_id: BattleId) -> Result<(), BattleError>;

    /// Finished battles still waiting on deferred rating updates
    async fn list_pending_reconciliation(&self) -> Result<Vec<Battle>, BattleError>;
}

#[derive(Default)]
struct BattleState {
    battles: HashMap<BattleId, Battle>,
    players: HashMap<BattleId, Vec<BattlePlayer>>,
    next_id: BattleId,
}

/// In-memory implementation of BattleRepository for development and testing
#[derive(Default)]
pub struct InMemoryBattleRepository {
    state: Mutex<BattleState>,
}

impl InMemoryBattleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BattleRepository for InMemoryBattleRepository {
    #[instrument(skip(self, battle), fields(game_type = %battle.game_type))]
    async fn create_battle(&self, mut battle: Battle) -> Result<Battle, BattleError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        battle.id = state.next_id;
        state.battles.insert(battle.id, battle.clone());
        state.players.insert(battle.id, Vec::new());

        debug!(battle_id = battle.id, "Battle created in memory");
        Ok(battle)
    }

    async fn get_battle(&self, battle_id: BattleId) -> Result<Option<Battle>, BattleError> {
        let state = self.state.lock().unwrap();
        Ok(state.battles.get(&battle_id).cloned())
    }

    async fn list_players(&self, battle_id: BattleId) -> Result<Vec<BattlePlayer>, BattleError> {
        let state = self.state.lock().unwrap();
        let mut players = state.players.get(&battle_id).cloned().unwrap_or_default();
        players.sort_by_key(|p| p.position);
        Ok(players)
    }

    #[instrument(skip(self))]
    async fn try_join(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        ai_code_id: Option<AiCodeId>,
        capacity: usize,
    ) -> Result<JoinBattleResult, BattleError> {
        let mut state = self.state.lock().unwrap();

        let status = match state.battles.get(&battle_id) {
            Some(battle) => battle.status,
            None => return Ok(JoinBattleResult::BattleNotFound),
        };
        let seats = state.players.entry(battle_id).or_default();

        if let Some(existing) = seats.iter().find(|p| p.user_id == user_id) {
            return Ok(JoinBattleResult::AlreadySeated(existing.clone()));
        }
        if status != BattleStatus::Waiting {
            return Ok(JoinBattleResult::NotJoinable(status));
        }
        if seats.len() >= capacity {
            debug!(battle_id, seated = seats.len(), "Battle is full");
            return Ok(JoinBattleResult::BattleFull);
        }

        let player = BattlePlayer::new(battle_id, user_id, ai_code_id, seats.len() as i32 + 1);
        seats.push(player.clone());

        info!(battle_id, user_id, position = player.position, "Player seated (atomic)");
        Ok(JoinBattleResult::Success(player))
    }

    async fn compare_and_swap(&self, expected_version: i64, battle: &Battle) -> Result<bool, BattleError> {
        let mut state = self.state.lock().unwrap();
        match state.battles.get_mut(&battle.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = battle.clone();
                Ok(true)
            }
            Some(stored) => {
                debug!(
                    battle_id = battle.id,
                    stored_version = stored.version,
                    expected_version,
                    "Battle version moved"
                );
                Ok(false)
            }
            None => Err(BattleError::NotFound(battle.id)),
        }
    }

    async fn save_players(&self, players: &[BattlePlayer]) -> Result<(), BattleError> {
        let mut state = self.state.lock().unwrap();
        for player in players {
            let seat = state
                .players
                .get_mut(&player.battle_id)
                .and_then(|seats| seats.iter_mut().find(|p| p.user_id == player.user_id))
                .ok_or(BattleError::NotFound(player.battle_id))?;
            *seat = player.clone();
        }
        Ok(())
    }

    async fn record_elo_change(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        elo_change: i32,
    ) -> Result<(), BattleError> {
        let mut state = self.state.lock().unwrap();
        let seat = state
            .players
            .get_mut(&battle_id)
            .and_then(|seats| seats.iter_mut().find(|p| p.user_id == user_id))
            .ok_or(BattleError::NotFound(battle_id))?;
        seat.elo_change = Some(elo_change);
        Ok(())
    }

    async fn clear_pending_reconciliation(&self, battle_id: BattleId) -> Result<(), BattleError> {
        let mut state = self.state.lock().unwrap();
        let battle = state
            .battles
            .get_mut(&battle_id)
            .ok_or(BattleError::NotFound(battle_id))?;
        battle.pending_reconciliation = false;
        battle.version += 1;
        battle.updated_at = Utc::now();
        Ok(())
    }

    async fn list_pending_reconciliation(&self) -> Result<Vec<Battle>, BattleError> {
        let state = self.state.lock().unwrap();
        let mut battles: Vec<Battle> = state
            .battles
            .values()
            .filter(|b| b.pending_reconciliation)
            .cloned()
            .collect();
        battles.sort_by_key(|b| b.id);
        Ok(battles)
    }
}

const BATTLE_COLUMNS: &str = "id, game_type, status, ranking_id, battle_type, is_elo_exempt, creator_id, started_at, ended_at, results, game_log_id, ratings_committed, pending_reconciliation, failure_reason, version, created_at, updated_at";
const PLAYER_COLUMNS: &str = "battle_id, user_id, selected_ai_code_id, position, initial_elo, initial_code_elo, elo_change, outcome, join_time";

#[derive(FromRow)]
struct BattleRow {
    id: BattleId,
    game_type: String,
    status: String,
    ranking_id: i32,
    battle_type: String,
    is_elo_exempt: bool,
    creator_id: UserId,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    results: Option<Json<BattleResults>>,
    game_log_id: Option<Uuid>,
    ratings_committed: bool,
    pending_reconciliation: bool,
    failure_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BattleRow> for Battle {
    type Error = BattleError;

    fn try_from(row: BattleRow) -> Result<Self, Self::Error> {
        let status = BattleStatus::from_str(&row.status).map_err(|_| {
            BattleError::Persistence(format!("unknown battle status '{}'", row.status))
        })?;
        Ok(Battle {
            id: row.id,
            game_type: row.game_type,
            status,
            ranking_id: row.ranking_id,
            battle_type: row.battle_type,
            is_elo_exempt: row.is_elo_exempt,
            creator_id: row.creator_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            results: row.results.map(|json| json.0),
            game_log_id: row.game_log_id,
            ratings_committed: row.ratings_committed,
            pending_reconciliation: row.pending_reconciliation,
            failure_reason: row.failure_reason,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PlayerRow {
    battle_id: BattleId,
    user_id: UserId,
    selected_ai_code_id: Option<AiCodeId>,
    position: i32,
    initial_elo: Option<i32>,
    initial_code_elo: Option<i32>,
    elo_change: Option<i32>,
    outcome: Option<String>,
    join_time: DateTime<Utc>,
}

impl TryFrom<PlayerRow> for BattlePlayer {
    type Error = BattleError;

    fn try_from(row: PlayerRow) -> Result<Self, Self::Error> {
        let outcome = row
            .outcome
            .as_deref()
            .map(Outcome::from_str)
            .transpose()
            .map_err(|e| BattleError::Persistence(format!("unknown outcome: {e}")))?;
        Ok(BattlePlayer {
            battle_id: row.battle_id,
            user_id: row.user_id,
            selected_ai_code_id: row.selected_ai_code_id,
            position: row.position,
            initial_elo: row.initial_elo,
            initial_code_elo: row.initial_code_elo,
            elo_change: row.elo_change,
            outcome,
            join_time: row.join_time,
        })
    }
}

/// PostgreSQL implementation of BattleRepository
pub struct PostgresBattleRepository {
    pool: PgPool,
}

impl PostgresBattleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BattleRepository for PostgresBattleRepository {
    #[instrument(skip(self, battle), fields(game_type = %battle.game_type))]
    async fn create_battle(&self, battle: Battle) -> Result<Battle, BattleError> {
        let sql = format!(
            "INSERT INTO battle (game_type, status, ranking_id, battle_type, is_elo_exempt, creator_id, version) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {BATTLE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BattleRow>(&sql)
            .bind(&battle.game_type)
            .bind(battle.status.as_ref())
            .bind(battle.ranking_id)
            .bind(&battle.battle_type)
            .bind(battle.is_elo_exempt)
            .bind(battle.creator_id)
            .bind(battle.version)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to create battle in database");
                BattleError::from(e)
            })?;
        row.try_into()
    }

    async fn get_battle(&self, battle_id: BattleId) -> Result<Option<Battle>, BattleError> {
        let sql = format!("SELECT {BATTLE_COLUMNS} FROM battle WHERE id = $1");
        sqlx::query_as::<_, BattleRow>(&sql)
            .bind(battle_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Battle::try_from)
            .transpose()
    }

    async fn list_players(&self, battle_id: BattleId) -> Result<Vec<BattlePlayer>, BattleError> {
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM battle_player WHERE battle_id = $1 ORDER BY position"
        );
        sqlx::query_as::<_, PlayerRow>(&sql)
            .bind(battle_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(BattlePlayer::try_from)
            .collect()
    }

    #[instrument(skip(self))]
    async fn try_join(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        ai_code_id: Option<AiCodeId>,
        capacity: usize,
    ) -> Result<JoinBattleResult, BattleError> {
        let mut tx = self.pool.begin().await?;

        // row lock serializes concurrent joins for the same battle
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM battle WHERE id = $1 FOR UPDATE")
                .bind(battle_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(status) = status else {
            return Ok(JoinBattleResult::BattleNotFound);
        };
        let status = BattleStatus::from_str(&status)
            .map_err(|_| BattleError::Persistence(format!("unknown battle status '{status}'")))?;

        let sql = format!("SELECT {PLAYER_COLUMNS} FROM battle_player WHERE battle_id = $1");
        let seats: Vec<BattlePlayer> = sqlx::query_as::<_, PlayerRow>(&sql)
            .bind(battle_id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(BattlePlayer::try_from)
            .collect::<Result<_, _>>()?;

        if let Some(existing) = seats.iter().find(|p| p.user_id == user_id) {
            return Ok(JoinBattleResult::AlreadySeated(existing.clone()));
        }
        if status != BattleStatus::Waiting {
            return Ok(JoinBattleResult::NotJoinable(status));
        }
        if seats.len() >= capacity {
            return Ok(JoinBattleResult::BattleFull);
        }

        let player = BattlePlayer::new(battle_id, user_id, ai_code_id, seats.len() as i32 + 1);
        sqlx::query(
            "INSERT INTO battle_player (battle_id, user_id, selected_ai_code_id, position, join_time) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(player.battle_id)
        .bind(player.user_id)
        .bind(player.selected_ai_code_id)
        .bind(player.position)
        .bind(player.join_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(battle_id, user_id, position = player.position, "Player seated in database");
        Ok(JoinBattleResult::Success(player))
    }

    #[instrument(skip(self, battle), fields(battle_id = battle.id, status = %battle.status))]
    async fn compare_and_swap(&self, expected_version: i64, battle: &Battle) -> Result<bool, BattleError> {
        let written = sqlx::query(
            "UPDATE battle SET status = $2, started_at = $3, ended_at = $4, results = $5, game_log_id = $6, ratings_committed = $7, pending_reconciliation = $8, failure_reason = $9, version = $10, updated_at = $11 WHERE id = $1 AND version = $12",
        )
        .bind(battle.id)
        .bind(battle.status.as_ref())
        .bind(battle.started_at)
        .bind(battle.ended_at)
        .bind(battle.results.as_ref().map(Json))
        .bind(battle.game_log_id)
        .bind(battle.ratings_committed)
        .bind(battle.pending_reconciliation)
        .bind(&battle.failure_reason)
        .bind(battle.version)
        .bind(battle.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(written == 1)
    }

    async fn save_players(&self, players: &[BattlePlayer]) -> Result<(), BattleError> {
        let mut tx = self.pool.begin().await?;
        for player in players {
            sqlx::query(
                "UPDATE battle_player SET selected_ai_code_id = $3, initial_elo = $4, initial_code_elo = $5, elo_change = $6, outcome = $7 WHERE battle_id = $1 AND user_id = $2",
            )
            .bind(player.battle_id)
            .bind(player.user_id)
            .bind(player.selected_ai_code_id)
            .bind(player.initial_elo)
            .bind(player.initial_code_elo)
            .bind(player.elo_change)
            .bind(player.outcome.map(|o| o.to_string()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_elo_change(
        &self,
        battle_id: BattleId,
        user_id: UserId,
        elo_change: i32,
    ) -> Result<(), BattleError> {
        sqlx::query("UPDATE battle_player SET elo_change = $3 WHERE battle_id = $1 AND user_id = $2")
            .bind(battle_id)
            .bind(user_id)
            .bind(elo_change)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_pending_reconciliation(&self, battle_id: BattleId) -> Result<(), BattleError> {
        sqlx::query(
            "UPDATE battle SET pending_reconciliation = FALSE, version = version + 1, updated_at = now() WHERE id = $1",
        )
        .bind(battle_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pending_reconciliation(&self) -> Result<Vec<Battle>, BattleError> {
        let sql = format!(
            "SELECT {BATTLE_COLUMNS} FROM battle WHERE pending_reconciliation ORDER BY id"
        );
        sqlx::query_as::<_, BattleRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Battle::try_from)
            .collect()
    }
}
