use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::RatingError;
use crate::game::Outcome;
use crate::shared::{AiCodeId, BattleId, UserId};

/// Identifies one GameStats row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatsKey {
    pub user_id: UserId,
    pub game_type: String,
    pub ranking_id: i32,
}

impl StatsKey {
    pub fn new(user_id: UserId, game_type: impl Into<String>, ranking_id: i32) -> Self {
        Self {
            user_id,
            game_type: game_type.into(),
            ranking_id,
        }
    }
}

/// Which kind of row an idempotence key protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateSubject {
    User(UserId),
    Code(AiCodeId),
}

/// Deduplication key for a rating update: one battle, one rated row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateKey {
    pub battle_id: BattleId,
    pub subject: UpdateSubject,
}

impl UpdateKey {
    pub fn user(battle_id: BattleId, user_id: UserId) -> Self {
        Self {
            battle_id,
            subject: UpdateSubject::User(user_id),
        }
    }

    pub fn code(battle_id: BattleId, ai_code_id: AiCodeId) -> Self {
        Self {
            battle_id,
            subject: UpdateSubject::Code(ai_code_id),
        }
    }

    /// (kind, id) pair as stored in the ledger table
    pub fn subject_columns(&self) -> (&'static str, i64) {
        match self.subject {
            UpdateSubject::User(id) => ("user", id),
            UpdateSubject::Code(id) => ("code", id),
        }
    }
}

/// Result of a versioned write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    Applied,
    /// The row moved past the expected version
    Conflict,
    /// The update key is already in the ledger
    AlreadyApplied,
}

/// Per (user, game type, ranking) rating record
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct GameStats {
    pub user_id: UserId,
    pub game_type: String,
    pub ranking_id: i32,
    pub elo_score: i32,
    pub best_elo: i32,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub games_played: i32,
    pub cancelled_games: i32,
    pub win_rate: f64,
    /// Positive for a win streak, negative for a losing streak
    pub current_streak: i32,
    pub longest_win_streak: i32,
    pub longest_lose_streak: i32,
    pub last_game_at: Option<DateTime<Utc>>,
    /// Seconds
    pub total_play_time: i64,
    pub average_game_time: f64,
    pub version: i64,
}

impl GameStats {
    /// Fresh, not yet persisted record
    pub fn new(key: StatsKey, initial_elo: i32) -> Self {
        Self {
            user_id: key.user_id,
            game_type: key.game_type,
            ranking_id: key.ranking_id,
            elo_score: initial_elo,
            best_elo: initial_elo,
            wins: 0,
            losses: 0,
            draws: 0,
            games_played: 0,
            cancelled_games: 0,
            win_rate: 0.0,
            current_streak: 0,
            longest_win_streak: 0,
            longest_lose_streak: 0,
            last_game_at: None,
            total_play_time: 0,
            average_game_time: 0.0,
            version: 0,
        }
    }

    pub fn key(&self) -> StatsKey {
        StatsKey::new(self.user_id, self.game_type.clone(), self.ranking_id)
    }

    /// Folds one scored game into the counters, streaks and ELO
    pub fn record(
        &mut self,
        outcome: Outcome,
        new_elo: i32,
        played_at: DateTime<Utc>,
        play_time_secs: i64,
    ) -> Result<(), RatingError> {
        match outcome {
            Outcome::Win => {
                self.wins += 1;
                self.current_streak = if self.current_streak > 0 {
                    self.current_streak + 1
                } else {
                    1
                };
                self.longest_win_streak = self.longest_win_streak.max(self.current_streak);
            }
            Outcome::Loss => {
                self.losses += 1;
                self.current_streak = if self.current_streak < 0 {
                    self.current_streak - 1
                } else {
                    -1
                };
                self.longest_lose_streak = self.longest_lose_streak.max(-self.current_streak);
            }
            Outcome::Draw => {
                self.draws += 1;
                self.current_streak = 0;
            }
            Outcome::Error => return Err(RatingError::Unscorable(outcome)),
        }

        self.games_played += 1;
        self.win_rate = self.wins as f64 / self.games_played as f64;
        self.elo_score = new_elo;
        self.best_elo = self.best_elo.max(new_elo);
        self.last_game_at = Some(played_at);
        self.total_play_time += play_time_secs.max(0);
        self.average_game_time = self.total_play_time as f64 / self.games_played as f64;
        Ok(())
    }

    /// `wins + losses + draws == games_played` and `win_rate` matches the ratio
    pub fn is_consistent(&self) -> bool {
        let expected_rate = if self.games_played == 0 {
            0.0
        } else {
            self.wins as f64 / self.games_played as f64
        };
        self.wins + self.losses + self.draws == self.games_played
            && (self.win_rate - expected_rate).abs() < 1e-9
    }
}
