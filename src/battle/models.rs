use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::game::{Outcome, RefereeOutcome};
use crate::shared::{AiCodeId, BattleId, UserId};

pub const DEFAULT_BATTLE_TYPE: &str = "standard";

/// Battle lifecycle: waiting -> starting -> running -> finished | cancelled | error
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BattleStatus {
    Waiting,
    Starting,
    Running,
    Finished,
    Cancelled,
    Error,
}

impl BattleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BattleStatus::Finished | BattleStatus::Cancelled | BattleStatus::Error
        )
    }

    pub fn can_transition_to(self, next: BattleStatus) -> bool {
        use BattleStatus::*;
        matches!(
            (self, next),
            (Waiting, Starting)
                | (Waiting, Cancelled)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Cancelled)
                | (Running, Finished)
                | (Running, Error)
                | (Running, Cancelled)
        )
    }
}

/// One seat's final line inside `Battle::results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatOutcome {
    pub user_id: UserId,
    pub position: i32,
    pub outcome: Outcome,
}

/// Structured payload stored on a finished battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleResults {
    pub is_draw: bool,
    pub winners: Vec<UserId>,
    pub seats: Vec<SeatOutcome>,
    /// Referee-specific detail, e.g. the moves that were played
    pub metadata: serde_json::Value,
}

impl BattleResults {
    /// Freezes a referee outcome against the seats it was resolved for
    pub fn from_outcome(players: &[BattlePlayer], outcome: RefereeOutcome) -> Self {
        Self {
            is_draw: outcome.is_draw,
            winners: outcome.winners(),
            seats: players
                .iter()
                .map(|seat| SeatOutcome {
                    user_id: seat.user_id,
                    position: seat.position,
                    outcome: outcome.outcome_for(seat.user_id).unwrap_or(Outcome::Error),
                })
                .collect(),
            metadata: outcome.metadata,
        }
    }

    pub fn outcome_for(&self, user_id: UserId) -> Option<Outcome> {
        self.seats
            .iter()
            .find(|seat| seat.user_id == user_id)
            .map(|seat| seat.outcome)
    }
}

/// One scheduled or completed match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub id: BattleId,
    pub game_type: String,
    pub status: BattleStatus,
    pub ranking_id: i32,
    pub battle_type: String,
    pub is_elo_exempt: bool,
    pub creator_id: UserId,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub results: Option<BattleResults>,
    pub game_log_id: Option<Uuid>,
    /// Set before the first rating update; the battle can no longer be cancelled
    pub ratings_committed: bool,
    /// Finished, but some rating updates are still queued
    pub pending_reconciliation: bool,
    /// Why the battle ended in error or was cancelled
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Battle {
    /// New battle in `waiting`; the repository assigns the id
    pub fn new(
        game_type: impl Into<String>,
        creator_id: UserId,
        ranking_id: i32,
        battle_type: impl Into<String>,
        is_elo_exempt: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            game_type: game_type.into(),
            status: BattleStatus::Waiting,
            ranking_id,
            battle_type: battle_type.into(),
            is_elo_exempt,
            creator_id,
            started_at: None,
            ended_at: None,
            results: None,
            game_log_id: None,
            ratings_committed: false,
            pending_reconciliation: false,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy moved to `next` with the version bumped, ready for a versioned write.
    /// Stamps `ended_at` when `next` is terminal.
    pub fn transitioned(&self, next: BattleStatus) -> Battle {
        let now = Utc::now();
        let mut battle = self.clone();
        battle.status = next;
        battle.version += 1;
        battle.updated_at = now;
        if next.is_terminal() {
            battle.ended_at = Some(now);
        }
        battle
    }

    /// Wall-clock seconds between start and end, zero if either is missing
    pub fn duration_secs(&self) -> i64 {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0),
            _ => 0,
        }
    }

    /// `ended_at` is set exactly for terminal states. `results` is set for
    /// finished battles and for running ones whose ratings are committed.
    pub fn is_consistent(&self) -> bool {
        let expects_results = match self.status {
            BattleStatus::Finished => true,
            BattleStatus::Running => self.ratings_committed,
            _ => false,
        };
        self.ended_at.is_some() == self.status.is_terminal() && self.results.is_some() == expects_results
    }
}

/// One seat in a battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattlePlayer {
    pub battle_id: BattleId,
    pub user_id: UserId,
    pub selected_ai_code_id: Option<AiCodeId>,
    /// 1..=N, unique per battle
    pub position: i32,
    pub initial_elo: Option<i32>,
    pub initial_code_elo: Option<i32>,
    /// None until rated; stays None while the update waits for reconciliation
    pub elo_change: Option<i32>,
    pub outcome: Option<Outcome>,
    pub join_time: DateTime<Utc>,
}

impl BattlePlayer {
    pub fn new(
        battle_id: BattleId,
        user_id: UserId,
        selected_ai_code_id: Option<AiCodeId>,
        position: i32,
    ) -> Self {
        Self {
            battle_id,
            user_id,
            selected_ai_code_id,
            position,
            initial_elo: None,
            initial_code_elo: None,
            elo_change: None,
            outcome: None,
            join_time: Utc::now(),
        }
    }
}

/// A battle together with its seats, ordered by position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleDetail {
    #[serde(flatten)]
    pub battle: Battle,
    pub players: Vec<BattlePlayer>,
}

impl BattleDetail {
    pub fn player(&self, user_id: UserId) -> Option<&BattlePlayer> {
        self.players.iter().find(|p| p.user_id == user_id)
    }
}
