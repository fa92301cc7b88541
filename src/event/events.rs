use serde::{Deserialize, Serialize};

use crate::game::Outcome;
use crate::shared::{BattleId, UserId};

/// Final line for one seat in a finished battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatResult {
    pub user_id: UserId,
    pub outcome: Outcome,
    /// None while the rating update is waiting for reconciliation
    pub elo_change: Option<i32>,
}

/// Facts about battles that have already happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEvent {
    BattleCreated {
        battle_id: BattleId,
        game_type: String,
        creator_id: UserId,
    },

    PlayerJoined {
        battle_id: BattleId,
        user_id: UserId,
        position: i32,
    },

    /// All seats are filled and moves are being collected
    BattleStarted {
        battle_id: BattleId,
        players: Vec<UserId>,
    },

    BattleFinished {
        battle_id: BattleId,
        results: Vec<SeatResult>,
        /// True when at least one rating update was deferred
        pending_reconciliation: bool,
    },

    BattleCancelled {
        battle_id: BattleId,
        reason: String,
    },

    /// The referee or the game lookup failed; nobody is rated
    BattleErrored {
        battle_id: BattleId,
        reason: String,
    },

    /// A deferred rating update was finally applied
    RatingReconciled {
        battle_id: BattleId,
        user_id: UserId,
        elo_change: i32,
    },
}

impl BattleEvent {
    pub fn battle_id(&self) -> BattleId {
        match self {
            BattleEvent::BattleCreated { battle_id, .. }
            | BattleEvent::PlayerJoined { battle_id, .. }
            | BattleEvent::BattleStarted { battle_id, .. }
            | BattleEvent::BattleFinished { battle_id, .. }
            | BattleEvent::BattleCancelled { battle_id, .. }
            | BattleEvent::BattleErrored { battle_id, .. }
            | BattleEvent::RatingReconciled { battle_id, .. } => *battle_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            BattleEvent::BattleCreated { .. } => "battle_created",
            BattleEvent::PlayerJoined { .. } => "player_joined",
            BattleEvent::BattleStarted { .. } => "battle_started",
            BattleEvent::BattleFinished { .. } => "battle_finished",
            BattleEvent::BattleCancelled { .. } => "battle_cancelled",
            BattleEvent::BattleErrored { .. } => "battle_errored",
            BattleEvent::RatingReconciled { .. } => "rating_reconciled",
        }
    }

    /// Whether the battle has reached a state it never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BattleEvent::BattleFinished { .. }
                | BattleEvent::BattleCancelled { .. }
                | BattleEvent::BattleErrored { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = BattleEvent::BattleCancelled {
            battle_id: 4,
            reason: "turn timeout".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "battle_cancelled");
        assert_eq!(json["battle_id"], 4);
        assert_eq!(event.event_type(), "battle_cancelled");
        assert!(event.is_terminal());
    }

    #[test]
    fn test_reconciliation_is_not_terminal() {
        let event = BattleEvent::RatingReconciled {
            battle_id: 9,
            user_id: 1,
            elo_change: 16,
        };
        assert_eq!(event.battle_id(), 9);
        assert!(!event.is_terminal());
    }
}
