//! Test assertion helpers - fluent API for verifying rating rows
#![allow(dead_code)] // Test utilities may not all be used in every test

use arena::{
    battle::BattleDetail,
    rating::{GameStats, StatsKey},
    shared::UserId,
};

use super::setup::{TestArena, RPS};

// ============================================================================
// Assertion Helpers
// ============================================================================

pub struct StatsAssertion {
    stats: Option<GameStats>,
    user_id: UserId,
}

impl StatsAssertion {
    pub async fn for_user(arena: &TestArena, user_id: UserId) -> Self {
        let stats = arena
            .state
            .ratings
            .get_stats(&StatsKey::new(user_id, RPS, 0))
            .await
            .unwrap();
        Self { stats, user_id }
    }

    pub fn absent(self) {
        assert!(
            self.stats.is_none(),
            "expected no stats for user {}, found {:?}",
            self.user_id,
            self.stats
        );
    }

    pub fn row(&self) -> &GameStats {
        self.stats
            .as_ref()
            .unwrap_or_else(|| panic!("expected stats for user {}", self.user_id))
    }

    pub fn elo(self, expected: i32) -> Self {
        assert_eq!(self.row().elo_score, expected, "elo for user {}", self.user_id);
        self
    }

    pub fn record(self, wins: i32, losses: i32, draws: i32) -> Self {
        let row = self.row();
        assert_eq!(
            (row.wins, row.losses, row.draws),
            (wins, losses, draws),
            "win/loss/draw for user {}",
            self.user_id
        );
        assert!(row.is_consistent(), "inconsistent stats: {row:?}");
        self
    }

    pub fn cancelled(self, expected: i32) -> Self {
        assert_eq!(self.row().cancelled_games, expected);
        self
    }
}

/// Exactly one terminal status, and every seat of a finished battle has an
/// outcome and an ELO change
pub fn assert_consistent(detail: &BattleDetail) {
    assert!(detail.battle.status.is_terminal(), "{:?}", detail.battle.status);
    assert!(detail.battle.is_consistent(), "{:?}", detail.battle);
    for seat in &detail.players {
        assert!(seat.outcome.is_some(), "seat {} has no outcome", seat.position);
        assert!(seat.elo_change.is_some(), "seat {} has no elo change", seat.position);
    }
}
