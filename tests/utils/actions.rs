//! Test action helpers - drive battles through the orchestrator
#![allow(dead_code)] // Test utilities may not all be used in every test

use arena::{
    battle::{BattleDetail, CreateBattleRequest, JoinBattleRequest},
    shared::{BattleId, UserId},
    Actor,
};

use super::setup::{TestArena, RPS};

// ============================================================================
// Battle Actions
// ============================================================================

impl TestArena {
    /// Creates a rock-paper-scissors battle seating `creator` then `opponent`,
    /// each with a freshly registered program
    pub async fn seat_two_players(&self, creator: UserId, opponent: UserId) -> BattleId {
        self.seat_two_players_with(CreateBattleRequest::new(RPS, None), creator, opponent)
            .await
    }

    pub async fn seat_two_players_with(
        &self,
        mut request: CreateBattleRequest,
        creator: UserId,
        opponent: UserId,
    ) -> BattleId {
        request.ai_code_id = Some(self.register_code(creator).await);
        let created = self
            .state
            .orchestrator
            .create_battle(Actor::user(creator), request)
            .await
            .unwrap();

        let ai_code_id = self.register_code(opponent).await;
        self.state
            .orchestrator
            .join_battle(
                Actor::user(opponent),
                created.battle.id,
                JoinBattleRequest {
                    ai_code_id: Some(ai_code_id),
                },
            )
            .await
            .unwrap();

        created.battle.id
    }

    /// Seats both players with scripted moves and plays the battle
    pub async fn play_rps(
        &self,
        (creator, creator_move): (UserId, &str),
        (opponent, opponent_move): (UserId, &str),
    ) -> BattleDetail {
        self.moves.play(creator, creator_move).await;
        self.moves.play(opponent, opponent_move).await;

        let battle_id = self.seat_two_players(creator, opponent).await;
        self.state
            .orchestrator
            .play_battle(Actor::user(creator), battle_id)
            .await
            .unwrap()
    }

    pub async fn battle(&self, battle_id: BattleId) -> BattleDetail {
        self.state.orchestrator.get_battle(battle_id).await.unwrap()
    }
}
