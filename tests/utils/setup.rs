use std::sync::Arc;
use std::time::Duration;

use arena::{
    ai_code::{AiCode, AiCodeRepository, InMemoryAiCodeRepository},
    battle::{BattleRepository, Reconciler, ReconciliationQueue},
    config::OrchestratorConfig,
    rating::GameStatsRepository,
    shared::{AiCodeId, UserId},
    ArenaConfig, AppState, EventBus, Repositories,
};

use super::mocks::{FailingStatsRepository, FlakyBattleRepository, ScriptedMoveProvider};

pub const RPS: &str = "rock_paper_scissors";

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestArena {
    pub state: AppState,
    pub moves: ScriptedMoveProvider,
    pub stats: FailingStatsRepository,
    pub battle_store: FlakyBattleRepository,
    pub battles: Arc<dyn BattleRepository>,
    pub ai_codes: Arc<dyn AiCodeRepository>,
    pub event_bus: EventBus,
}

pub struct TestArenaBuilder {
    config: ArenaConfig,
}

impl TestArenaBuilder {
    pub fn new() -> Self {
        Self {
            config: ArenaConfig::default(),
        }
    }

    pub fn with_timeouts(mut self, move_timeout: Duration, turn_timeout: Duration) -> Self {
        self.config.orchestrator = OrchestratorConfig {
            move_timeout,
            turn_timeout,
        };
        self
    }

    pub fn build(self) -> TestArena {
        let moves = ScriptedMoveProvider::new();
        let stats = FailingStatsRepository::new();
        let battle_store = FlakyBattleRepository::new();
        let battles: Arc<dyn BattleRepository> = Arc::new(battle_store.clone());
        let ai_codes: Arc<dyn AiCodeRepository> = Arc::new(InMemoryAiCodeRepository::new());
        let event_bus = EventBus::with_default_capacity();

        let repositories = Repositories {
            battles: Arc::clone(&battles),
            stats: Arc::new(stats.clone()) as Arc<dyn GameStatsRepository>,
            ai_codes: Arc::clone(&ai_codes),
        };
        let state = AppState::new(
            repositories,
            &self.config,
            event_bus.clone(),
            Arc::new(moves.clone()),
        );

        TestArena {
            state,
            moves,
            stats,
            battle_store,
            battles,
            ai_codes,
            event_bus,
        }
    }
}

impl TestArena {
    /// Registers an executable rock-paper-scissors program for `user_id`
    pub async fn register_code(&self, user_id: UserId) -> AiCodeId {
        self.register_named_code(user_id, RPS, "bot.py").await
    }

    pub async fn register_named_code(&self, user_id: UserId, game_type: &str, file_name: &str) -> AiCodeId {
        self.state
            .ai_codes
            .register_code(AiCode::new(user_id, "bot", game_type, file_name, 1200))
            .await
            .unwrap()
            .id
    }

    /// A reconciler over the same storage but with an empty queue, as after a restart
    pub fn fresh_reconciler(&self) -> Reconciler {
        Reconciler::new(
            ReconciliationQueue::new(),
            Arc::clone(&self.state.ratings),
            Arc::clone(&self.battles),
            self.event_bus.clone(),
        )
    }
}
