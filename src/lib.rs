// Library crate for the battle arena service
// This file exposes the public API for the binary and integration tests

pub mod ai_code;
pub mod battle;
pub mod config;
pub mod event;
pub mod game;
pub mod rating;
pub mod shared;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

// Re-export commonly used types for easier access in tests
pub use battle::{BattleError, BattleOrchestrator, BattleStatus, ValidationError};
pub use config::ArenaConfig;
pub use event::{BattleEvent, EventBus};
pub use game::{GameRegistry, Outcome, SubmittedMove};
pub use rating::RatingEngine;
pub use shared::{Actor, AppError, AppState, Repositories};

/// Every HTTP route the service exposes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/games", get(battle::handlers::list_games))
        .route("/battles", post(battle::handlers::create_battle))
        .route("/battles/:id", get(battle::handlers::get_battle))
        .route("/battles/:id/join", post(battle::handlers::join_battle))
        .route("/battles/:id/play", post(battle::handlers::play_battle))
        .route("/battles/:id/cancel", post(battle::handlers::cancel_battle))
        .route("/stats/:user_id/:game_type", get(rating::handlers::get_stats))
        .route("/leaderboard/:game_type", get(rating::handlers::leaderboard))
        .route(
            "/ai-codes/:id/activate",
            post(ai_code::handlers::activate_code),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
