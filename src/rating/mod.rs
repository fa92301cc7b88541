// Public API
pub use errors::RatingError;
pub use models::{CasResult, GameStats, StatsKey, UpdateKey, UpdateSubject};
pub use repository::{GameStatsRepository, InMemoryGameStatsRepository, PostgresGameStatsRepository};
pub use service::{RatingChange, RatingEngine, RatingUpdate};

/// Ranking bucket used when a battle does not name one
pub const DEFAULT_RANKING_ID: i32 = 0;

// Internal modules
pub mod elo;
mod errors;
pub mod handlers;
pub mod models;
pub mod repository;
mod service;
