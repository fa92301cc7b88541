// Public API
pub use errors::{BattleError, ValidationError};
pub use models::{
    Battle, BattleDetail, BattlePlayer, BattleResults, BattleStatus, SeatOutcome,
    DEFAULT_BATTLE_TYPE,
};
pub use move_provider::{MoveError, MoveProvider, MoveRequest, RandomMoveProvider};
pub use reconciliation::{start_reconciliation_task, ReconcileReport, Reconciler, ReconciliationQueue};
pub use repository::{
    BattleRepository, InMemoryBattleRepository, JoinBattleResult, PostgresBattleRepository,
};
pub use service::{BattleOrchestrator, BattleOrchestratorBuilder};
pub use types::{CancelBattleRequest, CreateBattleRequest, JoinBattleRequest};

// Internal modules
mod errors;
pub mod handlers;
pub mod models;
pub mod move_provider;
pub mod reconciliation;
pub mod repository;
mod service;
pub mod types;
