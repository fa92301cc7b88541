pub mod actions;
pub mod assertions;
pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use assertions::{assert_consistent, StatsAssertion};
#[allow(unused_imports)]
pub use mocks::{FailingStatsRepository, FlakyBattleRepository, Script, ScriptedMoveProvider};
#[allow(unused_imports)]
pub use setup::{TestArena, TestArenaBuilder};
