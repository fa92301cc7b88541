use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::referee::{GameInfo, Referee};
use super::rock_paper_scissors::{self, RockPaperScissorsReferee};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported game type: {0}")]
    NotFound(String),

    #[error("game type already registered: {0}")]
    Duplicate(String),
}

/// Collects referees before the registry is frozen
#[derive(Default)]
pub struct GameRegistryBuilder {
    referees: HashMap<String, Arc<dyn Referee>>,
}

impl GameRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the referee produced by `factory` under `game_type`
    pub fn register<F>(mut self, game_type: impl Into<String>, factory: F) -> Result<Self, RegistryError>
    where
        F: FnOnce() -> Arc<dyn Referee>,
    {
        let game_type = game_type.into();
        if self.referees.contains_key(&game_type) {
            return Err(RegistryError::Duplicate(game_type));
        }

        let referee = factory();
        info!(game_type = %game_type, name = referee.info().name, "Registering referee");
        self.referees.insert(game_type, referee);
        Ok(self)
    }

    pub fn build(self) -> GameRegistry {
        GameRegistry {
            referees: self.referees,
        }
    }
}

/// Immutable game-type → referee table.
///
/// Built once at startup; every read afterwards is lock-free.
#[derive(Clone)]
pub struct GameRegistry {
    referees: HashMap<String, Arc<dyn Referee>>,
}

impl GameRegistry {
    pub fn builder() -> GameRegistryBuilder {
        GameRegistryBuilder::new()
    }

    /// Registry holding every game shipped with the server
    pub fn with_builtin_games() -> Self {
        let mut referees: HashMap<String, Arc<dyn Referee>> = HashMap::new();
        referees.insert(
            rock_paper_scissors::GAME_TYPE.to_string(),
            Arc::new(RockPaperScissorsReferee::new()),
        );
        Self { referees }
    }

    pub fn lookup(&self, game_type: &str) -> Result<Arc<dyn Referee>, RegistryError> {
        self.referees
            .get(game_type)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(game_type.to_string()))
    }

    pub fn contains(&self, game_type: &str) -> bool {
        self.referees.contains_key(game_type)
    }

    /// Metadata for every registered game, ordered by id
    pub fn list(&self) -> Vec<GameInfo> {
        let mut games: Vec<GameInfo> = self.referees.values().map(|r| r.info()).collect();
        games.sort_by(|a, b| a.id.cmp(b.id));
        games
    }
}
