use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Identifies one submitter inside a single referee call (the seated user's id)
pub type ParticipantId = i64;

/// Result of a game from the perspective of one participant
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
    Error,
}

impl Outcome {
    /// Actual score used by the ELO update. `Error` is never scored.
    pub fn score(self) -> Option<f64> {
        match self {
            Outcome::Win => Some(1.0),
            Outcome::Draw => Some(0.5),
            Outcome::Loss => Some(0.0),
            Outcome::Error => None,
        }
    }

    /// The same result seen from the other side of a two-player game
    pub fn mirrored(self) -> Self {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            other => other,
        }
    }
}

/// A move handed to the referee, tagged with who played it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedMove {
    pub participant_id: ParticipantId,
    pub value: String,
}

impl SubmittedMove {
    pub fn new(participant_id: ParticipantId, value: impl Into<String>) -> Self {
        Self {
            participant_id,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub participant_id: ParticipantId,
    pub outcome: Outcome,
}

/// Everything a referee decides for one decision point.
///
/// `results` keeps the order of the submissions it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeOutcome {
    pub results: Vec<ParticipantResult>,
    pub is_draw: bool,
    pub metadata: serde_json::Value,
}

impl RefereeOutcome {
    /// Marks every participant as `Error`
    pub fn all_errors(
        participants: impl IntoIterator<Item = ParticipantId>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            results: participants
                .into_iter()
                .map(|participant_id| ParticipantResult {
                    participant_id,
                    outcome: Outcome::Error,
                })
                .collect(),
            is_draw: false,
            metadata,
        }
    }

    pub fn outcome_for(&self, participant_id: ParticipantId) -> Option<Outcome> {
        self.results
            .iter()
            .find(|r| r.participant_id == participant_id)
            .map(|r| r.outcome)
    }

    pub fn has_error(&self) -> bool {
        self.results.iter().any(|r| r.outcome == Outcome::Error)
    }

    pub fn winners(&self) -> Vec<ParticipantId> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Win)
            .map(|r| r.participant_id)
            .collect()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefereeError {
    #[error("Expected {expected} submissions, got {actual}")]
    PlayerCount { expected: usize, actual: usize },

    #[error("Participant {0} submitted more than once")]
    DuplicateParticipant(ParticipantId),
}

/// Descriptive metadata a game publishes alongside its referee
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub player_count: usize,
}

/// Rule engine for one game type.
///
/// Implementations are stateless: `resolve` must not perform I/O or touch
/// shared state, so the same submissions always yield the same outcome.
pub trait Referee: Send + Sync {
    fn info(&self) -> GameInfo;

    /// True iff `value` is in the game's legal-move set
    fn validate_move(&self, value: &str) -> bool;

    /// Computes per-participant outcomes for one decision point.
    ///
    /// An illegal move is not an error here: it yields `Outcome::Error`
    /// entries. `Err` is reserved for submissions the referee cannot judge
    /// at all (wrong seat count, duplicated participant).
    fn resolve(&self, moves: &[SubmittedMove]) -> Result<RefereeOutcome, RefereeError>;

    /// A uniformly random legal move, for AI fallback and testing
    fn random_move(&self) -> String;
}
