// Public API
pub use referee::{
    GameInfo, Outcome, ParticipantId, ParticipantResult, Referee, RefereeError, RefereeOutcome,
    SubmittedMove,
};
pub use registry::{GameRegistry, GameRegistryBuilder, RegistryError};
pub use rock_paper_scissors::{RockPaperScissorsReferee, Throw};

// Internal modules
mod referee;
mod registry;
pub mod rock_paper_scissors;
