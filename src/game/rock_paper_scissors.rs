use std::str::FromStr;

use rand::Rng;
use serde_json::json;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use super::referee::{
    GameInfo, Outcome, ParticipantResult, Referee, RefereeError, RefereeOutcome, SubmittedMove,
};

pub const GAME_TYPE: &str = "rock_paper_scissors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Throw {
    Rock,
    Paper,
    Scissors,
}

impl Throw {
    pub const ALL: [Throw; 3] = [Throw::Rock, Throw::Paper, Throw::Scissors];

    /// The throw this one defeats
    pub fn beats(self) -> Throw {
        match self {
            Throw::Rock => Throw::Scissors,
            Throw::Paper => Throw::Rock,
            Throw::Scissors => Throw::Paper,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RockPaperScissorsReferee;

impl RockPaperScissorsReferee {
    pub fn new() -> Self {
        Self
    }
}

impl Referee for RockPaperScissorsReferee {
    fn info(&self) -> GameInfo {
        GameInfo {
            id: GAME_TYPE,
            name: "Rock Paper Scissors",
            version: "1.0.0",
            description: "Classic rock-paper-scissors for AI-vs-AI and player matches",
            player_count: 2,
        }
    }

    fn validate_move(&self, value: &str) -> bool {
        Throw::from_str(value).is_ok()
    }

    fn resolve(&self, moves: &[SubmittedMove]) -> Result<RefereeOutcome, RefereeError> {
        let [first, second] = moves else {
            return Err(RefereeError::PlayerCount {
                expected: 2,
                actual: moves.len(),
            });
        };

        if first.participant_id == second.participant_id {
            return Err(RefereeError::DuplicateParticipant(first.participant_id));
        }

        let submitted = json!([
            { "participant_id": first.participant_id, "move": first.value },
            { "participant_id": second.participant_id, "move": second.value },
        ]);

        let (a, b) = match (Throw::from_str(&first.value), Throw::from_str(&second.value)) {
            (Ok(a), Ok(b)) => (a, b),
            _ => {
                warn!(
                    first = %first.value,
                    second = %second.value,
                    "Invalid rock-paper-scissors move"
                );
                return Ok(RefereeOutcome::all_errors(
                    [first.participant_id, second.participant_id],
                    json!({ "moves": submitted, "reason": "invalid move" }),
                ));
            }
        };

        let (first_outcome, second_outcome) = if a == b {
            (Outcome::Draw, Outcome::Draw)
        } else if a.beats() == b {
            (Outcome::Win, Outcome::Loss)
        } else {
            (Outcome::Loss, Outcome::Win)
        };

        let winner = match first_outcome {
            Outcome::Win => Some(first.participant_id),
            Outcome::Loss => Some(second.participant_id),
            _ => None,
        };

        debug!(first = %a, second = %b, ?winner, "Resolved rock-paper-scissors round");

        Ok(RefereeOutcome {
            results: vec![
                ParticipantResult {
                    participant_id: first.participant_id,
                    outcome: first_outcome,
                },
                ParticipantResult {
                    participant_id: second.participant_id,
                    outcome: second_outcome,
                },
            ],
            is_draw: first_outcome == Outcome::Draw,
            metadata: json!({ "moves": submitted, "winner": winner }),
        })
    }

    fn random_move(&self) -> String {
        let index = rand::rng().random_range(0..Throw::ALL.len());
        Throw::ALL[index].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn resolve_pair(a: &str, b: &str) -> (Outcome, Outcome) {
        let referee = RockPaperScissorsReferee::new();
        let outcome = referee
            .resolve(&[SubmittedMove::new(1, a), SubmittedMove::new(2, b)])
            .unwrap();
        (
            outcome.outcome_for(1).unwrap(),
            outcome.outcome_for(2).unwrap(),
        )
    }

    #[rstest]
    #[case("rock", "scissors", Outcome::Win, Outcome::Loss)]
    #[case("paper", "rock", Outcome::Win, Outcome::Loss)]
    #[case("scissors", "paper", Outcome::Win, Outcome::Loss)]
    #[case("scissors", "rock", Outcome::Loss, Outcome::Win)]
    #[case("rock", "paper", Outcome::Loss, Outcome::Win)]
    #[case("paper", "scissors", Outcome::Loss, Outcome::Win)]
    fn test_win_table(
        #[case] a: &str,
        #[case] b: &str,
        #[case] expected_a: Outcome,
        #[case] expected_b: Outcome,
    ) {
        assert_eq!(resolve_pair(a, b), (expected_a, expected_b));
    }

    #[rstest]
    fn test_swapping_seats_mirrors_outcomes(
        #[values("rock", "paper", "scissors")] a: &str,
        #[values("rock", "paper", "scissors")] b: &str,
    ) {
        let (forward_a, forward_b) = resolve_pair(a, b);
        let (reverse_b, reverse_a) = resolve_pair(b, a);

        assert_eq!(forward_a, reverse_a);
        assert_eq!(forward_b, reverse_b);
        assert_eq!(forward_a, forward_b.mirrored());
    }

    #[rstest]
    #[case("rock")]
    #[case("paper")]
    #[case("scissors")]
    fn test_identical_moves_draw(#[case] value: &str) {
        let referee = RockPaperScissorsReferee::new();
        let outcome = referee
            .resolve(&[SubmittedMove::new(1, value), SubmittedMove::new(2, value)])
            .unwrap();

        assert!(outcome.is_draw);
        assert_eq!(outcome.outcome_for(1), Some(Outcome::Draw));
        assert_eq!(outcome.outcome_for(2), Some(Outcome::Draw));
        assert!(outcome.winners().is_empty());
    }

    #[rstest]
    #[case("quantum", "rock")]
    #[case("rock", "quantum")]
    #[case("", "paper")]
    #[case("Rock", "paper")]
    #[case("lizard", "spock")]
    fn test_invalid_move_errors_both_sides(#[case] a: &str, #[case] b: &str) {
        assert_eq!(resolve_pair(a, b), (Outcome::Error, Outcome::Error));
    }

    #[test]
    fn test_wrong_player_count_is_rejected() {
        let referee = RockPaperScissorsReferee::new();
        let result = referee.resolve(&[SubmittedMove::new(1, "rock")]);

        assert_eq!(
            result,
            Err(RefereeError::PlayerCount {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_duplicate_participant_is_rejected() {
        let referee = RockPaperScissorsReferee::new();
        let result = referee.resolve(&[SubmittedMove::new(7, "rock"), SubmittedMove::new(7, "paper")]);

        assert_eq!(result, Err(RefereeError::DuplicateParticipant(7)));
    }

    #[test]
    fn test_metadata_records_winner() {
        let referee = RockPaperScissorsReferee::new();
        let outcome = referee
            .resolve(&[SubmittedMove::new(10, "paper"), SubmittedMove::new(20, "scissors")])
            .unwrap();

        assert_eq!(outcome.metadata["winner"], 20);
        assert_eq!(outcome.metadata["moves"][0]["move"], "paper");
    }

    #[test]
    fn test_random_move_is_always_legal() {
        let referee = RockPaperScissorsReferee::new();
        for _ in 0..50 {
            assert!(referee.validate_move(&referee.random_move()));
        }
    }
}
