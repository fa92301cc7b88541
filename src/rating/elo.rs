//! ELO arithmetic.
//!
//! Ratings are stored as integers and rounded after every update. Games with
//! more than two seats average the pairwise expected scores against every
//! opponent and apply a single update.

/// Expected score of `rating` against one opponent
pub fn expected_score(rating: i32, opponent_rating: i32) -> f64 {
    1.0 / (1.0 + 10_f64.powf((opponent_rating - rating) as f64 / 400.0))
}

/// Mean of the pairwise expected scores. With no opponents the game is
/// treated as an even match.
pub fn averaged_expected_score(rating: i32, opponent_ratings: &[i32]) -> f64 {
    if opponent_ratings.is_empty() {
        return 0.5;
    }

    let total: f64 = opponent_ratings
        .iter()
        .map(|&opponent| expected_score(rating, opponent))
        .sum();
    total / opponent_ratings.len() as f64
}

/// New rating after a game.
///
/// # Arguments
/// * `rating` - Current rating
/// * `opponent_ratings` - Opponents' ratings as snapshotted at battle start
/// * `actual` - Actual score (1.0 = win, 0.5 = draw, 0.0 = loss)
/// * `k_factor` - Maximum swing for a single game
pub fn updated_rating(rating: i32, opponent_ratings: &[i32], actual: f64, k_factor: f64) -> i32 {
    let expected = averaged_expected_score(rating, opponent_ratings);
    (rating as f64 + k_factor * (actual - expected)).round() as i32
}
