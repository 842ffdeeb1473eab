// Elo rating engine.
//
// Pure functions only: the caller is responsible for persisting the
// results and for making sure a match is scored at most once.

use serde::{Deserialize, Serialize};

/// Rating assigned to every newly registered player.
pub const INITIAL_RATING: i32 = 1600;

/// Fixed K-factor for all rating updates.
pub const K_FACTOR: f64 = 32.0;

/// Outcome of scoring a single match, from both players' perspectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingAdjustment {
    pub new_rating_p1: i32,
    pub new_rating_p2: i32,
    pub delta_p1: i32,
    pub delta_p2: i32,
}

/// Expected score of player A against player B under the logistic model:
/// `1 / (1 + 10^((b - a) / 400))`. Always in the open interval (0, 1),
/// and `expected_score(a, b) + expected_score(b, a) == 1` up to float
/// rounding.
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) / 400.0))
}

/// Compute both players' new ratings and deltas for a decided match.
///
/// The winner scores 1, the loser 0; each delta is `K * (score - expected)`
/// rounded half away from zero (`f64::round`). The two unrounded deltas are
/// exact negatives of each other, so the rounded pair sums to 0 within ±1.
/// New ratings are floored at 0 and unbounded above.
pub fn compute_adjustment(rating_p1: i32, rating_p2: i32, p1_won: bool) -> RatingAdjustment {
    let e1 = expected_score(rating_p1 as f64, rating_p2 as f64);
    let e2 = expected_score(rating_p2 as f64, rating_p1 as f64);
    let (s1, s2) = if p1_won { (1.0, 0.0) } else { (0.0, 1.0) };

    let delta_p1 = (K_FACTOR * (s1 - e1)).round() as i32;
    let delta_p2 = (K_FACTOR * (s2 - e2)).round() as i32;

    RatingAdjustment {
        new_rating_p1: (rating_p1 + delta_p1).max(0),
        new_rating_p2: (rating_p2 + delta_p2).max(0),
        delta_p1,
        delta_p2,
    }
}

/// Count how many of the given matches were won by `player_id`.
///
/// Each item is the match's winner id, or `None` for a match that has not
/// been completed yet; incomplete matches never count.
pub fn count_wins(winner_ids: impl IntoIterator<Item = Option<i64>>, player_id: i64) -> i64 {
    winner_ids
        .into_iter()
        .filter(|w| *w == Some(player_id))
        .count() as i64
}
