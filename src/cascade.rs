// Cascade replay: re-derive every later rally's starting score after a correction
// by driving a score engine through the recorded winners.

use log::debug;

use crate::score::ScoreEngine;
use crate::types::*;

/// Seed `engine` with `seed` at rally `from`, then replay every rally from there on.
///
/// `rallies` is one game. `opening_sequence` is whether the game was still in its opening
/// service sequence at rally `from`, i.e. no receiver had won a rally before it.
/// Rally `from` keeps whatever `score_at_start` the caller wrote; each later rally gets
/// the engine's score string before its recorded winner is applied. Returns the engine
/// state after the last rally.
///
/// `from` must be a valid index into `rallies`.
pub fn replay(
    rallies: &mut [Rally],
    from: usize,
    seed: ScoreLine,
    opening_sequence: bool,
    engine: &mut ScoreEngine,
) -> ScoreSnapshot {
    engine.seed(seed, opening_sequence);

    for (i, rally) in rallies.iter_mut().enumerate().skip(from) {
        if i > from {
            let score = engine.score_string();
            if rally.score_at_start != score {
                debug!(
                    "cascade: rally {} score {} -> {}",
                    i, rally.score_at_start, score
                );
                rally.score_at_start = score;
            }
        }
        engine.apply_outcome(rally.winner);
    }

    engine.save_snapshot()
}

/// Starting scores a live engine would have recorded for `winners`, beginning at `seed`.
pub fn starting_scores(
    winners: &[RallyWinner],
    seed: ScoreLine,
    opening_sequence: bool,
    engine: &mut ScoreEngine,
) -> Vec<String> {
    engine.seed(seed, opening_sequence);
    winners
        .iter()
        .map(|winner| {
            let score = engine.score_string();
            engine.apply_outcome(*winner);
            score
        })
        .collect()
}
