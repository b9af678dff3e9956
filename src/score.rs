// Pickleball side-out scoring for singles and doubles.
// Only the serving side scores. Doubles rotates server 1 -> server 2 -> side-out,
// except during the opening sequence where the first fault is an immediate side-out.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::*;

/// Serving state reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub serving_side: Side,
    pub server_number: Option<ServerNumber>,
}

/// Score engine: owns the current score and server state for one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEngine {
    game_mode: GameMode,
    victory_target: VictoryTarget,
    score: [u32; 2],
    serving_side: Side,
    server_number: Option<ServerNumber>,
    /// One-shot flag: true until the first side-out of the game.
    #[serde(default)]
    opening_sequence: bool,
}

impl ScoreEngine {
    /// Start a new game at 0-0 with side A serving.
    /// Doubles opens as "0-0-2": the first server plays as second server.
    pub fn new(game_mode: GameMode, victory_target: VictoryTarget) -> Self {
        let (server_number, opening_sequence) = match game_mode {
            GameMode::Singles => (None, false),
            GameMode::Doubles => (Some(ServerNumber::Two), true),
        };

        ScoreEngine {
            game_mode,
            victory_target,
            score: [0, 0],
            serving_side: Side::A,
            server_number,
            opening_sequence,
        }
    }

    /// The serving side scores a point. Server state is unchanged.
    pub fn server_wins(&mut self) {
        let serving = self.serving_side.index();
        self.score[serving] = self.score[serving].saturating_add(1);
        debug!("point to side {:?}, score now {}", self.serving_side, self.score_string());

        if let (true, Some(side)) = self.is_game_over() {
            info!("game over: side {:?} wins {}", side, self.score_string());
        }
    }

    /// The receiving side wins the rally. No score change.
    pub fn receiver_wins(&mut self) {
        match (self.game_mode, self.server_number) {
            (GameMode::Doubles, Some(ServerNumber::One)) if !self.opening_sequence => {
                self.server_number = Some(ServerNumber::Two);
                debug!("second server up for side {:?}", self.serving_side);
            }
            _ => self.side_out(),
        }
    }

    pub fn apply_outcome(&mut self, winner: RallyWinner) {
        match winner {
            RallyWinner::Server => self.server_wins(),
            RallyWinner::Receiver => self.receiver_wins(),
        }
    }

    /// Manual side-out without touching the score.
    pub fn force_side_out(&mut self) {
        self.side_out();
    }

    fn side_out(&mut self) {
        self.serving_side = self.serving_side.opposite();
        if self.game_mode == GameMode::Doubles {
            self.server_number = Some(ServerNumber::One);
        }
        self.opening_sequence = false;
        debug!("side-out, side {:?} now serving", self.serving_side);
    }

    /// Returns `(game_over, winner)`. Timed games never end on score.
    pub fn is_game_over(&self) -> (bool, Option<Side>) {
        let winner = self.winner();
        (winner.is_some(), winner)
    }

    fn winner(&self) -> Option<Side> {
        let target = self.victory_target.points()?;
        let [a, b] = self.score;
        if a.max(b) >= target && a.abs_diff(b) >= 2 {
            Some(if a > b { Side::A } else { Side::B })
        } else {
            None
        }
    }

    /// Score from the serving side's perspective, e.g. "5-3" or "5-3-1".
    pub fn score_string(&self) -> String {
        self.score_line().to_string()
    }

    pub fn score_line(&self) -> ScoreLine {
        ScoreLine {
            serving: self.score[self.serving_side.index()],
            receiving: self.score[self.serving_side.opposite().index()],
            server_number: self.server_number,
        }
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            serving_side: self.serving_side,
            server_number: self.server_number,
        }
    }

    /// Manual override from a score wire string, read from the serving side's perspective.
    /// The serving side and the opening-sequence flag are kept. Malformed input leaves the
    /// engine unchanged.
    pub fn set_score(&mut self, score: &str) -> Result<(), EngineError> {
        let line = ScoreLine::parse(score, self.game_mode)?;
        self.apply_score_line(line);
        Ok(())
    }

    pub(crate) fn apply_score_line(&mut self, line: ScoreLine) {
        let serving = self.serving_side.index();
        self.score[serving] = line.serving;
        self.score[1 - serving] = line.receiving;
        if self.game_mode == GameMode::Doubles {
            self.server_number = line.server_number.or(Some(ServerNumber::One));
        }
        debug!("score set to {}", self.score_string());
    }

    /// Seed a replay engine. `opening_sequence` is true only when no side-out has
    /// happened yet in the game at the seeded rally.
    pub(crate) fn seed(&mut self, line: ScoreLine, opening_sequence: bool) {
        self.apply_score_line(line);
        self.opening_sequence = opening_sequence && self.game_mode == GameMode::Doubles;
    }

    pub fn rules(&self) -> GameRules {
        GameRules::new(self.game_mode, self.victory_target)
    }

    pub fn save_snapshot(&self) -> ScoreSnapshot {
        ScoreSnapshot {
            score: self.score,
            serving_side: self.serving_side,
            server_number: self.server_number,
            opening_sequence: self.opening_sequence,
        }
    }

    pub fn restore_snapshot(&mut self, snapshot: &ScoreSnapshot) {
        self.score = snapshot.score;
        self.serving_side = snapshot.serving_side;
        match self.game_mode {
            GameMode::Singles => {
                self.server_number = None;
                self.opening_sequence = false;
            }
            GameMode::Doubles => {
                self.server_number = snapshot.server_number.or(Some(ServerNumber::One));
                self.opening_sequence = snapshot.opening_sequence;
            }
        }
    }

    /// Check invariants of a deserialized engine.
    pub fn validate(&self) -> Result<(), EngineError> {
        match (self.game_mode, self.server_number) {
            (GameMode::Singles, Some(_)) => Err(EngineError::InvalidConfig(
                "singles engine must not carry a server number".to_string(),
            )),
            (GameMode::Doubles, None) => Err(EngineError::InvalidConfig(
                "doubles engine requires a server number".to_string(),
            )),
            _ => self.rules().validate(),
        }
    }

    pub fn game_mode(&self) -> GameMode {
        self.game_mode
    }

    pub fn victory_target(&self) -> VictoryTarget {
        self.victory_target
    }

    /// Score indexed by side (A, B).
    pub fn score(&self) -> [u32; 2] {
        self.score
    }

    pub fn serving_side(&self) -> Side {
        self.serving_side
    }

    pub fn server_number(&self) -> Option<ServerNumber> {
        self.server_number
    }
}
