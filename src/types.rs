// Strong typing over strings. Newtypes for frame indices, frame rate, sides and server numbers.
// The score wire string ("7-4" singles, "7-4-2" doubles) is parsed once into ScoreLine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Frame index in source-video frame space. Zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct FrameIndex(u32);

impl FrameIndex {
    pub fn new(index: u32) -> Self {
        FrameIndex(index)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Shift by a signed number of frames, saturating at frame 0.
    pub fn offset(&self, delta: i64) -> Self {
        let shifted = (self.0 as i64).saturating_add(delta);
        FrameIndex(shifted.clamp(0, u32::MAX as i64) as u32)
    }
}

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frame rate of the source video. Always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Fps(f64);

impl Fps {
    pub fn new(fps: f64) -> Result<Self, EngineError> {
        if fps.is_finite() && fps > 0.0 {
            Ok(Fps(fps))
        } else {
            Err(EngineError::InvalidConfig(format!(
                "fps must be a positive number, got {}",
                fps
            )))
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// Nearest frame to a playback position in seconds. Negative positions clamp to frame 0.
    pub fn frame_at(&self, secs: f64) -> FrameIndex {
        // NaN.max(0.0) is 0.0, and `as` saturates above u32::MAX.
        FrameIndex((secs * self.0).round().max(0.0) as u32)
    }

    pub fn secs_at(&self, frame: FrameIndex) -> f64 {
        frame.as_u32() as f64 / self.0
    }
}

impl Default for Fps {
    fn default() -> Self {
        Fps(30.0)
    }
}

impl TryFrom<f64> for Fps {
    type Error = EngineError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Fps::new(value)
    }
}

impl From<Fps> for f64 {
    fn from(fps: Fps) -> Self {
        fps.0
    }
}

/// One of the two sides of the court. Serialized as 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Side::A),
            1 => Ok(Side::B),
            other => Err(EngineError::InvalidConfig(format!(
                "serving side must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

impl From<Side> for u8 {
    fn from(side: Side) -> Self {
        side.index() as u8
    }
}

/// Which player of the serving side is serving (doubles only). Serialized as 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ServerNumber {
    One,
    Two,
}

impl ServerNumber {
    pub fn as_u8(self) -> u8 {
        match self {
            ServerNumber::One => 1,
            ServerNumber::Two => 2,
        }
    }
}

impl TryFrom<u8> for ServerNumber {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ServerNumber::One),
            2 => Ok(ServerNumber::Two),
            other => Err(EngineError::InvalidScoreFormat(format!(
                "server number must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<ServerNumber> for u8 {
    fn from(server: ServerNumber) -> Self {
        server.as_u8()
    }
}

/// Singles or doubles. Determines score string arity and server rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Singles,
    #[default]
    Doubles,
}

/// Point target for a game. `Timed` games never end on score.
/// JSON: `{"points": 11}` or `"timed"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VictoryTarget {
    Points(u32),
    Timed,
}

impl VictoryTarget {
    pub fn points(&self) -> Option<u32> {
        match self {
            VictoryTarget::Points(points) => Some(*points),
            VictoryTarget::Timed => None,
        }
    }
}

impl Default for VictoryTarget {
    fn default() -> Self {
        VictoryTarget::Points(11)
    }
}

/// Scoring rules for one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GameRules {
    pub game_mode: GameMode,
    pub victory_target: VictoryTarget,
}

impl GameRules {
    pub fn new(game_mode: GameMode, victory_target: VictoryTarget) -> Self {
        GameRules {
            game_mode,
            victory_target,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let VictoryTarget::Points(0) = self.victory_target {
            return Err(EngineError::InvalidConfig(
                "victory target must be at least 1 point".to_string(),
            ));
        }
        Ok(())
    }
}

/// Who won a rally, relative to the serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RallyWinner {
    Server,
    Receiver,
}

impl FromStr for RallyWinner {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(RallyWinner::Server),
            "receiver" => Ok(RallyWinner::Receiver),
            other => Err(EngineError::InvalidConfig(format!(
                "rally winner must be \"server\" or \"receiver\", got {:?}",
                other
            ))),
        }
    }
}

/// Parsed score wire string, always from the serving side's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreLine {
    pub serving: u32,
    pub receiving: u32,
    pub server_number: Option<ServerNumber>,
}

impl ScoreLine {
    /// Parse `"{int}-{int}"` (singles) or `"{int}-{int}-{1|2}"` (doubles).
    pub fn parse(input: &str, mode: GameMode) -> Result<Self, EngineError> {
        let parts: Vec<&str> = input.trim().split('-').map(str::trim).collect();
        let expected = match mode {
            GameMode::Singles => 2,
            GameMode::Doubles => 3,
        };
        if parts.len() != expected {
            return Err(EngineError::InvalidScoreFormat(format!(
                "{:?}: expected {} numbers separated by '-' for {:?}",
                input, expected, mode
            )));
        }

        let number = |part: &str| -> Result<u32, EngineError> {
            // u32::from_str would also take a leading '+'.
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(EngineError::InvalidScoreFormat(format!(
                    "{:?}: {:?} is not a non-negative integer",
                    input, part
                )));
            }
            part.parse::<u32>().map_err(|_| {
                EngineError::InvalidScoreFormat(format!(
                    "{:?}: {:?} is not a non-negative integer",
                    input, part
                ))
            })
        };

        let serving = number(parts[0])?;
        let receiving = number(parts[1])?;
        let server_number = match mode {
            GameMode::Singles => None,
            GameMode::Doubles => {
                let raw = u8::try_from(number(parts[2])?).map_err(|_| {
                    EngineError::InvalidScoreFormat(format!(
                        "{:?}: server number must be 1 or 2",
                        input
                    ))
                })?;
                Some(ServerNumber::try_from(raw)?)
            }
        };

        Ok(ScoreLine {
            serving,
            receiving,
            server_number,
        })
    }
}

impl fmt::Display for ScoreLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.serving, self.receiving)?;
        if let Some(server) = self.server_number {
            write!(f, "-{}", server.as_u8())?;
        }
        Ok(())
    }
}

/// Immutable capture of score and server state.
/// `score` is indexed by side, not by serving perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub score: [u32; 2],
    pub serving_side: Side,
    pub server_number: Option<ServerNumber>,
    /// Set until the first side-out of the match.
    #[serde(default)]
    pub opening_sequence: bool,
}

/// One recorded rally: a kept segment of source video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rally {
    pub start_frame: FrameIndex,
    pub end_frame: FrameIndex,
    /// Score wire string before this rally was decided.
    pub score_at_start: String,
    pub winner: RallyWinner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Rally {
    pub fn duration_frames(&self) -> u32 {
        self.end_frame.as_u32().saturating_sub(self.start_frame.as_u32())
    }
}

/// Export projection of a rally: `{in, out, score}` in source frame space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "in")]
    pub in_frame: FrameIndex,
    #[serde(rename = "out")]
    pub out_frame: FrameIndex,
    pub score: String,
}

impl Segment {
    pub fn duration_frames(&self) -> u32 {
        self.out_frame.as_u32().saturating_sub(self.in_frame.as_u32())
    }
}

/// Session configuration passed from JS.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub game_mode: GameMode,
    #[serde(default)]
    pub victory_target: VictoryTarget,
    #[serde(default)]
    pub fps: Fps,
    #[serde(default)]
    pub padding: PaddingSettings,
}

impl SessionConfig {
    pub fn rules(&self) -> GameRules {
        GameRules::new(self.game_mode, self.victory_target)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.rules().validate()?;
        self.padding.validate()
    }
}

/// Lead-in and lead-out added around marked rally boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddingSettings {
    /// Seconds kept before the marked start.
    #[serde(default = "default_start_padding")]
    pub start_secs: f64,
    /// Seconds kept after the marked end.
    #[serde(default = "default_end_padding")]
    pub end_secs: f64,
}

fn default_start_padding() -> f64 {
    1.0
}

fn default_end_padding() -> f64 {
    1.0
}

impl PaddingSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [("start", self.start_secs), ("end", self.end_secs)] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{} padding must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for PaddingSettings {
    fn default() -> Self {
        PaddingSettings {
            start_secs: default_start_padding(),
            end_secs: default_end_padding(),
        }
    }
}
