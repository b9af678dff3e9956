// Rally timeline: the ordered list of kept segments, the rally in progress,
// and an action stack for single-step undo.
// Marked instants are padded into stored boundaries: start - start_secs (clamped to 0), end + end_secs.

use std::ops::Range;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cascade;
use crate::error::EngineError;
use crate::score::ScoreEngine;
use crate::types::*;

/// A started rally waiting for its end mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRally {
    /// Padded start frame stored on the rally.
    pub start_frame: FrameIndex,
    /// Frame the user actually marked.
    pub raw_frame: FrameIndex,
    /// Engine state before the rally was played.
    pub snapshot: ScoreSnapshot,
}

/// A reversible timeline action. Each variant carries what undo needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineAction {
    RallyStart { recorded_raw_frame: FrameIndex },
    /// `rally` is the rally as recorded; later edits apply to the list entry only.
    RallyEnd { rally: Rally, pending: PendingRally },
}

/// Stack of reversible actions. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    actions: Vec<TimelineAction>,
}

impl ActionLog {
    pub fn new() -> Self {
        ActionLog {
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: TimelineAction) {
        self.actions.push(action);
    }

    pub fn pop(&mut self) -> Option<TimelineAction> {
        self.actions.pop()
    }

    pub fn last(&self) -> Option<&TimelineAction> {
        self.actions.last()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

/// What `undo()` reversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndoOutcome {
    /// A rally start was discarded. The engine was never advanced.
    RallyStart {
        start_frame: FrameIndex,
        raw_frame: FrameIndex,
    },
    /// The last rally was removed and its start is pending again.
    /// The caller restores the engine from `pending.snapshot` and seeks to `pending.raw_frame`.
    RallyEnd { rally: Rally, pending: PendingRally },
}

impl UndoOutcome {
    pub fn description(&self) -> String {
        match self {
            UndoOutcome::RallyStart { raw_frame, .. } => {
                format!("Undid rally start at frame {}", raw_frame.as_u32())
            }
            UndoOutcome::RallyEnd { rally, .. } => format!(
                "Undid rally {}-{} ({}, {:?} won)",
                rally.start_frame.as_u32(),
                rally.end_frame.as_u32(),
                rally.score_at_start,
                rally.winner
            ),
        }
    }
}

/// Where a game begins on the timeline and the rules it was scored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSpan {
    pub first_rally: usize,
    pub rules: GameRules,
}

/// Persisted form of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineState {
    pub rallies: Vec<Rally>,
    pub fps: Fps,
    /// Game boundaries in rally order. Empty means one game under the current rules.
    #[serde(default)]
    pub games: Vec<GameSpan>,
}

/// Ordered, mutable log of marked rallies.
#[derive(Debug, Clone)]
pub struct RallyTimelineManager {
    rallies: Vec<Rally>,
    /// Never empty; the first game starts at rally 0.
    games: Vec<GameSpan>,
    pending: Option<PendingRally>,
    log: ActionLog,
    fps: Fps,
    padding: PaddingSettings,
}

impl RallyTimelineManager {
    pub fn new(fps: Fps, padding: PaddingSettings, rules: GameRules) -> Self {
        RallyTimelineManager {
            rallies: Vec::new(),
            games: vec![GameSpan {
                first_rally: 0,
                rules,
            }],
            pending: None,
            log: ActionLog::new(),
            fps,
            padding,
        }
    }

    /// Rebuild from persisted state. The action log starts empty.
    /// `current_rules` are the live engine's rules; they must match the last game.
    pub fn from_state(
        state: TimelineState,
        padding: PaddingSettings,
        current_rules: GameRules,
    ) -> Result<Self, EngineError> {
        if let Some(bad) = state.rallies.iter().find(|r| r.end_frame <= r.start_frame) {
            return Err(EngineError::InvalidRallyTiming {
                start: bad.start_frame,
                end: bad.end_frame,
            });
        }

        let games = if state.games.is_empty() {
            vec![GameSpan {
                first_rally: 0,
                rules: current_rules,
            }]
        } else {
            state.games
        };
        validate_games(&games, state.rallies.len(), current_rules)?;

        Ok(RallyTimelineManager {
            rallies: state.rallies,
            games,
            pending: None,
            log: ActionLog::new(),
            fps: state.fps,
            padding,
        })
    }

    pub fn to_state(&self) -> TimelineState {
        TimelineState {
            rallies: self.rallies.clone(),
            fps: self.fps,
            games: self.games.clone(),
        }
    }

    /// Start a new game after the recorded rallies. Drops the rally in progress and the
    /// undo history, so undo never crosses a game boundary.
    pub fn begin_game(&mut self, rules: GameRules) {
        self.reset_actions();
        let first_rally = self.rallies.len();
        match self.games.last_mut() {
            // No rally was played under the previous rules.
            Some(last) if last.first_rally == first_rally => last.rules = rules,
            _ => self.games.push(GameSpan { first_rally, rules }),
        }
    }

    /// Index into `games()` of the game rally `index` belongs to.
    pub fn game_index(&self, index: usize) -> usize {
        // games[0] starts at rally 0, so the partition point is at least 1.
        self.games
            .partition_point(|g| g.first_rally <= index)
            .saturating_sub(1)
    }

    /// Rally indices of game `game`.
    pub fn game_range(&self, game: usize) -> Range<usize> {
        let start = self.games[game].first_rally;
        let end = self
            .games
            .get(game + 1)
            .map(|g| g.first_rally)
            .unwrap_or(self.rallies.len());
        start..end
    }

    /// Whether rally `index` was played under the live game's rules.
    pub fn is_in_current_game(&self, index: usize) -> bool {
        self.game_index(index) + 1 == self.games.len()
    }

    /// No receiver had won a rally of this game before rally `index`.
    fn opening_at(&self, game_start: usize, index: usize) -> bool {
        self.rallies[game_start..index]
            .iter()
            .all(|r| r.winner == RallyWinner::Server)
    }

    /// Engine state a replay from rally `index` reaches using the recorded starting score.
    /// Side labels are relative to the replay, which starts with side A serving.
    pub fn replay_recorded(&self, index: usize) -> Option<ScoreSnapshot> {
        let rally = self.rallies.get(index)?;
        let game = self.game_index(index);
        let rules = self.games[game].rules;
        let range = self.game_range(game);
        let seed = ScoreLine::parse(&rally.score_at_start, rules.game_mode).ok()?;

        let winners: Vec<RallyWinner> = self.rallies[index..range.end]
            .iter()
            .map(|r| r.winner)
            .collect();
        let mut scratch = ScoreEngine::new(rules.game_mode, rules.victory_target);
        cascade::starting_scores(
            &winners,
            seed,
            self.opening_at(range.start, index),
            &mut scratch,
        );
        Some(scratch.save_snapshot())
    }

    /// Mark the start of a rally at `position_secs`. Returns the padded start frame.
    pub fn start_rally(
        &mut self,
        position_secs: f64,
        snapshot: ScoreSnapshot,
    ) -> Result<FrameIndex, EngineError> {
        if self.pending.is_some() {
            warn!("rally start ignored: a rally is already in progress");
            return Err(EngineError::RallyAlreadyInProgress);
        }

        let raw_frame = self.fps.frame_at(position_secs);
        let start_frame = self.fps.frame_at(position_secs - self.padding.start_secs);

        self.pending = Some(PendingRally {
            start_frame,
            raw_frame,
            snapshot,
        });
        self.log.push(TimelineAction::RallyStart {
            recorded_raw_frame: raw_frame,
        });

        debug!(
            "rally started at frame {} (padded to {})",
            raw_frame.as_u32(),
            start_frame.as_u32()
        );
        Ok(start_frame)
    }

    /// Mark the end of the pending rally. Returns the index of the appended rally.
    pub fn end_rally(
        &mut self,
        position_secs: f64,
        winner: RallyWinner,
        score_at_start: String,
    ) -> Result<usize, EngineError> {
        let start_frame = match &self.pending {
            Some(pending) => pending.start_frame,
            None => {
                warn!("rally end ignored: no rally in progress");
                return Err(EngineError::NoRallyInProgress);
            }
        };

        let end_frame = self.fps.frame_at(position_secs + self.padding.end_secs);
        if end_frame <= start_frame {
            warn!(
                "rally end at frame {} is not after start frame {}",
                end_frame.as_u32(),
                start_frame.as_u32()
            );
            return Err(EngineError::InvalidRallyTiming {
                start: start_frame,
                end: end_frame,
            });
        }

        let pending = self.pending.take().ok_or(EngineError::NoRallyInProgress)?;
        let rally = Rally {
            start_frame,
            end_frame,
            score_at_start,
            winner,
            comment: None,
        };
        self.rallies.push(rally.clone());
        self.log.push(TimelineAction::RallyEnd { rally, pending });

        let index = self.rallies.len() - 1;
        debug!(
            "rally {} recorded: frames {}-{}",
            index,
            start_frame.as_u32(),
            end_frame.as_u32()
        );
        Ok(index)
    }

    /// Reverse the most recent action. `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<UndoOutcome> {
        let outcome = match self.log.pop()? {
            TimelineAction::RallyStart { recorded_raw_frame } => {
                let start_frame = self
                    .pending
                    .take()
                    .map(|p| p.start_frame)
                    .unwrap_or(recorded_raw_frame);
                UndoOutcome::RallyStart {
                    start_frame,
                    raw_frame: recorded_raw_frame,
                }
            }
            TimelineAction::RallyEnd { rally, pending } => {
                // Report the rally as it is now, including later edits.
                let rally = self.rallies.pop().unwrap_or(rally);
                self.pending = Some(pending.clone());
                UndoOutcome::RallyEnd { rally, pending }
            }
        };

        debug!("{}", outcome.description());
        Some(outcome)
    }

    /// Shift a rally's boundaries by signed frame deltas. The start clamps at frame 0.
    /// Overlap with neighbouring rallies is allowed.
    pub fn update_rally_timing(
        &mut self,
        index: usize,
        start_delta: i64,
        end_delta: i64,
    ) -> Result<(), EngineError> {
        let rally = self.rally_at(index)?;
        let start = rally.start_frame.offset(start_delta);
        let end = rally.end_frame.offset(end_delta);
        if end <= start {
            return Err(EngineError::InvalidRallyTiming { start, end });
        }

        let rally = &mut self.rallies[index];
        rally.start_frame = start;
        rally.end_frame = end;
        debug!(
            "rally {} retimed to frames {}-{}",
            index,
            start.as_u32(),
            end.as_u32()
        );
        Ok(())
    }

    /// Correct the starting score of rally `index`.
    ///
    /// `new_score` is validated against the rules of the rally's own game. With `cascade`,
    /// a fresh engine for those rules is seeded with `new_score` and driven through the
    /// recorded winners up to the end of that game, rewriting every later rally's starting
    /// score; its final state is returned with side labels relative to the replay.
    /// Nothing changes when validation fails.
    pub fn update_rally_score(
        &mut self,
        index: usize,
        new_score: &str,
        cascade: bool,
    ) -> Result<Option<ScoreSnapshot>, EngineError> {
        self.rally_at(index)?;
        let game = self.game_index(index);
        let rules = self.games[game].rules;
        let seed = ScoreLine::parse(new_score, rules.game_mode).map_err(|e| {
            warn!("score correction rejected: {}", e);
            e
        })?;

        self.rallies[index].score_at_start = seed.to_string();
        if !cascade {
            return Ok(None);
        }

        let range = self.game_range(game);
        let opening = self.opening_at(range.start, index);
        let mut replay_engine = ScoreEngine::new(rules.game_mode, rules.victory_target);
        let end = cascade::replay(
            &mut self.rallies[range.clone()],
            index - range.start,
            seed,
            opening,
            &mut replay_engine,
        );
        debug!(
            "cascade from rally {} through rally {}",
            index,
            range.end - 1
        );
        Ok(Some(end))
    }

    pub fn set_rally_comment(
        &mut self,
        index: usize,
        comment: Option<String>,
    ) -> Result<(), EngineError> {
        self.rally_at(index)?;
        self.rallies[index].comment = comment.filter(|c| !c.trim().is_empty());
        Ok(())
    }

    /// Export projection: one `{in, out, score}` per completed rally, in stored order.
    pub fn to_segments(&self) -> Vec<Segment> {
        self.rallies
            .iter()
            .filter(|r| r.end_frame > r.start_frame)
            .map(|r| Segment {
                in_frame: r.start_frame,
                out_frame: r.end_frame,
                score: r.score_at_start.clone(),
            })
            .collect()
    }

    fn rally_at(&self, index: usize) -> Result<&Rally, EngineError> {
        self.rallies.get(index).ok_or(EngineError::IndexOutOfRange {
            index,
            len: self.rallies.len(),
        })
    }

    /// Drop the rally in progress and the undo history.
    pub fn reset_actions(&mut self) {
        self.pending = None;
        self.log.clear();
    }

    pub fn rallies(&self) -> &[Rally] {
        &self.rallies
    }

    pub fn games(&self) -> &[GameSpan] {
        &self.games
    }

    pub fn current_rules(&self) -> GameRules {
        // `games` is never empty.
        self.games.last().map(|g| g.rules).unwrap_or_default()
    }

    pub fn pending(&self) -> Option<&PendingRally> {
        self.pending.as_ref()
    }

    pub fn is_rally_in_progress(&self) -> bool {
        self.pending.is_some()
    }

    pub fn can_undo(&self) -> bool {
        !self.log.is_empty()
    }

    pub fn last_action(&self) -> Option<&TimelineAction> {
        self.log.last()
    }

    pub fn fps(&self) -> Fps {
        self.fps
    }

    pub fn padding(&self) -> PaddingSettings {
        self.padding
    }
}

fn validate_games(
    games: &[GameSpan],
    rally_count: usize,
    current_rules: GameRules,
) -> Result<(), EngineError> {
    let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

    match games.first() {
        Some(first) if first.first_rally == 0 => {}
        _ => return invalid("first game must start at rally 0".to_string()),
    }
    for pair in games.windows(2) {
        if pair[1].first_rally <= pair[0].first_rally {
            return invalid(format!(
                "game boundaries out of order at rally {}",
                pair[1].first_rally
            ));
        }
    }
    for game in games {
        if game.first_rally > rally_count {
            return invalid(format!(
                "game starts at rally {} but only {} rallies exist",
                game.first_rally, rally_count
            ));
        }
        game.rules.validate()?;
    }
    if games.last().map(|g| g.rules) != Some(current_rules) {
        return invalid("last game's rules do not match the score engine".to_string());
    }
    Ok(())
}
