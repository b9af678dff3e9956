// Session controller: owns one score engine and one rally timeline for an editing session.
// Drives the engine alongside the timeline so recorded rallies, undo and corrections stay in step.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::export::ExportTimeline;
use crate::score::{ScoreEngine, ServerInfo};
use crate::timeline::{RallyTimelineManager, TimelineState, UndoOutcome};
use crate::types::*;

/// Result of ending a rally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RallyRecorded {
    pub index: usize,
    pub rally: Rally,
    pub score_after: String,
    pub game_over: bool,
    pub game_winner: Option<Side>,
}

/// Persisted session. The undo history is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub engine: ScoreEngine,
    pub timeline: TimelineState,
    #[serde(default)]
    pub padding: PaddingSettings,
}

/// One live editing session.
#[derive(Debug, Clone)]
pub struct Session {
    engine: ScoreEngine,
    timeline: RallyTimelineManager,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, EngineError> {
        config.validate()?;

        Ok(Session {
            engine: ScoreEngine::new(config.game_mode, config.victory_target),
            timeline: RallyTimelineManager::new(config.fps, config.padding, config.rules()),
        })
    }

    /// Mark the start of a rally at the current playback position.
    pub fn mark_start(&mut self, position_secs: f64) -> Result<FrameIndex, EngineError> {
        self.timeline
            .start_rally(position_secs, self.engine.save_snapshot())
    }

    /// Mark the end of the rally in progress and score it.
    pub fn mark_end(
        &mut self,
        position_secs: f64,
        winner: RallyWinner,
    ) -> Result<RallyRecorded, EngineError> {
        let score_at_start = self.engine.score_string();
        let index = self
            .timeline
            .end_rally(position_secs, winner, score_at_start)?;
        self.engine.apply_outcome(winner);

        let (game_over, game_winner) = self.engine.is_game_over();
        Ok(RallyRecorded {
            index,
            rally: self.timeline.rallies()[index].clone(),
            score_after: self.engine.score_string(),
            game_over,
            game_winner,
        })
    }

    /// Reverse the last action. A reverted rally end also rewinds the engine.
    pub fn undo(&mut self) -> Option<UndoOutcome> {
        let outcome = self.timeline.undo()?;
        if let UndoOutcome::RallyEnd { pending, .. } = &outcome {
            self.engine.restore_snapshot(&pending.snapshot);
            debug!("engine rewound to {}", self.engine.score_string());
        }
        Some(outcome)
    }

    pub fn set_score(&mut self, score: &str) -> Result<(), EngineError> {
        self.engine.set_score(score).map_err(|e| {
            warn!("manual score rejected: {}", e);
            e
        })
    }

    pub fn force_side_out(&mut self) {
        self.engine.force_side_out();
    }

    pub fn adjust_timing(
        &mut self,
        index: usize,
        start_delta: i64,
        end_delta: i64,
    ) -> Result<(), EngineError> {
        self.timeline
            .update_rally_timing(index, start_delta, end_delta)
    }

    pub fn set_comment(&mut self, index: usize, comment: Option<String>) -> Result<(), EngineError> {
        self.timeline.set_rally_comment(index, comment)
    }

    /// Correct rally `index`'s starting score, optionally cascading through the rest of its game.
    /// A cascade within the current game also moves the live engine to the replayed result.
    pub fn correct_score(
        &mut self,
        index: usize,
        score: &str,
        cascade: bool,
    ) -> Result<(), EngineError> {
        // Serving side the recorded data ends on, relative to a replay that starts with side A.
        let recorded_end_side = if cascade && self.timeline.is_in_current_game(index) {
            self.timeline
                .replay_recorded(index)
                .map(|snapshot| snapshot.serving_side)
        } else {
            None
        };

        let replayed = self.timeline.update_rally_score(index, score, cascade)?;

        if let (Some(end), Some(recorded_side)) = (replayed, recorded_end_side) {
            self.adopt_replay(end, recorded_side);
        }
        Ok(())
    }

    /// Move the live engine to a replay result whose side labels are relative to the replay.
    fn adopt_replay(&mut self, end: ScoreSnapshot, recorded_side: Side) {
        let live_side = self.engine.serving_side();
        let to_live = |relative: Side| {
            if relative == recorded_side {
                live_side
            } else {
                live_side.opposite()
            }
        };

        let mut score = [0u32; 2];
        score[to_live(Side::A).index()] = end.score[0];
        score[to_live(Side::B).index()] = end.score[1];

        self.engine.restore_snapshot(&ScoreSnapshot {
            score,
            serving_side: to_live(end.serving_side),
            ..end
        });
        debug!("live score after cascade: {}", self.engine.score_string());
    }

    /// Start a new game with fresh scoring. Recorded rallies stay; a rally in progress is dropped.
    pub fn new_game(
        &mut self,
        game_mode: GameMode,
        victory_target: VictoryTarget,
    ) -> Result<(), EngineError> {
        let rules = GameRules::new(game_mode, victory_target);
        rules.validate()?;

        self.engine = ScoreEngine::new(game_mode, victory_target);
        self.timeline.begin_game(rules);
        info!(
            "new {:?} game to {:?} from rally {}",
            game_mode,
            victory_target,
            self.timeline.rallies().len()
        );
        Ok(())
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.timeline.to_segments()
    }

    pub fn export_timeline(&self) -> ExportTimeline {
        ExportTimeline::new(self.timeline.to_segments())
    }

    pub fn score_string(&self) -> String {
        self.engine.score_string()
    }

    pub fn server_info(&self) -> ServerInfo {
        self.engine.server_info()
    }

    pub fn engine(&self) -> &ScoreEngine {
        &self.engine
    }

    pub fn timeline(&self) -> &RallyTimelineManager {
        &self.timeline
    }

    pub fn to_state(&self) -> SessionState {
        SessionState {
            engine: self.engine.clone(),
            timeline: self.timeline.to_state(),
            padding: self.timeline.padding(),
        }
    }

    pub fn from_state(state: SessionState) -> Result<Self, EngineError> {
        state.engine.validate()?;
        state.padding.validate()?;
        let timeline =
            RallyTimelineManager::from_state(state.timeline, state.padding, state.engine.rules())?;

        info!(
            "session loaded: {} rallies, score {}",
            timeline.rallies().len(),
            state.engine.score_string()
        );
        Ok(Session {
            engine: state.engine,
            timeline,
        })
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(&self.to_state())?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let state: SessionState = serde_json::from_str(json)?;
        Session::from_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubles_session() -> Session {
        Session::new(SessionConfig {
            fps: Fps::new(60.0).unwrap(),
            ..Default::default()
        })
        .unwrap()
    }

    fn play(session: &mut Session, at: f64, winner: RallyWinner) -> RallyRecorded {
        session.mark_start(at).unwrap();
        session.mark_end(at + 4.0, winner).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SessionConfig {
            victory_target: VictoryTarget::Points(0),
            ..Default::default()
        };
        assert!(matches!(
            Session::new(config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn records_scores_at_rally_start() {
        let mut session = doubles_session();
        let first = play(&mut session, 10.0, RallyWinner::Server);
        assert_eq!(first.rally.score_at_start, "0-0-2");
        assert_eq!(first.score_after, "1-0-2");
        assert_eq!(first.rally.start_frame.as_u32(), 540);

        let second = play(&mut session, 20.0, RallyWinner::Receiver);
        assert_eq!(second.index, 1);
        assert_eq!(second.rally.score_at_start, "1-0-2");
        assert_eq!(second.score_after, "0-1-1");
    }

    #[test]
    fn undo_rally_end_rewinds_engine() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        play(&mut session, 20.0, RallyWinner::Server);
        assert_eq!(session.score_string(), "2-0-2");

        let outcome = session.undo().unwrap();
        assert!(matches!(outcome, UndoOutcome::RallyEnd { .. }));
        assert_eq!(session.score_string(), "1-0-2");
        assert_eq!(session.segments().len(), 1);
        assert!(session.timeline().is_rally_in_progress());

        let redo = session.mark_end(25.0, RallyWinner::Receiver).unwrap();
        assert_eq!(redo.rally.score_at_start, "1-0-2");
        assert_eq!(session.score_string(), "0-1-1");
    }

    #[test]
    fn undo_with_nothing_to_undo() {
        let mut session = doubles_session();
        assert_eq!(session.undo(), None);
    }

    #[test]
    fn game_over_is_reported() {
        let mut session = Session::new(SessionConfig {
            game_mode: GameMode::Singles,
            victory_target: VictoryTarget::Points(9),
            ..Default::default()
        })
        .unwrap();
        session.set_score("8-3").unwrap();
        let recorded = play(&mut session, 5.0, RallyWinner::Server);
        assert!(recorded.game_over);
        assert_eq!(recorded.game_winner, Some(Side::A));
    }

    #[test]
    fn cascade_reproduces_live_scores() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        play(&mut session, 20.0, RallyWinner::Receiver);
        play(&mut session, 30.0, RallyWinner::Server);
        let live: Vec<String> = session
            .timeline()
            .rallies()
            .iter()
            .map(|r| r.score_at_start.clone())
            .collect();
        let live_engine = session.engine().clone();

        session.correct_score(0, "0-0-2", true).unwrap();
        let replayed: Vec<String> = session
            .timeline()
            .rallies()
            .iter()
            .map(|r| r.score_at_start.clone())
            .collect();

        assert_eq!(replayed, live);
        assert_eq!(session.engine(), &live_engine);
    }

    #[test]
    fn cascade_moves_live_engine() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server); // 0-0-2
        play(&mut session, 20.0, RallyWinner::Receiver); // 1-0-2 -> side-out
        play(&mut session, 30.0, RallyWinner::Server); // 0-1-1 -> B scores
        assert_eq!(session.engine().score(), [1, 1]);
        assert_eq!(session.engine().serving_side(), Side::B);

        // Side A actually led 5-0 going into rally 1.
        session.correct_score(1, "5-0-2", true).unwrap();
        assert_eq!(session.timeline().rallies()[2].score_at_start, "0-5-1");
        assert_eq!(session.engine().score(), [5, 1]);
        assert_eq!(session.engine().serving_side(), Side::B);
        assert_eq!(session.score_string(), "1-5-1");
    }

    #[test]
    fn cascade_into_previous_game_keeps_live_engine() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        session
            .new_game(GameMode::Doubles, VictoryTarget::Points(11))
            .unwrap();
        play(&mut session, 20.0, RallyWinner::Server);

        session.correct_score(0, "3-3-1", true).unwrap();
        assert_eq!(session.timeline().rallies()[0].score_at_start, "3-3-1");
        assert_eq!(session.timeline().rallies()[1].score_at_start, "0-0-2");
        assert_eq!(session.score_string(), "1-0-2");
    }

    #[test]
    fn cascade_after_opening_side_out_keeps_live_score() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Receiver); // 0-0-2 -> opening side-out
        play(&mut session, 20.0, RallyWinner::Receiver); // 0-0-1 -> second server
        play(&mut session, 30.0, RallyWinner::Server); // 0-0-2 -> B scores
        assert_eq!(session.score_string(), "1-0-2");

        session.correct_score(1, "0-0-1", true).unwrap();
        let scores: Vec<&str> = session
            .timeline()
            .rallies()
            .iter()
            .map(|r| r.score_at_start.as_str())
            .collect();
        assert_eq!(scores, vec!["0-0-2", "0-0-1", "0-0-2"]);
        assert_eq!(session.score_string(), "1-0-2");
        assert_eq!(session.engine().serving_side(), Side::B);
        assert_eq!(session.engine().server_number(), Some(ServerNumber::Two));
    }

    #[test]
    fn manual_zero_score_after_side_out_rotates_servers() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Receiver);
        session.set_score("0-0-1").unwrap();

        let recorded = play(&mut session, 20.0, RallyWinner::Receiver);
        assert_eq!(recorded.score_after, "0-0-2");
        assert_eq!(session.engine().serving_side(), Side::B);
    }

    #[test]
    fn corrections_use_each_games_rules() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        session
            .new_game(GameMode::Singles, VictoryTarget::Points(11))
            .unwrap();
        play(&mut session, 20.0, RallyWinner::Server);
        assert_eq!(session.score_string(), "1-0");

        session.correct_score(0, "0-0-2", false).unwrap();
        assert!(matches!(
            session.correct_score(0, "0-0", false),
            Err(EngineError::InvalidScoreFormat(_))
        ));

        session.correct_score(1, "2-0", true).unwrap();
        assert_eq!(session.timeline().rallies()[1].score_at_start, "2-0");
        assert_eq!(session.score_string(), "3-0");
    }

    #[test]
    fn json_roundtrip_keeps_game_boundaries() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        session
            .new_game(GameMode::Singles, VictoryTarget::Points(7))
            .unwrap();
        play(&mut session, 20.0, RallyWinner::Server);

        let restored = Session::from_json(&session.to_json().unwrap()).unwrap();
        assert_eq!(restored.timeline().games(), session.timeline().games());

        // Boundaries still bound the cascade after a reload.
        let mut restored = restored;
        restored.correct_score(0, "4-4-1", true).unwrap();
        assert_eq!(restored.timeline().rallies()[1].score_at_start, "0-0");
        assert_eq!(restored.score_string(), "1-0");
    }

    #[test]
    fn failed_correction_changes_nothing() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        play(&mut session, 20.0, RallyWinner::Server);
        let before = session.to_state();

        assert!(session.correct_score(0, "1-1", true).is_err());
        assert!(session.correct_score(5, "1-1-1", true).is_err());
        assert_eq!(session.to_state(), before);
    }

    #[test]
    fn new_game_cancels_pending_rally() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        session.mark_start(20.0).unwrap();

        session
            .new_game(GameMode::Singles, VictoryTarget::Timed)
            .unwrap();
        assert!(!session.timeline().is_rally_in_progress());
        assert!(!session.timeline().can_undo());
        assert_eq!(session.score_string(), "0-0");
        assert_eq!(session.segments().len(), 1);
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        play(&mut session, 20.0, RallyWinner::Receiver);
        session
            .set_comment(1, Some("kitchen fault".to_string()))
            .unwrap();

        let json = session.to_json().unwrap();
        let restored = Session::from_json(&json).unwrap();

        assert_eq!(restored.to_state(), session.to_state());
        assert_eq!(restored.segments(), session.segments());
        assert!(!restored.timeline().can_undo());
    }

    #[test]
    fn from_json_rejects_inconsistent_engine() {
        let json = r#"{
            "engine": {"game_mode":"doubles","victory_target":{"points":11},
                       "score":[0,0],"serving_side":0,"server_number":null},
            "timeline": {"rallies": [], "fps": 60.0}
        }"#;
        assert!(Session::from_json(json).is_err());
        assert!(matches!(
            Session::from_json("not json"),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn export_timeline_follows_segments() {
        let mut session = doubles_session();
        play(&mut session, 10.0, RallyWinner::Server);
        play(&mut session, 20.0, RallyWinner::Server);

        let export = session.export_timeline();
        // Each rally: (start - 1s, end + 1s) = 6s at 60fps.
        assert_eq!(export.output_duration(), 720);
        assert_eq!(export.placements()[1].segment.score, "1-0-2");
    }
}
