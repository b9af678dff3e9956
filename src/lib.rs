// rally_core: pickleball annotation engine (Rust/WASM)
// Score engine, rally timeline with undo, and cascade replay. The UI is plumbing;
// every scoring and timeline decision lives here.

mod cascade;
mod error;
mod export;
mod score;
mod session;
mod timeline;
mod types;

use wasm_bindgen::prelude::*;

pub use cascade::{replay, starting_scores};
pub use error::EngineError;
pub use export::{ExportTimeline, Placement};
pub use score::{ScoreEngine, ServerInfo};
pub use session::{RallyRecorded, Session, SessionState};
pub use timeline::{
    ActionLog, GameSpan, PendingRally, RallyTimelineManager, TimelineAction, TimelineState,
    UndoOutcome,
};
pub use types::*;

/// Initialize panic hook and console logging.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(feature = "wasm-logger")]
    wasm_logger::init(wasm_logger::Config::default());
}

fn js_err(err: EngineError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(|e| js_err(e.into()))
}

/// Session interface exposed to JavaScript.
/// One call per user action; structured results come back as JSON.
#[wasm_bindgen]
pub struct WasmSession {
    inner: Session,
}

#[wasm_bindgen]
impl WasmSession {
    /// Create a session from a `SessionConfig` JSON string. Every field is optional.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<WasmSession, JsValue> {
        let config: SessionConfig = serde_json::from_str(config_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?;
        let inner = Session::new(config).map_err(js_err)?;
        Ok(WasmSession { inner })
    }

    /// Restore a session saved with `to_json`.
    pub fn from_json(json: &str) -> Result<WasmSession, JsValue> {
        let inner = Session::from_json(json).map_err(js_err)?;
        Ok(WasmSession { inner })
    }

    pub fn to_json(&self) -> Result<String, JsValue> {
        self.inner.to_json().map_err(js_err)
    }

    /// Mark a rally start at the playback position. Returns the padded start frame.
    pub fn mark_start(&mut self, position_secs: f64) -> Result<u32, JsValue> {
        self.inner
            .mark_start(position_secs)
            .map(|frame| frame.as_u32())
            .map_err(js_err)
    }

    /// End the rally in progress. `winner` is "server" or "receiver".
    /// Returns `RallyRecorded` JSON.
    pub fn mark_end(&mut self, position_secs: f64, winner: &str) -> Result<String, JsValue> {
        let winner: RallyWinner = winner.parse().map_err(js_err)?;
        let recorded = self.inner.mark_end(position_secs, winner).map_err(js_err)?;
        to_json(&recorded)
    }

    /// Undo the last action. Returns `UndoOutcome` JSON, or `null` when there was nothing to undo.
    pub fn undo(&mut self) -> Result<String, JsValue> {
        to_json(&self.inner.undo())
    }

    pub fn set_score(&mut self, score: &str) -> Result<(), JsValue> {
        self.inner.set_score(score).map_err(js_err)
    }

    pub fn force_side_out(&mut self) {
        self.inner.force_side_out();
    }

    pub fn adjust_timing(
        &mut self,
        index: usize,
        start_delta: i32,
        end_delta: i32,
    ) -> Result<(), JsValue> {
        self.inner
            .adjust_timing(index, start_delta as i64, end_delta as i64)
            .map_err(js_err)
    }

    /// Set a rally comment. An empty string clears it.
    pub fn set_comment(&mut self, index: usize, comment: &str) -> Result<(), JsValue> {
        self.inner
            .set_comment(index, Some(comment.to_string()))
            .map_err(js_err)
    }

    pub fn correct_score(&mut self, index: usize, score: &str, cascade: bool) -> Result<(), JsValue> {
        self.inner
            .correct_score(index, score, cascade)
            .map_err(js_err)
    }

    /// Start a new game. `rules_json` is `{"game_mode": ..., "victory_target": ...}`.
    pub fn new_game(&mut self, rules_json: &str) -> Result<(), JsValue> {
        let rules: SessionConfig = serde_json::from_str(rules_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid rules: {}", e)))?;
        self.inner
            .new_game(rules.game_mode, rules.victory_target)
            .map_err(js_err)
    }

    pub fn score_string(&self) -> String {
        self.inner.score_string()
    }

    /// `ServerInfo` JSON.
    pub fn server_info(&self) -> Result<String, JsValue> {
        to_json(&self.inner.server_info())
    }

    /// JSON array of `{in, out, score}` segments for the exporter.
    pub fn segments(&self) -> Result<String, JsValue> {
        to_json(&self.inner.segments())
    }

    /// JSON array of every recorded rally.
    pub fn rallies(&self) -> Result<String, JsValue> {
        to_json(&self.inner.timeline().rallies())
    }

    pub fn is_rally_in_progress(&self) -> bool {
        self.inner.timeline().is_rally_in_progress()
    }

    pub fn can_undo(&self) -> bool {
        self.inner.timeline().can_undo()
    }

    /// Map an output-timeline frame to its source frame, or -1 past the end.
    pub fn to_source_frame(&self, output_frame: u32) -> i64 {
        self.inner
            .export_timeline()
            .to_source_frame(FrameIndex::new(output_frame))
            .map(|f| f.as_u32() as i64)
            .unwrap_or(-1)
    }

    pub fn export_duration_frames(&self) -> u32 {
        self.inner.export_timeline().output_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_creation_works() {
        let session = WasmSession::new(r#"{"game_mode":"singles","fps":60}"#);
        assert!(session.is_ok());

        let session = WasmSession::new("{}");
        assert!(session.is_ok());
    }

    #[test]
    fn wasm_session_records_and_exports() {
        let mut session = WasmSession::new(r#"{"fps":60}"#).unwrap();
        assert_eq!(session.mark_start(10.0).unwrap(), 540);

        let recorded = session.mark_end(15.0, "server").unwrap();
        let recorded: RallyRecorded = serde_json::from_str(&recorded).unwrap();
        assert_eq!(recorded.rally.end_frame.as_u32(), 960);
        assert_eq!(session.score_string(), "1-0-2");

        let segments = session.segments().unwrap();
        assert_eq!(segments, r#"[{"in":540,"out":960,"score":"0-0-2"}]"#);
        assert_eq!(session.export_duration_frames(), 420);
        assert_eq!(session.to_source_frame(0), 540);
        assert_eq!(session.to_source_frame(420), -1);
    }

    #[test]
    fn wasm_session_undo_json() {
        let mut session = WasmSession::new("{}").unwrap();
        assert_eq!(session.undo().unwrap(), "null");

        session.mark_start(3.0).unwrap();
        let undone = session.undo().unwrap();
        assert!(undone.contains(r#""kind":"rally_start""#));
        assert!(!session.is_rally_in_progress());
    }

    #[test]
    fn wasm_session_json_roundtrip() {
        let mut session = WasmSession::new(r#"{"fps":30}"#).unwrap();
        session.mark_start(2.0).unwrap();
        session.mark_end(6.0, "receiver").unwrap();
        session.set_comment(0, "let serve").unwrap();

        let json = session.to_json().unwrap();
        let restored = WasmSession::from_json(&json).unwrap();
        assert_eq!(restored.rallies().unwrap(), session.rallies().unwrap());
        assert_eq!(restored.score_string(), "0-0-1");
        assert!(!restored.can_undo());
    }

    #[test]
    fn wasm_session_new_game() {
        let mut session = WasmSession::new("{}").unwrap();
        session
            .new_game(r#"{"game_mode":"singles","victory_target":"timed"}"#)
            .unwrap();
        assert_eq!(session.score_string(), "0-0");
        assert_eq!(session.server_info().unwrap(), r#"{"serving_side":0,"server_number":null}"#);
    }
}
