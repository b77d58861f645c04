//! Fakes shared by the unit tests

use crate::collaborators::{
    AppControl, Identity, LeaderboardSource, Notifier, ReplayStore, Rider, TimerDisplay, World,
};
use crate::connection::CommandSink;
use crate::error::UploadError;
use crate::upload::UploadTransport;
use async_trait::async_trait;
use shared::OutboundCommand;
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

/// Sink that keeps every encoded line, without the terminator.
#[derive(Default)]
pub struct RecordingLink {
    connected: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl RecordingLink {
    pub fn connected() -> Self {
        let link = Self::default();
        link.connected.store(true, Ordering::SeqCst);
        link
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl CommandSink for RecordingLink {
    fn send(&self, command: &OutboundCommand) {
        let line = String::from_utf8(command.encode()).unwrap();
        self.sent
            .lock()
            .unwrap()
            .push(line.trim_end_matches('\n').to_string());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct StubTransport {
    pub replays: AtomicU32,
    pub logs: AtomicU32,
}

#[async_trait]
impl UploadTransport for StubTransport {
    async fn upload_replay(&self, _run_id: &str, _replay: Vec<u8>) -> Result<(), UploadError> {
        self.replays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_output_log(&self, _player_id: &str, _log: Vec<u8>) -> Result<(), UploadError> {
        self.logs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plays every game-side role and records the calls that change state.
/// Queries (position, pause state, identity) are not recorded.
pub struct FakeGame {
    calls: Mutex<Vec<String>>,
    paused: AtomicBool,
    spawned: AtomicBool,
    fail_saves: AtomicBool,
    trails: Mutex<HashSet<String>>,
    dir: TempDir,
}

impl Default for FakeGame {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            spawned: AtomicBool::new(true),
            fail_saves: AtomicBool::new(false),
            trails: Mutex::new(HashSet::new()),
            dir: TempDir::new().unwrap(),
        }
    }
}

impl FakeGame {
    pub const PLAYER_ID: &'static str = "76561198000000000";
    pub const TOTAL_REPUTATION: i64 = 1500;

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn despawn(&self) {
        self.spawned.store(false, Ordering::SeqCst);
    }

    pub fn fail_replay_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl Rider for FakeGame {
    fn position(&self) -> Option<[f32; 3]> {
        self.spawned
            .load(Ordering::SeqCst)
            .then_some([1.0, 2.5, -3.0])
    }

    fn rotate(&self, degrees: i32) {
        self.record(format!("rotate {}", degrees));
    }

    fn bail(&self) {
        self.record("bail");
    }

    fn set_size(&self, size: f32) {
        self.record(format!("bike_size {}", size));
    }

    fn switch_bike(&self, bike: &str, player_id: &str) {
        self.record(format!("switch_bike {} {}", bike, player_id));
    }

    fn freeze(&self) {
        self.record("freeze");
    }

    fn set_control(&self, enabled: bool) {
        self.record(format!("control {}", enabled));
    }

    fn reset(&self) {
        self.record("reset");
    }

    fn respawn_on_track(&self) {
        self.record("respawn_on_track");
    }

    fn respawn_at_start(&self) {
        self.record("respawn_at_start");
    }

    fn cut_brakes(&self) {
        self.record("cut_brakes");
    }

    fn toggle_collision(&self) {
        self.record("toggle_collision");
    }

    fn scale_velocity(&self, factor: f32) {
        self.record(format!("velocity {}", factor));
    }

    fn set_gravity(&self, gravity: f32) {
        self.record(format!("gravity {}", gravity));
    }

    fn toggle_god(&self) {
        self.record("toggle_god");
    }

    fn set_time_scale(&self, scale: f32) {
        self.record(format!("time_scale {}", scale));
    }

    fn add_modifier(&self, modifier: &str) {
        self.record(format!("add_modifier {}", modifier));
    }

    fn total_reputation(&self) -> i64 {
        Self::TOTAL_REPUTATION
    }
}

impl World for FakeGame {
    fn force_boundary_updates(&self) {
        self.record("force_boundary_updates");
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn trigger_riders_gates(&self, delay_secs: f32) {
        self.record(format!("riders_gate {}", delay_secs));
    }

    fn log_game_objects(&self) {
        self.record("log_game_objects");
    }

    fn log_player_ids(&self) {
        self.record("log_player_ids");
    }

    fn toggle_spectator(&self) {
        self.record("toggle_spectator");
    }

    fn spectate(&self, player_id: &str) {
        self.record(format!("spectate {}", player_id));
    }

    fn clear_session_marker(&self) {
        self.record("clear_session_marker");
    }

    fn enable_stats(&self) {
        self.record("enable_stats");
    }

    fn set_far_clip(&self, distance: f32) {
        self.record(format!("far_clip {}", distance));
    }

    fn has_trail(&self, url: &str) -> bool {
        self.trails
            .lock()
            .unwrap()
            .iter()
            .any(|loaded| loaded.ends_with(url))
    }

    fn load_trail(&self, url: &str) {
        self.trails.lock().unwrap().insert(url.to_string());
        self.record(format!("load_trail {}", url));
    }

    fn set_leaderboard_text(&self, track: &str, source: LeaderboardSource, text: &str) -> bool {
        self.record(format!("leaderboard {} {:?} {}", track, source, text));
        true
    }

    fn unlock_item(&self, item_id: i32) {
        self.record(format!("unlock_item {}", item_id));
    }

    fn lock_item(&self, item_id: i32) {
        self.record(format!("lock_item {}", item_id));
    }
}

impl TimerDisplay for FakeGame {
    fn checkpoint(&self, split: &str) {
        self.record(format!("timer_checkpoint {}", split));
    }

    fn finish(&self, info: &str) {
        self.record(format!("timer_finish {}", info));
    }

    fn invalidate(&self, reason: &str) {
        self.record(format!("timer_invalidate {}", reason));
    }

    fn set_colour(&self, r: i32, g: i32, b: i32) {
        self.record(format!("timer_colour {} {} {}", r, g, b));
    }

    fn reset_colour(&self) {
        self.record("timer_reset_colour");
    }

    fn connection_lost(&self) {
        self.record("timer_connection_lost");
    }
}

impl Notifier for FakeGame {
    fn popup(&self, title: &str, body: &str) {
        self.record(format!("popup {} {}", title, body));
    }
}

impl Identity for FakeGame {
    fn player_id(&self) -> String {
        Self::PLAYER_ID.to_string()
    }
}

impl ReplayStore for FakeGame {
    fn save_replay(&self, run_id: &str) -> io::Result<PathBuf> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        let path = self.dir.path().join(format!("{}.replay", run_id));
        std::fs::write(&path, run_id.as_bytes())?;
        Ok(path)
    }

    fn output_log_path(&self) -> PathBuf {
        self.dir.path().join("output_log.txt")
    }
}

impl AppControl for FakeGame {
    fn quit(&self) {
        self.record("quit");
    }

    fn hang(&self) {
        self.record("hang");
    }
}
