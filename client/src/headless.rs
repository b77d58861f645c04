//! Game stand-in for running the link without the game
//!
//! Every command is logged instead of acted on. Replays are looked up in the
//! replay directory, where the game would have written them. A quit request
//! is handed back to the caller through [`HeadlessGame::quit_requested`] so
//! the link can still be shut down cleanly.

use crate::collaborators::{
    AppControl, Identity, LeaderboardSource, Notifier, ReplayStore, Rider, TimerDisplay,
    World,
};
use crate::config::LinkConfig;
use log::{info, warn};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub struct HeadlessGame {
    player_id: String,
    replay_dir: PathBuf,
    output_log: PathBuf,
    trails: Mutex<HashSet<String>>,
    quit: Arc<Notify>,
}

impl HeadlessGame {
    pub fn new(config: &LinkConfig, player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            replay_dir: config.replay_dir(),
            output_log: config.output_log_path(),
            trails: Mutex::new(HashSet::new()),
            quit: Arc::new(Notify::new()),
        }
    }

    /// Fires once the server asks the application to quit.
    pub fn quit_requested(&self) -> Arc<Notify> {
        Arc::clone(&self.quit)
    }

    fn trails(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.trails.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Rider for HeadlessGame {
    fn position(&self) -> Option<[f32; 3]> {
        Some([0.0, 0.0, 0.0])
    }

    fn rotate(&self, degrees: i32) {
        info!("[rider] rotate by {} degrees", degrees);
    }

    fn bail(&self) {
        info!("[rider] bail");
    }

    fn set_size(&self, size: f32) {
        info!("[rider] bike size {}", size);
    }

    fn switch_bike(&self, bike: &str, player_id: &str) {
        info!("[rider] switch {} to bike {}", player_id, bike);
    }

    fn freeze(&self) {
        info!("[rider] freeze");
    }

    fn set_control(&self, enabled: bool) {
        info!("[rider] control {}", if enabled { "enabled" } else { "disabled" });
    }

    fn reset(&self) {
        info!("[rider] reset");
    }

    fn respawn_on_track(&self) {
        info!("[rider] respawn on track");
    }

    fn respawn_at_start(&self) {
        info!("[rider] respawn at start");
    }

    fn cut_brakes(&self) {
        info!("[rider] brakes cut");
    }

    fn toggle_collision(&self) {
        info!("[rider] toggle collision");
    }

    fn scale_velocity(&self, factor: f32) {
        info!("[rider] velocity x{}", factor);
    }

    fn set_gravity(&self, gravity: f32) {
        info!("[rider] gravity {}", gravity);
    }

    fn toggle_god(&self) {
        info!("[rider] toggle god mode");
    }

    fn set_time_scale(&self, scale: f32) {
        info!("[rider] time scale {}", scale);
    }

    fn add_modifier(&self, modifier: &str) {
        info!("[rider] modifier {}", modifier);
    }

    fn total_reputation(&self) -> i64 {
        0
    }
}

impl World for HeadlessGame {
    fn force_boundary_updates(&self) {
        info!("[world] boundary updates forced");
    }

    fn is_paused(&self) -> bool {
        false
    }

    fn trigger_riders_gates(&self, delay_secs: f32) {
        info!("[world] riders gate in {}s", delay_secs);
    }

    fn log_game_objects(&self) {
        info!("[world] no scene objects in headless mode");
    }

    fn log_player_ids(&self) {
        info!("[world] players: {}", self.player_id);
    }

    fn toggle_spectator(&self) {
        info!("[world] toggle spectator");
    }

    fn spectate(&self, player_id: &str) {
        info!("[world] spectating {}", player_id);
    }

    fn clear_session_marker(&self) {
        info!("[world] session marker cleared");
    }

    fn enable_stats(&self) {
        info!("[world] stats enabled");
    }

    fn set_far_clip(&self, distance: f32) {
        info!("[world] far clip {}", distance);
    }

    fn has_trail(&self, url: &str) -> bool {
        self.trails().iter().any(|loaded| loaded.ends_with(url))
    }

    fn load_trail(&self, url: &str) {
        info!("[world] load trail {}", url);
        self.trails().insert(url.to_string());
    }

    fn set_leaderboard_text(&self, track: &str, source: LeaderboardSource, text: &str) -> bool {
        info!("[world] {:?} leaderboard for {}:\n{}", source, track, text);
        true
    }

    fn unlock_item(&self, item_id: i32) {
        info!("[world] unlock item {}", item_id);
    }

    fn lock_item(&self, item_id: i32) {
        info!("[world] lock item {}", item_id);
    }
}

impl TimerDisplay for HeadlessGame {
    fn checkpoint(&self, split: &str) {
        info!("[timer] split {}", split);
    }

    fn finish(&self, info: &str) {
        info!("[timer] finish {}", info);
    }

    fn invalidate(&self, reason: &str) {
        info!("[timer] invalidated: {}", reason);
    }

    fn set_colour(&self, r: i32, g: i32, b: i32) {
        info!("[timer] colour ({}, {}, {})", r, g, b);
    }

    fn reset_colour(&self) {
        info!("[timer] default colour");
    }

    fn connection_lost(&self) {
        info!("[timer] connection lost");
    }
}

impl Notifier for HeadlessGame {
    fn popup(&self, title: &str, body: &str) {
        info!("[popup] {}: {}", title, body);
    }
}

impl Identity for HeadlessGame {
    fn player_id(&self) -> String {
        self.player_id.clone()
    }
}

impl ReplayStore for HeadlessGame {
    fn save_replay(&self, run_id: &str) -> io::Result<PathBuf> {
        let path = self.replay_dir.join(format!("{}.replay", run_id));
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no replay at {}", path.display()),
            ));
        }
        Ok(path)
    }

    fn output_log_path(&self) -> PathBuf {
        self.output_log.clone()
    }
}

impl AppControl for HeadlessGame {
    fn quit(&self) {
        info!("[app] quit requested");
        self.quit.notify_one();
    }

    fn hang(&self) {
        warn!("Server requested a hard hang");
        loop {
            std::hint::spin_loop();
        }
    }
}
