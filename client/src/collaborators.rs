//! Seams to the game-side systems the dispatcher drives
//!
//! The link only routes commands. Everything a command actually does to the
//! game (moving the rider, drawing the timer, showing popups) happens behind
//! these traits, implemented by the host application.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a leaderboard payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardSource {
    /// The control server's own verified times.
    Internal,
    /// Times mirrored from speedrun.com.
    SpeedrunDotCom,
}

/// The local rider and their bike.
pub trait Rider: Send + Sync {
    fn position(&self) -> Option<[f32; 3]>;
    fn rotate(&self, degrees: i32);
    fn bail(&self);
    fn set_size(&self, size: f32);
    fn switch_bike(&self, bike: &str, player_id: &str);
    fn freeze(&self);
    fn set_control(&self, enabled: bool);
    fn reset(&self);
    fn respawn_on_track(&self);
    fn respawn_at_start(&self);
    fn cut_brakes(&self);
    fn toggle_collision(&self);
    fn scale_velocity(&self, factor: f32);
    fn set_gravity(&self, gravity: f32);
    fn toggle_god(&self);
    fn set_time_scale(&self, scale: f32);
    fn add_modifier(&self, modifier: &str);
    fn total_reputation(&self) -> i64;
}

/// Scene-level state: boundaries, gates, trails, spectating, cosmetics.
pub trait World: Send + Sync {
    fn force_boundary_updates(&self);
    fn is_paused(&self) -> bool;
    fn trigger_riders_gates(&self, delay_secs: f32);
    fn log_game_objects(&self);
    fn log_player_ids(&self);
    fn toggle_spectator(&self);
    fn spectate(&self, player_id: &str);
    fn clear_session_marker(&self);
    fn enable_stats(&self);
    fn set_far_clip(&self, distance: f32);
    fn has_trail(&self, url: &str) -> bool;
    fn load_trail(&self, url: &str);
    fn set_leaderboard_text(&self, track: &str, source: LeaderboardSource, text: &str) -> bool;
    fn unlock_item(&self, item_id: i32);
    fn lock_item(&self, item_id: i32);
}

/// The on-screen split timer.
pub trait TimerDisplay: Send + Sync {
    fn checkpoint(&self, split: &str);
    fn finish(&self, info: &str);
    fn invalidate(&self, reason: &str);
    fn set_colour(&self, r: i32, g: i32, b: i32);
    fn reset_colour(&self);
    fn connection_lost(&self);
}

pub trait Notifier: Send + Sync {
    fn popup(&self, title: &str, body: &str);
}

pub trait Identity: Send + Sync {
    fn player_id(&self) -> String;
}

/// Replay and log files on local storage.
pub trait ReplayStore: Send + Sync {
    /// Writes the current run's replay to disk and returns its path.
    fn save_replay(&self, run_id: &str) -> io::Result<PathBuf>;
    fn output_log_path(&self) -> PathBuf;
}

/// Process-level directives. `quit` must let the host run
/// [`Link::shutdown`](crate::link::Link::shutdown) before exiting; `hang` never
/// returns.
pub trait AppControl: Send + Sync {
    fn quit(&self);
    fn hang(&self);
}

/// Bundle of every collaborator handed to the dispatcher.
#[derive(Clone)]
pub struct Collaborators {
    pub rider: Arc<dyn Rider>,
    pub world: Arc<dyn World>,
    pub timer: Arc<dyn TimerDisplay>,
    pub notifier: Arc<dyn Notifier>,
    pub identity: Arc<dyn Identity>,
    pub replays: Arc<dyn ReplayStore>,
    pub app: Arc<dyn AppControl>,
}

impl Collaborators {
    /// Uses one object for every role.
    pub fn from_shared<T>(host: Arc<T>) -> Self
    where
        T: Rider + World + TimerDisplay + Notifier + Identity + ReplayStore + AppControl + 'static,
    {
        Self {
            rider: host.clone(),
            world: host.clone(),
            timer: host.clone(),
            notifier: host.clone(),
            identity: host.clone(),
            replays: host.clone(),
            app: host,
        }
    }
}
