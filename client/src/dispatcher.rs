//! Routing of server commands to game-side collaborators
//!
//! Every keyword the server can send maps to one [`Command`]. Handlers are
//! small: parse the positional arguments, call a collaborator, and sometimes
//! answer through the link. Unknown keywords are ignored so newer servers
//! can talk to older clients.

use crate::collaborators::{Collaborators, LeaderboardSource};
use crate::connection::CommandSink;
use crate::error::DispatchError;
use crate::heartbeat::HeartbeatScheduler;
use crate::leaderboard::Leaderboard;
use crate::upload::{PendingUpload, ReplayUploader};
use log::{debug, info, warn};
use shared::{InboundMessage, OutboundCommand, POSITION, REPUTATION, SPECTATE};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Success,
    Rotate,
    UploadReplay,
    GetPos,
    SetTextColour,
    SetTextColDefault,
    PrivateLobby,
    SpeedrunLeaderboard,
    Leaderboard,
    TimerFinish,
    Bail,
    Banned,
    SetBikeSize,
    RidersGate,
    LogGameObjects,
    ToggleSpectator,
    Spectate,
    SetBike,
    GetIds,
    FreezePlayer,
    Popup,
    ToggleControl,
    ClearSessionMarker,
    ResetPlayer,
    AddModifier,
    NonModkitTrail,
    SplitTime,
    RespawnOnTrack,
    RespawnAtStart,
    SetFarClip,
    InvalidateTime,
    CutBrakes,
    ToggleCollision,
    SetVel,
    Gravity,
    SetRep,
    GetRep,
    SendOutputLog,
    ModifySpeed,
    EnableStats,
    ToggleGod,
    UnlockItem,
    LockItem,
}

const COMMANDS: &[(&str, Command)] = &[
    ("SUCCESS", Command::Success),
    ("ROTATE", Command::Rotate),
    ("UPLOAD_REPLAY", Command::UploadReplay),
    ("GET_POS", Command::GetPos),
    ("SET_TEXT_COLOUR", Command::SetTextColour),
    ("SET_TEXT_COL_DEFAULT", Command::SetTextColDefault),
    ("PRIVATE_LOBBY", Command::PrivateLobby),
    ("SPEEDRUN_DOT_COM_LEADERBOARD", Command::SpeedrunLeaderboard),
    ("LEADERBOARD", Command::Leaderboard),
    ("TIMER_FINISH", Command::TimerFinish),
    ("BAIL", Command::Bail),
    ("BANNED", Command::Banned),
    ("SET_BIKE_SIZE", Command::SetBikeSize),
    ("RIDERSGATE", Command::RidersGate),
    ("LOG_GAMEOBJECTS", Command::LogGameObjects),
    ("TOGGLE_SPECTATOR", Command::ToggleSpectator),
    ("SPECTATE", Command::Spectate),
    ("SET_BIKE", Command::SetBike),
    ("GET_IDS", Command::GetIds),
    ("FREEZE_PLAYER", Command::FreezePlayer),
    ("POPUP", Command::Popup),
    ("TOGGLE_CONTROL", Command::ToggleControl),
    ("CLEAR_SESSION_MARKER", Command::ClearSessionMarker),
    ("RESET_PLAYER", Command::ResetPlayer),
    ("ADD_MODIFIER", Command::AddModifier),
    ("NON_MODKIT_TRAIL", Command::NonModkitTrail),
    ("SPLIT_TIME", Command::SplitTime),
    ("RESPAWN_ON_TRACK", Command::RespawnOnTrack),
    ("RESPAWN_AT_START", Command::RespawnAtStart),
    ("SET_FAR_CLIP", Command::SetFarClip),
    ("INVALIDATE_TIME", Command::InvalidateTime),
    ("CUT_BRAKES", Command::CutBrakes),
    ("TOGGLE_COLLISION", Command::ToggleCollision),
    ("SET_VEL", Command::SetVel),
    ("GRAVITY", Command::Gravity),
    ("SET_REP", Command::SetRep),
    ("GET_REP", Command::GetRep),
    ("SEND_OUTPUTLOG", Command::SendOutputLog),
    ("MODIFY_SPEED", Command::ModifySpeed),
    ("ENABLE_STATS", Command::EnableStats),
    ("TOGGLE_GOD", Command::ToggleGod),
    ("UNLOCK_ITEM", Command::UnlockItem),
    ("LOCK_ITEM", Command::LockItem),
];

impl Command {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|(k, _)| *k == keyword)
            .map(|(_, command)| *command)
    }

    pub fn keyword(self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(_, command)| *command == self)
            .map(|(k, _)| *k)
            .unwrap_or("?")
    }

    pub fn all() -> impl Iterator<Item = Command> {
        COMMANDS.iter().map(|(_, command)| *command)
    }
}

/// How a `BANNED` client is taken out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanMode {
    /// Freeze the game in a busy loop.
    Crash,
    /// Quit the application.
    Close,
}

impl BanMode {
    fn parse(raw: &str) -> Result<Self, DispatchError> {
        match raw {
            "CRASH" => Ok(BanMode::Crash),
            "CLOSE" => Ok(BanMode::Close),
            other => Err(DispatchError::UnsupportedBanMode(other.to_string())),
        }
    }
}

pub struct Dispatcher {
    link: Arc<dyn CommandSink>,
    game: Collaborators,
    heartbeat: HeartbeatScheduler,
    uploader: Arc<ReplayUploader>,
    trail_base_url: String,
    reputation: Option<i64>,
}

impl Dispatcher {
    pub fn new(
        link: Arc<dyn CommandSink>,
        game: Collaborators,
        heartbeat: HeartbeatScheduler,
        uploader: Arc<ReplayUploader>,
        trail_base_url: impl Into<String>,
    ) -> Self {
        Self {
            link,
            game,
            heartbeat,
            uploader,
            trail_base_url: trail_base_url.into(),
            reputation: None,
        }
    }

    /// Reputation last set by the server, or the game's own total.
    pub fn reputation(&self) -> i64 {
        self.reputation
            .unwrap_or_else(|| self.game.rider.total_reputation())
    }

    pub fn heartbeat(&self) -> &HeartbeatScheduler {
        &self.heartbeat
    }

    pub fn uploader(&self) -> &ReplayUploader {
        &self.uploader
    }

    pub fn dispatch(&mut self, message: &InboundMessage) -> Result<(), DispatchError> {
        if message.is_empty() {
            return Ok(());
        }

        let Some(command) = Command::from_keyword(message.keyword()) else {
            debug!("Ignoring unknown command {:?}", message.keyword());
            return Ok(());
        };
        debug!("Message received: {:?}", message.fields());

        let game = &self.game;
        match command {
            Command::Success => self.start_session(),
            Command::Rotate => game.rider.rotate(message.parse_arg(0)?),
            Command::UploadReplay => self.upload_replay(message.arg(0)?)?,
            Command::GetPos => self.send_position(),
            Command::SetTextColour => game.timer.set_colour(
                message.parse_arg(0)?,
                message.parse_arg(1)?,
                message.parse_arg(2)?,
            ),
            Command::SetTextColDefault => game.timer.reset_colour(),
            Command::PrivateLobby => {}
            Command::SpeedrunLeaderboard => {
                self.update_leaderboard(message, LeaderboardSource::SpeedrunDotCom)?
            }
            Command::Leaderboard => self.update_leaderboard(message, LeaderboardSource::Internal)?,
            Command::TimerFinish => game.timer.finish(message.arg(0)?),
            Command::Bail => game.rider.bail(),
            Command::Banned => self.banned(BanMode::parse(message.arg(0)?)?),
            Command::SetBikeSize => game.rider.set_size(message.parse_arg(0)?),
            Command::RidersGate => {
                let delay: f32 = message.parse_arg(0)?;
                if !game.world.is_paused() {
                    game.world.trigger_riders_gates(delay);
                }
            }
            Command::LogGameObjects => game.world.log_game_objects(),
            Command::ToggleSpectator => game.world.toggle_spectator(),
            Command::Spectate => {
                let target = message.arg(0)?;
                debug!("Telling server we are spectating {}", target);
                self.link.send(&OutboundCommand::new(SPECTATE).arg(target));
                game.world.spectate(target);
            }
            Command::SetBike => {
                let bike = message.arg(0)?;
                let player_id = match message.optional_arg(1) {
                    Some(id) => id.to_string(),
                    None => game.identity.player_id(),
                };
                game.rider.switch_bike(bike, &player_id);
            }
            Command::GetIds => game.world.log_player_ids(),
            Command::FreezePlayer => game.rider.freeze(),
            Command::Popup => game.notifier.popup(message.arg(0)?, message.arg(1)?),
            Command::ToggleControl => game.rider.set_control(message.arg(0)? == "true"),
            Command::ClearSessionMarker => game.world.clear_session_marker(),
            Command::ResetPlayer => game.rider.reset(),
            Command::AddModifier => game.rider.add_modifier(message.arg(0)?),
            Command::NonModkitTrail => {
                let url = message.arg(0)?;
                if !game.world.has_trail(url) {
                    game.world
                        .load_trail(&format!("{}{}", self.trail_base_url, url));
                }
            }
            Command::SplitTime => game.timer.checkpoint(message.arg(0)?),
            Command::RespawnOnTrack => game.rider.respawn_on_track(),
            Command::RespawnAtStart => game.rider.respawn_at_start(),
            Command::SetFarClip => game.world.set_far_clip(message.parse_arg(0)?),
            Command::InvalidateTime => game.timer.invalidate(message.arg(0)?),
            Command::CutBrakes => game.rider.cut_brakes(),
            Command::ToggleCollision => game.rider.toggle_collision(),
            Command::SetVel => game.rider.scale_velocity(message.parse_arg(0)?),
            Command::Gravity => game.rider.set_gravity(message.parse_arg(0)?),
            Command::SetRep => {
                let reputation: i64 = message.parse_arg(0)?;
                debug!("Reputation set to {}", reputation);
                self.reputation = Some(reputation);
            }
            Command::GetRep => self.send_reputation(),
            Command::SendOutputLog => {
                let path = game.replays.output_log_path();
                self.uploader
                    .send_output_log(path, game.identity.player_id());
            }
            Command::ModifySpeed => game.rider.set_time_scale(message.parse_arg(0)?),
            Command::EnableStats => game.world.enable_stats(),
            Command::ToggleGod => game.rider.toggle_god(),
            Command::UnlockItem => game.world.unlock_item(message.parse_arg(0)?),
            Command::LockItem => game.world.lock_item(message.parse_arg(0)?),
        }

        Ok(())
    }

    fn start_session(&self) {
        info!("Handshake complete, starting session");
        self.send_reputation();
        self.game.world.force_boundary_updates();
        self.heartbeat.start();
    }

    fn send_reputation(&self) {
        self.link
            .send(&OutboundCommand::new(REPUTATION).arg(self.reputation()));
    }

    fn send_position(&self) {
        match self.game.rider.position() {
            Some([x, y, z]) => {
                debug!("Current position: ({}, {}, {})", x, y, z);
                self.link
                    .send(&OutboundCommand::new(POSITION).arg(x).arg(y).arg(z));
            }
            None => warn!("Position requested but no rider is spawned"),
        }
    }

    fn upload_replay(&self, run_id: &str) -> Result<(), DispatchError> {
        let path = self
            .game
            .replays
            .save_replay(run_id)
            .map_err(|source| DispatchError::ReplayStore {
                run_id: run_id.to_string(),
                source,
            })?;

        self.uploader.enqueue(PendingUpload {
            run_id: run_id.to_string(),
            path,
        });
        Ok(())
    }

    fn update_leaderboard(
        &self,
        message: &InboundMessage,
        source: LeaderboardSource,
    ) -> Result<(), DispatchError> {
        let track = message.arg(0)?;
        let payload = message.arg(1)?;
        let board = Leaderboard::from_payload(payload).map_err(|source| {
            DispatchError::Leaderboard {
                track: track.to_string(),
                source,
            }
        })?;

        let title = match source {
            LeaderboardSource::Internal => track.to_string(),
            LeaderboardSource::SpeedrunDotCom => format!("{} (from speedrun.com)", track),
        };
        let text = format!("{}\n{}", title, board.to_text());
        if !self.game.world.set_leaderboard_text(track, source, &text) {
            debug!("No track named {:?} in this level", track);
        }
        Ok(())
    }

    fn banned(&self, mode: BanMode) {
        warn!("Client banned by server ({:?})", mode);
        self.heartbeat.stop();
        match mode {
            BanMode::Crash => self.game.app.hang(),
            BanMode::Close => self.game.app.quit(),
        }
    }
}
