//! # Server Link Library
//!
//! This library provides the client side of the persistent connection between
//! the game mod and its control server. It keeps a TCP link alive, turns the
//! byte stream into commands, and routes those commands to the game systems
//! they affect.
//!
//! ## Architecture Overview
//!
//! The link is split between two worlds. Network I/O lives on a tokio runtime,
//! while every game-side effect happens on the host's main thread, once per
//! frame. The two meet in a single inbound queue.
//!
//! ### Transport
//! A [`connection::ConnectionManager`] owns the socket. Each session runs a
//! reader task, which frames incoming bytes into messages, and a writer task
//! fed through a channel so sends never block the game.
//!
//! ### Main-Thread Dispatch
//! [`link::Link::tick`] swaps out everything the reader queued and hands it to
//! the [`dispatcher::Dispatcher`], which calls the matching collaborator. A
//! failing or panicking handler is logged and the next message still runs.
//!
//! ### Liveness
//! A [`heartbeat::HeartbeatScheduler`] beats every few seconds once the server
//! accepts the session, and a [`watchdog::Watchdog`] re-dials a dead or silent
//! link at most once per grace period.
//!
//! ### Replays
//! Finished runs are uploaded in the background by the
//! [`upload::ReplayUploader`], which retries with exponential backoff and only
//! deletes the local replay once the server confirms it.
//!
//! ## Module Organization
//!
//! ### Connection Module (`connection`)
//! - Background connect with a timeout
//! - Per-session reader and writer tasks
//! - Stale-session protection through generation numbers
//!
//! ### Dispatcher Module (`dispatcher`)
//! - One variant per server keyword
//! - Argument parsing with typed errors
//! - Replies such as `REP`, `POS` and `SPECTATE`
//!
//! ### Collaborators Module (`collaborators`)
//! Traits the host implements: rider, world, timer, notifier, identity,
//! replay storage and process control. [`headless::HeadlessGame`] implements
//! all of them by logging, for running without the game.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::{Collaborators, HeadlessGame, Link, LinkConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LinkConfig::default();
//!     let game = Arc::new(HeadlessGame::new(&config, "76561198000000000"));
//!     let mut link = Link::with_http(
//!         config,
//!         Collaborators::from_shared(game),
//!         tokio::runtime::Handle::current(),
//!     )?;
//!
//!     link.start();
//!     let stop = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     link.run_until(Duration::from_millis(50), stop).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Philosophy
//!
//! ### Never Block the Frame
//! Nothing called from `tick` waits on the network. Sends are queued, uploads
//! are spawned and reconnects happen in the background.
//!
//! ### One Thread Touches the Game
//! Collaborators are only called from the thread that drives `tick`, so host
//! implementations need no locking of their own.

pub mod collaborators;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod headless;
pub mod heartbeat;
pub mod inbound;
pub mod leaderboard;
pub mod link;
pub mod upload;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use collaborators::Collaborators;
pub use config::{BuildMode, LinkConfig};
pub use connection::{CommandSink, ConnectionManager, ConnectionState};
pub use dispatcher::{Command, Dispatcher};
pub use error::{DispatchError, LinkError, UploadError};
pub use headless::HeadlessGame;
pub use link::Link;
