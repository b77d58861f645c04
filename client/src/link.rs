//! The assembled server link
//!
//! [`Link`] owns every piece and is driven from the host's main thread: call
//! [`Link::start`] once, [`Link::tick`] every frame, and [`Link::shutdown`]
//! when the game exits. Network I/O, heartbeats and uploads run on the tokio
//! runtime; collaborators are only ever called from `tick`.

use crate::collaborators::Collaborators;
use crate::config::LinkConfig;
use crate::connection::{CommandSink, ConnectionManager, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, UploadError};
use crate::heartbeat::HeartbeatScheduler;
use crate::inbound::InboundQueue;
use crate::upload::{HttpTransport, ReplayUploader, UploadTransport};
use crate::watchdog::Watchdog;
use log::{debug, error, info, warn};
use shared::InboundMessage;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};

pub struct Link {
    config: LinkConfig,
    connection: ConnectionManager,
    inbound: InboundQueue,
    dispatcher: Dispatcher,
    watchdog: Watchdog,
    game: Collaborators,
}

impl Link {
    pub fn new(
        config: LinkConfig,
        game: Collaborators,
        transport: Arc<dyn UploadTransport>,
        runtime: Handle,
    ) -> Self {
        let inbound = InboundQueue::new();
        let connection = ConnectionManager::new(&config, inbound.clone(), runtime.clone());
        let sink: Arc<dyn CommandSink> = Arc::new(connection.clone());

        let heartbeat =
            HeartbeatScheduler::new(Arc::clone(&sink), config.heartbeat_interval, runtime.clone());
        let uploader = Arc::new(ReplayUploader::new(
            transport,
            config.upload_retry.clone(),
            runtime,
        ));
        let dispatcher = Dispatcher::new(
            sink,
            game.clone(),
            heartbeat,
            uploader,
            config.trail_base_url.clone(),
        );

        Self {
            watchdog: Watchdog::new(config.reconnect_grace),
            config,
            connection,
            inbound,
            dispatcher,
            game,
        }
    }

    /// Link uploading over HTTP to the configured endpoints.
    pub fn with_http(
        config: LinkConfig,
        game: Collaborators,
        runtime: Handle,
    ) -> Result<Self, UploadError> {
        let transport = HttpTransport::new(config.upload_url.clone(), config.output_log_url.clone())?;
        Ok(Self::new(config, game, Arc::new(transport), runtime))
    }

    pub fn start(&self) {
        info!(
            "Starting server link {} to {}",
            self.config.version_string(),
            self.connection.addr()
        );
        self.connection.connect();
    }

    /// One frame of link work. Returns how many messages were dispatched.
    pub fn tick(&mut self) -> usize {
        if self.watchdog.poll(&self.connection, Instant::now()) {
            self.game.timer.connection_lost();
        }

        let messages = self.inbound.drain();
        let mut dispatched = 0;
        for message in messages {
            if message.is_empty() {
                continue;
            }
            self.handle(&message);
            dispatched += 1;
        }
        dispatched
    }

    fn handle(&mut self, message: &InboundMessage) {
        let started = Instant::now();
        let dispatcher = &mut self.dispatcher;
        let result = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(message)))
            .unwrap_or_else(|payload| Err(DispatchError::Panicked(panic_message(payload))));

        if let Err(e) = result {
            error!("Failed to handle {:?}: {}", message.keyword(), e);
        }
        if self.config.mode.profiling_enabled() {
            debug!("{} handled in {:?}", message.keyword(), started.elapsed());
        }
    }

    /// Ticks every `period` until `stop` resolves, then shuts the link down.
    ///
    /// `stop` is polled for the whole run, so a signal that fires while a
    /// tick is running is picked up on the next turn of the loop.
    pub async fn run_until<F>(&mut self, period: Duration, stop: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = &mut stop => break,
            }
        }

        self.shutdown();
    }

    /// Stops the heartbeat and pending retries, then says goodbye to the server.
    pub fn shutdown(&mut self) {
        info!("Shutting down server link");
        self.dispatcher.heartbeat().stop();
        self.dispatcher.uploader().shutdown();
        if self.connection.state() != ConnectionState::Connected {
            warn!("Link was not connected at shutdown");
        }
        self.connection.close();
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
