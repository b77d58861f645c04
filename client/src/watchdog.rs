//! Tick-driven reconnection
//!
//! The watchdog is polled once per host tick. It only asks for a reconnect
//! once the grace period since the last connect attempt has run out, so a
//! dead server is retried at most once per grace period instead of every
//! frame.

use crate::connection::{ConnectionManager, ConnectionState, LinkHealth};
use log::warn;
use std::time::{Duration, Instant};

/// What the watchdog needs from a connection.
pub trait Reconnect {
    fn health(&self) -> LinkHealth;
    fn reconnect(&self);
}

impl Reconnect for ConnectionManager {
    fn health(&self) -> LinkHealth {
        ConnectionManager::health(self)
    }

    fn reconnect(&self) {
        self.connect();
    }
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    grace: Duration,
    reconnects: u64,
}

impl Watchdog {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            reconnects: 0,
        }
    }

    /// True when `health` describes a link that should be re-dialled at `now`.
    pub fn needs_reconnect(&self, health: &LinkHealth, now: Instant) -> bool {
        if health.state == ConnectionState::Connecting {
            return false;
        }

        let since_attempt = match health.last_attempt {
            Some(at) => now.saturating_duration_since(at),
            None => return true,
        };
        if since_attempt <= self.grace {
            return false;
        }

        match health.state {
            ConnectionState::Disconnected => true,
            ConnectionState::Connected => health
                .last_activity
                .map_or(true, |at| now.saturating_duration_since(at) > self.grace),
            ConnectionState::Connecting => false,
        }
    }

    /// Checks the link and reconnects it if needed. Returns whether a
    /// reconnect was issued.
    pub fn poll<R: Reconnect + ?Sized>(&mut self, link: &R, now: Instant) -> bool {
        let health = link.health();
        if !self.needs_reconnect(&health, now) {
            return false;
        }

        warn!(
            "Link unhealthy ({:?}), reconnecting now",
            health.state
        );
        self.reconnects += 1;
        link.reconnect();
        true
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }
}
