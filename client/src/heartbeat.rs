//! Periodic keep-alive while a session is active

use crate::connection::CommandSink;
use log::{debug, info};
use shared::{OutboundCommand, HEARTBEAT};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct HeartbeatScheduler {
    link: Arc<dyn CommandSink>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl HeartbeatScheduler {
    pub fn new(link: Arc<dyn CommandSink>, period: Duration, runtime: Handle) -> Self {
        Self {
            link,
            period,
            task: Mutex::new(None),
            runtime,
        }
    }

    /// Starts sending `HEARTBEAT` every period, replacing any running timer.
    /// The first beat goes out immediately. The timer stops by itself once
    /// the link reports disconnected.
    pub fn start(&self) {
        let link = Arc::clone(&self.link);
        let period = self.period;

        let handle = self.runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if !link.is_connected() {
                    info!("Link is down, stopping heartbeat");
                    break;
                }
                link.send(&OutboundCommand::new(HEARTBEAT));
            }
        });

        if let Some(previous) = self.lock().replace(handle) {
            debug!("Restarting heartbeat");
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.lock().take() {
            debug!("Stopping heartbeat");
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        connected: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl CommandSink for RecordingSink {
        fn send(&self, command: &OutboundCommand) {
            self.sent.lock().unwrap().push(command.keyword.clone());
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn sent_count(sink: &RecordingSink) -> usize {
        sink.sent.lock().unwrap().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_heartbeat_every_period() {
        let sink = Arc::new(RecordingSink::default());
        sink.connected.store(true, Ordering::SeqCst);
        let heartbeat =
            HeartbeatScheduler::new(sink.clone(), Duration::from_secs(5), Handle::current());

        heartbeat.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sent_count(&sink), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sent_count(&sink), 3);
        assert!(sink.sent.lock().unwrap().iter().all(|k| k == HEARTBEAT));
        assert!(heartbeat.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_link_drops() {
        let sink = Arc::new(RecordingSink::default());
        sink.connected.store(true, Ordering::SeqCst);
        let heartbeat =
            HeartbeatScheduler::new(sink.clone(), Duration::from_secs(5), Handle::current());

        heartbeat.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        sink.connected.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sent_count(&sink), 1);
        assert!(!heartbeat.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_single_timer() {
        let sink = Arc::new(RecordingSink::default());
        sink.connected.store(true, Ordering::SeqCst);
        let heartbeat =
            HeartbeatScheduler::new(sink.clone(), Duration::from_secs(5), Handle::current());

        heartbeat.start();
        heartbeat.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        // One immediate beat from the surviving timer plus one after 5s.
        assert_eq!(sent_count(&sink), 2);

        heartbeat.stop();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(sent_count(&sink), 2);
        assert!(!heartbeat.is_running());
    }
}
