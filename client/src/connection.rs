//! TCP connection to the control server
//!
//! One [`ConnectionManager`] exists per client. Each successful connect
//! creates a session made of two tasks:
//! - a reader that owns the read half, runs the [`Framer`] and fills the
//!   [`InboundQueue`]
//! - a writer that owns the write half and drains an outbound channel
//!
//! Sessions are numbered. A task that outlives its session (because the link
//! was closed or reconnected meanwhile) never touches the state of the newer
//! one.

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::inbound::InboundQueue;
use log::{debug, info, warn};
use shared::{Framer, OutboundCommand, MAP_EXIT, READ_CHUNK_SIZE};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot used by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHealth {
    pub state: ConnectionState,
    /// Last time a connect was started.
    pub last_attempt: Option<Instant>,
    /// Last send attempt or received chunk.
    pub last_activity: Option<Instant>,
}

/// Anything commands can be sent through.
pub trait CommandSink: Send + Sync {
    /// Fire-and-forget send. Failures are logged, never returned.
    fn send(&self, command: &OutboundCommand);
    fn is_connected(&self) -> bool;
}

struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

struct Inner {
    state: ConnectionState,
    session: Option<Session>,
    generation: u64,
    last_attempt: Option<Instant>,
    last_activity: Option<Instant>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    inbound: InboundQueue,
    inner: Arc<Mutex<Inner>>,
    runtime: Handle,
}

impl ConnectionManager {
    pub fn new(config: &LinkConfig, inbound: InboundQueue, runtime: Handle) -> Self {
        Self {
            addr: config.server_addr(),
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            inbound,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                session: None,
                generation: 0,
                last_attempt: None,
                last_activity: None,
            })),
            runtime,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn inbound(&self) -> &InboundQueue {
        &self.inbound
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn health(&self) -> LinkHealth {
        let inner = self.lock();
        LinkHealth {
            state: inner.state,
            last_attempt: inner.last_attempt,
            last_activity: inner.last_activity,
        }
    }

    /// Starts a connection attempt in the background.
    ///
    /// Does nothing while another attempt is in flight. An existing session
    /// is torn down first.
    pub fn connect(&self) {
        let id = {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Connecting {
                debug!("Connect already in progress, skipping");
                return;
            }
            if let Some(old) = inner.session.take() {
                info!("Dropping previous connection before reconnecting");
                old.teardown();
            }
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            inner.last_attempt = Some(Instant::now());
            inner.generation
        };

        info!("Connecting to control server at {}", self.addr);
        let this = self.clone();
        self.runtime.spawn(async move {
            if let Err(e) = this.open_session(id).await {
                warn!("Connection to {} failed: {}", this.addr, e);
                this.mark_disconnected(id);
            }
        });
    }

    async fn open_session(&self, id: u64) -> Result<(), LinkError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| LinkError::ConnectTimeout {
                addr: self.addr.clone(),
            })??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let mut inner = self.lock();
        if inner.generation != id {
            debug!("Connection {} superseded before it was registered", id);
            return Ok(());
        }

        let writer = self.clone();
        self.runtime
            .spawn(async move { writer.write_loop(id, write_half, outbound_rx).await });
        let reader = self.clone();
        let reader = self
            .runtime
            .spawn(async move { reader.read_loop(id, read_half).await });

        inner.session = Some(Session {
            id,
            outbound: outbound_tx,
            reader: Some(reader),
        });
        inner.state = ConnectionState::Connected;
        inner.last_activity = Some(Instant::now());
        drop(inner);

        info!("Connected to control server at {}", self.addr);
        Ok(())
    }

    async fn read_loop(self, id: u64, mut socket: OwnedReadHalf) {
        let mut framer = Framer::new();
        let mut buffer = [0u8; READ_CHUNK_SIZE];

        loop {
            match socket.read(&mut buffer).await {
                Ok(0) => {
                    info!("Control server closed the connection");
                    break;
                }
                Ok(len) => {
                    let was_discarding = framer.is_discarding();
                    let messages = framer.feed(&buffer[..len]);
                    if framer.is_discarding() && !was_discarding {
                        warn!("Dropping oversized unterminated line from server");
                    }
                    self.lock().last_activity = Some(Instant::now());
                    if !messages.is_empty() {
                        debug!("Received {} message(s)", messages.len());
                        self.inbound.push_all(messages);
                    }
                }
                Err(e) => {
                    warn!("Socket read failed: {}", e);
                    break;
                }
            }
        }

        self.mark_disconnected(id);
    }

    async fn write_loop(
        self,
        id: u64,
        mut socket: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(line) = outbound.recv().await {
            let result = match timeout(self.write_timeout, socket.write_all(&line)).await {
                Ok(result) => result.map_err(LinkError::from),
                Err(_) => Err(LinkError::WriteTimeout),
            };
            if let Err(e) = result {
                warn!("Socket write failed: {}", e);
                self.mark_disconnected(id);
                return;
            }
        }

        // Sender dropped: the session was closed or replaced.
        let _ = socket.shutdown().await;
    }

    fn mark_disconnected(&self, id: u64) {
        let mut inner = self.lock();
        if inner.generation != id {
            return;
        }
        if let Some(session) = inner.session.take() {
            session.teardown();
        }
        if inner.state != ConnectionState::Disconnected {
            info!("Disconnected from control server");
        }
        inner.state = ConnectionState::Disconnected;
    }

    /// Queues a command on the current connection.
    pub fn try_send(&self, command: &OutboundCommand) -> Result<(), LinkError> {
        let mut inner = self.lock();
        inner.last_activity = Some(Instant::now());

        if inner.state != ConnectionState::Connected {
            return Err(LinkError::NotConnected);
        }
        let session = inner.session.as_ref().ok_or(LinkError::NotConnected)?;
        session
            .outbound
            .send(command.encode())
            .map_err(|_| LinkError::ChannelClosed)?;

        debug!("Queued {}", command.keyword);
        Ok(())
    }

    /// Sends `MAP_EXIT` if possible, then releases the socket.
    pub fn close(&self) {
        if let Err(e) = self.try_send(&OutboundCommand::new(MAP_EXIT)) {
            debug!("Skipping exit notification: {}", e);
        }

        let mut inner = self.lock();
        inner.generation += 1;
        if let Some(session) = inner.session.take() {
            info!("Closing connection to control server");
            // The writer flushes whatever is still queued before shutting down.
            session.teardown();
        }
        inner.state = ConnectionState::Disconnected;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Session {
    fn teardown(mut self) {
        debug!("Tearing down session {}", self.id);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        // Dropping `outbound` ends the writer once the queue is empty.
    }
}

impl CommandSink for ConnectionManager {
    fn send(&self, command: &OutboundCommand) {
        if let Err(e) = self.try_send(command) {
            warn!("Failed to send {}: {}", command.keyword, e);
        }
    }

    fn is_connected(&self) -> bool {
        let inner = self.lock();
        inner.state == ConnectionState::Connected
            && inner
                .session
                .as_ref()
                .is_some_and(|s| !s.outbound.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    fn config_for(port: u16) -> LinkConfig {
        LinkConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_millis(500),
            ..LinkConfig::default()
        }
    }

    async fn wait_for_state(conn: &ConnectionManager, state: ConnectionState) {
        for _ in 0..200 {
            if conn.state() == state {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("connection never reached {:?}", state);
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let conn = ConnectionManager::new(
            &LinkConfig::default(),
            InboundQueue::new(),
            Handle::current(),
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
        assert_eq!(conn.health().last_attempt, None);
    }

    #[tokio::test]
    async fn test_send_without_connection_fails_but_records_activity() {
        let conn = ConnectionManager::new(
            &LinkConfig::default(),
            InboundQueue::new(),
            Handle::current(),
        );

        let result = conn.try_send(&OutboundCommand::new("HEARTBEAT"));
        assert!(matches!(result, Err(LinkError::NotConnected)));
        assert!(conn.health().last_activity.is_some());

        // Fire-and-forget variant must not panic either.
        conn.send(&OutboundCommand::new("HEARTBEAT"));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_safe() {
        let conn = ConnectionManager::new(
            &LinkConfig::default(),
            InboundQueue::new(),
            Handle::current(),
        );
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_ends_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conn = ConnectionManager::new(&config_for(port), InboundQueue::new(), Handle::current());
        conn.connect();
        assert!(conn.health().last_attempt.is_some());

        wait_for_state(&conn, ConnectionState::Disconnected).await;
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_receive_send_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let queue = InboundQueue::new();
        let conn = ConnectionManager::new(&config_for(port), queue.clone(), Handle::current());

        conn.connect();
        let (mut server, _) = listener.accept().await.unwrap();
        wait_for_state(&conn, ConnectionState::Connected).await;
        assert!(conn.is_connected());

        server.write_all(b"SUCCESS\nSET_R").await.unwrap();
        server.write_all(b"EP|7\n").await.unwrap();
        for _ in 0..100 {
            if queue.len() >= 2 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        let messages: Vec<_> = queue.drain().into_iter().collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].keyword(), "SUCCESS");
        assert_eq!(messages[1].args(), ["7".to_string()]);

        conn.try_send(&OutboundCommand::new("REP").arg(7)).unwrap();
        conn.close();

        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("REP|7|"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("MAP_EXIT|"));
        assert_eq!(lines.next_line().await.unwrap(), None);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_server_hangup_marks_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = ConnectionManager::new(&config_for(port), InboundQueue::new(), Handle::current());

        conn.connect();
        let (server, _) = listener.accept().await.unwrap();
        wait_for_state(&conn, ConnectionState::Connected).await;

        drop(server);
        wait_for_state(&conn, ConnectionState::Disconnected).await;
        assert!(matches!(
            conn.try_send(&OutboundCommand::new("HEARTBEAT")),
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = ConnectionManager::new(&config_for(port), InboundQueue::new(), Handle::current());

        conn.connect();
        let (first, _) = listener.accept().await.unwrap();
        wait_for_state(&conn, ConnectionState::Connected).await;

        conn.connect();
        let (mut second, _) = listener.accept().await.unwrap();
        wait_for_state(&conn, ConnectionState::Connected).await;

        // The old socket is shut down by the client.
        let mut first = first;
        let mut buf = [0u8; 16];
        assert_eq!(first.read(&mut buf).await.unwrap(), 0);

        conn.try_send(&OutboundCommand::new("HEARTBEAT")).unwrap();
        let read = second.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..read], b"HEARTBEAT|\n");
    }
}
