//! Error types for the control link

use shared::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Connection level faults. All of them are recoverable by reconnecting.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected to the control server")]
    NotConnected,

    #[error("writer for the current connection has shut down")]
    ChannelClosed,

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("write timed out")]
    WriteTimeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single dispatched message. Logged by the drain loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("bad leaderboard payload for {track}: {source}")]
    Leaderboard {
        track: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not persist replay {run_id}: {source}")]
    ReplayStore {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported ban mode {0:?}")]
    UnsupportedBanMode(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Upload faults, split into retryable and terminal.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded with status {status}")]
    Status { status: u16 },

    #[error("could not read artifact {path}: {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload cancelled by shutdown")]
    Cancelled,
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Request(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return true;
                }
                e.status()
                    .map(|s| is_retryable_status(s.as_u16()))
                    .unwrap_or(false)
            }
            UploadError::Status { status } => is_retryable_status(*status),
            UploadError::ReadArtifact { .. } | UploadError::Cancelled => false,
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}
