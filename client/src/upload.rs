//! Background upload of finished-run replays
//!
//! Each queued replay runs its own task through
//! `Pending -> Uploading -> {Succeeded, Retrying(n), Failed}`. Only a
//! confirmed upload deletes the local file; a failed one is left on disk.

use crate::error::UploadError;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rand::Rng;
use reqwest::multipart::{Form, Part};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Exponential backoff settings for replay uploads.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * self.backoff_factor.powi(retry as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }
}

/// Sends artifacts to the server.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload_replay(&self, run_id: &str, replay: Vec<u8>) -> Result<(), UploadError>;
    async fn upload_output_log(&self, player_id: &str, log: Vec<u8>) -> Result<(), UploadError>;
}

/// Multipart POSTs over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    replay_url: String,
    output_log_url: String,
}

impl HttpTransport {
    pub fn new(replay_url: impl Into<String>, output_log_url: impl Into<String>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("modlink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            replay_url: replay_url.into(),
            output_log_url: output_log_url.into(),
        })
    }

    async fn post(&self, url: &str, form: Form) -> Result<(), UploadError> {
        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload_replay(&self, run_id: &str, replay: Vec<u8>) -> Result<(), UploadError> {
        let form = Form::new()
            .text("time_id", run_id.to_string())
            .part("replay", Part::bytes(replay).file_name("replay"));
        self.post(&self.replay_url, form).await
    }

    async fn upload_output_log(&self, player_id: &str, log: Vec<u8>) -> Result<(), UploadError> {
        let form = Form::new()
            .text("player_id", player_id.to_string())
            .part("replay", Part::bytes(log).file_name("replay"));
        self.post(&self.output_log_url, form).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub run_id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    Uploading,
    /// Waiting after the given number of failed attempts.
    Retrying(u32),
    Succeeded,
    Failed,
}

impl UploadState {
    pub fn is_finished(self) -> bool {
        matches!(self, UploadState::Succeeded | UploadState::Failed)
    }
}

#[derive(Debug)]
pub enum UploadOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: UploadError },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Succeeded { .. })
    }
}

type PendingMap = Arc<Mutex<HashMap<String, (PendingUpload, UploadState)>>>;

pub struct ReplayUploader {
    transport: Arc<dyn UploadTransport>,
    policy: RetryPolicy,
    pending: PendingMap,
    shutdown: watch::Sender<bool>,
    runtime: Handle,
}

impl ReplayUploader {
    pub fn new(transport: Arc<dyn UploadTransport>, policy: RetryPolicy, runtime: Handle) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            policy,
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            runtime,
        }
    }

    /// Queues a replay for upload. Returns `None` if the run is already queued.
    ///
    /// Finished uploads stay visible through [`state`](Self::state) until the
    /// next call to `enqueue`.
    pub fn enqueue(&self, upload: PendingUpload) -> Option<JoinHandle<UploadOutcome>> {
        {
            let mut pending = lock(&self.pending);
            pending.retain(|_, (_, state)| !state.is_finished());
            if pending.contains_key(&upload.run_id) {
                warn!("Replay {} is already queued for upload", upload.run_id);
                return None;
            }
            pending.insert(upload.run_id.clone(), (upload.clone(), UploadState::Pending));
        }
        info!("Queued replay {} for upload", upload.run_id);

        let task = UploadTask {
            transport: Arc::clone(&self.transport),
            policy: self.policy.clone(),
            pending: Arc::clone(&self.pending),
            shutdown: self.shutdown.subscribe(),
        };
        Some(self.runtime.spawn(task.run(upload)))
    }

    /// Single-attempt upload of the game log. The file is kept.
    pub fn send_output_log(&self, path: PathBuf, player_id: String) -> JoinHandle<Result<(), UploadError>> {
        let transport = Arc::clone(&self.transport);
        self.runtime.spawn(async move {
            let log = tokio::fs::read(&path)
                .await
                .map_err(|source| UploadError::ReadArtifact {
                    path: path.clone(),
                    source,
                })?;
            let result = transport.upload_output_log(&player_id, log).await;
            match &result {
                Ok(()) => info!("Output log uploaded"),
                Err(e) => warn!("Output log upload failed: {}", e),
            }
            result
        })
    }

    /// Uploads that have not finished yet.
    pub fn pending(&self) -> Vec<PendingUpload> {
        lock(&self.pending)
            .values()
            .filter(|(_, state)| !state.is_finished())
            .map(|(upload, _)| upload.clone())
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending)
            .values()
            .filter(|(_, state)| !state.is_finished())
            .count()
    }

    pub fn state(&self, run_id: &str) -> Option<UploadState> {
        lock(&self.pending).get(run_id).map(|(_, state)| *state)
    }

    /// Cancels every upload that is waiting for a retry.
    pub fn shutdown(&self) {
        debug!("Shutting down replay uploader");
        self.shutdown.send_replace(true);
    }
}

struct UploadTask {
    transport: Arc<dyn UploadTransport>,
    policy: RetryPolicy,
    pending: PendingMap,
    shutdown: watch::Receiver<bool>,
}

impl UploadTask {
    async fn run(mut self, upload: PendingUpload) -> UploadOutcome {
        let mut attempts = 0;

        loop {
            if *self.shutdown.borrow() {
                return self.finish(&upload, attempts, Err(UploadError::Cancelled));
            }

            attempts += 1;
            self.set_state(&upload.run_id, UploadState::Uploading);

            let result = match tokio::fs::read(&upload.path).await {
                Ok(replay) => self.transport.upload_replay(&upload.run_id, replay).await,
                Err(source) => Err(UploadError::ReadArtifact {
                    path: upload.path.clone(),
                    source,
                }),
            };

            match result {
                Err(e) if e.is_retryable() && attempts < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempts - 1);
                    warn!(
                        "Upload of replay {} failed (attempt {}/{}): {}, retrying in {:?}",
                        upload.run_id, attempts, self.policy.max_attempts, e, delay
                    );
                    self.set_state(&upload.run_id, UploadState::Retrying(attempts));

                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = shutdown_requested(&mut self.shutdown) => true,
                    };
                    if cancelled {
                        return self.finish(&upload, attempts, Err(UploadError::Cancelled));
                    }
                }
                result => return self.finish(&upload, attempts, result),
            }
        }
    }

    fn finish(&self, upload: &PendingUpload, attempts: u32, result: Result<(), UploadError>) -> UploadOutcome {
        match result {
            Ok(()) => {
                self.set_state(&upload.run_id, UploadState::Succeeded);
                info!("Replay {} uploaded after {} attempt(s)", upload.run_id, attempts);
                if let Err(e) = std::fs::remove_file(&upload.path) {
                    warn!("Could not delete uploaded replay {}: {}", upload.path.display(), e);
                }
                UploadOutcome::Succeeded { attempts }
            }
            Err(error) => {
                self.set_state(&upload.run_id, UploadState::Failed);
                error!(
                    "Giving up on replay {} after {} attempt(s): {}",
                    upload.run_id, attempts, error
                );
                UploadOutcome::Failed { attempts, error }
            }
        }
    }

    fn set_state(&self, run_id: &str, state: UploadState) {
        if let Some(entry) = lock(&self.pending).get_mut(run_id) {
            entry.1 = state;
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Uploader dropped without signalling; keep waiting out the delay.
            std::future::pending::<()>().await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
