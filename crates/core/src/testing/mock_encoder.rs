//! Mock encoder for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::encoder::{
    EncodeEvent, EncodeHandle, EncodeJob, Encoder, EncoderError, KillSwitch, MediaProbe,
};

/// Mock implementation of the [`Encoder`] trait.
///
/// Provides controllable behavior for testing:
/// - Scripted probe results per path
/// - Scripted progress sequences and terminal outcomes
/// - Error injection
/// - Kill-aware spawned jobs (a kill resolves to a cancelled failure, like
///   the real encoder)
/// - Recorded jobs for assertions
///
/// Cloning shares all state, so a test can keep a copy for assertions while
/// the pool owns another.
#[derive(Debug, Clone)]
pub struct MockEncoder {
    /// Pre-configured probe results by path.
    probe_results: Arc<RwLock<HashMap<PathBuf, MediaProbe>>>,
    /// Paths whose probe fails with the given reason.
    probe_errors: Arc<RwLock<HashMap<PathBuf, String>>>,
    /// Default probe for paths without a configured result.
    default_probe: Arc<RwLock<Option<MediaProbe>>>,
    /// If set, the next operation fails with this error.
    next_error: Arc<RwLock<Option<EncoderError>>>,
    /// Progress percentages emitted before the terminal event.
    progress_script: Arc<RwLock<Vec<u8>>>,
    /// Delay between scripted progress steps.
    step_delay_ms: Arc<RwLock<u64>>,
    /// When true, spawned jobs emit their script then wait for a kill
    /// instead of finishing.
    hold_until_killed: Arc<RwLock<bool>>,
    /// If set, the next spawned job terminates with this genuine failure.
    fail_message: Arc<RwLock<Option<String>>>,
    /// When true, spawned jobs write a stub output file first, simulating
    /// a partially written encode.
    write_output: Arc<RwLock<bool>>,
    /// Recorded spawn invocations.
    spawned: Arc<RwLock<Vec<EncodeJob>>>,
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEncoder {
    /// Create a new mock encoder.
    pub fn new() -> Self {
        Self {
            probe_results: Arc::new(RwLock::new(HashMap::new())),
            probe_errors: Arc::new(RwLock::new(HashMap::new())),
            default_probe: Arc::new(RwLock::new(None)),
            next_error: Arc::new(RwLock::new(None)),
            progress_script: Arc::new(RwLock::new(vec![25, 50, 75])),
            step_delay_ms: Arc::new(RwLock::new(5)),
            hold_until_killed: Arc::new(RwLock::new(false)),
            fail_message: Arc::new(RwLock::new(None)),
            write_output: Arc::new(RwLock::new(false)),
            spawned: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Set a probe result for a specific path.
    pub async fn set_probe_result(&self, path: impl AsRef<Path>, probe: MediaProbe) {
        self.probe_results
            .write()
            .await
            .insert(path.as_ref().to_path_buf(), probe);
    }

    /// Make probing a specific path fail with the given reason.
    pub async fn set_probe_error(&self, path: impl AsRef<Path>, reason: impl Into<String>) {
        self.probe_errors
            .write()
            .await
            .insert(path.as_ref().to_path_buf(), reason.into());
    }

    /// Set the default probe for paths without a configured result.
    pub async fn set_default_probe(&self, probe: MediaProbe) {
        *self.default_probe.write().await = Some(probe);
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: EncoderError) {
        *self.next_error.write().await = Some(error);
    }

    /// Set the progress percentages spawned jobs emit.
    pub async fn set_progress_script(&self, script: Vec<u8>) {
        *self.progress_script.write().await = script;
    }

    /// Set the delay between scripted progress steps.
    pub async fn set_step_delay(&self, delay: Duration) {
        *self.step_delay_ms.write().await = delay.as_millis() as u64;
    }

    /// Make spawned jobs run until killed instead of finishing.
    pub async fn set_hold_until_killed(&self, hold: bool) {
        *self.hold_until_killed.write().await = hold;
    }

    /// Make the next spawned job end in a genuine (non-cancelled) failure.
    pub async fn fail_next_encode(&self, message: impl Into<String>) {
        *self.fail_message.write().await = Some(message.into());
    }

    /// Make spawned jobs write a stub output file, simulating a partial
    /// encode on disk.
    pub async fn set_write_output(&self, write: bool) {
        *self.write_output.write().await = write;
    }

    /// All recorded spawn invocations.
    pub async fn spawned_jobs(&self) -> Vec<EncodeJob> {
        self.spawned.read().await.clone()
    }

    /// Number of spawn invocations.
    pub async fn spawn_count(&self) -> usize {
        self.spawned.read().await.len()
    }

    /// Take the next error if set.
    async fn take_error(&self) -> Option<EncoderError> {
        self.next_error.write().await.take()
    }

    /// Create a default probe for testing, keyed off the extension.
    fn create_default_probe(path: &Path) -> MediaProbe {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown");

        let is_video = matches!(extension, "mkv" | "mp4" | "avi" | "mov" | "webm");
        let is_animation = matches!(extension, "gif" | "apng");

        MediaProbe {
            path: path.to_path_buf(),
            size_bytes: 10 * 1024 * 1024,
            duration_secs: if is_video || is_animation {
                Some(10.0)
            } else {
                None
            },
            format: extension.to_string(),
            frame_count: if is_video || is_animation {
                Some(240)
            } else {
                None
            },
            has_audio: is_video,
            video_width: Some(1920),
            video_height: Some(1080),
        }
    }
}

#[async_trait]
impl Encoder for MockEncoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe(&self, path: &Path) -> Result<MediaProbe, EncoderError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        if let Some(reason) = self.probe_errors.read().await.get(path) {
            return Err(EncoderError::probe_failed(reason.clone()));
        }

        if let Some(probe) = self.probe_results.read().await.get(path) {
            return Ok(probe.clone());
        }

        if let Some(probe) = self.default_probe.read().await.as_ref() {
            let mut probe = probe.clone();
            probe.path = path.to_path_buf();
            return Ok(probe);
        }

        Ok(Self::create_default_probe(path))
    }

    async fn spawn(
        &self,
        job: EncodeJob,
        events: mpsc::Sender<EncodeEvent>,
    ) -> Result<EncodeHandle, EncoderError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        self.spawned.write().await.push(job.clone());

        let script = self.progress_script.read().await.clone();
        let step_delay = Duration::from_millis(*self.step_delay_ms.read().await);
        let hold = *self.hold_until_killed.read().await;
        let fail = self.fail_message.write().await.take();
        let write_output = *self.write_output.read().await;

        let kill = KillSwitch::new();
        let task_kill = kill.clone();
        let job_id = job.job_id.clone();
        let output_path = job.output_path.clone();

        let task = tokio::spawn(async move {
            if write_output {
                let _ = tokio::fs::write(&output_path, b"partial").await;
            }

            for percent in script {
                tokio::select! {
                    _ = task_kill.triggered() => {
                        let _ = events
                            .send(EncodeEvent::Failed {
                                message: "encode terminated by kill signal".to_string(),
                                cancelled: true,
                            })
                            .await;
                        return;
                    }
                    _ = tokio::time::sleep(step_delay) => {
                        let _ = events.send(EncodeEvent::Progress(percent)).await;
                    }
                }
            }

            if hold {
                task_kill.triggered().await;
                let _ = events
                    .send(EncodeEvent::Failed {
                        message: "encode terminated by kill signal".to_string(),
                        cancelled: true,
                    })
                    .await;
                return;
            }

            if let Some(message) = fail {
                let _ = events
                    .send(EncodeEvent::Failed {
                        message,
                        cancelled: false,
                    })
                    .await;
                return;
            }

            let _ = events.send(EncodeEvent::Progress(100)).await;
            let _ = events.send(EncodeEvent::Finished).await;
        });

        Ok(EncodeHandle::new(job_id, job.output_path, kill, task))
    }

    async fn validate(&self) -> Result<(), EncoderError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        Ok(())
    }
}
