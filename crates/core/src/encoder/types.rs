//! Types for the encoder module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Metadata read from a media file before it enters the selection queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    /// File path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Duration in seconds, when the container reports one.
    pub duration_secs: Option<f64>,
    /// Container format (e.g. "matroska", "png_pipe").
    pub format: String,
    /// Frame count of the video stream; `None` when the container does not
    /// carry it (still images, some stream formats).
    pub frame_count: Option<u64>,
    /// Whether any audio stream is present.
    pub has_audio: bool,
    /// Video width (if present).
    pub video_width: Option<u32>,
    /// Video height (if present).
    pub video_height: Option<u32>,
}

/// One external encode invocation.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    /// Unique job ID (the file key).
    pub job_id: String,
    /// Input file path.
    pub input_path: PathBuf,
    /// Output file path, already deduplicated by the job runner.
    pub output_path: PathBuf,
    /// Codec argument list of the selected profile.
    pub args: Vec<String>,
    /// Frame count for frame-based progress, when known.
    pub frame_count: Option<u64>,
    /// Duration for time-based progress, when known.
    pub duration_secs: Option<f64>,
}

/// Event emitted by a running encode.
///
/// Exactly one terminal event ([`Finished`](EncodeEvent::Finished) or
/// [`Failed`](EncodeEvent::Failed)) is delivered per job. Progress events
/// are not contractually monotonic; consumers take the max.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeEvent {
    /// Integer progress, 0-100.
    Progress(u8),
    /// The encode finished successfully.
    Finished,
    /// The encode failed. `cancelled` is true when the failure was caused
    /// by an explicitly requested kill, never inferred from process output.
    Failed { message: String, cancelled: bool },
}

/// Cooperative kill signal shared between an [`EncodeHandle`] and the task
/// driving its child process.
///
/// The requested flag is the authoritative record that a kill was asked
/// for; the encode task consults it when classifying its terminal event.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the kill request and wakes the encode task.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether a kill has been explicitly requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once a kill has been requested.
    pub async fn triggered(&self) {
        loop {
            if self.is_requested() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Handle to one live encode.
///
/// Owned by the slot registry and never exposed outside it except through
/// the explicit kill operation. Dropping the handle detaches the encode
/// task; it still reaps its child on its own.
#[derive(Debug)]
pub struct EncodeHandle {
    job_id: String,
    output_path: PathBuf,
    kill: KillSwitch,
    started: Instant,
    task: JoinHandle<()>,
}

impl EncodeHandle {
    /// Binds a spawned encode task to a handle. `kill` must be the same
    /// switch the task selects on.
    pub fn new(
        job_id: impl Into<String>,
        output_path: impl Into<PathBuf>,
        kill: KillSwitch,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            output_path: output_path.into(),
            kill,
            started: Instant::now(),
            task,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The output file this encode is writing; shutdown deletes it when the
    /// job is killed mid-write.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// How long this encode has been live.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Flags the kill request, then signals the encode task to terminate
    /// its child. The task reports the terminal event as cancelled.
    pub fn kill(&self) {
        self.kill.trigger();
    }

    /// Whether a kill was explicitly requested for this job.
    pub fn kill_requested(&self) -> bool {
        self.kill.is_requested()
    }

    /// Waits for the encode task to exit (after the child is reaped and the
    /// terminal event delivered).
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kill_switch_records_request() {
        let kill = KillSwitch::new();
        assert!(!kill.is_requested());

        kill.trigger();
        assert!(kill.is_requested());

        // A waiter arriving after the trigger must still resolve.
        kill.triggered().await;
    }

    #[tokio::test]
    async fn test_kill_switch_wakes_waiter() {
        let kill = KillSwitch::new();
        let waiter = kill.clone();

        let task = tokio::spawn(async move {
            waiter.triggered().await;
        });

        kill.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_kill_reaches_task() {
        let kill = KillSwitch::new();
        let task_kill = kill.clone();
        let task = tokio::spawn(async move {
            task_kill.triggered().await;
        });

        let handle = EncodeHandle::new("job-1", "/tmp/out.webm", kill, task);
        assert!(!handle.kill_requested());

        handle.kill();
        assert!(handle.kill_requested());
        handle.wait().await;
    }
}
