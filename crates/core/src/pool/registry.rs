//! The worker slot registry: live resources behind the visible slots.
//!
//! The registry owns, per slot, the assigned file copy (the single source
//! of truth for what is physically executing), the live encode handle, the
//! pending jitter timer, and the generation counter guarding against stale
//! callbacks. Nothing outside the registry touches a process or timer
//! handle directly; callers go through the explicit kill/cancel operations.
//! Every mutation is logged with slot key and operation name.

use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::encoder::EncodeHandle;
use crate::file::MediaFile;

/// A pending jitter timer bound to a slot.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn new(generation: u64, task: JoinHandle<()>) -> Self {
        Self { generation, task }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn cancel(self) {
        self.task.abort();
    }
}

#[derive(Debug, Default)]
struct SlotResources {
    file: Option<MediaFile>,
    job: Option<EncodeHandle>,
    timer: Option<TimerHandle>,
    generation: u64,
    pending_disable: Option<bool>,
}

/// Process-wide table of the fixed worker slots' volatile resources.
#[derive(Debug)]
pub struct SlotRegistry {
    slots: BTreeMap<u32, SlotResources>,
}

impl SlotRegistry {
    /// Creates a registry for slot keys `1..=count`.
    pub fn new(count: usize) -> Self {
        let slots = (1..=count as u32)
            .map(|key| (key, SlotResources::default()))
            .collect();
        Self { slots }
    }

    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    fn res_mut(&mut self, key: u32) -> Option<&mut SlotResources> {
        let res = self.slots.get_mut(&key);
        if res.is_none() {
            warn!(slot = key, "operation on unknown slot key");
        }
        res
    }

    /// Assigns a file to a slot. Exactly one file per slot; assigning over
    /// an occupied slot is a scheduler bug.
    pub fn assign_file(&mut self, key: u32, file: MediaFile) {
        let Some(res) = self.res_mut(key) else { return };
        debug_assert!(res.file.is_none(), "slot {key} already holds a file");
        if res.file.is_some() {
            warn!(slot = key, op = "assign_file", "replacing an occupied slot");
        }
        debug!(slot = key, op = "assign_file", file = %file.name);
        res.file = Some(file);
    }

    pub fn file(&self, key: u32) -> Option<&MediaFile> {
        self.slots.get(&key).and_then(|r| r.file.as_ref())
    }

    pub fn has_file(&self, key: u32) -> bool {
        self.file(key).is_some()
    }

    /// Takes the assigned file out of a slot.
    pub fn take_file(&mut self, key: u32) -> Option<MediaFile> {
        let res = self.res_mut(key)?;
        debug!(slot = key, op = "take_file");
        res.file.take()
    }

    /// Replaces the assigned file copy (e.g. once the output name froze).
    pub fn replace_file(&mut self, key: u32, file: MediaFile) {
        let Some(res) = self.res_mut(key) else { return };
        debug!(slot = key, op = "replace_file", file = %file.name);
        res.file = Some(file);
    }

    /// Binds a live encode handle to a slot.
    pub fn bind_job(&mut self, key: u32, job: EncodeHandle) {
        let Some(res) = self.res_mut(key) else { return };
        debug_assert!(res.job.is_none(), "slot {key} already runs a job");
        debug!(slot = key, op = "bind_job", job_id = job.job_id());
        res.job = Some(job);
    }

    pub fn has_job(&self, key: u32) -> bool {
        self.slots.get(&key).is_some_and(|r| r.job.is_some())
    }

    /// Seconds the slot's live encode has been running, if any.
    pub fn job_elapsed_secs(&self, key: u32) -> Option<f64> {
        self.slots
            .get(&key)
            .and_then(|r| r.job.as_ref())
            .map(|j| j.elapsed_secs())
    }

    /// Flags the kill request on the slot's live job and signals its child
    /// to terminate. No-op when no job is live.
    pub fn kill_job(&mut self, key: u32) {
        let Some(res) = self.res_mut(key) else { return };
        let live = res.job.is_some();
        if let Some(job) = &res.job {
            job.kill();
        }
        debug!(slot = key, op = "kill_job", live);
    }

    /// Unbinds the encode handle, returning it to the caller (dropping it
    /// detaches the encode task, which still reaps its child on its own).
    pub fn take_job(&mut self, key: u32) -> Option<EncodeHandle> {
        let res = self.res_mut(key)?;
        debug!(slot = key, op = "take_job");
        res.job.take()
    }

    /// Arms a pending timer. At most one per slot; callers cancel any prior
    /// timer first.
    pub fn arm_timer(&mut self, key: u32, timer: TimerHandle) {
        let Some(res) = self.res_mut(key) else { return };
        debug_assert!(res.timer.is_none(), "slot {key} already has a timer armed");
        if let Some(stale) = res.timer.take() {
            warn!(slot = key, op = "arm_timer", "cancelling a timer the caller left armed");
            stale.cancel();
        }
        debug!(slot = key, op = "arm_timer", generation = timer.generation());
        res.timer = Some(timer);
    }

    /// Aborts and clears the pending timer, if any.
    pub fn cancel_timer(&mut self, key: u32) {
        let Some(res) = self.res_mut(key) else { return };
        let live = res.timer.is_some();
        if let Some(timer) = res.timer.take() {
            timer.cancel();
        }
        debug!(slot = key, op = "cancel_timer", live);
    }

    /// Drops the timer binding of a timer that already fired.
    pub fn clear_timer(&mut self, key: u32) {
        let Some(res) = self.res_mut(key) else { return };
        debug!(slot = key, op = "clear_timer");
        res.timer = None;
    }

    /// Bumps and returns the slot's generation. Everything armed before the
    /// bump becomes stale and is dropped when its callback arrives.
    pub fn bump_generation(&mut self, key: u32) -> u64 {
        let Some(res) = self.res_mut(key) else { return 0 };
        res.generation += 1;
        debug!(slot = key, op = "bump_generation", generation = res.generation);
        res.generation
    }

    pub fn generation(&self, key: u32) -> u64 {
        self.slots.get(&key).map(|r| r.generation).unwrap_or(0)
    }

    /// Remembers the disabled value a draining slot flips to once its
    /// in-flight work resolves.
    pub fn set_pending_disable(&mut self, key: u32, disabled: bool) {
        let Some(res) = self.res_mut(key) else { return };
        debug!(slot = key, op = "set_pending_disable", disabled);
        res.pending_disable = Some(disabled);
    }

    pub fn take_pending_disable(&mut self, key: u32) -> Option<bool> {
        self.res_mut(key)?.pending_disable.take()
    }

    /// Tears down every slot: cancels timers, kills jobs, waits for the
    /// encode tasks to exit, and best-effort deletes the partial output of
    /// every killed job. Idempotent; a second call finds nothing to do.
    pub async fn shutdown_all(&mut self) {
        let mut killed = Vec::new();

        for (key, res) in self.slots.iter_mut() {
            if let Some(timer) = res.timer.take() {
                debug!(slot = *key, op = "cancel_timer", live = true);
                timer.cancel();
            }
            if let Some(job) = res.job.take() {
                debug!(slot = *key, op = "kill_job", live = true);
                job.kill();
                killed.push((*key, job));
            }
            res.file = None;
            res.generation += 1;
            res.pending_disable = None;
        }

        for (key, job) in killed {
            let output = job.output_path().to_path_buf();
            job.wait().await;

            match tokio::fs::try_exists(&output).await {
                Ok(true) => {
                    if let Err(e) = tokio::fs::remove_file(&output).await {
                        warn!(
                            slot = key,
                            path = %output.display(),
                            error = %e,
                            "failed to remove partial output"
                        );
                    } else {
                        info!(slot = key, path = %output.display(), "removed partial output");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        slot = key,
                        path = %output.display(),
                        error = %e,
                        "failed to stat partial output"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{KillSwitch, MediaProbe};
    use std::path::PathBuf;

    fn file(name: &str) -> MediaFile {
        MediaFile::from_probe(&MediaProbe {
            path: PathBuf::from(format!("/media/{name}")),
            size_bytes: 1,
            duration_secs: None,
            format: "matroska".to_string(),
            frame_count: None,
            has_audio: true,
            video_width: None,
            video_height: None,
        })
    }

    fn handle(output: PathBuf) -> EncodeHandle {
        let kill = KillSwitch::new();
        let task_kill = kill.clone();
        let task = tokio::spawn(async move {
            task_kill.triggered().await;
        });
        EncodeHandle::new("job", output, kill, task)
    }

    #[tokio::test]
    async fn test_file_assignment_round_trip() {
        let mut registry = SlotRegistry::new(2);
        assert!(!registry.has_file(1));

        registry.assign_file(1, file("a.mkv"));
        assert!(registry.has_file(1));
        assert!(!registry.has_file(2));

        let taken = registry.take_file(1).unwrap();
        assert_eq!(taken.name, "a.mkv");
        assert!(!registry.has_file(1));
    }

    #[tokio::test]
    async fn test_kill_job_is_noop_without_job() {
        let mut registry = SlotRegistry::new(1);
        registry.kill_job(1);
        assert!(!registry.has_job(1));
    }

    #[tokio::test]
    async fn test_kill_job_flags_request() {
        let mut registry = SlotRegistry::new(1);
        registry.bind_job(1, handle(PathBuf::from("/tmp/out.webm")));

        registry.kill_job(1);
        let job = registry.take_job(1).unwrap();
        assert!(job.kill_requested());
        job.wait().await;
    }

    #[tokio::test]
    async fn test_timer_cancel_clears_binding() {
        let mut registry = SlotRegistry::new(1);
        let generation = registry.bump_generation(1);
        let task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        registry.arm_timer(1, TimerHandle::new(generation, task));

        registry.cancel_timer(1);
        registry.cancel_timer(1); // second cancel is a no-op
    }

    #[tokio::test]
    async fn test_generation_bump_staleness() {
        let mut registry = SlotRegistry::new(1);
        let g1 = registry.bump_generation(1);
        let g2 = registry.bump_generation(1);
        assert!(g2 > g1);
        assert_eq!(registry.generation(1), g2);
    }

    #[tokio::test]
    async fn test_shutdown_removes_partial_output_and_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let partial = temp.path().join("half.webm");
        std::fs::write(&partial, b"partial").unwrap();

        let mut registry = SlotRegistry::new(2);
        registry.assign_file(1, file("half.mkv"));
        registry.bind_job(1, handle(partial.clone()));

        registry.shutdown_all().await;
        assert!(!partial.exists());
        assert!(!registry.has_job(1));
        assert!(!registry.has_file(1));

        // Second call finds every resource already cleared.
        registry.shutdown_all().await;
        assert!(!registry.has_job(1));
    }

    #[tokio::test]
    async fn test_unknown_slot_is_tolerated() {
        let mut registry = SlotRegistry::new(1);
        registry.kill_job(9);
        registry.cancel_timer(9);
        assert_eq!(registry.generation(9), 0);
        assert!(registry.take_file(9).is_none());
    }
}
