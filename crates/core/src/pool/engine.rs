//! The pool engine: one task owning every piece of shared state.
//!
//! Operator commands and internal events (timer firings, encode events)
//! are serialized through a single `select!` loop, so slot transitions,
//! queue mutations, and scheduling are single-writer by construction.
//! The scheduler is reactive: it runs after every command or event the
//! engine handles, never on a fixed interval. The presentation layer
//! observes through a `watch` snapshot republished after each change.

use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::encoder::{EncodeEvent, Encoder};
use crate::file::MediaFile;
use crate::metrics;
use crate::queue::{QueueStore, Stage};
use crate::runner::JobRunner;

use super::config::PoolConfig;
use super::registry::{SlotRegistry, TimerHandle};
use super::slot::{SlotState, WorkerSlot};

/// Errors surfaced to operator-facing handle methods.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine task has shut down and no longer accepts commands.
    #[error("pool engine is shut down")]
    Closed,
}

/// UI-facing mirror of the engine state, published after every change.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineSnapshot {
    /// Whether the scheduler is armed.
    pub running: bool,
    /// All worker slots, keyed `1..=N`.
    pub slots: Vec<WorkerSlot>,
    /// The selection collection.
    pub selected: Vec<MediaFile>,
    /// The queued/in-flight collection.
    pub queued: Vec<MediaFile>,
    /// The completed collection.
    pub completed: Vec<MediaFile>,
}

impl EngineSnapshot {
    pub fn slot(&self, key: u32) -> Option<&WorkerSlot> {
        self.slots.iter().find(|s| s.key == key)
    }

    /// Slots currently holding capacity (prepare or running).
    pub fn active_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Prepare | SlotState::Running))
            .count()
    }
}

#[derive(Debug)]
enum Command {
    AddFiles(Vec<MediaFile>),
    Start,
    StopSlot(u32),
    ResumeSlot(u32),
    SetSlotEnabled(u32, bool),
    Reset(Stage),
    DeleteFile(Stage, Uuid),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum PoolEvent {
    StartTimerFired { key: u32, generation: u64 },
    TeardownFired { key: u32, generation: u64 },
    Encode { key: u32, generation: u64, event: EncodeEvent },
}

/// Cloneable operator facade over the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
    encoder: Arc<dyn Encoder>,
}

impl EngineHandle {
    /// Probes the given paths in parallel and adds the results to the
    /// selection collection. Files whose probe failed enter flagged with
    /// the error and are never scheduled.
    pub async fn add_paths(&self, paths: Vec<PathBuf>) -> Result<(), EngineError> {
        let probes =
            futures::future::join_all(paths.iter().map(|p| self.encoder.probe(p))).await;

        let files = paths
            .into_iter()
            .zip(probes)
            .map(|(path, result)| match result {
                Ok(probe) => {
                    metrics::PROBES_TOTAL.with_label_values(&["success"]).inc();
                    MediaFile::from_probe(&probe)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "probe failed");
                    metrics::PROBES_TOTAL.with_label_values(&["error"]).inc();
                    MediaFile::probe_failed(path, e.to_string())
                }
            })
            .collect();

        self.send(Command::AddFiles(files)).await
    }

    /// Promotes non-errored selected files to the queue and arms the
    /// scheduler.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.send(Command::Start).await
    }

    /// Parks one slot: pending start cancelled, live encode killed.
    pub async fn stop_slot(&self, key: u32) -> Result<(), EngineError> {
        self.send(Command::StopSlot(key)).await
    }

    /// Releases a parked slot back to scheduling.
    pub async fn resume_slot(&self, key: u32) -> Result<(), EngineError> {
        self.send(Command::ResumeSlot(key)).await
    }

    /// Toggles one slot's membership in the enabled subset. Takes effect
    /// immediately on an idle slot, after draining on a busy one.
    pub async fn set_slot_enabled(&self, key: u32, enabled: bool) -> Result<(), EngineError> {
        self.send(Command::SetSlotEnabled(key, enabled)).await
    }

    /// Clears one collection.
    pub async fn reset(&self, stage: Stage) -> Result<(), EngineError> {
        self.send(Command::Reset(stage)).await
    }

    /// Removes one file from one collection.
    pub async fn delete_file(&self, stage: Stage, key: Uuid) -> Result<(), EngineError> {
        self.send(Command::DeleteFile(stage, key)).await
    }

    /// Subscribes to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Tears the pool down: cancels every timer, kills and reaps every
    /// live encode, deletes partial outputs. Returns only after cleanup
    /// completes, so host beforeClose/beforeQuit hooks can await it.
    /// Idempotent.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done_tx)).await.is_err() {
            // Engine already gone; cleanup ran when it exited.
            return Ok(());
        }
        let _ = done_rx.await;
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }
}

/// The engine task state. Constructed and consumed by [`PoolEngine::spawn`].
pub struct PoolEngine {
    config: PoolConfig,
    runner: JobRunner,
    registry: SlotRegistry,
    slots: Vec<WorkerSlot>,
    store: QueueStore,
    events: mpsc::Sender<PoolEvent>,
    snapshots: watch::Sender<EngineSnapshot>,
}

impl PoolEngine {
    /// Creates the fixed slot table, spawns the engine task, and returns
    /// the operator handle.
    pub fn spawn(config: PoolConfig, encoder: Arc<dyn Encoder>) -> EngineHandle {
        let count = config.slot_count();
        let enabled_limit = config.resolved_enabled_limit(count) as u32;

        let slots: Vec<WorkerSlot> = (1..=count as u32)
            .map(|key| WorkerSlot::new(key, key > enabled_limit))
            .collect();

        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot {
            running: false,
            slots: slots.clone(),
            selected: Vec::new(),
            queued: Vec::new(),
            completed: Vec::new(),
        });

        let engine = Self {
            config,
            runner: JobRunner::new(Arc::clone(&encoder)),
            registry: SlotRegistry::new(count),
            slots,
            store: QueueStore::new(),
            events: event_tx,
            snapshots: snapshot_tx,
        };

        info!(slots = count, enabled = enabled_limit, "worker pool started");
        tokio::spawn(engine.run(command_rx, event_rx));

        EngineHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            encoder,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<PoolEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.shutdown().await;
                        self.publish();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        // Every handle dropped: tear down like a host exit.
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }

            self.schedule();
            self.publish();
        }

        self.publish();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddFiles(files) => {
                debug!(count = files.len(), "files selected");
                self.store.push_selected(files);
            }
            Command::Start => {
                self.store.promote_selected();
                self.store.set_running(true);
                info!("conversion started");
            }
            Command::StopSlot(key) => self.stop_slot(key),
            Command::ResumeSlot(key) => self.resume_slot(key),
            Command::SetSlotEnabled(key, enabled) => self.set_slot_enabled(key, enabled),
            Command::Reset(stage) => self.store.reset(stage),
            Command::DeleteFile(stage, file_key) => self.store.delete(stage, file_key),
            // Handled in run() so the loop can break.
            Command::Shutdown(_) => {}
        }
    }

    async fn handle_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::StartTimerFired { key, generation } => {
                self.on_start_timer(key, generation).await
            }
            PoolEvent::TeardownFired { key, generation } => self.on_teardown(key, generation),
            PoolEvent::Encode {
                key,
                generation,
                event,
            } => self.on_encode_event(key, generation, event),
        }
    }

    /// One reactive scheduling pass: pair enabled waiting slots with work,
    /// earliest-inserted file first, lowest-keyed slot first. Claiming and
    /// assignment happen inside this single task, so two passes can never
    /// hand out the same file or the same slot twice.
    fn schedule(&mut self) {
        if !self.store.is_running() {
            return;
        }

        let eligible: Vec<u32> = self
            .slots
            .iter()
            .filter(|s| s.can_prepare())
            .map(|s| s.key)
            .collect();

        for key in eligible {
            if self.registry.has_file(key) {
                // Resumed slot: re-arm from its own assignment.
                self.enter_prepare(key);
                continue;
            }

            let Some(next) = self.store.next_unclaimed().map(|f| f.key) else {
                continue;
            };
            let Some(claimed) = self.store.claim(next) else {
                continue;
            };

            debug!(slot = key, file = %claimed.name, "assigning file to slot");
            self.registry.assign_file(key, claimed);
            self.enter_prepare(key);
        }
    }

    /// Enters PREPARE: fresh generation, startup jitter timer armed.
    fn enter_prepare(&mut self, key: u32) {
        let generation = self.registry.bump_generation(key);
        let delay = jitter_ms(
            self.config.start_delay_min_ms,
            self.config.start_delay_max_ms,
        );
        debug!(slot = key, delay_ms = delay, "arming startup timer");

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = events
                .send(PoolEvent::StartTimerFired { key, generation })
                .await;
        });

        self.registry.arm_timer(key, TimerHandle::new(generation, task));
        self.update_slot(key, |s| s.with_state(SlotState::Prepare));
    }

    fn arm_teardown(&mut self, key: u32) {
        let generation = self.registry.bump_generation(key);
        let delay = jitter_ms(
            self.config.teardown_delay_min_ms,
            self.config.teardown_delay_max_ms,
        );

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = events
                .send(PoolEvent::TeardownFired { key, generation })
                .await;
        });

        self.registry.arm_timer(key, TimerHandle::new(generation, task));
    }

    async fn on_start_timer(&mut self, key: u32, generation: u64) {
        if generation != self.registry.generation(key) {
            debug!(slot = key, generation, "dropping stale startup timer");
            return;
        }
        if self.slot_state(key) != Some(SlotState::Prepare) {
            return;
        }
        self.registry.clear_timer(key);

        let Some(file) = self.registry.file(key).cloned() else {
            warn!(slot = key, "startup timer fired with no file assigned");
            self.update_slot(key, |s| s.with_state(SlotState::Waiting));
            return;
        };

        let (job_tx, job_rx) = mpsc::channel(16);
        match self.runner.spawn(&file, job_tx).await {
            Ok((file, handle)) => {
                self.forward_job_events(key, generation, job_rx);
                self.store.replace_queued(&file);
                self.registry.replace_file(key, file);
                self.registry.bind_job(key, handle);
                self.update_slot(key, |s| s.with_state(SlotState::Running).with_progress(0));
            }
            Err(e) => {
                // Filesystem or spawn failures count as genuine encode
                // failures: the file lands in completed with the error.
                warn!(slot = key, error = %e, "failed to start encode");
                let _ = self.registry.take_file(key);
                self.fail_slot(key, file, e.to_string());
            }
        }
    }

    fn on_teardown(&mut self, key: u32, generation: u64) {
        if generation != self.registry.generation(key) {
            debug!(slot = key, generation, "dropping stale teardown timer");
            return;
        }
        self.registry.clear_timer(key);
        self.update_slot(key, |s| {
            if matches!(s.state, SlotState::Complete | SlotState::Error) {
                s.with_state(SlotState::Waiting)
            } else {
                s.clone()
            }
        });
    }

    fn on_encode_event(&mut self, key: u32, generation: u64, event: EncodeEvent) {
        if generation != self.registry.generation(key) {
            debug!(slot = key, generation, "dropping stale encode event");
            return;
        }

        match event {
            EncodeEvent::Progress(progress) => {
                // Duplicates and out-of-order reports are tolerated by
                // taking the max.
                self.update_slot(key, |s| {
                    if matches!(s.state, SlotState::Running | SlotState::TearDown)
                        && progress > s.progress
                    {
                        s.with_progress(progress)
                    } else {
                        s.clone()
                    }
                });
            }
            EncodeEvent::Finished => self.finish_slot(key),
            EncodeEvent::Failed {
                cancelled: true, ..
            } => {
                // A kill that did not come through stop_slot (its events
                // would be stale by now): park the slot like a stop.
                debug!(slot = key, "encode cancelled");
                metrics::ENCODES_TOTAL.with_label_values(&["cancelled"]).inc();
                let _ = self.registry.take_job(key);
                self.update_slot(key, |s| {
                    s.with_state(SlotState::Paused)
                        .with_progress(0)
                        .with_stopped(true)
                });
                if let Some(file) = self.registry.file(key).cloned() {
                    self.store.requeue_front(file);
                }
            }
            EncodeEvent::Failed {
                message,
                cancelled: false,
            } => {
                let _ = self.registry.take_job(key);
                let Some(file) = self.registry.take_file(key) else {
                    return;
                };
                warn!(slot = key, error = %message, "encode failed");
                self.fail_slot(key, file, message);
            }
        }
    }

    fn finish_slot(&mut self, key: u32) {
        if let Some(elapsed) = self.registry.job_elapsed_secs(key) {
            metrics::ENCODE_DURATION.observe(elapsed);
        }
        metrics::ENCODES_TOTAL.with_label_values(&["success"]).inc();

        let _ = self.registry.take_job(key);
        let Some(file) = self.registry.take_file(key) else {
            return;
        };
        info!(slot = key, file = %file.name, "encode complete");
        metrics::FILES_COMPLETED.inc();
        self.store.complete(file);

        let pending = self.registry.take_pending_disable(key);
        self.update_slot(key, |s| {
            let s = s
                .with_state(SlotState::Complete)
                .with_progress(0)
                .with_stopped(false);
            match pending {
                Some(disabled) => s.with_disabled(disabled),
                None => s,
            }
        });
        self.arm_teardown(key);
    }

    fn fail_slot(&mut self, key: u32, file: MediaFile, message: String) {
        metrics::ENCODES_TOTAL.with_label_values(&["failed"]).inc();
        self.store.complete(file.with_error(message));

        let pending = self.registry.take_pending_disable(key);
        self.update_slot(key, |s| {
            let s = s.with_state(SlotState::Error).with_progress(0);
            match pending {
                Some(disabled) => s.with_disabled(disabled),
                None => s,
            }
        });
        self.arm_teardown(key);
    }

    fn stop_slot(&mut self, key: u32) {
        let Some(slot) = self.slot(key).cloned() else {
            return;
        };
        if !slot.can_stop_or_resume() {
            return;
        }

        self.registry.cancel_timer(key);
        if self.registry.has_job(key) {
            self.registry.kill_job(key);
            let _ = self.registry.take_job(key);
            metrics::ENCODES_TOTAL.with_label_values(&["cancelled"]).inc();
        }
        // Everything armed for this slot is now stale.
        self.registry.bump_generation(key);

        if !slot.can_pause() {
            self.update_slot(key, |s| s.with_progress(0));
            return;
        }

        info!(slot = key, "slot stopped");
        self.update_slot(key, |s| {
            s.with_state(SlotState::Paused)
                .with_progress(0)
                .with_stopped(true)
        });
        // The file was not rejected; it goes back to the queue head, still
        // claimed by this slot.
        if let Some(file) = self.registry.file(key).cloned() {
            self.store.requeue_front(file);
        }
    }

    fn resume_slot(&mut self, key: u32) {
        let Some(slot) = self.slot(key) else { return };
        if !slot.is_paused() {
            return;
        }
        info!(slot = key, "slot resumed");
        self.update_slot(key, |s| {
            s.with_state(SlotState::Waiting).with_stopped(false)
        });
        // The scheduler pass that follows re-arms the slot from its
        // still-assigned file.
    }

    fn set_slot_enabled(&mut self, key: u32, enabled: bool) {
        let disabled = !enabled;
        let Some(slot) = self.slot(key).cloned() else {
            return;
        };
        if slot.disabled == disabled {
            return;
        }

        match slot.state {
            SlotState::Waiting | SlotState::Complete | SlotState::Error => {
                debug!(slot = key, disabled, "toggling slot");
                self.update_slot(key, |s| s.with_disabled(disabled));
            }
            SlotState::Prepare => {
                // Nothing running yet: cancel the pending start and release
                // the claimed file for other slots.
                self.registry.cancel_timer(key);
                self.registry.bump_generation(key);
                if let Some(file) = self.registry.take_file(key) {
                    self.store.requeue_front(file.released());
                }
                self.update_slot(key, |s| {
                    s.with_state(SlotState::Waiting).with_disabled(disabled)
                });
            }
            SlotState::Paused => {
                if let Some(file) = self.registry.take_file(key) {
                    self.store.requeue_front(file.released());
                }
                self.update_slot(key, |s| {
                    s.with_state(SlotState::Waiting)
                        .with_disabled(disabled)
                        .with_stopped(false)
                });
            }
            SlotState::Running => {
                info!(slot = key, disabled, "slot draining before toggle");
                self.registry.set_pending_disable(key, disabled);
                self.update_slot(key, |s| s.with_state(SlotState::TearDown));
            }
            SlotState::TearDown => {
                debug!(slot = key, "toggle ignored while draining");
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("shutting down worker pool");
        self.store.set_running(false);
        self.registry.shutdown_all().await;
        self.slots = self
            .slots
            .iter()
            .map(|s| {
                s.with_state(SlotState::Waiting)
                    .with_progress(0)
                    .with_stopped(false)
            })
            .collect();
    }

    fn forward_job_events(&self, key: u32, generation: u64, mut rx: mpsc::Receiver<EncodeEvent>) {
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events
                    .send(PoolEvent::Encode {
                        key,
                        generation,
                        event,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    fn slot(&self, key: u32) -> Option<&WorkerSlot> {
        self.slots.iter().find(|s| s.key == key)
    }

    fn slot_state(&self, key: u32) -> Option<SlotState> {
        self.slot(key).map(|s| s.state)
    }

    fn update_slot(&mut self, key: u32, f: impl FnOnce(&WorkerSlot) -> WorkerSlot) {
        if let Some(idx) = self.slots.iter().position(|s| s.key == key) {
            self.slots[idx] = f(&self.slots[idx]);
        }
    }

    fn publish(&self) {
        let snapshot = EngineSnapshot {
            running: self.store.is_running(),
            slots: self.slots.clone(),
            selected: self.store.selected().to_vec(),
            queued: self.store.queued().to_vec(),
            completed: self.store.completed().to_vec(),
        };
        metrics::SLOTS_RUNNING.set(
            snapshot.slots.iter().filter(|s| s.is_running()).count() as i64,
        );
        let _ = self.snapshots.send(snapshot);
    }
}

/// Uniform random delay in `[min_ms, max_ms)`, collapsing to `min_ms` for
/// degenerate windows.
fn jitter_ms(min_ms: u64, max_ms: u64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    rand::thread_rng().gen_range(min_ms..max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEncoder;

    #[test]
    fn test_jitter_within_window() {
        for _ in 0..50 {
            let delay = jitter_ms(600, 3000);
            assert!((600..3000).contains(&delay));
        }
        assert_eq!(jitter_ms(0, 0), 0);
        assert_eq!(jitter_ms(5, 5), 5);
    }

    #[tokio::test]
    async fn test_initial_snapshot_half_pool_enabled() {
        let config = PoolConfig {
            slots: 4,
            ..PoolConfig::immediate()
        };
        let handle = PoolEngine::spawn(config, Arc::new(MockEncoder::new()));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.slots.len(), 4);
        assert!(!snapshot.running);
        let enabled = snapshot.slots.iter().filter(|s| !s.disabled).count();
        assert_eq!(enabled, 2);
        // Low keys are the enabled half.
        assert!(!snapshot.slot(1).unwrap().disabled);
        assert!(snapshot.slot(4).unwrap().disabled);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let config = PoolConfig {
            slots: 1,
            ..PoolConfig::immediate()
        };
        let handle = PoolEngine::spawn(config, Arc::new(MockEncoder::new()));

        handle.shutdown().await.unwrap();

        // The engine task drops its receiver shortly after replying; poll
        // until the channel reports closed.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            if matches!(handle.start().await, Err(EngineError::Closed)) {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "engine did not close its command channel"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
