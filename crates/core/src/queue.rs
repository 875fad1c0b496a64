//! The queue store: three ordered file collections plus the global run flag.
//!
//! Invariant: a file belongs to exactly one of the three collections at any
//! time. The store is owned and mutated exclusively by the pool engine task;
//! the presentation layer only ever sees cloned snapshots.

use tracing::debug;
use uuid::Uuid;

use crate::file::MediaFile;

/// Which collection a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Selected by the operator, not yet promoted.
    Selected,
    /// Queued for conversion or currently in flight.
    Queued,
    /// Finished, successfully or with an error payload.
    Completed,
}

/// The three ordered collections and the global run flag.
///
/// Insertion order is FIFO priority for scheduling.
#[derive(Debug, Default)]
pub struct QueueStore {
    running: bool,
    selected: Vec<MediaFile>,
    queued: Vec<MediaFile>,
    completed: Vec<MediaFile>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the scheduler is armed.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn selected(&self) -> &[MediaFile] {
        &self.selected
    }

    pub fn queued(&self) -> &[MediaFile] {
        &self.queued
    }

    pub fn completed(&self) -> &[MediaFile] {
        &self.completed
    }

    /// Appends freshly probed files to the selection collection.
    pub fn push_selected(&mut self, files: Vec<MediaFile>) {
        self.selected.extend(files);
    }

    /// Promotes every non-errored selected file to the queued collection.
    ///
    /// Files flagged with a probe error stay behind in the selection list so
    /// the operator can see and remove them.
    pub fn promote_selected(&mut self) {
        let (errored, ready): (Vec<_>, Vec<_>) =
            self.selected.drain(..).partition(|f| f.has_error);

        debug!(promoted = ready.len(), held_back = errored.len(), "promoting selected files");

        self.selected = errored;
        self.queued.extend(ready);
    }

    /// First queued file not yet claimed by a slot.
    pub fn next_unclaimed(&self) -> Option<&MediaFile> {
        self.queued.iter().find(|f| f.can_consume())
    }

    /// Claims the given queued file for a slot, returning the claimed copy.
    pub fn claim(&mut self, key: Uuid) -> Option<MediaFile> {
        let idx = self.queued.iter().position(|f| f.key == key)?;
        let claimed = self.queued[idx].claimed();
        self.queued[idx] = claimed.clone();
        Some(claimed)
    }

    /// Replaces the queued entry with the same key (e.g. after the output
    /// name is frozen). No-op if the mirror entry was deleted meanwhile.
    pub fn replace_queued(&mut self, file: &MediaFile) {
        if let Some(entry) = self.queued.iter_mut().find(|f| f.key == file.key) {
            *entry = file.clone();
        }
    }

    /// Moves the given file to the front of the queued collection, keeping
    /// its claimed flag as passed in. Used when a slot is paused (file stays
    /// claimed) or drained (file released for other slots).
    pub fn requeue_front(&mut self, file: MediaFile) {
        self.queued.retain(|f| f.key != file.key);
        self.queued.insert(0, file);
    }

    /// Files a terminal file: removed from queued, appended to completed.
    ///
    /// Idempotent per key; a file never appears twice in completed.
    pub fn complete(&mut self, file: MediaFile) {
        self.queued.retain(|f| f.key != file.key);
        if !self.completed.iter().any(|f| f.key == file.key) {
            self.completed.push(file.completed_now());
        }
    }

    /// Clears one collection.
    pub fn reset(&mut self, stage: Stage) {
        debug!(?stage, "resetting collection");
        self.collection_mut(stage).clear();
    }

    /// Removes one file from one collection.
    pub fn delete(&mut self, stage: Stage, key: Uuid) {
        self.collection_mut(stage).retain(|f| f.key != key);
    }

    /// How many collections currently hold the given key. Exposed for the
    /// partition invariant checks in tests.
    pub fn membership_count(&self, key: Uuid) -> usize {
        [&self.selected, &self.queued, &self.completed]
            .iter()
            .filter(|c| c.iter().any(|f| f.key == key))
            .count()
    }

    fn collection_mut(&mut self, stage: Stage) -> &mut Vec<MediaFile> {
        match stage {
            Stage::Selected => &mut self.selected,
            Stage::Queued => &mut self.queued,
            Stage::Completed => &mut self.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::MediaProbe;
    use std::path::PathBuf;

    fn file(name: &str) -> MediaFile {
        MediaFile::from_probe(&MediaProbe {
            path: PathBuf::from(format!("/media/{name}")),
            size_bytes: 1,
            duration_secs: Some(1.0),
            format: "matroska".to_string(),
            frame_count: Some(10),
            has_audio: true,
            video_width: None,
            video_height: None,
        })
    }

    #[test]
    fn test_promote_skips_errored() {
        let mut store = QueueStore::new();
        let good = file("a.mkv");
        let bad = MediaFile::probe_failed("/media/b.mkv", "unreadable");

        store.push_selected(vec![good.clone(), bad.clone()]);
        store.promote_selected();

        assert_eq!(store.queued().len(), 1);
        assert_eq!(store.queued()[0].key, good.key);
        assert_eq!(store.selected().len(), 1);
        assert_eq!(store.selected()[0].key, bad.key);
    }

    #[test]
    fn test_claim_marks_consumed_in_place() {
        let mut store = QueueStore::new();
        let a = file("a.mkv");
        store.push_selected(vec![a.clone()]);
        store.promote_selected();

        let claimed = store.claim(a.key).unwrap();
        assert!(claimed.consumed);
        assert!(store.next_unclaimed().is_none());
    }

    #[test]
    fn test_fifo_order_preserved() {
        let mut store = QueueStore::new();
        let a = file("a.mkv");
        let b = file("b.mkv");
        store.push_selected(vec![a.clone(), b.clone()]);
        store.promote_selected();

        assert_eq!(store.next_unclaimed().unwrap().key, a.key);
        store.claim(a.key);
        assert_eq!(store.next_unclaimed().unwrap().key, b.key);
    }

    #[test]
    fn test_requeue_front() {
        let mut store = QueueStore::new();
        let a = file("a.mkv");
        let b = file("b.mkv");
        store.push_selected(vec![a.clone(), b.clone()]);
        store.promote_selected();

        store.requeue_front(b.clone());
        assert_eq!(store.queued()[0].key, b.key);
        assert_eq!(store.queued().len(), 2);
    }

    #[test]
    fn test_complete_is_idempotent_per_key() {
        let mut store = QueueStore::new();
        let a = file("a.mkv");
        store.push_selected(vec![a.clone()]);
        store.promote_selected();

        store.complete(a.clone());
        store.complete(a.clone());

        assert!(store.queued().is_empty());
        assert_eq!(store.completed().len(), 1);
        assert!(store.completed()[0].completed_at.is_some());
    }

    #[test]
    fn test_collections_partition_files() {
        let mut store = QueueStore::new();
        let a = file("a.mkv");
        let b = file("b.mkv");
        store.push_selected(vec![a.clone(), b.clone()]);
        store.promote_selected();
        store.complete(a.clone());

        assert_eq!(store.membership_count(a.key), 1);
        assert_eq!(store.membership_count(b.key), 1);
    }

    #[test]
    fn test_reset_and_delete() {
        let mut store = QueueStore::new();
        let a = file("a.mkv");
        let b = file("b.mkv");
        store.push_selected(vec![a.clone(), b.clone()]);

        store.delete(Stage::Selected, a.key);
        assert_eq!(store.selected().len(), 1);

        store.reset(Stage::Selected);
        assert!(store.selected().is_empty());
        assert_eq!(store.membership_count(b.key), 0);
    }
}
