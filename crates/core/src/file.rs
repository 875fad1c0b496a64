//! The file entity moving through the conversion pipeline.
//!
//! A [`MediaFile`] is an immutable-per-version record: every mutation goes
//! through a copy-producing `with_*` transition that returns a new value,
//! so the registry's live view and the queue store's mirror can never race
//! on shared state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::encoder::MediaProbe;

/// One media item moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    /// Unique identifier, assigned at selection time.
    pub key: Uuid,
    /// Display name; starts as the source file name and is frozen to the
    /// deduplicated output file name once encoding starts.
    pub name: String,
    /// Source path as selected by the operator.
    pub source_path: PathBuf,
    /// Output path, assigned lazily by the job runner.
    pub output_path: Option<PathBuf>,
    /// Whether the input carries an audio track.
    pub has_audio: bool,
    /// Total frame count, `None` when the probe reported it unknown.
    pub frame_count: Option<u64>,
    /// Input duration in seconds, when the probe could read it.
    pub duration_secs: Option<f64>,
    /// Error payload from a failed probe or encode.
    pub error: Option<String>,
    /// Whether this file carries an error.
    pub has_error: bool,
    /// Whether a worker slot has claimed this file.
    pub consumed: bool,
    /// When the file was selected.
    pub selected_at: DateTime<Utc>,
    /// When the file reached the completed collection.
    pub completed_at: Option<DateTime<Utc>>,
}

impl MediaFile {
    /// Creates a file from a successful probe.
    pub fn from_probe(probe: &MediaProbe) -> Self {
        let name = probe
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| probe.path.display().to_string());

        Self {
            key: Uuid::new_v4(),
            name,
            source_path: probe.path.clone(),
            output_path: None,
            has_audio: probe.has_audio,
            frame_count: probe.frame_count,
            duration_secs: probe.duration_secs,
            error: None,
            has_error: false,
            consumed: false,
            selected_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Creates a file whose probe failed; it enters the selection queue
    /// flagged with the error and is never scheduled.
    pub fn probe_failed(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            key: Uuid::new_v4(),
            name,
            source_path: path,
            output_path: None,
            has_audio: false,
            frame_count: None,
            duration_secs: None,
            error: Some(error.into()),
            has_error: true,
            consumed: false,
            selected_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the scheduler may hand this file to a slot.
    pub fn can_consume(&self) -> bool {
        !self.consumed && !self.has_error
    }

    /// Directory the output file lands in (the source's directory).
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_path
            .as_deref()
            .or(Some(self.source_path.as_path()))
            .and_then(|p| p.parent())
    }

    /// Returns a copy claimed by a slot.
    pub fn claimed(&self) -> Self {
        let mut file = self.clone();
        file.consumed = true;
        file
    }

    /// Returns a copy released back to the queue.
    pub fn released(&self) -> Self {
        let mut file = self.clone();
        file.consumed = false;
        file
    }

    /// Returns a copy with the display name replaced.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut file = self.clone();
        file.name = name.into();
        file
    }

    /// Returns a copy with the output path frozen.
    pub fn with_output(&self, path: impl Into<PathBuf>) -> Self {
        let mut file = self.clone();
        file.output_path = Some(path.into());
        file
    }

    /// Returns a copy carrying an error payload.
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        let mut file = self.clone();
        file.error = Some(error.into());
        file.has_error = true;
        file
    }

    /// Returns a copy stamped as completed now.
    pub fn completed_now(&self) -> Self {
        let mut file = self.clone();
        file.completed_at = Some(Utc::now());
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(path: &str) -> MediaProbe {
        MediaProbe {
            path: PathBuf::from(path),
            size_bytes: 1024,
            duration_secs: Some(12.0),
            format: "matroska".to_string(),
            frame_count: Some(300),
            has_audio: true,
            video_width: Some(1920),
            video_height: Some(1080),
        }
    }

    #[test]
    fn test_from_probe() {
        let file = MediaFile::from_probe(&probe("/media/clip.mkv"));
        assert_eq!(file.name, "clip.mkv");
        assert_eq!(file.frame_count, Some(300));
        assert!(file.has_audio);
        assert!(!file.has_error);
        assert!(file.can_consume());
    }

    #[test]
    fn test_probe_failed_excluded_from_scheduling() {
        let file = MediaFile::probe_failed("/media/broken.mkv", "no such file");
        assert!(file.has_error);
        assert_eq!(file.error.as_deref(), Some("no such file"));
        assert!(!file.can_consume());
    }

    #[test]
    fn test_transitions_are_copies() {
        let file = MediaFile::from_probe(&probe("/media/clip.mkv"));
        let claimed = file.claimed();

        assert!(!file.consumed);
        assert!(claimed.consumed);
        assert_eq!(file.key, claimed.key);

        let named = claimed.with_name("clip(1).webm");
        assert_eq!(claimed.name, "clip.mkv");
        assert_eq!(named.name, "clip(1).webm");
    }

    #[test]
    fn test_claim_release_round_trip() {
        let file = MediaFile::from_probe(&probe("/media/clip.mkv"));
        let released = file.claimed().released();
        assert!(released.can_consume());
    }

    #[test]
    fn test_output_dir_falls_back_to_source() {
        let file = MediaFile::from_probe(&probe("/media/clips/a.mkv"));
        assert_eq!(file.output_dir(), Some(Path::new("/media/clips")));

        let frozen = file.with_output("/media/clips/a.webm");
        assert_eq!(frozen.output_dir(), Some(Path::new("/media/clips")));
    }

    #[test]
    fn test_with_error_sets_flag() {
        let file = MediaFile::from_probe(&probe("/media/clip.mkv"));
        let failed = file.with_error("encoder exploded");
        assert!(failed.has_error);
        assert!(!failed.can_consume());
    }
}
