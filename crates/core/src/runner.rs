//! The encoding job runner: turns one file into one external encode.
//!
//! The runner owns codec policy (which profile a file gets), output-path
//! dedup against the filesystem, and the translation of a [`MediaFile`]
//! into an [`EncodeJob`]. It never touches slot or queue state.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::encoder::{EncodeEvent, EncodeHandle, EncodeJob, Encoder, EncoderError};
use crate::file::MediaFile;

/// The encode profile selected for a file.
///
/// Two user-visible profiles exist (audio-bearing video vs silent
/// animation); the still frame is the fallback when a silent input's frame
/// count is unknown and the animation pipeline cannot be trusted with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeProfile {
    /// Audio-bearing input: VP9 in a webm container.
    Vp9Webm,
    /// Silent input with a known frame count: lossless looping webp.
    WebpAnimation,
    /// Silent input with an unknown frame count: single lossless webp frame.
    WebpStill,
}

impl EncodeProfile {
    /// Output container extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Vp9Webm => "webm",
            Self::WebpAnimation | Self::WebpStill => "webp",
        }
    }

    /// Codec argument list for this profile.
    pub fn args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Vp9Webm => &["-vcodec", "libvpx-vp9"],
            Self::WebpAnimation => &[
                "-c:v",
                "libwebp_anim",
                "-loop",
                "0",
                "-lossless",
                "1",
                "-preset",
                "default",
                "-an",
                "-vsync",
                "0",
            ],
            Self::WebpStill => &["-frames:v", "1", "-c:v", "libwebp", "-lossless", "1", "-an"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

/// Stateless service invoking the external encoder for one file at a time.
pub struct JobRunner {
    encoder: Arc<dyn Encoder>,
}

impl JobRunner {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self { encoder }
    }

    /// Codec arguments for the file's profile, or `None` when the input's
    /// frame count is unknown and it is silent (an ambiguous image vs
    /// unreadable video). Callers must route that case through the
    /// still-image pipeline instead of a video encode.
    pub fn encode_args(file: &MediaFile) -> Option<Vec<String>> {
        if file.has_audio {
            return Some(EncodeProfile::Vp9Webm.args());
        }
        if file.frame_count.is_some() {
            return Some(EncodeProfile::WebpAnimation.args());
        }
        None
    }

    /// The profile a file resolves to, still-image fallback included.
    pub fn profile_for(file: &MediaFile) -> EncodeProfile {
        if file.has_audio {
            EncodeProfile::Vp9Webm
        } else if file.frame_count.is_some() {
            EncodeProfile::WebpAnimation
        } else {
            EncodeProfile::WebpStill
        }
    }

    /// Derives the output path beside the source, deduplicating against the
    /// filesystem with an incrementing parenthesized counter, and freezes
    /// the resulting name on the returned file copy.
    pub async fn resolve_output_path(file: &MediaFile) -> Result<MediaFile, EncoderError> {
        let profile = Self::profile_for(file);
        let dir = file.source_path.parent().unwrap_or(Path::new("."));
        let stem = file
            .source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());

        let mut exist_count = 0u32;
        loop {
            let name = if exist_count == 0 {
                format!("{}.{}", stem, profile.extension())
            } else {
                format!("{}({}).{}", stem, exist_count, profile.extension())
            };
            let candidate = dir.join(&name);

            if !tokio::fs::try_exists(&candidate).await? {
                return Ok(file.with_name(name).with_output(candidate));
            }

            exist_count += 1;
        }
    }

    /// Resolves the output path (unless one is already frozen on the file),
    /// selects the profile, and spawns the encode.
    ///
    /// Returns the file copy with its frozen output name alongside the live
    /// handle. Exactly one terminal event arrives on `events` per spawned
    /// job; progress events are integers 0-100, max-folded by the consumer.
    pub async fn spawn(
        &self,
        file: &MediaFile,
        events: mpsc::Sender<EncodeEvent>,
    ) -> Result<(MediaFile, EncodeHandle), EncoderError> {
        // A stopped-then-resumed file already carries its frozen name; the
        // restarted encode overwrites its own partial at the same path
        // instead of deduping onto a new one.
        let file = if file.output_path.is_some() {
            file.clone()
        } else {
            Self::resolve_output_path(file).await?
        };
        let profile = Self::profile_for(&file);
        let args = Self::encode_args(&file).unwrap_or_else(|| EncodeProfile::WebpStill.args());

        debug!(
            key = %file.key,
            profile = ?profile,
            output = %file.name,
            "spawning encode"
        );

        let job = EncodeJob {
            job_id: file.key.to_string(),
            input_path: file.source_path.clone(),
            output_path: file
                .output_path
                .clone()
                .unwrap_or_else(|| file.source_path.clone()),
            args,
            frame_count: file.frame_count,
            duration_secs: file.duration_secs,
        };

        let handle = self.encoder.spawn(job, events).await?;
        Ok((file, handle))
    }
}
