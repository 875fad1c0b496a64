//! Testing utilities and mock implementations for lifecycle tests.
//!
//! [`MockEncoder`] stands in for the external encoding engine, allowing
//! pool lifecycle tests to run without ffmpeg installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediamill_core::testing::{fixtures, MockEncoder};
//!
//! let encoder = MockEncoder::new();
//! encoder.set_hold_until_killed(true).await;
//!
//! // Use in PoolEngine::spawn...
//! ```

mod mock_encoder;

pub use mock_encoder::MockEncoder;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::encoder::MediaProbe;
    use std::path::Path;

    /// A probe result for an audio-bearing video with a known frame count.
    pub fn video_probe(path: impl AsRef<Path>) -> MediaProbe {
        MediaProbe {
            path: path.as_ref().to_path_buf(),
            size_bytes: 20 * 1024 * 1024,
            duration_secs: Some(12.0),
            format: "matroska".to_string(),
            frame_count: Some(288),
            has_audio: true,
            video_width: Some(1920),
            video_height: Some(1080),
        }
    }

    /// A probe result for a silent animation with a known frame count.
    pub fn silent_probe(path: impl AsRef<Path>) -> MediaProbe {
        MediaProbe {
            path: path.as_ref().to_path_buf(),
            size_bytes: 2 * 1024 * 1024,
            duration_secs: Some(3.0),
            format: "gif".to_string(),
            frame_count: Some(72),
            has_audio: false,
            video_width: Some(640),
            video_height: Some(480),
        }
    }

    /// A probe result for a silent input with an unknown frame count, the
    /// ambiguous image-vs-video case that routes through the still-image
    /// pipeline.
    pub fn ambiguous_probe(path: impl AsRef<Path>) -> MediaProbe {
        MediaProbe {
            path: path.as_ref().to_path_buf(),
            size_bytes: 512 * 1024,
            duration_secs: None,
            format: "png_pipe".to_string(),
            frame_count: None,
            has_audio: false,
            video_width: Some(800),
            video_height: Some(600),
        }
    }
}
