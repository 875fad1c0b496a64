//! FFmpeg-based encoder implementation.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::config::EncoderConfig;
use super::error::EncoderError;
use super::traits::Encoder;
use super::types::{EncodeEvent, EncodeHandle, EncodeJob, KillSwitch, MediaProbe};

/// FFmpeg-based encoder implementation.
pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    /// Creates a new FFmpeg encoder with the given configuration.
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Creates an encoder with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EncoderConfig::default())
    }

    /// Builds the full ffmpeg invocation for a job: input, the profile's
    /// codec arguments, log/progress plumbing, and the output path.
    fn build_args(&self, job: &EncodeJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(), // Overwrite output
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
        ];

        args.extend(job.args.iter().cloned());

        // Log level
        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
        ]);

        // Progress output for parsing
        args.extend(["-progress".to_string(), "pipe:2".to_string()]);

        // Extra args
        args.extend(self.config.extra_ffmpeg_args.iter().cloned());

        // Output
        args.push(job.output_path.to_string_lossy().to_string());

        args
    }

    /// Maps raw ffmpeg progress onto an integer percentage.
    ///
    /// Frame-based when the input's frame count is known, otherwise
    /// time-based from the reported out-time over the input duration.
    fn map_progress(
        frames_done: Option<u64>,
        frame_count: Option<u64>,
        out_time_us: Option<u64>,
        duration_secs: Option<f64>,
    ) -> Option<u8> {
        if let (Some(done), Some(total)) = (frames_done, frame_count) {
            if total > 0 {
                let pct = (done as f64 / total as f64 * 100.0).floor();
                return Some(pct.clamp(0.0, 100.0) as u8);
            }
        }

        if let (Some(us), Some(duration)) = (out_time_us, duration_secs) {
            if duration > 0.0 {
                // out_time_ms is microseconds despite the name
                let secs = us as f64 / 1_000_000.0;
                let pct = (secs / duration * 100.0).floor();
                return Some(pct.clamp(0.0, 100.0) as u8);
            }
        }

        None
    }

    /// Parses ffprobe JSON output into a MediaProbe.
    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaProbe, EncoderError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            size: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            nb_frames: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
        }

        let probe: ProbeOutput = serde_json::from_str(output).map_err(|e| {
            EncoderError::parse_error(format!("Failed to parse ffprobe output: {}", e))
        })?;

        let duration_secs = probe
            .format
            .duration
            .as_ref()
            .and_then(|d| d.parse::<f64>().ok());

        let size_bytes = probe
            .format
            .size
            .as_ref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

        let video_stream = probe
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .or_else(|| probe.streams.first());

        // ffprobe reports "N/A" for containers that do not carry a frame
        // count; that ambiguity drives the still-image fallback upstream.
        let frame_count = video_stream
            .and_then(|s| s.nb_frames.as_ref())
            .and_then(|n| n.parse::<u64>().ok());

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaProbe {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs,
            format: format_name.to_string(),
            frame_count,
            has_audio,
            video_width: video_stream.and_then(|s| s.width),
            video_height: video_stream.and_then(|s| s.height),
        })
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, path: &Path) -> Result<MediaProbe, EncoderError> {
        if !path.exists() {
            return Err(EncoderError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EncoderError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    EncoderError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(EncoderError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout)
    }

    async fn spawn(
        &self,
        job: EncodeJob,
        events: mpsc::Sender<EncodeEvent>,
    ) -> Result<EncodeHandle, EncoderError> {
        let args = self.build_args(&job);

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EncoderError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    EncoderError::Io(e)
                }
            })?;

        let stderr = child.stderr.take().expect("stderr should be captured");
        let kill = KillSwitch::new();
        let task_kill = kill.clone();
        let frame_count = job.frame_count;
        let duration_secs = job.duration_secs;
        let job_id = job.job_id.clone();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let frame_regex = Regex::new(r"frame=\s*(\d+)").ok();
            let time_regex = Regex::new(r"out_time_ms=(\d+)").ok();

            let mut frames_done = None;
            let mut out_time_us = None;
            let mut last_sent: i32 = -1;
            let mut error_output = String::new();
            let mut killed = false;

            loop {
                tokio::select! {
                    _ = task_kill.triggered(), if !killed => {
                        killed = true;
                        let _ = child.start_kill();
                    }
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };

                        // Capture error output
                        if line.contains("Error") || line.contains("error") {
                            error_output.push_str(&line);
                            error_output.push('\n');
                        }

                        if let Some(ref re) = frame_regex {
                            if let Some(caps) = re.captures(&line) {
                                frames_done = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
                            }
                        }

                        if let Some(ref re) = time_regex {
                            if let Some(caps) = re.captures(&line) {
                                out_time_us = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
                            }
                        }

                        let percent =
                            Self::map_progress(frames_done, frame_count, out_time_us, duration_secs);

                        if let Some(percent) = percent {
                            if i32::from(percent) > last_sent {
                                last_sent = i32::from(percent);
                                let _ = events.send(EncodeEvent::Progress(percent)).await;
                            }
                        }
                    }
                }
            }

            let status = child.wait().await;

            // A kill requested through the handle wins over whatever the
            // process reported on its way out.
            let terminal = if task_kill.is_requested() {
                EncodeEvent::Failed {
                    message: "encode terminated by kill signal".to_string(),
                    cancelled: true,
                }
            } else {
                match status {
                    Ok(status) if status.success() => EncodeEvent::Finished,
                    Ok(status) => EncodeEvent::Failed {
                        message: format!(
                            "ffmpeg exited with code {:?}: {}",
                            status.code(),
                            error_output.trim()
                        ),
                        cancelled: false,
                    },
                    Err(e) => EncodeEvent::Failed {
                        message: format!("failed to reap ffmpeg: {}", e),
                        cancelled: false,
                    },
                }
            };

            let _ = events.send(terminal).await;
        });

        Ok(EncodeHandle::new(job_id, job.output_path, kill, task))
    }

    async fn validate(&self) -> Result<(), EncoderError> {
        // Check ffmpeg exists
        let ffmpeg_result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffmpeg_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(EncoderError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                });
            }
            return Err(EncoderError::Io(e));
        }

        // Check ffprobe exists
        let ffprobe_result = Command::new(&self.config.ffprobe_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffprobe_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(EncoderError::FfprobeNotFound {
                    path: self.config.ffprobe_path.clone(),
                });
            }
            return Err(EncoderError::Io(e));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_args_wraps_profile() {
        let encoder = FfmpegEncoder::with_defaults();
        let job = EncodeJob {
            job_id: "job-1".to_string(),
            input_path: PathBuf::from("/media/clip.mkv"),
            output_path: PathBuf::from("/media/clip.webm"),
            args: vec!["-vcodec".to_string(), "libvpx-vp9".to_string()],
            frame_count: Some(300),
            duration_secs: Some(12.0),
        };

        let args = encoder.build_args(&job);
        assert_eq!(args[0], "-y");
        assert!(args.contains(&"-vcodec".to_string()));
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"-progress".to_string()));
        assert!(args.contains(&"pipe:2".to_string()));
        assert_eq!(args.last().unwrap(), "/media/clip.webm");
    }

    #[test]
    fn test_map_progress_frame_based() {
        assert_eq!(
            FfmpegEncoder::map_progress(Some(150), Some(300), None, None),
            Some(50)
        );
        assert_eq!(
            FfmpegEncoder::map_progress(Some(300), Some(300), None, None),
            Some(100)
        );
        // Encoder overshoot clamps at 100
        assert_eq!(
            FfmpegEncoder::map_progress(Some(400), Some(300), None, None),
            Some(100)
        );
    }

    #[test]
    fn test_map_progress_time_based_fallback() {
        // 6 of 12 seconds, reported in microseconds
        assert_eq!(
            FfmpegEncoder::map_progress(None, None, Some(6_000_000), Some(12.0)),
            Some(50)
        );
        // Frame count wins when both are known
        assert_eq!(
            FfmpegEncoder::map_progress(Some(30), Some(300), Some(6_000_000), Some(12.0)),
            Some(10)
        );
    }

    #[test]
    fn test_map_progress_unknown() {
        assert_eq!(FfmpegEncoder::map_progress(None, None, None, None), None);
        assert_eq!(
            FfmpegEncoder::map_progress(Some(10), None, None, None),
            None
        );
    }

    #[test]
    fn test_parse_probe_output_video_with_audio() {
        let json = r#"{
            "format": {
                "format_name": "matroska,webm",
                "duration": "12.5",
                "size": "3000000"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "nb_frames": "300",
                    "width": 1920,
                    "height": 1080
                },
                {
                    "codec_type": "audio"
                }
            ]
        }"#;

        let info = FfmpegEncoder::parse_probe_output(Path::new("clip.mkv"), json).unwrap();
        assert_eq!(info.format, "matroska");
        assert_eq!(info.frame_count, Some(300));
        assert!(info.has_audio);
        assert_eq!(info.video_width, Some(1920));
        assert!((info.duration_secs.unwrap() - 12.5).abs() < 0.01);
    }

    #[test]
    fn test_parse_probe_output_na_frames() {
        let json = r#"{
            "format": {
                "format_name": "image2",
                "size": "50000"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "nb_frames": "N/A",
                    "width": 640,
                    "height": 480
                }
            ]
        }"#;

        let info = FfmpegEncoder::parse_probe_output(Path::new("frame.png"), json).unwrap();
        assert_eq!(info.frame_count, None);
        assert!(!info.has_audio);
        assert_eq!(info.duration_secs, None);
    }

    #[test]
    fn test_parse_probe_output_missing_frames_field() {
        let json = r#"{
            "format": {
                "format_name": "webp_pipe",
                "size": "1000"
            },
            "streams": [
                { "codec_type": "video" }
            ]
        }"#;

        let info = FfmpegEncoder::parse_probe_output(Path::new("pic.webp"), json).unwrap();
        assert_eq!(info.frame_count, None);
        assert!(!info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_rejects_garbage() {
        let result = FfmpegEncoder::parse_probe_output(Path::new("x"), "not json");
        assert!(matches!(result, Err(EncoderError::ParseError { .. })));
    }
}
