//! Batch media conversion engine with a bounded worker pool.
//!
//! The core of this crate is the orchestration layer: a fixed-size pool of
//! worker slots, a per-slot state machine, a reactive scheduler pairing
//! queued files with free slots, and a shutdown path that reliably kills
//! external encoder processes and discards partial output. The encoder
//! itself is a black-box collaborator behind the [`encoder::Encoder`]
//! trait; [`encoder::FfmpegEncoder`] is the production implementation and
//! [`testing::MockEncoder`] the test double.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mediamill_core::{load_config, FfmpegEncoder, PoolEngine};
//!
//! let config = load_config(Path::new("mediamill.toml"))?;
//! let encoder = Arc::new(FfmpegEncoder::new(config.encoder));
//! let pool = PoolEngine::spawn(config.pool, encoder);
//!
//! pool.add_paths(vec!["clip.mp4".into()]).await?;
//! pool.start().await?;
//!
//! // Host beforeQuit hook:
//! pool.shutdown().await?;
//! ```

pub mod config;
pub mod encoder;
pub mod file;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod testing;

pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use encoder::{
    EncodeEvent, EncodeHandle, EncodeJob, Encoder, EncoderConfig, EncoderError, FfmpegEncoder,
    MediaProbe,
};
pub use file::MediaFile;
pub use pool::{
    EngineError, EngineHandle, EngineSnapshot, PoolConfig, PoolEngine, SlotState, WorkerSlot,
};
pub use queue::{QueueStore, Stage};
pub use runner::{EncodeProfile, JobRunner};
