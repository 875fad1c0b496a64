//! Trait definition for the external encoder collaborator.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

use super::error::EncoderError;
use super::types::{EncodeEvent, EncodeHandle, EncodeJob, MediaProbe};

/// The external encoding engine, reduced to the narrow contract the pool
/// needs: probe a file, spawn an encode that emits events, and be killable
/// through the returned handle.
///
/// Implementations must guarantee exactly one terminal event per spawned
/// job ([`EncodeEvent::Finished`] or [`EncodeEvent::Failed`]), delivered on
/// the given sender. A kill requested through the handle must surface as
/// `Failed { cancelled: true, .. }`, classified from the handle's own
/// kill-request state rather than from process output.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Returns the name of this encoder implementation.
    fn name(&self) -> &str;

    /// Probes a media file for the metadata scheduling needs.
    async fn probe(&self, path: &Path) -> Result<MediaProbe, EncoderError>;

    /// Spawns an encode as a background task and returns its handle.
    ///
    /// The call returns as soon as the process is launched; progress and the
    /// terminal event arrive asynchronously on `events`. If the receiver is
    /// dropped, the encode keeps running without event delivery.
    async fn spawn(
        &self,
        job: EncodeJob,
        events: mpsc::Sender<EncodeEvent>,
    ) -> Result<EncodeHandle, EncoderError>;

    /// Validates that the encoder is properly configured and ready.
    async fn validate(&self) -> Result<(), EncoderError>;
}
