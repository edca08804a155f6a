//! Engine-wide error taxonomy.
//!
//! Every fatal condition carries enough context (file name, format,
//! image/level/face indices) to reproduce it. Warnings such as the
//! power-of-two skip are *not* errors; they are reported through
//! `tracing::warn!` and collected on the relevant outcome type.

use std::path::PathBuf;

use thiserror::Error;

use crate::format::TranscodeTarget;

/// Errors produced by the compression orchestrator, transcode dispatch
/// engine, and container writer.
///
/// The variants map one-to-one onto the failure kinds the batch error
/// policy distinguishes; see [`EngineError::is_recoverable`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// A source image was missing, unreadable, empty, or oversized.
    ///
    /// Recoverable at the batch level when jobs are grouped
    /// individually: the batch continues with the remaining jobs.
    #[error("failed to read source image {path}: {reason}")]
    SourceReadFailed { path: PathBuf, reason: String },

    /// Cross-image validation failed (dimension or mip-count mismatch
    /// across an array/cubemap/video set, or a global-codebook size
    /// mismatch). Fatal to the job.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The frontend/backend encode stage or codebook construction
    /// failed. Fatal to the job.
    #[error("encode stage failed for {path}: {reason}")]
    EncodeStageFailed { path: PathBuf, reason: String },

    /// Serialization of the universal or KTX2 container failed.
    /// Fatal to the job.
    #[error("container build failed: {0}")]
    ContainerBuildFailed(String),

    /// Disk I/O failed while writing an output file. Fatal to the
    /// remaining outputs of that job only.
    #[error("failed to write {path}: {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single (image, level, face, format) unit failed inside the
    /// dispatch engine. Fatal to the whole transcode outcome.
    #[error(
        "transcode failed: image {image}, level {level}, face {face}, target {target}: {reason}"
    )]
    TranscodeFailed {
        image: usize,
        level: usize,
        face: usize,
        target: TranscodeTarget,
        reason: String,
    },
}

impl EngineError {
    /// Returns true if a batch running in `Individual` grouping may
    /// continue past this failure.
    ///
    /// Only unreadable/corrupt source images are recoverable; every
    /// other kind stops remaining work immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::SourceReadFailed { .. })
    }
}
