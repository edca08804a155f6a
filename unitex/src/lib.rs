//! Universal-texture transcoding and parallel-compression engine.
//!
//! `unitex` compresses raster images into a GPU-agnostic universal
//! encoding (ETC1S or UASTC), stores the result in either a legacy
//! flat container or KTX2, and later expands it into the native block
//! format of whatever GPU is asking — around twenty targets from ETC1
//! to BC7, PVRTC, ASTC and a handful of uncompressed rasters.
//!
//! # Architecture
//!
//! - [`format`] — the static format capability table: which targets
//!   exist, their block geometry, and which universal encoding can
//!   feed them.
//! - [`container`] — the in-memory texture model plus the legacy and
//!   KTX2 wire formats.
//! - [`codec`] — the [`codec::BlockCodec`] seam behind which the
//!   bit-level encoders and transcoders live, with a deterministic
//!   reference backend.
//! - [`codebook`] — shared read-only ETC1S codebooks for cross-file
//!   deduplication.
//! - [`orchestrator`] — batch compression with exclusive job-level or
//!   block-level parallelism and a recoverable-vs-fatal error policy.
//! - [`transcode`] — the dispatch engine expanding one container
//!   across every requested target format.
//! - [`writer`] — KTX/PNG output files and their naming scheme.
//! - [`metrics`] — PSNR, bits-per-texel, and CSV report assembly.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use unitex::codec::ReferenceCodec;
//! use unitex::config::EngineConfig;
//! use unitex::orchestrator::{CompressionRequest, Orchestrator};
//!
//! # fn main() -> Result<(), unitex::error::EngineError> {
//! let config = EngineConfig::default().with_worker_cap(4);
//! let orchestrator = Orchestrator::new(Arc::new(ReferenceCodec::new()), &config);
//! let request = CompressionRequest::new(
//!     vec![PathBuf::from("albedo.png")],
//!     "out/",
//! );
//! let outcome = orchestrator.submit_batch(&request)?;
//! println!("{} containers written", outcome.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod codebook;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod format;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod transcode;
pub mod writer;

pub use codebook::GlobalCodebook;
pub use config::EngineConfig;
pub use container::{ContainerTarget, TextureType, UniversalContainer};
pub use error::EngineError;
pub use format::{EncodingKind, TranscodeTarget};
pub use orchestrator::{
    BatchOutcome, CompressionRequest, Grouping, JobState, Orchestrator, UnpackRequest,
};
pub use transcode::{TranscodeOptions, TranscodeOutcome, Transcoder};
