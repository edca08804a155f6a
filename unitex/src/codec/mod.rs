//! The opaque block-codec capability.
//!
//! Bit-level encoders and transcoders are external collaborators. The
//! orchestration layer depends only on the [`BlockCodec`] trait, never
//! on a concrete codec's internals, so execution backends (software,
//! GPU-accelerated) can be swapped without touching the engine.
//!
//! The bundled [`ReferenceCodec`] is a deterministic software backend
//! that honors the contract; numeric output quality of any particular
//! block format is explicitly out of scope.

mod reference;

pub use reference::ReferenceCodec;

use image::RgbaImage;
use thiserror::Error;

use crate::codebook::GlobalCodebook;
use crate::format::{EncodingKind, TranscodeTarget};

/// Errors surfaced by a codec backend.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid dimensions {width}x{height}: {reason}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("destination buffer holds {actual} bytes, expected {expected}")]
    BadOutputSize { expected: usize, actual: usize },

    #[error("codec does not support {0}")]
    UnsupportedTarget(TranscodeTarget),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),
}

/// Quality and codebook-size parameters for one compression job.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    /// Quality level, 1 (smallest) to 255 (best).
    pub quality: u32,
    /// ETC1S endpoint codebook budget.
    pub max_endpoints: u32,
    /// ETC1S selector codebook budget.
    pub max_selectors: u32,
    /// Weight errors by perceived luminance.
    pub perceptual: bool,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            quality: 128,
            max_endpoints: 512,
            max_selectors: 512,
            perceptual: true,
        }
    }
}

/// Output of encoding one image level into the universal encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSlice {
    pub data: Vec<u8>,
    pub num_blocks_x: u32,
    pub num_blocks_y: u32,
}

/// ETC1S endpoint/selector tables produced by the frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodebookTables {
    pub endpoint_count: u32,
    pub selector_count: u32,
    pub data: Vec<u8>,
}

/// Borrowed view of one compressed slice handed to the transcoder.
#[derive(Debug, Clone, Copy)]
pub struct SliceView<'a> {
    pub encoding: EncodingKind,
    pub data: &'a [u8],
    pub num_blocks_x: u32,
    pub num_blocks_y: u32,
    pub orig_width: u32,
    pub orig_height: u32,
}

/// A pluggable block encode/transcode backend.
///
/// Implementations must be thread-safe: one codec instance is shared
/// by every worker in a batch.
pub trait BlockCodec: Send + Sync {
    /// Short backend name for logs and reports.
    fn name(&self) -> &str;

    /// Build the ETC1S endpoint/selector tables for a job.
    ///
    /// When `codebook` is given the returned tables must mirror its
    /// entry counts and the per-container table bytes stay empty.
    fn build_codebook(
        &self,
        params: &EncodeParams,
        codebook: Option<&GlobalCodebook>,
    ) -> CodebookTables;

    /// Encode one RGBA image level into universal blocks.
    fn encode_slice(
        &self,
        image: &RgbaImage,
        encoding: EncodingKind,
        params: &EncodeParams,
        codebook: Option<&GlobalCodebook>,
    ) -> Result<EncodedSlice, CodecError>;

    /// Transcode a contiguous range of destination units.
    ///
    /// `first_unit` indexes the target format's unit grid (blocks for
    /// compressed targets, pixels for uncompressed ones); `dst` must
    /// hold a whole number of units and every byte of it must be
    /// written on success.
    fn transcode_range(
        &self,
        slice: &SliceView<'_>,
        target: TranscodeTarget,
        first_unit: usize,
        dst: &mut [u8],
    ) -> Result<(), CodecError>;

    /// Transcode a whole slice into `dst`.
    fn transcode_slice(
        &self,
        slice: &SliceView<'_>,
        target: TranscodeTarget,
        dst: &mut [u8],
    ) -> Result<(), CodecError> {
        self.transcode_range(slice, target, 0, dst)
    }

    /// Whether this build can decode the given target back into a
    /// raster image for inspection. Targets without a software
    /// decompressor degrade gracefully: blocks are still produced,
    /// only the unpack step is skipped.
    fn can_decode_raster(&self, target: TranscodeTarget) -> bool;

    /// Decode transcoded data back into RGBA pixels.
    fn decode_raster(
        &self,
        target: TranscodeTarget,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, CodecError>;
}
