//! In-memory model of a compressed universal texture and its two
//! serialization targets.
//!
//! A [`UniversalContainer`] holds either ETC1S or UASTC payload,
//! addressed as images -> mip levels -> (layers x faces). It is
//! immutable after creation and exclusively owned by whichever stage
//! currently holds it; it never crosses a thread boundary while
//! mutable.
//!
//! Two wire formats are supported:
//!
//! - the legacy flat container (`legacy`): header + slice table +
//!   codebook + payload, guarded by CRC16 checksums;
//! - KTX2 (`ktx2`): identifier + header + data format descriptor +
//!   level index + key/value metadata + optional per-level
//!   supercompression.

mod bytes;
pub mod ktx2;
pub mod legacy;

pub use ktx2::Ktx2Options;

use thiserror::Error;

use crate::format::EncodingKind;

/// Errors while parsing or serializing a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The byte stream does not start with a known container magic.
    #[error("unrecognized container magic")]
    UnknownMagic,

    /// Structural damage: bad checksum, truncated section, or an
    /// offset pointing outside the file.
    #[error("corrupt container: {0}")]
    Corrupt(String),

    /// The container is well-formed but uses a feature this build
    /// cannot represent in the requested wire format.
    #[error("unrepresentable in target format: {0}")]
    Unrepresentable(String),
}

/// Logical texture type carried by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureType {
    /// A single 2D image (with mips).
    TwoD,
    /// Multiple independent 2D layers.
    TwoDArray,
    /// One or more cubemaps: images are face-major, six faces per
    /// layer.
    CubemapArray,
    /// Frame sequence with conditional replenishment: the first slice
    /// is intra, later slices depend on their immediate predecessor.
    VideoFrames,
    /// 3D texture. Representable in the model; the orchestrator does
    /// not produce it.
    Volume,
}

impl TextureType {
    /// Faces per image group: 6 for cubemaps, 1 otherwise.
    pub fn face_count(self) -> u32 {
        match self {
            TextureType::CubemapArray => 6,
            _ => 1,
        }
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            TextureType::TwoD => 0,
            TextureType::TwoDArray => 1,
            TextureType::CubemapArray => 2,
            TextureType::VideoFrames => 3,
            TextureType::Volume => 4,
        }
    }

    pub(crate) fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            0 => TextureType::TwoD,
            1 => TextureType::TwoDArray,
            2 => TextureType::CubemapArray,
            3 => TextureType::VideoFrames,
            4 => TextureType::Volume,
            _ => return None,
        })
    }
}

/// Per-image description: base dimensions and mip chain length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub orig_width: u32,
    pub orig_height: u32,
    pub num_levels: u32,
    pub has_alpha: bool,
}

/// One compressed unit: a single (image, mip level) pair, optionally
/// an alpha companion of the preceding color slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceDesc {
    pub image_index: u32,
    pub level_index: u32,
    pub orig_width: u32,
    pub orig_height: u32,
    pub num_blocks_x: u32,
    pub num_blocks_y: u32,
    /// Byte offset into the container payload.
    pub payload_offset: u32,
    pub payload_len: u32,
    /// CRC-16/CCITT of the slice payload bytes.
    pub crc16: u16,
    /// This slice carries the alpha channel of its image level.
    pub alpha_slice: bool,
    /// Intra slice; false means the slice is only meaningful relative
    /// to its immediate predecessor (P-frame).
    pub iframe: bool,
}

/// Addressing info for one (image, level) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLevelInfo {
    pub image_index: u32,
    pub level_index: u32,
    pub orig_width: u32,
    pub orig_height: u32,
    pub num_blocks_x: u32,
    pub num_blocks_y: u32,
    /// Index of the first slice for this pair in the slice table.
    pub first_slice: usize,
}

impl ImageLevelInfo {
    pub fn total_blocks(&self) -> usize {
        self.num_blocks_x as usize * self.num_blocks_y as usize
    }
}

/// A compressed universal texture.
///
/// Immutable after creation. Slice order is preserved exactly as
/// produced, first to last; for video this order is load-bearing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniversalContainer {
    pub encoding: EncodingKind,
    pub texture_type: TextureType,
    pub y_flipped: bool,
    pub has_alpha: bool,
    /// Frame duration in microseconds (video only, else zero).
    pub us_per_frame: u32,
    pub userdata: (u32, u32),
    /// ETC1S endpoint codebook entry count (zero for UASTC).
    pub endpoint_count: u32,
    /// ETC1S selector codebook entry count (zero for UASTC).
    pub selector_count: u32,
    /// Serialized endpoint/selector tables. Empty when the container
    /// references a global codebook (counts stay non-zero).
    pub codebook: Vec<u8>,
    pub images: Vec<ImageDesc>,
    pub slices: Vec<SliceDesc>,
    /// Raw compressed blocks, addressed through the slice table.
    pub payload: Vec<u8>,
}

impl UniversalContainer {
    /// True when the codebook lives in a separate global file.
    pub fn uses_global_codebook(&self) -> bool {
        self.encoding == EncodingKind::Etc1s && self.codebook.is_empty() && self.endpoint_count > 0
    }

    /// Faces per layer (6 for cubemap arrays, 1 otherwise).
    pub fn face_count(&self) -> u32 {
        self.texture_type.face_count()
    }

    /// Number of layers. Images are face-major for cubemaps:
    /// image `i` is face `i % 6` of layer `i / 6`.
    pub fn layer_count(&self) -> u32 {
        let faces = self.face_count();
        if faces == 0 || self.images.is_empty() {
            return 0;
        }
        (self.images.len() as u32).div_ceil(faces)
    }

    /// Mip level count of the base image (zero if empty).
    pub fn level_count(&self) -> u32 {
        self.images.first().map(|i| i.num_levels).unwrap_or(0)
    }

    /// Addressing info for one (image, level) pair, or `None` when
    /// out of range.
    pub fn level_info(&self, image_index: u32, level_index: u32) -> Option<ImageLevelInfo> {
        let image = self.images.get(image_index as usize)?;
        if level_index >= image.num_levels {
            return None;
        }
        let first_slice = self.slices.iter().position(|s| {
            s.image_index == image_index && s.level_index == level_index && !s.alpha_slice
        })?;
        let slice = &self.slices[first_slice];
        Some(ImageLevelInfo {
            image_index,
            level_index,
            orig_width: slice.orig_width,
            orig_height: slice.orig_height,
            num_blocks_x: slice.num_blocks_x,
            num_blocks_y: slice.num_blocks_y,
            first_slice,
        })
    }

    /// Payload bytes of one slice.
    pub fn slice_data(&self, slice_index: usize) -> Option<&[u8]> {
        let s = self.slices.get(slice_index)?;
        let start = s.payload_offset as usize;
        let end = start.checked_add(s.payload_len as usize)?;
        self.payload.get(start..end)
    }

    /// Alpha companion slice of the given color slice, if present.
    pub fn alpha_slice_of(&self, slice_index: usize) -> Option<usize> {
        let s = self.slices.get(slice_index)?;
        let next = self.slices.get(slice_index + 1)?;
        (next.alpha_slice
            && next.image_index == s.image_index
            && next.level_index == s.level_index)
            .then_some(slice_index + 1)
    }
}

/// Wire format to serialize a container into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerTarget {
    Legacy,
    Ktx2,
}

/// Serialize a container into the requested wire format.
///
/// Recomputes the slice offsets, level index, and all content
/// checksums from the in-memory state.
pub fn serialize(
    container: &UniversalContainer,
    target: ContainerTarget,
) -> Result<Vec<u8>, ContainerError> {
    match target {
        ContainerTarget::Legacy => legacy::serialize(container),
        ContainerTarget::Ktx2 => ktx2::serialize(container, &Ktx2Options::default()),
    }
}

/// Parse a container from bytes, sniffing the wire format from its
/// magic. Structural checksums are validated before any offset is
/// trusted.
pub fn parse(bytes: &[u8]) -> Result<UniversalContainer, ContainerError> {
    if bytes.starts_with(&ktx2::KTX2_IDENTIFIER) {
        ktx2::parse(bytes)
    } else if bytes.len() >= 2 && bytes[0..2] == legacy::MAGIC.to_le_bytes() {
        legacy::parse(bytes)
    } else {
        Err(ContainerError::UnknownMagic)
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    //! Hand-built containers shared by the wire-format tests.

    use super::*;

    /// Deterministic payload bytes for fixtures.
    fn fill(len: usize, tag: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31) ^ tag).collect()
    }

    /// A 2D ETC1S container: one 8x8 image, two mip levels, color +
    /// alpha slices on the base level.
    pub fn etc1s_2d() -> UniversalContainer {
        let base = fill(32, 0x11);
        let base_a = fill(32, 0x22);
        let mip = fill(8, 0x33);
        let mut payload = Vec::new();
        let mut slices = Vec::new();
        for (data, level, alpha, w, h) in [
            (&base, 0u32, false, 8u32, 8u32),
            (&base_a, 0, true, 8, 8),
            (&mip, 1, false, 4, 4),
        ] {
            slices.push(SliceDesc {
                image_index: 0,
                level_index: level,
                orig_width: w,
                orig_height: h,
                num_blocks_x: w.div_ceil(4),
                num_blocks_y: h.div_ceil(4),
                payload_offset: payload.len() as u32,
                payload_len: data.len() as u32,
                crc16: legacy::crc16(data, 0),
                alpha_slice: alpha,
                iframe: true,
            });
            payload.extend_from_slice(data);
        }
        UniversalContainer {
            encoding: EncodingKind::Etc1s,
            texture_type: TextureType::TwoD,
            y_flipped: false,
            has_alpha: true,
            us_per_frame: 0,
            userdata: (7, 9),
            endpoint_count: 4,
            selector_count: 4,
            codebook: fill(24, 0x44),
            images: vec![ImageDesc {
                orig_width: 8,
                orig_height: 8,
                num_levels: 2,
                has_alpha: true,
            }],
            slices,
            payload,
        }
    }

    /// A UASTC cubemap array: 3 layers x 6 faces, 4x4 each, one level.
    pub fn uastc_cubemap_array() -> UniversalContainer {
        let mut payload = Vec::new();
        let mut slices = Vec::new();
        let mut images = Vec::new();
        for image_index in 0..18u32 {
            let data = fill(16, image_index as u8);
            slices.push(SliceDesc {
                image_index,
                level_index: 0,
                orig_width: 4,
                orig_height: 4,
                num_blocks_x: 1,
                num_blocks_y: 1,
                payload_offset: payload.len() as u32,
                payload_len: data.len() as u32,
                crc16: legacy::crc16(&data, 0),
                alpha_slice: false,
                iframe: true,
            });
            payload.extend_from_slice(&data);
            images.push(ImageDesc {
                orig_width: 4,
                orig_height: 4,
                num_levels: 1,
                has_alpha: false,
            });
        }
        UniversalContainer {
            encoding: EncodingKind::Uastc,
            texture_type: TextureType::CubemapArray,
            y_flipped: true,
            has_alpha: false,
            us_per_frame: 0,
            userdata: (0, 0),
            endpoint_count: 0,
            selector_count: 0,
            codebook: Vec::new(),
            images,
            slices,
            payload,
        }
    }
}
