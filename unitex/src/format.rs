//! Universal encodings, transcode targets, and the format capability
//! table.
//!
//! The capability table is process-wide static data: pure lookups, no
//! runtime mutation, safe to read from any number of threads without
//! locking.

use std::fmt;

/// The two mutually-exclusive universal intermediate encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingKind {
    /// Lower-quality, smaller encoding built from shared
    /// endpoint/selector codebooks.
    Etc1s,
    /// Higher-quality, larger encoding, block-compatible in spirit
    /// with ASTC.
    Uastc,
}

impl EncodingKind {
    /// Compressed bytes per 4x4 block in the universal encoding.
    pub fn bytes_per_block(self) -> usize {
        match self {
            EncodingKind::Etc1s => 8,
            EncodingKind::Uastc => 16,
        }
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingKind::Etc1s => write!(f, "ETC1S"),
            EncodingKind::Uastc => write!(f, "UASTC"),
        }
    }
}

/// Native GPU block-compression formats the engine can transcode to,
/// plus a few uncompressed raster formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TranscodeTarget {
    Etc1Rgb,
    Etc2Rgba,
    Bc1Rgb,
    Bc3Rgba,
    Bc4R,
    Bc5Rg,
    Bc7Rgba,
    /// Alternate BC7 packing used only internally by some encoders.
    /// Always skipped during dispatch regardless of support.
    Bc7Alt,
    Pvrtc1Rgb,
    Pvrtc1Rgba,
    Astc4x4Rgba,
    AtcRgb,
    AtcRgba,
    Pvrtc2Rgb,
    Pvrtc2Rgba,
    EacR11,
    EacRg11,
    Fxt1Rgb,
    Rgba32,
    Rgb565,
    Bgr565,
    Rgba4444,
}

impl TranscodeTarget {
    /// All targets, in dispatch order.
    pub const ALL: [TranscodeTarget; 22] = [
        TranscodeTarget::Etc1Rgb,
        TranscodeTarget::Etc2Rgba,
        TranscodeTarget::Bc1Rgb,
        TranscodeTarget::Bc3Rgba,
        TranscodeTarget::Bc4R,
        TranscodeTarget::Bc5Rg,
        TranscodeTarget::Bc7Rgba,
        TranscodeTarget::Bc7Alt,
        TranscodeTarget::Pvrtc1Rgb,
        TranscodeTarget::Pvrtc1Rgba,
        TranscodeTarget::Astc4x4Rgba,
        TranscodeTarget::AtcRgb,
        TranscodeTarget::AtcRgba,
        TranscodeTarget::Pvrtc2Rgb,
        TranscodeTarget::Pvrtc2Rgba,
        TranscodeTarget::EacR11,
        TranscodeTarget::EacRg11,
        TranscodeTarget::Fxt1Rgb,
        TranscodeTarget::Rgba32,
        TranscodeTarget::Rgb565,
        TranscodeTarget::Bgr565,
        TranscodeTarget::Rgba4444,
    ];

    /// Short, stable identifier used in output filenames and reports.
    pub fn short_name(self) -> &'static str {
        match self {
            TranscodeTarget::Etc1Rgb => "ETC1_RGB",
            TranscodeTarget::Etc2Rgba => "ETC2_RGBA",
            TranscodeTarget::Bc1Rgb => "BC1_RGB",
            TranscodeTarget::Bc3Rgba => "BC3_RGBA",
            TranscodeTarget::Bc4R => "BC4_R",
            TranscodeTarget::Bc5Rg => "BC5_RG",
            TranscodeTarget::Bc7Rgba => "BC7_RGBA",
            TranscodeTarget::Bc7Alt => "BC7_ALT",
            TranscodeTarget::Pvrtc1Rgb => "PVRTC1_4_RGB",
            TranscodeTarget::Pvrtc1Rgba => "PVRTC1_4_RGBA",
            TranscodeTarget::Astc4x4Rgba => "ASTC_4x4_RGBA",
            TranscodeTarget::AtcRgb => "ATC_RGB",
            TranscodeTarget::AtcRgba => "ATC_RGBA",
            TranscodeTarget::Pvrtc2Rgb => "PVRTC2_4_RGB",
            TranscodeTarget::Pvrtc2Rgba => "PVRTC2_4_RGBA",
            TranscodeTarget::EacR11 => "ETC2_EAC_R11",
            TranscodeTarget::EacRg11 => "ETC2_EAC_RG11",
            TranscodeTarget::Fxt1Rgb => "FXT1_RGB",
            TranscodeTarget::Rgba32 => "RGBA32",
            TranscodeTarget::Rgb565 => "RGB565",
            TranscodeTarget::Bgr565 => "BGR565",
            TranscodeTarget::Rgba4444 => "RGBA4444",
        }
    }
}

impl fmt::Display for TranscodeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Static traits of a transcode target consulted by the capability
/// table and the dispatch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatTraits {
    /// The format carries an alpha channel.
    pub has_alpha: bool,
    /// The *image* dimensions must be powers of two. Checked per image
    /// at dispatch time; failing it is a soft skip, not an error.
    pub requires_pow2: bool,
    /// Uncompressed raster format; `bytes_per_unit` is bytes per
    /// pixel and the block dimensions are 1x1.
    pub uncompressed: bool,
    /// Block width in pixels (1 for uncompressed formats).
    pub block_width: u32,
    /// Block height in pixels (1 for uncompressed formats).
    pub block_height: u32,
    /// Bytes per block, or bytes per pixel for uncompressed formats.
    pub bytes_per_unit: usize,
}

impl FormatTraits {
    /// Output buffer size in bytes for an image of the given pixel
    /// dimensions.
    pub fn output_size(&self, width: u32, height: u32) -> usize {
        let (ux, uy) = self.unit_counts(width, height);
        ux * uy * self.bytes_per_unit
    }

    /// Number of (block or pixel) units along each axis.
    pub fn unit_counts(&self, width: u32, height: u32) -> (usize, usize) {
        let ux = width.div_ceil(self.block_width) as usize;
        let uy = height.div_ceil(self.block_height) as usize;
        (ux, uy)
    }
}

/// Static traits for a target. Pure lookup.
pub fn traits(target: TranscodeTarget) -> FormatTraits {
    // (alpha, pow2, uncompressed, block_w, block_h, bytes)
    let (has_alpha, requires_pow2, uncompressed, bw, bh, bytes) = match target {
        TranscodeTarget::Etc1Rgb => (false, false, false, 4, 4, 8),
        TranscodeTarget::Etc2Rgba => (true, false, false, 4, 4, 16),
        TranscodeTarget::Bc1Rgb => (false, false, false, 4, 4, 8),
        TranscodeTarget::Bc3Rgba => (true, false, false, 4, 4, 16),
        TranscodeTarget::Bc4R => (false, false, false, 4, 4, 8),
        TranscodeTarget::Bc5Rg => (false, false, false, 4, 4, 16),
        TranscodeTarget::Bc7Rgba => (true, false, false, 4, 4, 16),
        TranscodeTarget::Bc7Alt => (true, false, false, 4, 4, 16),
        TranscodeTarget::Pvrtc1Rgb => (false, true, false, 4, 4, 8),
        TranscodeTarget::Pvrtc1Rgba => (true, true, false, 4, 4, 8),
        TranscodeTarget::Astc4x4Rgba => (true, false, false, 4, 4, 16),
        TranscodeTarget::AtcRgb => (false, false, false, 4, 4, 8),
        TranscodeTarget::AtcRgba => (true, false, false, 4, 4, 16),
        TranscodeTarget::Pvrtc2Rgb => (false, false, false, 4, 4, 8),
        TranscodeTarget::Pvrtc2Rgba => (true, false, false, 4, 4, 8),
        TranscodeTarget::EacR11 => (false, false, false, 4, 4, 8),
        TranscodeTarget::EacRg11 => (false, false, false, 4, 4, 16),
        TranscodeTarget::Fxt1Rgb => (false, false, false, 8, 4, 16),
        TranscodeTarget::Rgba32 => (true, false, true, 1, 1, 4),
        TranscodeTarget::Rgb565 => (false, false, true, 1, 1, 2),
        TranscodeTarget::Bgr565 => (false, false, true, 1, 1, 2),
        TranscodeTarget::Rgba4444 => (true, false, true, 1, 1, 2),
    };
    FormatTraits {
        has_alpha,
        requires_pow2,
        uncompressed,
        block_width: bw,
        block_height: bh,
        bytes_per_unit: bytes,
    }
}

/// Returns true if `target` can be transcoded from `encoding`.
///
/// Deterministic, side-effect free, concurrent-read safe. The ATC and
/// FXT1 paths only exist for ETC1S input; every other target is
/// reachable from both encodings.
pub fn is_supported(target: TranscodeTarget, encoding: EncodingKind) -> bool {
    match target {
        TranscodeTarget::AtcRgb | TranscodeTarget::AtcRgba | TranscodeTarget::Fxt1Rgb => {
            encoding == EncodingKind::Etc1s
        }
        _ => true,
    }
}

/// Enumerate the targets dispatched for a container of the given
/// encoding, excluding always-skipped internal variants.
pub fn transcodable_targets(encoding: EncodingKind) -> impl Iterator<Item = TranscodeTarget> {
    TranscodeTarget::ALL
        .into_iter()
        .filter(move |&t| t != TranscodeTarget::Bc7Alt && is_supported(t, encoding))
}

/// Per-image runtime check layered on top of the static table: PVRTC1
/// requires both dimensions to be powers of two.
pub fn dimensions_allowed(target: TranscodeTarget, width: u32, height: u32) -> bool {
    if !traits(target).requires_pow2 {
        return true;
    }
    width.is_power_of_two() && height.is_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table_is_deterministic() {
        for target in TranscodeTarget::ALL {
            for encoding in [EncodingKind::Etc1s, EncodingKind::Uastc] {
                let a = is_supported(target, encoding);
                let b = is_supported(target, encoding);
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_atc_and_fxt1_are_etc1s_only() {
        for target in [
            TranscodeTarget::AtcRgb,
            TranscodeTarget::AtcRgba,
            TranscodeTarget::Fxt1Rgb,
        ] {
            assert!(is_supported(target, EncodingKind::Etc1s));
            assert!(!is_supported(target, EncodingKind::Uastc));
        }
    }

    #[test]
    fn test_bc7_alt_never_enumerated() {
        for encoding in [EncodingKind::Etc1s, EncodingKind::Uastc] {
            assert!(!transcodable_targets(encoding).any(|t| t == TranscodeTarget::Bc7Alt));
        }
    }

    #[test]
    fn test_pvrtc1_requires_pow2_dimensions() {
        assert!(dimensions_allowed(TranscodeTarget::Pvrtc1Rgb, 256, 512));
        assert!(!dimensions_allowed(TranscodeTarget::Pvrtc1Rgb, 100, 100));
        assert!(!dimensions_allowed(TranscodeTarget::Pvrtc1Rgba, 256, 100));
        // Non-PVRTC1 formats accept any dimensions.
        assert!(dimensions_allowed(TranscodeTarget::Bc7Rgba, 100, 100));
        assert!(dimensions_allowed(TranscodeTarget::Pvrtc2Rgba, 100, 100));
    }

    #[test]
    fn test_output_size_block_formats() {
        let t = traits(TranscodeTarget::Bc1Rgb);
        // 256x256 -> 64x64 blocks * 8 bytes
        assert_eq!(t.output_size(256, 256), 32_768);
        // Non-multiple-of-4 rounds up.
        assert_eq!(t.output_size(5, 5), 2 * 2 * 8);
    }

    #[test]
    fn test_output_size_fxt1_wide_blocks() {
        let t = traits(TranscodeTarget::Fxt1Rgb);
        assert_eq!(t.block_width, 8);
        // 16x8 -> 2x2 blocks * 16 bytes
        assert_eq!(t.output_size(16, 8), 64);
    }

    #[test]
    fn test_output_size_uncompressed() {
        assert_eq!(traits(TranscodeTarget::Rgba32).output_size(10, 10), 400);
        assert_eq!(traits(TranscodeTarget::Rgb565).output_size(10, 10), 200);
    }

    #[test]
    fn test_alpha_traits() {
        assert!(traits(TranscodeTarget::Bc3Rgba).has_alpha);
        assert!(traits(TranscodeTarget::Etc2Rgba).has_alpha);
        assert!(!traits(TranscodeTarget::Etc1Rgb).has_alpha);
        assert!(!traits(TranscodeTarget::EacRg11).has_alpha);
    }

    #[test]
    fn test_short_names_are_unique() {
        let mut names: Vec<_> = TranscodeTarget::ALL.iter().map(|t| t.short_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TranscodeTarget::ALL.len());
    }

    #[test]
    fn test_encoding_block_sizes() {
        assert_eq!(EncodingKind::Etc1s.bytes_per_block(), 8);
        assert_eq!(EncodingKind::Uastc.bytes_per_block(), 16);
    }
}
