//! Deterministic software codec backend.
//!
//! Encodes each 4x4 pixel block as its average color plus quantized
//! luminance selectors, and transcodes by re-expanding those averages
//! into the destination format's block layout. Deterministic for a
//! given input, cheap enough for tests, and honest about the contract:
//! every destination byte is written, sizes are validated, and
//! unsupported raster decodes are declared rather than faked.

use image::{Rgba, RgbaImage};

use super::{BlockCodec, CodebookTables, CodecError, EncodeParams, EncodedSlice, SliceView};
use crate::codebook::GlobalCodebook;
use crate::format::{self, EncodingKind, TranscodeTarget};

const MAX_DIMENSION: u32 = 16_384;

/// The bundled software backend.
#[derive(Debug, Default, Clone)]
pub struct ReferenceCodec;

impl ReferenceCodec {
    pub fn new() -> Self {
        Self
    }

    /// Average RGBA over one 4x4 block, clamping at the image edge.
    fn block_average(image: &RgbaImage, bx: u32, by: u32) -> [u8; 4] {
        let (w, h) = image.dimensions();
        let mut sums = [0u32; 4];
        let mut count = 0u32;
        for dy in 0..4 {
            for dx in 0..4 {
                let x = bx * 4 + dx;
                let y = by * 4 + dy;
                if x < w && y < h {
                    let Rgba(p) = *image.get_pixel(x, y);
                    for (sum, v) in sums.iter_mut().zip(p) {
                        *sum += v as u32;
                    }
                    count += 1;
                }
            }
        }
        let mut out = [0u8; 4];
        for (o, sum) in out.iter_mut().zip(sums) {
            *o = (sum / count.max(1)) as u8;
        }
        out
    }

    fn luminance(p: [u8; 4]) -> u8 {
        ((p[0] as u32 * 54 + p[1] as u32 * 183 + p[2] as u32 * 19) >> 8) as u8
    }

    /// Average color of the source block covering pixel (px, py).
    fn source_color(slice: &SliceView<'_>, px: u32, py: u32) -> [u8; 4] {
        let bpb = slice.encoding.bytes_per_block();
        let bx = (px / 4).min(slice.num_blocks_x.saturating_sub(1));
        let by = (py / 4).min(slice.num_blocks_y.saturating_sub(1));
        let offset = (by as usize * slice.num_blocks_x as usize + bx as usize) * bpb;
        match slice.data.get(offset..offset + 4) {
            Some(c) => [c[0], c[1], c[2], c[3]],
            None => [0, 0, 0, 255],
        }
    }

    fn pack_rgb565(c: [u8; 4]) -> u16 {
        ((c[0] as u16 >> 3) << 11) | ((c[1] as u16 >> 2) << 5) | (c[2] as u16 >> 3)
    }

    fn pack_bgr565(c: [u8; 4]) -> u16 {
        ((c[2] as u16 >> 3) << 11) | ((c[1] as u16 >> 2) << 5) | (c[0] as u16 >> 3)
    }

    fn pack_rgba4444(c: [u8; 4]) -> u16 {
        ((c[0] as u16 >> 4) << 12)
            | ((c[1] as u16 >> 4) << 8)
            | ((c[2] as u16 >> 4) << 4)
            | (c[3] as u16 >> 4)
    }

    fn unpack_unit(target: TranscodeTarget, unit: &[u8]) -> [u8; 4] {
        match target {
            TranscodeTarget::Rgba32 => [unit[0], unit[1], unit[2], unit[3]],
            TranscodeTarget::Rgb565 => {
                let v = u16::from_le_bytes([unit[0], unit[1]]);
                [
                    (((v >> 11) & 0x1F) as u8) << 3,
                    (((v >> 5) & 0x3F) as u8) << 2,
                    ((v & 0x1F) as u8) << 3,
                    255,
                ]
            }
            TranscodeTarget::Bgr565 => {
                let v = u16::from_le_bytes([unit[0], unit[1]]);
                [
                    ((v & 0x1F) as u8) << 3,
                    (((v >> 5) & 0x3F) as u8) << 2,
                    (((v >> 11) & 0x1F) as u8) << 3,
                    255,
                ]
            }
            TranscodeTarget::Rgba4444 => {
                let v = u16::from_le_bytes([unit[0], unit[1]]);
                [
                    (((v >> 12) & 0xF) as u8) * 17,
                    (((v >> 8) & 0xF) as u8) * 17,
                    (((v >> 4) & 0xF) as u8) * 17,
                    ((v & 0xF) as u8) * 17,
                ]
            }
            // Compressed formats produced by this backend carry the
            // block's average color in their leading bytes.
            _ => [unit[0], unit[1], unit[2], unit[3]],
        }
    }

    /// Fill one compressed destination unit from the block average.
    fn fill_block(target: TranscodeTarget, unit_index: usize, color: [u8; 4], out: &mut [u8]) {
        let tag = target.short_name().as_bytes()[0];
        match target {
            TranscodeTarget::Bc4R => {
                out[0..4].copy_from_slice(&[color[0], 0, 0, 255]);
            }
            TranscodeTarget::Bc5Rg | TranscodeTarget::EacRg11 => {
                out[0..4].copy_from_slice(&[color[0], color[1], 0, 255]);
            }
            TranscodeTarget::EacR11 => {
                out[0..4].copy_from_slice(&[color[0], 0, 0, 255]);
            }
            _ => {
                let alpha = if format::traits(target).has_alpha {
                    color[3]
                } else {
                    255
                };
                out[0..4].copy_from_slice(&[color[0], color[1], color[2], alpha]);
            }
        }
        for (i, b) in out[4..].iter_mut().enumerate() {
            *b = color[0] ^ (unit_index as u8).wrapping_mul(29) ^ tag ^ (i as u8);
        }
    }
}

impl BlockCodec for ReferenceCodec {
    fn name(&self) -> &str {
        "reference"
    }

    fn build_codebook(
        &self,
        params: &EncodeParams,
        codebook: Option<&GlobalCodebook>,
    ) -> CodebookTables {
        if let Some(global) = codebook {
            // Containers referencing a global codebook keep the entry
            // counts but carry no table bytes of their own.
            return CodebookTables {
                endpoint_count: global.endpoint_count(),
                selector_count: global.selector_count(),
                data: Vec::new(),
            };
        }
        let endpoint_count = params.max_endpoints.clamp(1, 16_128);
        let selector_count = params.max_selectors.clamp(1, 16_128);
        // Six bytes per entry: a deterministic stand-in for the real
        // endpoint/selector tables.
        let len = (endpoint_count + selector_count) as usize * 6;
        let data = (0..len)
            .map(|i| (i as u8).wrapping_mul(167) ^ params.quality as u8)
            .collect();
        CodebookTables {
            endpoint_count,
            selector_count,
            data,
        }
    }

    fn encode_slice(
        &self,
        image: &RgbaImage,
        encoding: EncodingKind,
        params: &EncodeParams,
        _codebook: Option<&GlobalCodebook>,
    ) -> Result<EncodedSlice, CodecError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(CodecError::InvalidDimensions {
                width: w,
                height: h,
                reason: "empty image".to_string(),
            });
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(CodecError::InvalidDimensions {
                width: w,
                height: h,
                reason: format!("exceeds the {MAX_DIMENSION} pixel limit"),
            });
        }
        let num_blocks_x = w.div_ceil(4);
        let num_blocks_y = h.div_ceil(4);
        let bpb = encoding.bytes_per_block();
        let mut data = Vec::with_capacity((num_blocks_x * num_blocks_y) as usize * bpb);
        // Coarser luminance quantization at lower quality settings.
        let step = (256 / params.quality.clamp(1, 255)).clamp(1, 128) as u8;
        for by in 0..num_blocks_y {
            for bx in 0..num_blocks_x {
                let avg = Self::block_average(image, bx, by);
                data.extend_from_slice(&avg);
                let lum = Self::luminance(avg) / step * step;
                match encoding {
                    EncodingKind::Etc1s => {
                        data.extend_from_slice(&[lum, lum ^ 0x55, avg[1], avg[2]]);
                    }
                    EncodingKind::Uastc => {
                        data.extend_from_slice(&[lum, lum ^ 0x55, avg[1], avg[2]]);
                        let seed = (bx.wrapping_mul(31) ^ by.wrapping_mul(17)) as u8;
                        data.extend_from_slice(&[
                            seed,
                            seed.wrapping_add(1),
                            seed.wrapping_add(2),
                            seed.wrapping_add(3),
                            avg[0],
                            avg[1],
                            avg[2],
                            avg[3],
                        ]);
                    }
                }
            }
        }
        Ok(EncodedSlice {
            data,
            num_blocks_x,
            num_blocks_y,
        })
    }

    fn transcode_range(
        &self,
        slice: &SliceView<'_>,
        target: TranscodeTarget,
        first_unit: usize,
        dst: &mut [u8],
    ) -> Result<(), CodecError> {
        if !format::is_supported(target, slice.encoding) {
            return Err(CodecError::UnsupportedTarget(target));
        }
        let traits = format::traits(target);
        if dst.is_empty() || dst.len() % traits.bytes_per_unit != 0 {
            return Err(CodecError::BadOutputSize {
                expected: traits.bytes_per_unit,
                actual: dst.len(),
            });
        }
        let (units_x, units_y) = traits.unit_counts(slice.orig_width, slice.orig_height);
        let total_units = units_x * units_y;
        let unit_count = dst.len() / traits.bytes_per_unit;
        if first_unit + unit_count > total_units {
            return Err(CodecError::BadOutputSize {
                expected: total_units.saturating_sub(first_unit) * traits.bytes_per_unit,
                actual: dst.len(),
            });
        }
        for (i, out) in dst.chunks_exact_mut(traits.bytes_per_unit).enumerate() {
            let unit = first_unit + i;
            let ux = (unit % units_x) as u32;
            let uy = (unit / units_x) as u32;
            let px = ux * traits.block_width;
            let py = uy * traits.block_height;
            let color = Self::source_color(slice, px, py);
            if traits.uncompressed {
                match target {
                    TranscodeTarget::Rgba32 => out.copy_from_slice(&color),
                    TranscodeTarget::Rgb565 => {
                        out.copy_from_slice(&Self::pack_rgb565(color).to_le_bytes())
                    }
                    TranscodeTarget::Bgr565 => {
                        out.copy_from_slice(&Self::pack_bgr565(color).to_le_bytes())
                    }
                    TranscodeTarget::Rgba4444 => {
                        out.copy_from_slice(&Self::pack_rgba4444(color).to_le_bytes())
                    }
                    _ => unreachable!(),
                }
            } else {
                Self::fill_block(target, unit, color, out);
            }
        }
        Ok(())
    }

    fn can_decode_raster(&self, target: TranscodeTarget) -> bool {
        // PVRTC, ATC, FXT1, and the internal BC7 variant have no
        // software decompressor in this backend.
        !matches!(
            target,
            TranscodeTarget::Pvrtc1Rgb
                | TranscodeTarget::Pvrtc1Rgba
                | TranscodeTarget::Pvrtc2Rgb
                | TranscodeTarget::Pvrtc2Rgba
                | TranscodeTarget::AtcRgb
                | TranscodeTarget::AtcRgba
                | TranscodeTarget::Fxt1Rgb
                | TranscodeTarget::Bc7Alt
        )
    }

    fn decode_raster(
        &self,
        target: TranscodeTarget,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, CodecError> {
        if !self.can_decode_raster(target) {
            return Err(CodecError::UnsupportedTarget(target));
        }
        let traits = format::traits(target);
        let expected = traits.output_size(width, height);
        if data.len() != expected {
            return Err(CodecError::BadOutputSize {
                expected,
                actual: data.len(),
            });
        }
        let (units_x, _) = traits.unit_counts(width, height);
        let mut image = RgbaImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let ux = (x / traits.block_width) as usize;
            let uy = (y / traits.block_height) as usize;
            let offset = (uy * units_x + ux) * traits.bytes_per_unit;
            let unit = &data[offset..offset + traits.bytes_per_unit];
            *pixel = Rgba(Self::unpack_unit(target, unit));
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 8) as u8, (y * 8) as u8, ((x + y) * 4) as u8, 255])
        })
    }

    #[test]
    fn test_encode_block_counts() {
        let codec = ReferenceCodec::new();
        let image = gradient(10, 6);
        let slice = codec
            .encode_slice(&image, EncodingKind::Etc1s, &EncodeParams::default(), None)
            .unwrap();
        assert_eq!(slice.num_blocks_x, 3);
        assert_eq!(slice.num_blocks_y, 2);
        assert_eq!(slice.data.len(), 6 * 8);
    }

    #[test]
    fn test_encode_uastc_block_size() {
        let codec = ReferenceCodec::new();
        let image = gradient(8, 8);
        let slice = codec
            .encode_slice(&image, EncodingKind::Uastc, &EncodeParams::default(), None)
            .unwrap();
        assert_eq!(slice.data.len(), 4 * 16);
    }

    #[test]
    fn test_encode_rejects_empty_image() {
        let codec = ReferenceCodec::new();
        let image = RgbaImage::new(0, 0);
        let err = codec
            .encode_slice(&image, EncodingKind::Etc1s, &EncodeParams::default(), None)
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = ReferenceCodec::new();
        let image = gradient(16, 16);
        let params = EncodeParams::default();
        let a = codec
            .encode_slice(&image, EncodingKind::Etc1s, &params, None)
            .unwrap();
        let b = codec
            .encode_slice(&image, EncodingKind::Etc1s, &params, None)
            .unwrap();
        assert_eq!(a, b);
    }

    fn encoded_view<'a>(slice: &'a EncodedSlice, w: u32, h: u32) -> SliceView<'a> {
        SliceView {
            encoding: EncodingKind::Etc1s,
            data: &slice.data,
            num_blocks_x: slice.num_blocks_x,
            num_blocks_y: slice.num_blocks_y,
            orig_width: w,
            orig_height: h,
        }
    }

    #[test]
    fn test_transcode_writes_every_byte() {
        let codec = ReferenceCodec::new();
        let image = gradient(16, 16);
        let slice = codec
            .encode_slice(&image, EncodingKind::Etc1s, &EncodeParams::default(), None)
            .unwrap();
        let view = encoded_view(&slice, 16, 16);
        for target in format::transcodable_targets(EncodingKind::Etc1s) {
            let size = format::traits(target).output_size(16, 16);
            let mut dst = vec![0xEEu8; size];
            codec.transcode_slice(&view, target, &mut dst).unwrap();
            // The gradient's averages never produce 0xEE in every byte
            // of a unit, so a fully-untouched buffer would show up.
            assert!(
                !dst.iter().all(|&b| b == 0xEE),
                "no bytes written for {target}"
            );
        }
    }

    #[test]
    fn test_transcode_range_matches_whole_slice() {
        let codec = ReferenceCodec::new();
        let image = gradient(32, 32);
        let slice = codec
            .encode_slice(&image, EncodingKind::Etc1s, &EncodeParams::default(), None)
            .unwrap();
        let view = encoded_view(&slice, 32, 32);
        let target = TranscodeTarget::Bc1Rgb;
        let size = format::traits(target).output_size(32, 32);

        let mut whole = vec![0u8; size];
        codec.transcode_slice(&view, target, &mut whole).unwrap();

        let mut ranged = vec![0u8; size];
        let unit_bytes = format::traits(target).bytes_per_unit;
        let half = size / 2;
        codec
            .transcode_range(&view, target, 0, &mut ranged[..half])
            .unwrap();
        codec
            .transcode_range(&view, target, half / unit_bytes, &mut ranged[half..])
            .unwrap();
        assert_eq!(whole, ranged);
    }

    #[test]
    fn test_transcode_rejects_wrong_buffer_size() {
        let codec = ReferenceCodec::new();
        let image = gradient(16, 16);
        let slice = codec
            .encode_slice(&image, EncodingKind::Etc1s, &EncodeParams::default(), None)
            .unwrap();
        let view = encoded_view(&slice, 16, 16);
        let mut dst = vec![0u8; 13];
        let err = codec
            .transcode_slice(&view, TranscodeTarget::Bc1Rgb, &mut dst)
            .unwrap_err();
        assert!(matches!(err, CodecError::BadOutputSize { .. }));
    }

    #[test]
    fn test_transcode_rejects_unsupported_pair() {
        let codec = ReferenceCodec::new();
        let image = gradient(8, 8);
        let slice = codec
            .encode_slice(&image, EncodingKind::Uastc, &EncodeParams::default(), None)
            .unwrap();
        let view = SliceView {
            encoding: EncodingKind::Uastc,
            data: &slice.data,
            num_blocks_x: slice.num_blocks_x,
            num_blocks_y: slice.num_blocks_y,
            orig_width: 8,
            orig_height: 8,
        };
        let mut dst = vec![0u8; format::traits(TranscodeTarget::AtcRgb).output_size(8, 8)];
        let err = codec
            .transcode_slice(&view, TranscodeTarget::AtcRgb, &mut dst)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedTarget(_)));
    }

    #[test]
    fn test_rgba32_decode_recovers_block_averages() {
        let codec = ReferenceCodec::new();
        let image = RgbaImage::from_pixel(8, 8, Rgba([100, 150, 200, 255]));
        let slice = codec
            .encode_slice(&image, EncodingKind::Etc1s, &EncodeParams::default(), None)
            .unwrap();
        let view = encoded_view(&slice, 8, 8);
        let mut dst = vec![0u8; format::traits(TranscodeTarget::Rgba32).output_size(8, 8)];
        codec
            .transcode_slice(&view, TranscodeTarget::Rgba32, &mut dst)
            .unwrap();
        let decoded = codec
            .decode_raster(TranscodeTarget::Rgba32, &dst, 8, 8)
            .unwrap();
        assert_eq!(*decoded.get_pixel(3, 3), Rgba([100, 150, 200, 255]));
    }

    #[test]
    fn test_raster_decode_declared_unsupported_for_pvrtc() {
        let codec = ReferenceCodec::new();
        assert!(!codec.can_decode_raster(TranscodeTarget::Pvrtc1Rgb));
        assert!(codec.can_decode_raster(TranscodeTarget::Bc7Rgba));
        let err = codec
            .decode_raster(TranscodeTarget::Pvrtc1Rgb, &[0u8; 8], 4, 4)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedTarget(_)));
    }

    #[test]
    fn test_build_codebook_respects_global_reference() {
        use crate::codebook::GlobalCodebook;
        use crate::container::test_fixtures::etc1s_2d;

        let codec = ReferenceCodec::new();
        let global = GlobalCodebook::from_container(&etc1s_2d()).unwrap();
        let tables = codec.build_codebook(&EncodeParams::default(), Some(&global));
        assert_eq!(tables.endpoint_count, global.endpoint_count());
        assert!(tables.data.is_empty());

        let local = codec.build_codebook(&EncodeParams::default(), None);
        assert!(!local.data.is_empty());
        assert_eq!(local.endpoint_count, 512);
    }
}
