//! Output file writer for transcoded textures.
//!
//! Each (format, group) pair from a dispatch outcome becomes one KTX
//! file on disk; optionally every level is also decoded back to PNG
//! rasters for inspection, RGB and alpha separately plus a combined
//! image when the format carries alpha. Formats without a raster
//! decoder in this build degrade gracefully: their block files are
//! still written, only the unpack step is skipped with a warning.

use std::path::{Path, PathBuf};

use image::{GrayImage, Rgba, RgbaImage};
use tracing::{info, warn};

use crate::codec::BlockCodec;
use crate::container::{TextureType, UniversalContainer};
use crate::error::EngineError;
use crate::format::{self, TranscodeTarget};
use crate::transcode::{output_groups, OutputGroup, TranscodeOutcome};

const KTX1_IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x31, 0x31, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];

/// OpenGL enums for one target in a KTX1 header:
/// (gl_type, gl_format, gl_internal_format, gl_base_internal_format).
/// Compressed formats use zero for type and format.
fn gl_enums(target: TranscodeTarget) -> (u32, u32, u32, u32) {
    const GL_RGB: u32 = 0x1907;
    const GL_RGBA: u32 = 0x1908;
    const GL_RED: u32 = 0x1903;
    const GL_RG: u32 = 0x8227;
    match target {
        TranscodeTarget::Etc1Rgb => (0, 0, 0x8D64, GL_RGB),
        TranscodeTarget::Etc2Rgba => (0, 0, 0x9278, GL_RGBA),
        TranscodeTarget::Bc1Rgb => (0, 0, 0x83F0, GL_RGB),
        TranscodeTarget::Bc3Rgba => (0, 0, 0x83F3, GL_RGBA),
        TranscodeTarget::Bc4R => (0, 0, 0x8DBB, GL_RED),
        TranscodeTarget::Bc5Rg => (0, 0, 0x8DBD, GL_RG),
        TranscodeTarget::Bc7Rgba | TranscodeTarget::Bc7Alt => (0, 0, 0x8E8C, GL_RGBA),
        TranscodeTarget::Pvrtc1Rgb => (0, 0, 0x8C00, GL_RGB),
        TranscodeTarget::Pvrtc1Rgba => (0, 0, 0x8C02, GL_RGBA),
        TranscodeTarget::Astc4x4Rgba => (0, 0, 0x93B0, GL_RGBA),
        TranscodeTarget::AtcRgb => (0, 0, 0x8C92, GL_RGB),
        TranscodeTarget::AtcRgba => (0, 0, 0x87EE, GL_RGBA),
        TranscodeTarget::Pvrtc2Rgb => (0, 0, 0x9137, GL_RGB),
        TranscodeTarget::Pvrtc2Rgba => (0, 0, 0x9138, GL_RGBA),
        TranscodeTarget::EacR11 => (0, 0, 0x9270, GL_RED),
        TranscodeTarget::EacRg11 => (0, 0, 0x9272, GL_RG),
        TranscodeTarget::Fxt1Rgb => (0, 0, 0x86B0, GL_RGB),
        // glType GL_UNSIGNED_BYTE / GL_UNSIGNED_SHORT_* variants.
        TranscodeTarget::Rgba32 => (0x1401, GL_RGBA, 0x8058, GL_RGBA),
        TranscodeTarget::Rgb565 | TranscodeTarget::Bgr565 => (0x8363, GL_RGB, 0x8D62, GL_RGB),
        TranscodeTarget::Rgba4444 => (0x8033, GL_RGBA, 0x8056, GL_RGBA),
    }
}

/// Where and how to write a dispatch outcome.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub output_dir: PathBuf,
    /// Stem shared by every output file of this texture.
    pub base_name: String,
    /// Also decode each level back to PNG rasters.
    pub unpack: bool,
}

/// What a write pass produced.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub files: Vec<PathBuf>,
    /// Targets whose raster unpack was skipped (no decoder).
    pub skipped_unpacks: Vec<TranscodeTarget>,
    /// Disk failures, one per aborted group. The remaining groups are
    /// still attempted.
    pub failures: Vec<EngineError>,
}

/// Writes transcoded block data and optional raster unpacks to disk.
pub struct ContainerWriter<'a> {
    codec: &'a dyn BlockCodec,
}

impl<'a> ContainerWriter<'a> {
    pub fn new(codec: &'a dyn BlockCodec) -> Self {
        Self { codec }
    }

    /// Write one file per (format, group) plus optional PNG unpacks.
    ///
    /// A disk failure aborts the remaining outputs of the failing
    /// group only; other groups still get written. The failures are
    /// collected on the report.
    pub fn write_outputs(
        &self,
        container: &UniversalContainer,
        outcome: &TranscodeOutcome,
        options: &WriteOptions,
    ) -> WriteReport {
        let groups = output_groups(container);
        let cubemap = container.texture_type == TextureType::CubemapArray;
        let mut report = WriteReport::default();

        for (group_index, group) in groups.iter().enumerate() {
            let result = self.write_group(
                container,
                outcome,
                options,
                group,
                group_index as u32,
                cubemap,
                &mut report,
            );
            if let Err(e) = result {
                warn!(group = group_index, error = %e, "aborting remaining outputs of group");
                report.failures.push(e);
            }
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn write_group(
        &self,
        container: &UniversalContainer,
        outcome: &TranscodeOutcome,
        options: &WriteOptions,
        group: &OutputGroup,
        group_index: u32,
        cubemap: bool,
        report: &mut WriteReport,
    ) -> Result<(), EngineError> {
        let infix = if cubemap { "_cubemap" } else { "" };
        for target in outcome.produced_targets() {
            let Some(bytes) = self.build_ktx(container, outcome, group, target) else {
                // Every unit of this group was skipped for the target.
                continue;
            };
            let name = format!(
                "{}{}_transcoded_{}_{:04}.ktx",
                options.base_name,
                infix,
                target.short_name(),
                group_index
            );
            let path = options.output_dir.join(name);
            std::fs::write(&path, bytes).map_err(|source| EngineError::OutputWriteFailed {
                path: path.clone(),
                source,
            })?;
            info!(file = %path.display(), format = target.short_name(), "wrote transcoded file");
            report.files.push(path);

            if options.unpack {
                self.unpack_group(container, outcome, options, group, group_index, target, report)?;
            }
        }
        Ok(())
    }

    /// Assemble a KTX1 file for one group, or `None` if the group has
    /// no units for the target (power-of-two skip).
    fn build_ktx(
        &self,
        container: &UniversalContainer,
        outcome: &TranscodeOutcome,
        group: &OutputGroup,
        target: TranscodeTarget,
    ) -> Option<Vec<u8>> {
        let faces = container.face_count();
        let first_image = *group.image_indices.first()?;
        let base = container.images.get(first_image as usize)?;
        let levels = base.num_levels;
        let (gl_type, gl_format, gl_internal, gl_base) = gl_enums(target);
        let array_elements = if faces == 6 {
            0
        } else {
            group.image_indices.len() as u32
        };

        let mut out = Vec::new();
        out.extend_from_slice(&KTX1_IDENTIFIER);
        for v in [
            0x0403_0201u32,
            gl_type,
            if gl_type == 0 { 1 } else { 2 },
            gl_format,
            gl_internal,
            gl_base,
            base.orig_width,
            base.orig_height,
            0,
            if array_elements > 1 { array_elements } else { 0 },
            if faces == 6 { 6 } else { 1 },
            levels,
            0,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }

        for level in 0..levels {
            let mut level_data = Vec::new();
            for &image_index in &group.image_indices {
                let face = image_index % faces;
                let layer = image_index / faces;
                let unit = outcome.get(target, face, layer, level)?;
                level_data.extend_from_slice(&unit.data);
                while level_data.len() % 4 != 0 {
                    level_data.push(0);
                }
            }
            let image_size = if faces == 6 && array_elements == 0 {
                // Non-array cubemaps record the per-face size.
                (level_data.len() / 6) as u32
            } else {
                level_data.len() as u32
            };
            out.extend_from_slice(&image_size.to_le_bytes());
            out.extend_from_slice(&level_data);
        }
        Some(out)
    }

    /// Decode every level of the group's first image back to PNG:
    /// RGB and alpha separately, plus the combined image when the
    /// format carries alpha.
    #[allow(clippy::too_many_arguments)]
    fn unpack_group(
        &self,
        container: &UniversalContainer,
        outcome: &TranscodeOutcome,
        options: &WriteOptions,
        group: &OutputGroup,
        group_index: u32,
        target: TranscodeTarget,
        report: &mut WriteReport,
    ) -> Result<(), EngineError> {
        if !self.codec.can_decode_raster(target) {
            if !report.skipped_unpacks.contains(&target) {
                warn!(
                    format = target.short_name(),
                    "no raster decoder for format in this build, skipping unpack"
                );
                report.skipped_unpacks.push(target);
            }
            return Ok(());
        }
        // The group's first image is representative.
        let Some(&first_image) = group.image_indices.first() else {
            return Ok(());
        };
        let faces = container.face_count();
        let face = first_image % faces;
        let layer = first_image / faces;
        let levels = container
            .images
            .get(first_image as usize)
            .map(|i| i.num_levels)
            .unwrap_or(1);
        let fmt = target.short_name();

        for level in 0..levels {
            let Some(unit) = outcome.get(target, face, layer, level) else {
                continue;
            };
            let decoded = match self
                .codec
                .decode_raster(target, &unit.data, unit.width, unit.height)
            {
                Ok(image) => image,
                Err(e) => {
                    warn!(format = fmt, error = %e, "raster decode failed, skipping unpack");
                    return Ok(());
                }
            };

            let rgb_path = options.output_dir.join(format!(
                "{}_unpacked_rgb_{fmt}_{level}_{group_index:04}.png",
                options.base_name
            ));
            let mut opaque = decoded.clone();
            for Rgba(p) in opaque.pixels_mut() {
                p[3] = 255;
            }
            save_png(&rgb_path, &opaque)?;
            report.files.push(rgb_path);

            if format::traits(target).has_alpha {
                let alpha_path = options.output_dir.join(format!(
                    "{}_unpacked_a_{fmt}_{level}_{group_index:04}.png",
                    options.base_name
                ));
                let alpha = GrayImage::from_fn(unit.width, unit.height, |x, y| {
                    image::Luma([decoded.get_pixel(x, y).0[3]])
                });
                alpha
                    .save(&alpha_path)
                    .map_err(|e| EngineError::OutputWriteFailed {
                        path: alpha_path.clone(),
                        source: std::io::Error::other(e.to_string()),
                    })?;
                report.files.push(alpha_path);

                let rgba_path = options.output_dir.join(format!(
                    "{}_unpacked_rgba_{fmt}_{level}_{group_index:04}.png",
                    options.base_name
                ));
                save_png(&rgba_path, &decoded)?;
                report.files.push(rgba_path);
            }
        }
        Ok(())
    }
}

fn save_png(path: &Path, image: &RgbaImage) -> Result<(), EngineError> {
    image.save(path).map_err(|e| EngineError::OutputWriteFailed {
        path: PathBuf::from(path),
        source: std::io::Error::other(e.to_string()),
    })
}
