//! Transcode dispatch engine.
//!
//! Expands one parsed container across the requested target formats:
//! every (image, level, face, format) combination becomes one transcode
//! unit. Units either all succeed or the whole call fails; the only
//! soft path is the power-of-two skip for PVRTC1, which drops the
//! affected units with a warning and continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::codec::{BlockCodec, SliceView};
use crate::config::EngineConfig;
use crate::container::{TextureType, UniversalContainer};
use crate::error::EngineError;
use crate::format::{self, TranscodeTarget};
use crate::pool::TaskPool;

/// Blocks (or pixels, for uncompressed targets) per pool sub-job.
const CHUNK_UNITS: usize = 128;

/// Narrows the set of formats a dispatch call produces.
#[derive(Debug, Clone, Default)]
pub struct TranscodeOptions {
    /// Only produce ETC1 RGB, ignoring every other target.
    pub etc1_only: bool,
    /// When set, intersect the supported targets with this list.
    pub restrict_formats: Option<Vec<TranscodeTarget>>,
}

impl TranscodeOptions {
    /// The working set for a container: supported targets intersected
    /// with the restriction, internal variants excluded.
    pub fn working_set(&self, container: &UniversalContainer) -> Vec<TranscodeTarget> {
        if self.etc1_only {
            return vec![TranscodeTarget::Etc1Rgb];
        }
        format::transcodable_targets(container.encoding)
            .filter(|t| match &self.restrict_formats {
                Some(allowed) => allowed.contains(t),
                None => true,
            })
            .collect()
    }
}

/// One transcoded unit: a single (format, face, layer, level) block
/// buffer plus the dimensions needed to interpret it.
#[derive(Debug, Clone)]
pub struct TranscodedUnit {
    pub target: TranscodeTarget,
    pub image_index: u32,
    pub face: u32,
    pub layer: u32,
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub elapsed: Duration,
}

/// A unit dropped by the power-of-two check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedUnit {
    pub target: TranscodeTarget,
    pub image_index: u32,
    pub width: u32,
    pub height: u32,
}

type UnitKey = (TranscodeTarget, u32, u32, u32);

/// All units produced by one dispatch call.
///
/// Units live in a flat arena; the composite (target, face, layer,
/// level) key resolves to an arena index in a single lookup.
#[derive(Debug, Default)]
pub struct TranscodeOutcome {
    units: Vec<TranscodedUnit>,
    index: HashMap<UnitKey, usize>,
    format_times: HashMap<TranscodeTarget, Duration>,
    pub skipped: Vec<SkippedUnit>,
}

impl TranscodeOutcome {
    fn insert(&mut self, unit: TranscodedUnit) {
        let key = (unit.target, unit.face, unit.layer, unit.level);
        *self.format_times.entry(unit.target).or_default() += unit.elapsed;
        self.index.insert(key, self.units.len());
        self.units.push(unit);
    }

    pub fn get(
        &self,
        target: TranscodeTarget,
        face: u32,
        layer: u32,
        level: u32,
    ) -> Option<&TranscodedUnit> {
        self.index
            .get(&(target, face, layer, level))
            .map(|&i| &self.units[i])
    }

    pub fn contains(&self, target: TranscodeTarget, face: u32, layer: u32, level: u32) -> bool {
        self.index.contains_key(&(target, face, layer, level))
    }

    pub fn units(&self) -> &[TranscodedUnit] {
        &self.units
    }

    /// Units of one target, in production order.
    pub fn units_for(&self, target: TranscodeTarget) -> impl Iterator<Item = &TranscodedUnit> {
        self.units.iter().filter(move |u| u.target == target)
    }

    /// Cumulative transcode time spent on one target.
    pub fn format_time(&self, target: TranscodeTarget) -> Duration {
        self.format_times.get(&target).copied().unwrap_or_default()
    }

    /// Targets that produced at least one unit, in dispatch order.
    pub fn produced_targets(&self) -> Vec<TranscodeTarget> {
        let mut seen = Vec::new();
        for unit in &self.units {
            if !seen.contains(&unit.target) {
                seen.push(unit.target);
            }
        }
        seen
    }
}

/// One output file's worth of images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGroup {
    /// Layer index for per-layer cubemap groups, `None` for a single
    /// whole-set group.
    pub layer: Option<u32>,
    pub image_indices: Vec<u32>,
}

/// Partition a container's images into output groups.
///
/// A cubemap array with more than one layer produces one group of six
/// faces per layer; everything else is a single group covering the
/// whole set.
pub fn output_groups(container: &UniversalContainer) -> Vec<OutputGroup> {
    let faces = container.face_count();
    let layers = container.layer_count();
    if container.texture_type == TextureType::CubemapArray && layers > 1 {
        (0..layers)
            .map(|layer| OutputGroup {
                layer: Some(layer),
                image_indices: (layer * faces..(layer + 1) * faces)
                    .filter(|&i| (i as usize) < container.images.len())
                    .collect(),
            })
            .collect()
    } else {
        vec![OutputGroup {
            layer: None,
            image_indices: (0..container.images.len() as u32).collect(),
        }]
    }
}

/// Fill `buf` with non-zero pseudo-random bytes (xorshift32).
///
/// Transcoders must overwrite every destination byte; starting from a
/// deterministic non-zero pattern makes a partially-written buffer
/// detectable instead of silently reading as zeros.
fn prefill(buf: &mut [u8], seed: u32) {
    let mut state = seed | 1;
    for b in buf.iter_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *b = ((state >> 24) as u8) | 0x01;
    }
}

/// The dispatch engine. Stateless apart from its codec and config
/// references; one instance serves a whole batch.
pub struct Transcoder {
    codec: Arc<dyn BlockCodec>,
    config: EngineConfig,
}

impl Transcoder {
    pub fn new(codec: Arc<dyn BlockCodec>, config: &EngineConfig) -> Self {
        Self {
            codec,
            config: config.clone(),
        }
    }

    /// Transcode every (image, level, face, format) unit of a
    /// container.
    ///
    /// `pool` enables block-range sub-jobs inside each unit; pass
    /// `None` when job-level parallelism already owns the workers.
    /// Any unit failure fails the whole call; no partial outcome is
    /// returned.
    pub fn transcode_all(
        &self,
        container: &UniversalContainer,
        options: &TranscodeOptions,
        pool: Option<&TaskPool>,
    ) -> Result<TranscodeOutcome, EngineError> {
        let targets = options.working_set(container);
        let faces = container.face_count();
        let mut outcome = TranscodeOutcome::default();

        for (image_index, image) in container.images.iter().enumerate() {
            let image_index = image_index as u32;
            let face = image_index % faces;
            let layer = image_index / faces;
            for level in 0..image.num_levels {
                let info = container
                    .level_info(image_index, level)
                    .ok_or_else(|| EngineError::ContainerBuildFailed(format!(
                        "missing slice for image {image_index} level {level}"
                    )))?;
                let data = container.slice_data(info.first_slice).ok_or_else(|| {
                    EngineError::ContainerBuildFailed(format!(
                        "slice {} payload out of range",
                        info.first_slice
                    ))
                })?;
                let view = SliceView {
                    encoding: container.encoding,
                    data,
                    num_blocks_x: info.num_blocks_x,
                    num_blocks_y: info.num_blocks_y,
                    orig_width: info.orig_width,
                    orig_height: info.orig_height,
                };
                for &target in &targets {
                    // The pow2 requirement applies to the base image,
                    // so a skip drops every level of that image for
                    // the target. Warn once, on the base level.
                    if !format::dimensions_allowed(target, image.orig_width, image.orig_height) {
                        if level == 0 {
                            warn!(
                                target_format = target.short_name(),
                                image = image_index,
                                width = image.orig_width,
                                height = image.orig_height,
                                "skipping non-power-of-two image for format"
                            );
                            outcome.skipped.push(SkippedUnit {
                                target,
                                image_index,
                                width: image.orig_width,
                                height: image.orig_height,
                            });
                        }
                        continue;
                    }
                    let unit = self.transcode_unit(
                        &view, target, image_index, face, layer, level, pool,
                    )?;
                    if self.config.debug_output {
                        debug!(
                            target_format = target.short_name(),
                            image = image_index,
                            level,
                            bytes = unit.data.len(),
                            micros = unit.elapsed.as_micros() as u64,
                            "transcoded unit"
                        );
                    }
                    outcome.insert(unit);
                }
            }
        }
        Ok(outcome)
    }

    fn transcode_unit(
        &self,
        view: &SliceView<'_>,
        target: TranscodeTarget,
        image_index: u32,
        face: u32,
        layer: u32,
        level: u32,
        pool: Option<&TaskPool>,
    ) -> Result<TranscodedUnit, EngineError> {
        let traits = format::traits(target);
        let size = traits.output_size(view.orig_width, view.orig_height);
        let mut dst = vec![0u8; size];
        let seed = self
            .config
            .prefill_seed
            .wrapping_add(image_index.wrapping_mul(0x9E37))
            .wrapping_add(level.wrapping_mul(0x79B9));
        prefill(&mut dst, seed);

        let start = Instant::now();
        let chunk_len = CHUNK_UNITS * traits.bytes_per_unit;
        let result = match pool {
            Some(pool) if size > chunk_len => pool.run_chunks(&mut dst, chunk_len, |i, chunk| {
                self.codec
                    .transcode_range(view, target, i * CHUNK_UNITS, chunk)
            }),
            _ => self.codec.transcode_slice(view, target, &mut dst),
        };
        result.map_err(|e| EngineError::TranscodeFailed {
            image: image_index as usize,
            level: level as usize,
            face: face as usize,
            target,
            reason: e.to_string(),
        })?;

        Ok(TranscodedUnit {
            target,
            image_index,
            face,
            layer,
            level,
            width: view.orig_width,
            height: view.orig_height,
            data: dst,
            elapsed: start.elapsed(),
        })
    }
}
