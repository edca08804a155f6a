//! Quality and size metrics plus CSV report assembly.
//!
//! PSNR is computed against the original raster, capped at 100 dB so
//! lossless formats produce a finite, sortable number. Size metrics
//! report bits per texel for the universal encoding and for a
//! zlib-compressed reference of the same payload.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbaImage;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::format::TranscodeTarget;

/// Upper bound reported for identical images.
pub const PSNR_CAP: f64 = 100.0;

/// Color and alpha PSNR of a decoded image against its original.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Psnr {
    pub rgb: f64,
    pub alpha: f64,
}

/// Peak signal-to-noise ratio in dB, capped at [`PSNR_CAP`].
///
/// With `perceptual` set, channel errors are weighted by their
/// contribution to perceived luminance (BT.601 coefficients).
pub fn psnr(original: &RgbaImage, decoded: &RgbaImage, perceptual: bool) -> Psnr {
    debug_assert_eq!(original.dimensions(), decoded.dimensions());
    let weights = if perceptual {
        [0.299, 0.587, 0.114]
    } else {
        [1.0 / 3.0; 3]
    };
    let mut rgb_err = 0.0f64;
    let mut alpha_err = 0.0f64;
    let mut count = 0u64;
    for (a, b) in original.pixels().zip(decoded.pixels()) {
        for c in 0..3 {
            let d = a.0[c] as f64 - b.0[c] as f64;
            rgb_err += weights[c] * d * d;
        }
        let d = a.0[3] as f64 - b.0[3] as f64;
        alpha_err += d * d;
        count += 1;
    }
    let to_db = |sum: f64| {
        let mse = sum / count.max(1) as f64;
        if mse <= f64::EPSILON {
            PSNR_CAP
        } else {
            (10.0 * (255.0f64 * 255.0 / mse).log10()).min(PSNR_CAP)
        }
    };
    Psnr {
        rgb: to_db(rgb_err),
        alpha: to_db(alpha_err),
    }
}

/// Storage cost in bits per texel.
pub fn bits_per_texel(bytes: usize, width: u32, height: u32) -> f64 {
    let texels = (width as u64 * height as u64).max(1);
    bytes as f64 * 8.0 / texels as f64
}

/// Length of `data` after zlib compression at the default level.
///
/// Used as a "what would general-purpose compression achieve" reference
/// next to the universal encoding's own size.
pub fn zlib_reference_len(data: &[u8]) -> usize {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().map(|v| v.len()).unwrap_or(data.len())
}

/// One compress-mode report row: a source file that became a container.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressRow {
    pub file: String,
    pub encoding: String,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub images: u32,
    pub slices: u32,
    pub has_alpha: bool,
    pub quality: u32,
    pub container_bytes: usize,
    pub zlib_reference_bytes: usize,
    pub bits_per_texel: f64,
    pub psnr_rgb: f64,
    pub psnr_alpha: f64,
    pub elapsed_ms: f64,
}

impl CompressRow {
    pub const HEADER: &'static str = "file,encoding,width,height,levels,images,\
slices,has_alpha,quality,container_bytes,zlib_reference_bytes,bits_per_texel,\
psnr_rgb,psnr_alpha,elapsed_ms";

    fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{:.3},{:.2},{:.2},{:.2}",
            self.file,
            self.encoding,
            self.width,
            self.height,
            self.levels,
            self.images,
            self.slices,
            u8::from(self.has_alpha),
            self.quality,
            self.container_bytes,
            self.zlib_reference_bytes,
            self.bits_per_texel,
            self.psnr_rgb,
            self.psnr_alpha,
            self.elapsed_ms,
        )
    }
}

/// One validate-mode report row: a single transcoded unit.
///
/// Column order differs from compress mode on purpose: timing comes
/// before the quality columns so per-format timing lines up when rows
/// are grouped by target.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateRow {
    pub file: String,
    pub target: TranscodeTarget,
    pub layer: u32,
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub elapsed_ms: f64,
    pub psnr_rgb: f64,
    pub psnr_alpha: f64,
}

impl ValidateRow {
    pub const HEADER: &'static str =
        "file,target,layer,level,width,height,elapsed_ms,psnr_rgb,psnr_alpha";

    fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{:.2},{:.2},{:.2}",
            self.file,
            self.target.short_name(),
            self.layer,
            self.level,
            self.width,
            self.height,
            self.elapsed_ms,
            self.psnr_rgb,
            self.psnr_alpha,
        )
    }
}

/// Aggregate numbers for a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatchSummary {
    pub rows: usize,
    pub total_container_bytes: usize,
    pub mean_psnr_rgb: f64,
    pub mean_bits_per_texel: f64,
}

#[derive(Default)]
struct Accumulator {
    compress_rows: Vec<CompressRow>,
    validate_rows: Vec<ValidateRow>,
}

/// Thread-safe collector for per-job report rows.
///
/// Jobs running on the worker pool push rows as they succeed; the
/// orchestrator finalizes the collector once after the batch joins.
#[derive(Default)]
pub struct BatchMetrics {
    inner: Mutex<Accumulator>,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_compress(&self, row: CompressRow) {
        self.inner.lock().compress_rows.push(row);
    }

    pub fn record_validate(&self, row: ValidateRow) {
        self.inner.lock().validate_rows.push(row);
    }

    /// Aggregate statistics over the compress rows recorded so far.
    pub fn summary(&self) -> BatchSummary {
        let inner = self.inner.lock();
        let rows = inner.compress_rows.len();
        if rows == 0 {
            return BatchSummary::default();
        }
        let total: usize = inner.compress_rows.iter().map(|r| r.container_bytes).sum();
        let psnr: f64 = inner.compress_rows.iter().map(|r| r.psnr_rgb).sum();
        let bpt: f64 = inner.compress_rows.iter().map(|r| r.bits_per_texel).sum();
        BatchSummary {
            rows,
            total_container_bytes: total,
            mean_psnr_rgb: psnr / rows as f64,
            mean_bits_per_texel: bpt / rows as f64,
        }
    }

    /// Write the collected rows as a CSV file.
    ///
    /// Compress rows and validate rows carry different columns; the
    /// file contains whichever kind was recorded (compress first when
    /// both are present, each under its own header).
    pub fn write_csv(&self, path: &Path) -> Result<(), EngineError> {
        let inner = self.inner.lock();
        let mut out = String::new();
        if !inner.compress_rows.is_empty() {
            out.push_str(CompressRow::HEADER);
            out.push('\n');
            for row in &inner.compress_rows {
                out.push_str(&row.to_csv());
                out.push('\n');
            }
        }
        if !inner.validate_rows.is_empty() {
            out.push_str(ValidateRow::HEADER);
            out.push('\n');
            for row in &inner.validate_rows {
                out.push_str(&row.to_csv());
                out.push('\n');
            }
        }
        std::fs::write(path, out).map_err(|source| EngineError::OutputWriteFailed {
            path: PathBuf::from(path),
            source,
        })
    }
}

impl std::fmt::Debug for BatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BatchMetrics")
            .field("compress_rows", &inner.compress_rows.len())
            .field("validate_rows", &inner.validate_rows.len())
            .finish()
    }
}
