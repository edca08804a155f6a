//! Compression orchestrator.
//!
//! Turns a [`CompressionRequest`] into immutable jobs, runs them with
//! join-all semantics, and applies the batch error policy: unreadable
//! sources are recoverable when jobs are grouped individually, every
//! other failure stops further submission.
//!
//! Parallelism is exclusive per batch. With `parallel_jobs` set the
//! job-level pool owns the workers and each job runs single-threaded
//! inside; otherwise jobs run serially and the intra-job pool gets the
//! threads. The two are never combined.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::{GrayImage, RgbaImage};
use tracing::{debug, info, warn};

use crate::codebook::GlobalCodebook;
use crate::codec::{BlockCodec, EncodeParams, EncodedSlice, SliceView};
use crate::config::EngineConfig;
use crate::container::{
    self, ContainerTarget, ImageDesc, SliceDesc, TextureType, UniversalContainer,
};
use crate::error::EngineError;
use crate::format::{EncodingKind, TranscodeTarget};
use crate::metrics::{self, BatchMetrics, BatchSummary, CompressRow, ValidateRow};
use crate::pool::TaskPool;
use crate::transcode::{SkippedUnit, TranscodeOptions, Transcoder};
use crate::writer::{ContainerWriter, WriteOptions, WriteReport};

/// How source paths map onto jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// One job per source image; failures of one source spare the
    /// rest.
    Individual,
    /// All sources form one multi-image job (array, cubemap, video).
    Array,
}

/// Everything needed to compress a batch of source images.
#[derive(Debug, Clone)]
pub struct CompressionRequest {
    pub sources: Vec<PathBuf>,
    /// Optional grayscale alpha companions, one per source. Empty
    /// means no companions.
    pub alpha_sources: Vec<PathBuf>,
    pub grouping: Grouping,
    pub texture_type: TextureType,
    pub encoding: EncodingKind,
    pub params: EncodeParams,
    /// Mip chain length to generate, clamped to what the dimensions
    /// allow. One means base level only.
    pub mip_levels: u32,
    pub y_flip: bool,
    /// Frame duration in microseconds; video only.
    pub us_per_frame: u32,
    pub userdata: (u32, u32),
    pub output_dir: PathBuf,
    pub container_target: ContainerTarget,
    /// Existing ETC1S container whose codebook every job shares.
    pub global_codebook: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
}

impl CompressionRequest {
    /// A single-image 2D request with default settings.
    pub fn new(sources: Vec<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            alpha_sources: Vec::new(),
            grouping: Grouping::Individual,
            texture_type: TextureType::TwoD,
            encoding: EncodingKind::Etc1s,
            params: EncodeParams::default(),
            mip_levels: 1,
            y_flip: false,
            us_per_frame: 0,
            userdata: (0, 0),
            output_dir: output_dir.into(),
            container_target: ContainerTarget::Legacy,
            global_codebook: None,
            csv_path: None,
        }
    }

    pub fn with_grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn with_texture_type(mut self, texture_type: TextureType) -> Self {
        self.texture_type = texture_type;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingKind) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_container_target(mut self, target: ContainerTarget) -> Self {
        self.container_target = target;
        self
    }

    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }
}

/// Lifecycle of one job. A job runs at most once; there are no
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Never started (batch aborted before submission reached it).
    Queued,
    Running,
    Succeeded,
    /// Failed, but the batch continued.
    FailedRecoverable,
    /// Failed and stopped further submission.
    FailedFatal,
}

/// One immutable unit of batch work.
#[derive(Debug, Clone)]
struct CompressionJob {
    index: usize,
    sources: Vec<PathBuf>,
    alpha_sources: Vec<Option<PathBuf>>,
}

/// Final record of one job.
#[derive(Debug)]
pub struct JobResult {
    pub job_index: usize,
    pub state: JobState,
    pub output: Option<PathBuf>,
    pub container_bytes: usize,
    pub error: Option<EngineError>,
    pub elapsed: Duration,
}

impl JobResult {
    fn skipped(index: usize) -> Self {
        Self {
            job_index: index,
            state: JobState::Queued,
            output: None,
            container_bytes: 0,
            error: None,
            elapsed: Duration::ZERO,
        }
    }
}

/// Joined results of a whole batch, in submission order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<JobResult>,
    /// A fatal failure stopped submission before every job ran.
    pub aborted: bool,
    pub summary: BatchSummary,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.state == JobState::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.state, JobState::FailedRecoverable | JobState::FailedFatal))
            .count()
    }
}

/// Reads an existing container back out across the target formats.
#[derive(Debug, Clone)]
pub struct UnpackRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub options: TranscodeOptions,
    /// Also decode each level back to PNG rasters.
    pub unpack_raster: bool,
    /// Container holding the shared codebook tables. Required when the
    /// input references a global codebook instead of embedding one.
    pub global_codebook: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
}

/// What an unpack run produced.
#[derive(Debug)]
pub struct UnpackOutcome {
    pub files: Vec<PathBuf>,
    pub skipped_units: Vec<SkippedUnit>,
    pub skipped_unpacks: Vec<TranscodeTarget>,
    /// Cumulative transcode time per produced target, in dispatch
    /// order.
    pub format_times: Vec<(TranscodeTarget, Duration)>,
}

/// Drives compression batches and unpack runs.
pub struct Orchestrator {
    config: EngineConfig,
    codec: Arc<dyn BlockCodec>,
}

impl Orchestrator {
    pub fn new(codec: Arc<dyn BlockCodec>, config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            codec,
        }
    }

    /// Run a whole compression batch, blocking until every job has
    /// joined. Results come back in submission order.
    ///
    /// The global codebook, when requested, is loaded and validated
    /// before any job starts; a load failure aborts the batch.
    pub fn submit_batch(&self, request: &CompressionRequest) -> Result<BatchOutcome, EngineError> {
        self.validate_request(request)?;

        let codebook = match &request.global_codebook {
            Some(path) => Some(
                GlobalCodebook::load(path)
                    .map_err(|e| EngineError::ValidationFailed(e.to_string()))?,
            ),
            None => None,
        };

        let jobs = self.build_jobs(request);
        let metrics = BatchMetrics::new();
        let abort = AtomicBool::new(false);

        let results = if self.config.parallel_jobs && jobs.len() > 1 {
            let pool = TaskPool::bounded(self.config.worker_cap)
                .map_err(|e| EngineError::ValidationFailed(e.to_string()))?;
            info!(
                jobs = jobs.len(),
                workers = pool.threads(),
                "running batch on job-level pool"
            );
            pool.run_ordered(jobs, |job| {
                if abort.load(Ordering::SeqCst) {
                    return JobResult::skipped(job.index);
                }
                let result = self.run_job(&job, request, codebook.as_deref(), None, &metrics);
                if matches!(result.state, JobState::FailedFatal) {
                    abort.store(true, Ordering::SeqCst);
                }
                result
            })
        } else {
            let pool = TaskPool::bounded(self.config.worker_cap)
                .map_err(|e| EngineError::ValidationFailed(e.to_string()))?;
            info!(
                jobs = jobs.len(),
                workers = pool.threads(),
                "running batch serially with intra-job pool"
            );
            let mut results = Vec::with_capacity(jobs.len());
            for job in jobs {
                if abort.load(Ordering::SeqCst) {
                    results.push(JobResult::skipped(job.index));
                    continue;
                }
                let result =
                    self.run_job(&job, request, codebook.as_deref(), Some(&pool), &metrics);
                if matches!(result.state, JobState::FailedFatal) {
                    abort.store(true, Ordering::SeqCst);
                }
                results.push(result);
            }
            results
        };

        if let Some(csv) = &request.csv_path {
            metrics.write_csv(csv)?;
        }
        let summary = metrics.summary();
        let aborted = abort.load(Ordering::SeqCst);
        info!(
            succeeded = results.iter().filter(|r| r.state == JobState::Succeeded).count(),
            failed = results
                .iter()
                .filter(|r| matches!(r.state, JobState::FailedRecoverable | JobState::FailedFatal))
                .count(),
            aborted,
            "batch finished"
        );
        Ok(BatchOutcome {
            results,
            aborted,
            summary,
        })
    }

    fn validate_request(&self, request: &CompressionRequest) -> Result<(), EngineError> {
        if request.sources.is_empty() {
            return Err(EngineError::ValidationFailed(
                "request has no source images".to_string(),
            ));
        }
        if !request.alpha_sources.is_empty()
            && request.alpha_sources.len() != request.sources.len()
        {
            return Err(EngineError::ValidationFailed(format!(
                "{} alpha companions for {} sources",
                request.alpha_sources.len(),
                request.sources.len()
            )));
        }
        if request.mip_levels == 0 {
            return Err(EngineError::ValidationFailed(
                "mip level count must be at least one".to_string(),
            ));
        }
        match request.texture_type {
            TextureType::Volume => {
                return Err(EngineError::ValidationFailed(
                    "volume textures are not produced by this engine".to_string(),
                ));
            }
            TextureType::CubemapArray => {
                if request.grouping != Grouping::Array {
                    return Err(EngineError::ValidationFailed(
                        "cubemaps require array grouping".to_string(),
                    ));
                }
                if request.sources.len() % 6 != 0 {
                    return Err(EngineError::ValidationFailed(format!(
                        "cubemap source count {} is not a multiple of six",
                        request.sources.len()
                    )));
                }
            }
            TextureType::VideoFrames => {
                if request.grouping != Grouping::Array {
                    return Err(EngineError::ValidationFailed(
                        "video frames require array grouping".to_string(),
                    ));
                }
                if request.mip_levels > 1 {
                    return Err(EngineError::ValidationFailed(
                        "video frames cannot carry mip chains".to_string(),
                    ));
                }
            }
            TextureType::TwoD | TextureType::TwoDArray => {}
        }
        Ok(())
    }

    fn build_jobs(&self, request: &CompressionRequest) -> Vec<CompressionJob> {
        let alpha_of = |i: usize| request.alpha_sources.get(i).cloned();
        match request.grouping {
            Grouping::Individual => request
                .sources
                .iter()
                .enumerate()
                .map(|(i, path)| CompressionJob {
                    index: i,
                    sources: vec![path.clone()],
                    alpha_sources: vec![alpha_of(i)],
                })
                .collect(),
            Grouping::Array => vec![CompressionJob {
                index: 0,
                sources: request.sources.clone(),
                alpha_sources: (0..request.sources.len()).map(alpha_of).collect(),
            }],
        }
    }

    fn run_job(
        &self,
        job: &CompressionJob,
        request: &CompressionRequest,
        codebook: Option<&GlobalCodebook>,
        intra_pool: Option<&TaskPool>,
        metrics: &BatchMetrics,
    ) -> JobResult {
        let start = Instant::now();
        debug!(job = job.index, sources = job.sources.len(), "job running");
        match self.execute(job, request, codebook, intra_pool, metrics, start) {
            Ok((output, container_bytes)) => JobResult {
                job_index: job.index,
                state: JobState::Succeeded,
                output: Some(output),
                container_bytes,
                error: None,
                elapsed: start.elapsed(),
            },
            Err(error) => {
                let recoverable =
                    error.is_recoverable() && request.grouping == Grouping::Individual;
                warn!(job = job.index, error = %error, recoverable, "job failed");
                JobResult {
                    job_index: job.index,
                    state: if recoverable {
                        JobState::FailedRecoverable
                    } else {
                        JobState::FailedFatal
                    },
                    output: None,
                    container_bytes: 0,
                    error: Some(error),
                    elapsed: start.elapsed(),
                }
            }
        }
    }

    fn execute(
        &self,
        job: &CompressionJob,
        request: &CompressionRequest,
        codebook: Option<&GlobalCodebook>,
        intra_pool: Option<&TaskPool>,
        metrics: &BatchMetrics,
        started: Instant,
    ) -> Result<(PathBuf, usize), EngineError> {
        let sources = self.load_sources(job, request)?;
        self.validate_set(request, &sources)?;

        let (w, h) = sources[0].dimensions();
        let levels = effective_levels(request.mip_levels, w, h);
        let has_alpha = !job.alpha_sources.iter().all(Option::is_none)
            || sources
                .iter()
                .any(|img| img.pixels().any(|p| p.0[3] != 255));

        let container = self.encode_container(
            request, &sources, levels, has_alpha, codebook, intra_pool,
        )?;
        let bytes = container::serialize(&container, request.container_target)
            .map_err(|e| EngineError::ContainerBuildFailed(e.to_string()))?;

        let stem = job
            .sources
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("job{}", job.index));
        let ext = match request.container_target {
            ContainerTarget::Legacy => "utex",
            ContainerTarget::Ktx2 => "ktx2",
        };
        let output = request.output_dir.join(format!("{stem}.{ext}"));
        std::fs::write(&output, &bytes).map_err(|source| EngineError::OutputWriteFailed {
            path: output.clone(),
            source,
        })?;
        info!(file = %output.display(), bytes = bytes.len(), "wrote container");

        let mut row = self.compress_row(&stem, request, &sources[0], &container, &bytes);
        row.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics.record_compress(row);
        Ok((output, bytes.len()))
    }

    fn load_sources(
        &self,
        job: &CompressionJob,
        request: &CompressionRequest,
    ) -> Result<Vec<RgbaImage>, EngineError> {
        let mut sources = Vec::with_capacity(job.sources.len());
        for (path, alpha_path) in job.sources.iter().zip(&job.alpha_sources) {
            let mut image = image::open(path)
                .map_err(|e| EngineError::SourceReadFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
                .to_rgba8();
            if request.y_flip {
                image::imageops::flip_vertical_in_place(&mut image);
            }
            if let Some(alpha_path) = alpha_path {
                let alpha = image::open(alpha_path)
                    .map_err(|e| EngineError::SourceReadFailed {
                        path: alpha_path.clone(),
                        reason: e.to_string(),
                    })?
                    .to_luma8();
                if alpha.dimensions() != image.dimensions() {
                    return Err(EngineError::ValidationFailed(format!(
                        "alpha companion {} is {}x{}, color image is {}x{}",
                        alpha_path.display(),
                        alpha.width(),
                        alpha.height(),
                        image.width(),
                        image.height()
                    )));
                }
                for (pixel, a) in image.pixels_mut().zip(alpha.pixels()) {
                    pixel.0[3] = a.0[0];
                }
            }
            sources.push(image);
        }
        Ok(sources)
    }

    /// Array, cubemap, and video sets must agree on dimensions, which
    /// also pins their mip counts.
    fn validate_set(
        &self,
        request: &CompressionRequest,
        sources: &[RgbaImage],
    ) -> Result<(), EngineError> {
        if request.grouping == Grouping::Individual || sources.len() < 2 {
            return Ok(());
        }
        let (w, h) = sources[0].dimensions();
        for (i, image) in sources.iter().enumerate().skip(1) {
            if image.dimensions() != (w, h) {
                return Err(EngineError::ValidationFailed(format!(
                    "image {i} is {}x{}, set requires {w}x{h}",
                    image.width(),
                    image.height()
                )));
            }
        }
        Ok(())
    }

    fn encode_container(
        &self,
        request: &CompressionRequest,
        sources: &[RgbaImage],
        levels: u32,
        has_alpha: bool,
        codebook: Option<&GlobalCodebook>,
        intra_pool: Option<&TaskPool>,
    ) -> Result<UniversalContainer, EngineError> {
        let etc1s = request.encoding == EncodingKind::Etc1s;
        let tables = if etc1s {
            Some(self.codec.build_codebook(&request.params, codebook))
        } else {
            None
        };

        // One work item per slice, in final slice-table order: images
        // outermost, levels inner, alpha right after its color slice.
        // For video, only the first image's slices are intra.
        let mut work: Vec<(u32, u32, bool, RgbaImage)> = Vec::new();
        for (image_index, source) in sources.iter().enumerate() {
            for level in 0..levels {
                let raster = mip_level(source, level);
                if etc1s && has_alpha {
                    let alpha = alpha_raster(&raster);
                    work.push((image_index as u32, level, false, raster));
                    work.push((image_index as u32, level, true, alpha));
                } else {
                    work.push((image_index as u32, level, false, raster));
                }
            }
        }

        let encode_one = |raster: &RgbaImage| -> Result<EncodedSlice, EngineError> {
            self.codec
                .encode_slice(raster, request.encoding, &request.params, codebook)
                .map_err(|e| EngineError::EncodeStageFailed {
                    path: request.sources[0].clone(),
                    reason: e.to_string(),
                })
        };
        let encoded: Vec<(u32, u32, bool, u32, u32, Result<EncodedSlice, EngineError>)> =
            match intra_pool {
                Some(pool) => pool.run_ordered(work, |(i, l, alpha, raster)| {
                    let (rw, rh) = raster.dimensions();
                    (i, l, alpha, rw, rh, encode_one(&raster))
                }),
                None => work
                    .into_iter()
                    .map(|(i, l, alpha, raster)| {
                        let (rw, rh) = raster.dimensions();
                        (i, l, alpha, rw, rh, encode_one(&raster))
                    })
                    .collect(),
            };

        let video = request.texture_type == TextureType::VideoFrames;
        let mut payload = Vec::new();
        let mut slices = Vec::new();
        for (image_index, level, alpha_slice, rw, rh, result) in encoded {
            let slice = result?;
            slices.push(SliceDesc {
                image_index,
                level_index: level,
                orig_width: rw,
                orig_height: rh,
                num_blocks_x: slice.num_blocks_x,
                num_blocks_y: slice.num_blocks_y,
                payload_offset: payload.len() as u32,
                payload_len: slice.data.len() as u32,
                crc16: container::legacy::crc16(&slice.data, 0),
                alpha_slice,
                iframe: !video || image_index == 0,
            });
            payload.extend_from_slice(&slice.data);
        }

        let images = sources
            .iter()
            .map(|s| ImageDesc {
                orig_width: s.width(),
                orig_height: s.height(),
                num_levels: levels,
                has_alpha,
            })
            .collect();

        let (endpoint_count, selector_count, codebook_bytes) = match (&tables, codebook) {
            // Global codebook: counts stay, the bytes live elsewhere.
            (Some(t), Some(_)) => (t.endpoint_count, t.selector_count, Vec::new()),
            (Some(t), None) => (t.endpoint_count, t.selector_count, t.data.clone()),
            (None, _) => (0, 0, Vec::new()),
        };

        Ok(UniversalContainer {
            encoding: request.encoding,
            texture_type: request.texture_type,
            y_flipped: request.y_flip,
            has_alpha,
            us_per_frame: if video { request.us_per_frame } else { 0 },
            userdata: request.userdata,
            endpoint_count,
            selector_count,
            codebook: codebook_bytes,
            images,
            slices,
            payload,
        })
    }

    fn compress_row(
        &self,
        stem: &str,
        request: &CompressionRequest,
        base: &RgbaImage,
        container: &UniversalContainer,
        bytes: &[u8],
    ) -> CompressRow {
        let (w, h) = base.dimensions();
        let psnr = self
            .universal_decode(container)
            .map(|decoded| metrics::psnr(base, &decoded, self.config.perceptual_metrics));
        CompressRow {
            file: stem.to_string(),
            encoding: request.encoding.to_string(),
            width: w,
            height: h,
            levels: container.level_count(),
            images: container.images.len() as u32,
            slices: container.slices.len() as u32,
            has_alpha: container.has_alpha,
            quality: request.params.quality,
            container_bytes: bytes.len(),
            zlib_reference_bytes: metrics::zlib_reference_len(&container.payload),
            bits_per_texel: metrics::bits_per_texel(bytes.len(), w, h),
            psnr_rgb: psnr.map(|p| p.rgb).unwrap_or(0.0),
            psnr_alpha: psnr.map(|p| p.alpha).unwrap_or(0.0),
            elapsed_ms: 0.0,
        }
    }

    /// Decode the base level back to RGBA through the codec, for the
    /// quality row. `None` when the container is somehow empty.
    fn universal_decode(&self, container: &UniversalContainer) -> Option<RgbaImage> {
        let info = container.level_info(0, 0)?;
        let data = container.slice_data(info.first_slice)?;
        let view = SliceView {
            encoding: container.encoding,
            data,
            num_blocks_x: info.num_blocks_x,
            num_blocks_y: info.num_blocks_y,
            orig_width: info.orig_width,
            orig_height: info.orig_height,
        };
        let target = TranscodeTarget::Rgba32;
        let size = crate::format::traits(target).output_size(info.orig_width, info.orig_height);
        let mut dst = vec![0u8; size];
        self.codec.transcode_slice(&view, target, &mut dst).ok()?;
        self.codec
            .decode_raster(target, &dst, info.orig_width, info.orig_height)
            .ok()
    }

    /// Transcode an existing container file across the target formats
    /// and write the outputs.
    ///
    /// A single unpack run always owns the intra-job block pool; there
    /// is no job-level parallelism to compete with.
    pub fn run_unpack(&self, request: &UnpackRequest) -> Result<UnpackOutcome, EngineError> {
        let bytes = std::fs::read(&request.input).map_err(|e| EngineError::SourceReadFailed {
            path: request.input.clone(),
            reason: e.to_string(),
        })?;
        let container = container::parse(&bytes)
            .map_err(|e| EngineError::ValidationFailed(e.to_string()))?;
        if container.texture_type == TextureType::Volume {
            return Err(EngineError::ValidationFailed(
                "volume containers cannot be unpacked".to_string(),
            ));
        }
        if container.uses_global_codebook() {
            let path = request.global_codebook.as_ref().ok_or_else(|| {
                EngineError::ValidationFailed(
                    "container references a global codebook but none was supplied".to_string(),
                )
            })?;
            let codebook = GlobalCodebook::load(path)
                .map_err(|e| EngineError::ValidationFailed(e.to_string()))?;
            if !codebook.matches(&container) {
                return Err(EngineError::ValidationFailed(format!(
                    "global codebook size mismatch: container expects {}x{} entries, {} holds {}x{}",
                    container.endpoint_count,
                    container.selector_count,
                    path.display(),
                    codebook.endpoint_count(),
                    codebook.selector_count()
                )));
            }
        }

        let pool = TaskPool::bounded(self.config.worker_cap)
            .map_err(|e| EngineError::ValidationFailed(e.to_string()))?;
        let transcoder = Transcoder::new(Arc::clone(&self.codec), &self.config);
        let outcome = transcoder.transcode_all(&container, &request.options, Some(&pool))?;

        let base_name = request
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "texture".to_string());
        let writer = ContainerWriter::new(self.codec.as_ref());
        let report = writer.write_outputs(
            &container,
            &outcome,
            &WriteOptions {
                output_dir: request.output_dir.clone(),
                base_name: base_name.clone(),
                unpack: request.unpack_raster,
            },
        );
        let WriteReport {
            files,
            skipped_unpacks,
            mut failures,
        } = report;
        if let Some(error) = failures.pop() {
            return Err(error);
        }

        if let Some(csv) = &request.csv_path {
            let metrics = BatchMetrics::new();
            let reference = self.universal_decode(&container);
            for unit in outcome.units() {
                let psnr = match (&reference, self.codec.can_decode_raster(unit.target)) {
                    (Some(reference), true) => self
                        .codec
                        .decode_raster(unit.target, &unit.data, unit.width, unit.height)
                        .ok()
                        .filter(|d| d.dimensions() == reference.dimensions())
                        .map(|d| metrics::psnr(reference, &d, self.config.perceptual_metrics)),
                    _ => None,
                };
                metrics.record_validate(ValidateRow {
                    file: base_name.clone(),
                    target: unit.target,
                    layer: unit.layer,
                    level: unit.level,
                    width: unit.width,
                    height: unit.height,
                    elapsed_ms: unit.elapsed.as_secs_f64() * 1000.0,
                    psnr_rgb: psnr.map(|p| p.rgb).unwrap_or(0.0),
                    psnr_alpha: psnr.map(|p| p.alpha).unwrap_or(0.0),
                });
            }
            metrics.write_csv(csv)?;
        }

        let format_times = outcome
            .produced_targets()
            .into_iter()
            .map(|t| (t, outcome.format_time(t)))
            .collect();
        Ok(UnpackOutcome {
            files,
            skipped_units: outcome.skipped.clone(),
            skipped_unpacks,
            format_times,
        })
    }
}

/// Mip chain length the dimensions allow, clamped by the request.
fn effective_levels(requested: u32, width: u32, height: u32) -> u32 {
    let max = 32 - width.max(height).max(1).leading_zeros();
    requested.min(max).max(1)
}

/// Downscaled raster for one mip level (level 0 is the base).
fn mip_level(base: &RgbaImage, level: u32) -> RgbaImage {
    if level == 0 {
        return base.clone();
    }
    let w = (base.width() >> level).max(1);
    let h = (base.height() >> level).max(1);
    image::imageops::resize(base, w, h, FilterType::Triangle)
}

/// Replicate the alpha channel into an opaque grayscale raster; ETC1S
/// stores alpha as a separate color slice.
fn alpha_raster(image: &RgbaImage) -> RgbaImage {
    let gray: GrayImage = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([image.get_pixel(x, y).0[3]])
    });
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let a = gray.get_pixel(x, y).0[0];
        image::Rgba([a, a, a, 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ReferenceCodec;
    use image::Rgba;
    use std::path::Path;

    fn orchestrator(config: EngineConfig) -> Orchestrator {
        Orchestrator::new(Arc::new(ReferenceCodec::new()), &config)
    }

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, p: [u8; 4]) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(w, h, Rgba(p)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_effective_levels_clamps_to_dimensions() {
        assert_eq!(effective_levels(10, 16, 16), 5);
        assert_eq!(effective_levels(3, 16, 16), 3);
        assert_eq!(effective_levels(10, 1, 1), 1);
        assert_eq!(effective_levels(1, 256, 256), 1);
    }

    #[test]
    fn test_rejects_empty_request() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(EngineConfig::default());
        let request = CompressionRequest::new(Vec::new(), dir.path());
        let err = orch.submit_batch(&request).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn test_rejects_volume_texture() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "a.png", 8, 8, [1, 2, 3, 255]);
        let orch = orchestrator(EngineConfig::default());
        let request = CompressionRequest::new(vec![src], dir.path())
            .with_texture_type(TextureType::Volume);
        let err = orch.submit_batch(&request).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn test_rejects_cubemap_not_multiple_of_six() {
        let dir = tempfile::tempdir().unwrap();
        let sources: Vec<_> = (0..4)
            .map(|i| write_png(dir.path(), &format!("f{i}.png"), 8, 8, [i, 0, 0, 255]))
            .collect();
        let orch = orchestrator(EngineConfig::default());
        let request = CompressionRequest::new(sources, dir.path())
            .with_texture_type(TextureType::CubemapArray)
            .with_grouping(Grouping::Array);
        let err = orch.submit_batch(&request).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn test_missing_global_codebook_aborts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "a.png", 8, 8, [1, 2, 3, 255]);
        let orch = orchestrator(EngineConfig::default());
        let mut request = CompressionRequest::new(vec![src], dir.path());
        request.global_codebook = Some(PathBuf::from("/nonexistent/codebook.utex"));
        let err = orch.submit_batch(&request).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn test_single_job_writes_parseable_container() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "tex.png", 16, 16, [90, 120, 30, 255]);
        let orch = orchestrator(EngineConfig::default());
        let request = CompressionRequest::new(vec![src], dir.path());
        let outcome = orch.submit_batch(&request).unwrap();
        assert_eq!(outcome.succeeded(), 1);
        assert!(!outcome.aborted);

        let output = outcome.results[0].output.as_ref().unwrap();
        let parsed = container::parse(&std::fs::read(output).unwrap()).unwrap();
        assert_eq!(parsed.encoding, EncodingKind::Etc1s);
        assert_eq!(parsed.images.len(), 1);
        assert_eq!(parsed.images[0].orig_width, 16);
    }

    #[test]
    fn test_batch_partial_failure_in_individual_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png", 8, 8, [10, 0, 0, 255]);
        let missing = dir.path().join("missing.png");
        let c = write_png(dir.path(), "c.png", 8, 8, [30, 0, 0, 255]);
        // Serial submission keeps the ordering assertion meaningful.
        let orch = orchestrator(EngineConfig::default().with_parallel_jobs(false));
        let request = CompressionRequest::new(vec![a, missing, c], dir.path());
        let outcome = orch.submit_batch(&request).unwrap();

        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.failed(), 1);
        assert!(!outcome.aborted);
        assert_eq!(outcome.results[1].state, JobState::FailedRecoverable);
        assert!(matches!(
            outcome.results[1].error,
            Some(EngineError::SourceReadFailed { .. })
        ));
    }

    #[test]
    fn test_fatal_failure_stops_submission() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png", 8, 8, [10, 0, 0, 255]);
        let b = write_png(dir.path(), "b.png", 16, 16, [20, 0, 0, 255]);
        // Dimension mismatch in an array set is fatal.
        let orch = orchestrator(EngineConfig::default().with_parallel_jobs(false));
        let request = CompressionRequest::new(vec![a, b], dir.path())
            .with_texture_type(TextureType::TwoDArray)
            .with_grouping(Grouping::Array);
        let outcome = orch.submit_batch(&request).unwrap();
        assert_eq!(outcome.results[0].state, JobState::FailedFatal);
        assert!(outcome.aborted);
    }

    #[test]
    fn test_video_slice_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<_> = (0..3)
            .map(|i| write_png(dir.path(), &format!("frame{i}.png"), 8, 8, [i * 40, 0, 0, 255]))
            .collect();
        let orch = orchestrator(EngineConfig::default());
        let mut request = CompressionRequest::new(frames, dir.path())
            .with_texture_type(TextureType::VideoFrames)
            .with_grouping(Grouping::Array);
        request.us_per_frame = 33_333;
        let outcome = orch.submit_batch(&request).unwrap();
        assert_eq!(outcome.succeeded(), 1);

        let output = outcome.results[0].output.as_ref().unwrap();
        let parsed = container::parse(&std::fs::read(output).unwrap()).unwrap();
        assert_eq!(parsed.us_per_frame, 33_333);
        assert!(parsed.slices[0].iframe);
        for slice in &parsed.slices[1..] {
            assert!(!slice.iframe);
        }
        let indices: Vec<u32> = parsed.slices.iter().map(|s| s.image_index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn test_mip_chain_produces_slice_per_level() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "tex.png", 16, 16, [80, 80, 80, 255]);
        let orch = orchestrator(EngineConfig::default());
        let request = CompressionRequest::new(vec![src], dir.path()).with_mip_levels(3);
        let outcome = orch.submit_batch(&request).unwrap();
        let output = outcome.results[0].output.as_ref().unwrap();
        let parsed = container::parse(&std::fs::read(output).unwrap()).unwrap();
        assert_eq!(parsed.level_count(), 3);
        assert_eq!(parsed.slices.len(), 3);
        assert_eq!(parsed.level_info(0, 2).unwrap().orig_width, 4);
    }

    #[test]
    fn test_alpha_companion_adds_alpha_slices() {
        let dir = tempfile::tempdir().unwrap();
        let color = write_png(dir.path(), "c.png", 8, 8, [200, 100, 50, 255]);
        let alpha = write_png(dir.path(), "a.png", 8, 8, [128, 128, 128, 255]);
        let orch = orchestrator(EngineConfig::default());
        let mut request = CompressionRequest::new(vec![color], dir.path());
        request.alpha_sources = vec![alpha];
        let outcome = orch.submit_batch(&request).unwrap();
        let output = outcome.results[0].output.as_ref().unwrap();
        let parsed = container::parse(&std::fs::read(output).unwrap()).unwrap();
        assert!(parsed.has_alpha);
        assert_eq!(parsed.slices.len(), 2);
        assert!(parsed.slices[1].alpha_slice);
        assert_eq!(parsed.alpha_slice_of(0), Some(1));
    }

    #[test]
    fn test_unpack_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "tex.png", 16, 16, [60, 70, 80, 255]);
        let orch = orchestrator(EngineConfig::default());
        let request = CompressionRequest::new(vec![src], dir.path());
        let outcome = orch.submit_batch(&request).unwrap();
        let input = outcome.results[0].output.clone().unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let unpack = orch
            .run_unpack(&UnpackRequest {
                input,
                output_dir: out_dir.path().to_path_buf(),
                options: TranscodeOptions {
                    etc1_only: false,
                    restrict_formats: Some(vec![
                        TranscodeTarget::Bc1Rgb,
                        TranscodeTarget::Etc1Rgb,
                    ]),
                },
                unpack_raster: false,
                global_codebook: None,
                csv_path: None,
            })
            .unwrap();
        assert_eq!(unpack.files.len(), 2);
        assert!(unpack.skipped_units.is_empty());
        let timed: Vec<TranscodeTarget> = unpack.format_times.iter().map(|&(t, _)| t).collect();
        assert_eq!(
            timed,
            vec![TranscodeTarget::Bc1Rgb, TranscodeTarget::Etc1Rgb]
        );
    }

    #[test]
    fn test_unpack_rejects_garbage_input() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("bad.utex");
        std::fs::write(&garbage, [0u8; 64]).unwrap();
        let orch = orchestrator(EngineConfig::default());
        let err = orch
            .run_unpack(&UnpackRequest {
                input: garbage,
                output_dir: dir.path().to_path_buf(),
                options: TranscodeOptions::default(),
                unpack_raster: false,
                global_codebook: None,
                csv_path: None,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn test_unpack_validates_global_codebook_reference() {
        let dir = tempfile::tempdir().unwrap();
        let donor = write_png(dir.path(), "donor.png", 8, 8, [5, 6, 7, 255]);
        let orch = orchestrator(EngineConfig::default());
        let outcome = orch
            .submit_batch(&CompressionRequest::new(vec![donor], dir.path()))
            .unwrap();
        let donor_path = outcome.results[0].output.clone().unwrap();

        let src = write_png(dir.path(), "tex.png", 8, 8, [40, 50, 60, 255]);
        let mut request = CompressionRequest::new(vec![src], dir.path());
        request.global_codebook = Some(donor_path.clone());
        let outcome = orch.submit_batch(&request).unwrap();
        let input = outcome.results[0].output.clone().unwrap();

        let unpack_request = |codebook: Option<PathBuf>| UnpackRequest {
            input: input.clone(),
            output_dir: dir.path().to_path_buf(),
            options: TranscodeOptions {
                etc1_only: true,
                restrict_formats: None,
            },
            unpack_raster: false,
            global_codebook: codebook,
            csv_path: None,
        };

        // Without the shared tables the container cannot be trusted.
        let err = orch.run_unpack(&unpack_request(None)).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));

        // The donor the container was built against passes.
        assert!(orch.run_unpack(&unpack_request(Some(donor_path))).is_ok());

        // A codebook with different entry counts is rejected.
        let other = write_png(dir.path(), "other.png", 8, 8, [9, 9, 9, 255]);
        let mut small = CompressionRequest::new(vec![other], dir.path());
        small.params.max_endpoints = 64;
        small.params.max_selectors = 64;
        let outcome = orch.submit_batch(&small).unwrap();
        let mismatched = outcome.results[0].output.clone().unwrap();
        let err = orch
            .run_unpack(&unpack_request(Some(mismatched)))
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn test_global_codebook_shared_across_workers() {
        let dir = tempfile::tempdir().unwrap();
        // First produce a donor container whose codebook will be
        // shared.
        let donor = write_png(dir.path(), "donor.png", 8, 8, [5, 6, 7, 255]);
        let orch = orchestrator(EngineConfig::default());
        let outcome = orch
            .submit_batch(&CompressionRequest::new(vec![donor], dir.path()))
            .unwrap();
        let codebook_path = outcome.results[0].output.clone().unwrap();

        let sources: Vec<_> = (0..4)
            .map(|i| write_png(dir.path(), &format!("s{i}.png"), 8, 8, [i * 30, 9, 9, 255]))
            .collect();
        for cap in [1u32, 0] {
            let orch = orchestrator(EngineConfig::default().with_worker_cap(cap));
            let mut request = CompressionRequest::new(sources.clone(), dir.path());
            request.global_codebook = Some(codebook_path.clone());
            let outcome = orch.submit_batch(&request).unwrap();
            assert_eq!(outcome.succeeded(), 4, "cap {cap}");

            // Every produced container references the shared tables
            // instead of embedding its own.
            for result in &outcome.results {
                let parsed =
                    container::parse(&std::fs::read(result.output.as_ref().unwrap()).unwrap())
                        .unwrap();
                assert!(parsed.uses_global_codebook());
            }
        }
    }

    #[test]
    fn test_csv_report_written() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "tex.png", 8, 8, [1, 2, 3, 255]);
        let csv = dir.path().join("report.csv");
        let orch = orchestrator(EngineConfig::default());
        let mut request = CompressionRequest::new(vec![src], dir.path());
        request.csv_path = Some(csv.clone());
        orch.submit_batch(&request).unwrap();
        let text = std::fs::read_to_string(&csv).unwrap();
        assert!(text.starts_with(CompressRow::HEADER));
        assert!(text.contains("slices,has_alpha,quality"));
        // 8x8, one level, one slice, opaque, default quality.
        assert!(text.contains("tex,ETC1S,8,8,1,1,1,0,128,"));
    }
}
