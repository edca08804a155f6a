//! Compress command - encode source images into universal containers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use unitex::codec::ReferenceCodec;
use unitex::orchestrator::{Grouping, JobState, Orchestrator};
use unitex::{CompressionRequest, EngineConfig};

use super::common::{ContainerArg, EncodingArg, TextureTypeArg};
use crate::error::CliError;

/// Arguments for the compress command.
#[derive(Debug, Args)]
pub struct CompressArgs {
    /// Source images, in array/face/frame order
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Grayscale alpha companions, one per source
    #[arg(long = "alpha")]
    pub alpha_sources: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Universal encoding
    #[arg(long, value_enum, default_value_t = EncodingArg::Etc1s)]
    pub encoding: EncodingArg,

    /// Output container format
    #[arg(long, value_enum, default_value_t = ContainerArg::Legacy)]
    pub container: ContainerArg,

    /// Texture type
    #[arg(long = "type", value_enum, default_value_t = TextureTypeArg::TwoD)]
    pub texture_type: TextureTypeArg,

    /// Mip levels to generate (1 = base level only)
    #[arg(long, default_value_t = 1)]
    pub mips: u32,

    /// Quality level, 1-255
    #[arg(short, long, default_value_t = 128)]
    pub quality: u32,

    /// Flip images vertically before encoding
    #[arg(long)]
    pub y_flip: bool,

    /// Frame duration in microseconds (video only)
    #[arg(long, default_value_t = 33_333)]
    pub us_per_frame: u32,

    /// Existing ETC1S container whose codebook all outputs share
    #[arg(long)]
    pub global_codebook: Option<PathBuf>,

    /// Write a CSV report to this path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Run jobs serially, giving the threads to per-job block work
    #[arg(long)]
    pub serial: bool,

    /// Worker thread cap (0 = hardware concurrency)
    #[arg(long, default_value_t = 0)]
    pub workers: u32,

    /// Use perceptual error weighting in quality reports
    #[arg(long)]
    pub perceptual: bool,
}

/// Run the compress command.
pub fn run(args: CompressArgs) -> Result<(), CliError> {
    let config = EngineConfig::default()
        .with_parallel_jobs(!args.serial)
        .with_worker_cap(args.workers)
        .with_perceptual_metrics(args.perceptual);
    let orchestrator = Orchestrator::new(Arc::new(ReferenceCodec::new()), &config);

    let grouping = match args.texture_type {
        TextureTypeArg::TwoD => Grouping::Individual,
        _ => Grouping::Array,
    };
    let mut request = CompressionRequest::new(args.sources, args.output_dir)
        .with_encoding(args.encoding.into())
        .with_container_target(args.container.into())
        .with_texture_type(args.texture_type.into())
        .with_grouping(grouping)
        .with_mip_levels(args.mips);
    request.alpha_sources = args.alpha_sources;
    request.params.quality = args.quality;
    request.y_flip = args.y_flip;
    request.global_codebook = args.global_codebook;
    request.csv_path = args.csv;
    if args.texture_type == TextureTypeArg::Video {
        request.us_per_frame = args.us_per_frame;
    }

    let outcome = orchestrator.submit_batch(&request)?;
    for result in &outcome.results {
        match (&result.state, &result.output) {
            (JobState::Succeeded, Some(path)) => {
                println!("{} ({} bytes)", path.display(), result.container_bytes);
            }
            (JobState::Queued, _) => println!("job {}: not started (batch aborted)", result.job_index),
            _ => {
                if let Some(error) = &result.error {
                    eprintln!("job {}: {error}", result.job_index);
                }
            }
        }
    }
    println!(
        "{} succeeded, {} failed; {:.2} mean bits/texel",
        outcome.succeeded(),
        outcome.failed(),
        outcome.summary.mean_bits_per_texel
    );

    if outcome.failed() > 0 {
        return Err(CliError::Batch {
            failed: outcome.failed(),
            total: outcome.results.len(),
        });
    }
    Ok(())
}
