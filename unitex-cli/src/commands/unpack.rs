//! Unpack command - transcode an existing container across the GPU
//! target formats.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use unitex::codec::ReferenceCodec;
use unitex::orchestrator::Orchestrator;
use unitex::{EngineConfig, TranscodeOptions, UnpackRequest};

use super::common::parse_target;
use crate::error::CliError;

/// Arguments for the unpack command.
#[derive(Debug, Args)]
pub struct UnpackArgs {
    /// Container file (.utex or .ktx2)
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Only produce ETC1 RGB
    #[arg(long)]
    pub etc1_only: bool,

    /// Restrict to these formats (names as printed in reports)
    #[arg(long = "format")]
    pub formats: Vec<String>,

    /// Also decode each level back to PNG rasters
    #[arg(long)]
    pub raster: bool,

    /// Container holding the shared codebook, for inputs that
    /// reference a global codebook
    #[arg(long)]
    pub global_codebook: Option<PathBuf>,

    /// Write a per-unit CSV report to this path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Worker thread cap (0 = hardware concurrency)
    #[arg(long, default_value_t = 0)]
    pub workers: u32,
}

/// Run the unpack command.
pub fn run(args: UnpackArgs) -> Result<(), CliError> {
    let restrict_formats = if args.formats.is_empty() {
        None
    } else {
        Some(
            args.formats
                .iter()
                .map(|name| parse_target(name))
                .collect::<Result<Vec<_>, _>>()?,
        )
    };

    let config = EngineConfig::default().with_worker_cap(args.workers);
    let orchestrator = Orchestrator::new(Arc::new(ReferenceCodec::new()), &config);
    let outcome = orchestrator.run_unpack(&UnpackRequest {
        input: args.input,
        output_dir: args.output_dir,
        options: TranscodeOptions {
            etc1_only: args.etc1_only,
            restrict_formats,
        },
        unpack_raster: args.raster,
        global_codebook: args.global_codebook,
        csv_path: args.csv,
    })?;

    for file in &outcome.files {
        println!("{}", file.display());
    }
    for skip in &outcome.skipped_units {
        println!(
            "skipped {}: image {} is {}x{} (not power-of-two)",
            skip.target.short_name(),
            skip.image_index,
            skip.width,
            skip.height
        );
    }
    for target in &outcome.skipped_unpacks {
        println!("no raster decoder for {}, blocks only", target.short_name());
    }
    for (target, elapsed) in &outcome.format_times {
        println!(
            "{}: {:.2} ms transcode",
            target.short_name(),
            elapsed.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
