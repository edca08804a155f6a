//! unitex CLI - compress images into universal texture containers and
//! transcode them back out to GPU block formats.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{compress, unpack};

#[derive(Debug, Parser)]
#[command(name = "unitex", version, about = "Universal texture compressor and transcoder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compress source images into universal containers
    Compress(compress::CompressArgs),
    /// Transcode an existing container across the GPU target formats
    Unpack(unpack::UnpackArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Compress(args) => compress::run(args),
        Commands::Unpack(args) => unpack::run(args),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
