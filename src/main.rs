// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

use cli::{ContentChoice, RunOptions};

#[derive(Parser)]
#[command(name = "facefilter")]
#[command(about = "Real-time AR face-filter renderer")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the GPU adapter the renderer would use
    Info,

    /// Render a synthetic face stream headless
    Run {
        /// Number of frames to render
        #[arg(short, long, default_value = "120")]
        frames: u64,

        /// Viewport width in pixels
        #[arg(long, default_value = "720")]
        width: u32,

        /// Viewport height in pixels
        #[arg(long, default_value = "1280")]
        height: u32,

        /// Save rendered frames as PNG
        #[arg(short, long)]
        save: bool,

        /// Output directory (default: ~/Pictures/facefilter), implies --save
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Content to render over the camera image
        #[arg(short, long, value_enum, default_value_t = ContentChoice::Mask)]
        content: ContentChoice,

        /// Color lookup table strip (N²xN PNG) applied as the world grade
        #[arg(long)]
        lut: Option<PathBuf>,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=facefilter=trace, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info => cli::show_info(),
        Commands::Run {
            frames,
            width,
            height,
            save,
            output,
            content,
            lut,
        } => {
            let output = match output {
                Some(dir) => Some(dir),
                None if save => Some(cli::default_output_dir()),
                None => None,
            };
            cli::run_synthetic(RunOptions {
                frames,
                width,
                height,
                output,
                content,
                lut,
                config_path: cli.config,
            })
        }
        Commands::Config => cli::print_config(cli.config),
    }
}
