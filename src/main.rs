//! BirdsEye - Inverse perspective mapping for forward-facing cameras
//!
//! This application captures video from a camera, converts each frame to a
//! top-down (bird's-eye) view of the ground plane using a precomputed mapping
//! table, and outputs the result to a virtual camera device for lane and
//! obstacle detection to consume. The table is rebuilt whenever the vanishing
//! point is adjusted from the web UI.

mod calibration;
mod capture;
mod color;
mod config;
mod error;
mod frame;
mod geometry;
mod offline;
mod output;
mod preview;
mod remap;
mod server;
mod table;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::geometry::VanishingPoint;

/// BirdsEye - bird's-eye view of a forward-facing camera
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "birdseye.toml")]
    config: PathBuf,

    /// Input video device (overrides the config file)
    #[arg(short, long)]
    input: Option<String>,

    /// Output video device (overrides the config file)
    #[arg(short, long)]
    output: Option<String>,

    /// Web server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Render an image, or a directory of frames, instead of running the camera pipeline
    #[arg(long, requires = "save")]
    image: Option<PathBuf>,

    /// Where to write the rendered image, or the output directory for frames
    #[arg(long)]
    save: Option<PathBuf>,

    /// Vanishing point x for --image (defaults to the configured one)
    #[arg(long, requires = "vp_y", allow_hyphen_values = true)]
    vp_x: Option<i32>,

    /// Vanishing point y for --image
    #[arg(long, requires = "vp_x", allow_hyphen_values = true)]
    vp_y: Option<i32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("BirdsEye v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let mut config = config::Config::load_or_create(&args.config)?;

    if let Some(input) = args.image.as_deref() {
        let vp = args.vp_x.zip(args.vp_y).map(|(x, y)| VanishingPoint::new(x, y));
        let save = args.save.as_deref().context("--save is required with --image")?;
        return offline::render(&config, input, save, vp);
    }

    // CLI args override config file values
    if let Some(input) = args.input {
        config.video.input_device = input;
    }
    if let Some(output) = args.output {
        config.output.device = output;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Input device: {}", config.video.input_device);
    info!("Output device: {}", config.output.device);
    info!(
        "Source {} -> bird's-eye {}",
        config.source_size(),
        config.destination_size()
    );

    let video = config.video.clone();
    let output = config.output.clone();
    let host = config.server.host.clone();
    let port = config.server.port;

    let config = Arc::new(parking_lot::RwLock::new(config));

    // Shared state holds the live mapping table
    let state = Arc::new(
        server::AppState::new(config.clone(), args.config.clone())
            .context("Invalid frame sizes in configuration")?,
    );

    // Start the video processing pipeline
    let pipeline_state = state.clone();
    let pipeline_handle = tokio::task::spawn_blocking(move || {
        capture::run_pipeline(&video, &output, pipeline_state)
    });

    // Start the web server
    let addr = format!("{}:{}", host, port);
    info!("Starting web server at http://{}", addr);

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        server::run_server(&addr, server_state).await
    });

    // Wait for either to finish (or error)
    tokio::select! {
        result = pipeline_handle => {
            match result {
                Ok(Ok(())) => info!("Pipeline exited normally"),
                Ok(Err(e)) => tracing::error!("Pipeline error: {:#}", e),
                Err(e) => tracing::error!("Pipeline task panicked: {}", e),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => tracing::error!("Server error: {:#}", e),
                Err(e) => tracing::error!("Server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
