//! Livetext - Main Application Entrypoint
//!
//! Parses command-line arguments, initializes logging and hands a
//! configuration to the core library.

use clap::Parser;
use livetext::{Resolution, Rotation, run, tessdata};
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// Runs live OCR over a video or image as if it were a camera feed, printing
/// recognized text and text regions as JSON lines.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input video or image file
    #[arg(short, long)]
    input: PathBuf,

    /// OCR language (e.g., "eng" for English, "ukr" for Ukrainian)
    #[arg(short, long, default_value_t = String::from("eng"))]
    lang: String,

    /// Directory holding tessdata/ (defaults to the per-user data directory)
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Directory of bundled *.traineddata files to install before starting
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Size of the display surface regions are mapped onto, as WIDTHxHEIGHT
    #[arg(long)]
    display: Option<Resolution>,

    /// How frames must be turned before recognition
    #[arg(long, value_enum, default_value_t = Rotate::None)]
    rotate: Rotate,

    /// Print text region overlays for every recognized frame
    #[arg(long)]
    show_regions: bool,

    /// Request recognized text every N captured frames
    #[arg(long)]
    recognize_every: Option<u64>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// How many times a still image is delivered
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Milliseconds between repeats of a still image
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Replay video at its own frame rate instead of as fast as it decodes
    #[arg(long)]
    realtime: bool,

    /// Worker poll interval in milliseconds
    #[arg(long, default_value_t = 10)]
    poll_ms: u64,

    /// Logging verbosity level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum Rotate {
    None,
    Cw90,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LogLevel {
    Error,
    Info,
    Debug,
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let args = Args::parse();

    // 1. Initialize Logger
    let log_level = match args.log_level {
        LogLevel::Error => "error",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("Starting Livetext...");

    // 2. Validate input
    if !args.input.exists() {
        error!("Input file does not exist: {:?}", args.input);
        std::process::exit(1);
    }
    if args.recognize_every == Some(0) {
        error!("--recognize-every must be at least 1");
        std::process::exit(1);
    }
    let data_path = match args.data_path {
        Some(path) => path,
        None => match tessdata::default_data_path() {
            Ok(path) => path,
            Err(e) => {
                error!("No --data-path given and no default is available: {}", e);
                std::process::exit(1);
            }
        },
    };

    // 3. Create a configuration object from arguments
    let config = livetext::Config {
        input_file: args.input,
        lang: args.lang,
        data_path,
        assets_dir: args.assets,
        display: args.display,
        rotation: match args.rotate {
            Rotate::None => Rotation::None,
            Rotate::Cw90 => Rotation::Clockwise90,
        },
        show_regions: args.show_regions,
        recognize_every: args.recognize_every,
        max_frames: args.max_frames,
        poll_interval: Duration::from_millis(args.poll_ms.max(1)),
        image_repeat: args.repeat,
        image_interval: args.interval_ms.map(Duration::from_millis),
        realtime: args.realtime,
    };

    // 4. Run the main application logic
    if let Err(e) = run(config) {
        error!("Application failed: {:#}", e);
        std::process::exit(2);
    }

    info!("Processing completed successfully.");
}
