//! Livetext - Core Library
//!
//! Live-feed OCR. A frame source delivers preview frames on the presentation
//! thread, a single-slot mailbox hands the freshest one to a background
//! recognition worker, and results travel back through a dispatcher so
//! listeners always run on the presentation thread.
//!
//! `run` drives a headless session from a video file or still image and
//! prints recognized text and region overlays as JSON lines.

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Serialize;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

pub mod decode;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod mailbox;
pub mod session;
pub mod source;
pub mod tessdata;
pub mod worker;

pub use dispatch::{Dispatcher, RegionBatch, ResultSink, WorkerEvent};
pub use engine::{RecognitionEngine, TesseractEngine};
pub use error::{CaptureError, DecodeError, EngineError, SessionError, TessdataError, WorkerError};
pub use frame::{Frame, PixelFormat, RgbFrame};
pub use geometry::{DisplayRect, DisplayScale, FocusArea, Resolution, Rotation, TextRegion};
pub use mailbox::FrameSlot;
pub use session::{CaptureSession, Controls, Overlay, SessionReport, SessionSettings, SessionStats};
pub use source::{Flow, FrameSource, StillImageSource, VideoFileSource};
pub use worker::{RecognitionWorker, WorkerHandle, WorkerReport, WorkerSettings, WorkerState};

/// How long to keep pumping results once the source has run dry.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Application configuration structure.
#[derive(Debug)]
pub struct Config {
    pub input_file: PathBuf,
    pub lang: String,
    /// Directory holding `tessdata/`.
    pub data_path: PathBuf,
    /// Bundled `*.traineddata` files to install into `data_path`.
    pub assets_dir: Option<PathBuf>,
    pub display: Option<Resolution>,
    pub rotation: Rotation,
    pub show_regions: bool,
    /// Arm a text request every N captured frames.
    pub recognize_every: Option<u64>,
    pub max_frames: Option<u64>,
    pub poll_interval: Duration,
    /// How many times a still image is delivered.
    pub image_repeat: usize,
    /// Minimum spacing between still image frames.
    pub image_interval: Option<Duration>,
    /// Replay video at its own frame rate.
    pub realtime: bool,
}

/// One line of output.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Regions { frame: u64, regions: &'a [DisplayRect] },
    Text { request: u64, text: String },
    Summary(SessionReport),
}

fn emit(record: &Record<'_>) {
    match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("Failed to serialize output record: {}", e),
    }
}

fn is_still_image(path: &std::path::Path) -> bool {
    image::ImageFormat::from_path(path).is_ok()
}

/// The main function that drives a capture session over the input file.
pub fn run(config: Config) -> Result<()> {
    info!("Initializing live OCR with config: {:?}", config);

    // 1. Install language data
    let copied = tessdata::prepare(&config.data_path, config.assets_dir.as_deref())
        .context("Failed to prepare language data")?;
    if !copied.is_empty() {
        info!("Installed language data: {}", copied.join(", "));
    }

    // 2. Open the frame source and drive the session
    let report = if is_still_image(&config.input_file) {
        let mut source = StillImageSource::open(&config.input_file, config.image_repeat)
            .context("Failed to open input image")?
            .with_rotation(config.rotation);
        if let Some(interval) = config.image_interval {
            source = source.with_interval(interval);
        }
        let pb = progress_bar(Some(config.image_repeat as u64));
        drive(source, &config, &pb)?
    } else {
        let source = VideoFileSource::open(&config.input_file)
            .context("Failed to open input video")?
            .with_rotation(config.rotation)
            .with_realtime(config.realtime);
        let pb = progress_bar(source.frame_count());
        drive(source, &config, &pb)?
    };

    // 3. Summarize
    emit(&Record::Summary(report));
    info!(
        "Recognized {} of {} captured frames ({} dropped, {} failed)",
        report.worker.frames_processed, report.frames_captured, report.frames_dropped, report.worker.frames_failed
    );
    Ok(())
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    let pb = match total {
        Some(count) if count > 0 => {
            let bar = ProgressBar::new(count);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} Capturing frames [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) [{elapsed_precise}<{eta}]")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            bar
        }
        _ => {
            warn!("Could not determine total frame count. Using spinner as fallback.");
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} Capturing frames... [{elapsed_precise}] {pos} frames captured")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    };
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn drive<S: FrameSource>(source: S, config: &Config, pb: &ProgressBar) -> Result<SessionReport> {
    let settings = SessionSettings {
        display: config.display,
        worker: WorkerSettings {
            data_path: config.data_path.clone(),
            language: config.lang.clone(),
            poll_interval: config.poll_interval,
            ..WorkerSettings::default()
        },
        max_frames: config.max_frames,
    };
    let mut session =
        CaptureSession::open(source, TesseractEngine::new(), settings).context("Failed to start capture session")?;

    let engine_failed = Rc::new(Cell::new(false));
    let failed = engine_failed.clone();
    session.set_event_listener(move |event| match event {
        WorkerEvent::EngineFailed(_) => failed.set(true),
    });

    if config.show_regions {
        session.controls().show_text_bounds(|overlay| {
            emit(&Record::Regions {
                frame: overlay.frame,
                regions: &overlay.rects,
            });
        });
    }

    let mut requests = 0u64;
    let stats = session
        .run_with(|controls| {
            pb.inc(1);
            if engine_failed.get() {
                return Flow::Stop;
            }
            let due = config
                .recognize_every
                .is_some_and(|n| n > 0 && controls.stats().frames_captured % n == 0);
            if due && !controls.text_request_pending() {
                requests += 1;
                let request = requests;
                controls.make_ocr(move |text| emit(&Record::Text { request, text }));
            }
            Flow::Continue
        })
        .context("Frame stream failed")?;
    pb.finish_with_message(format!("Captured {} frames", stats.frames_captured));

    if !engine_failed.get() && !session.settle(SETTLE_TIMEOUT) {
        warn!("Recognition did not catch up within {:?}; pending results are discarded", SETTLE_TIMEOUT);
    }
    let report = session.close().context("Failed to shut down capture session")?;
    if engine_failed.get() {
        bail!("Recognition engine for '{}' could not be initialized", config.lang);
    }
    Ok(report)
}
