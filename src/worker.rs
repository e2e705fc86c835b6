//! Recognition Worker
//!
//! One background thread that waits for frames in the [`FrameSlot`], rotates
//! each claimed frame, runs it through the engine and sends the results to the
//! dispatcher. The lifecycle is `Created -> Running -> Stopping -> Stopped`;
//! [`RecognitionWorker::start`] and [`WorkerHandle::stop`] consume their
//! receivers, so a stopped worker cannot be restarted.
//!
//! Stopping is cooperative: the run flag is checked once per iteration, and an
//! engine call already in progress is allowed to finish.

use crate::dispatch::{RegionBatch, ResultSink, WorkerEvent};
use crate::engine::RecognitionEngine;
use crate::error::{EngineError, WorkerError};
use crate::frame::RgbFrame;
use crate::geometry::Rotation;
use crate::mailbox::FrameSlot;
use crate::tessdata;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const THREAD_NAME: &str = "ocr-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Directory containing `tessdata/`.
    pub data_path: PathBuf,
    /// Tesseract language code, e.g. "eng" or "ukr".
    pub language: String,
    /// Upper bound on how long the worker waits for a frame before
    /// re-checking its run flag.
    pub poll_interval: Duration,
    /// Turn applied to every claimed frame before recognition.
    pub rotation: Rotation,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            data_path: tessdata::default_data_path().unwrap_or_else(|_| PathBuf::from(".")),
            language: "eng".to_string(),
            poll_interval: Duration::from_millis(10),
            rotation: Rotation::Clockwise90,
        }
    }
}

/// Counters returned when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub engine_ready: bool,
    pub frames_processed: u64,
    pub frames_failed: u64,
    /// Frames claimed while the engine was unavailable.
    pub frames_skipped: u64,
    pub region_batches: u64,
    pub texts: u64,
}

struct Shared {
    run: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> WorkerState {
        self.state.load(Ordering::Acquire).into()
    }
}

/// A worker that has not been started yet.
pub struct RecognitionWorker<E> {
    engine: E,
    slot: Arc<FrameSlot>,
    sink: ResultSink,
    settings: WorkerSettings,
    shared: Arc<Shared>,
}

impl<E: RecognitionEngine + 'static> RecognitionWorker<E> {
    pub fn new(engine: E, slot: Arc<FrameSlot>, sink: ResultSink, settings: WorkerSettings) -> Self {
        Self {
            engine,
            slot,
            sink,
            settings,
            shared: Arc::new(Shared {
                run: AtomicBool::new(false),
                state: AtomicU8::new(WorkerState::Created as u8),
            }),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Spawns the worker thread. Engine initialization happens on that thread.
    pub fn start(self) -> Result<WorkerHandle, WorkerError> {
        let shared = self.shared.clone();
        shared.run.store(true, Ordering::Release);
        shared.set_state(WorkerState::Running);

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                shared.run.store(false, Ordering::Release);
                shared.set_state(WorkerState::Stopped);
                WorkerError::Spawn(e)
            })?;

        info!("Recognition worker started");
        Ok(WorkerHandle {
            shared,
            thread: Some(thread),
        })
    }

    fn running(&self) -> bool {
        self.shared.run.load(Ordering::Acquire)
    }

    fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport::default();

        if self.running() {
            let started = Instant::now();
            match self
                .engine
                .initialize(&self.settings.data_path, &self.settings.language)
            {
                Ok(()) => {
                    report.engine_ready = true;
                    info!("Recognition engine ready in {:.2?}", started.elapsed());
                }
                Err(e) => {
                    error!("Recognition engine failed to initialize: {}", e);
                    self.sink.report(WorkerEvent::EngineFailed(e));
                }
            }
        }

        while self.running() {
            let Some(frame) = self.slot.claim_timeout(self.settings.poll_interval) else {
                continue;
            };
            let sequence = frame.sequence;
            debug!("Frame {} claimed {:.2?} after capture", sequence, frame.captured_at.elapsed());
            let working = frame.working_copy(self.settings.rotation);
            self.slot.recycle(frame);

            if !report.engine_ready {
                report.frames_skipped += 1;
                continue;
            }

            match self.recognize(sequence, &working, &mut report) {
                Ok(()) => report.frames_processed += 1,
                Err(e) => {
                    report.frames_failed += 1;
                    warn!("Skipping frame {}: {}", sequence, e);
                }
            }
        }

        self.shared.set_state(WorkerState::Stopping);
        if report.engine_ready {
            self.engine.shutdown();
        }
        debug!("Recognition worker exiting: {:?}", report);
        report
    }

    fn recognize(&mut self, frame: u64, image: &RgbFrame, report: &mut WorkerReport) -> Result<(), EngineError> {
        self.engine.set_image(image)?;

        if let Some(subscription) = self.sink.subscriptions().region_subscription() {
            let regions = self.engine.text_regions()?;
            debug!("Frame {}: {} text regions", frame, regions.len());
            if self.sink.send_regions(subscription, RegionBatch { frame, regions }) {
                report.region_batches += 1;
            }
        }

        if let Some(request) = self.sink.subscriptions().take_text_request() {
            match self.engine.text() {
                Ok(text) => {
                    debug!("Frame {}: recognized {} chars for request #{}", frame, text.len(), request);
                    if self.sink.send_text(request, frame, text) {
                        report.texts += 1;
                    }
                }
                Err(e) => {
                    self.sink.subscriptions().restore_text_request(request);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// A running worker. Dropping the handle stops and joins the thread.
pub struct WorkerHandle {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<WorkerReport>>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Requests a stop and blocks until the worker thread has exited. Once
    /// this returns the worker will not touch the frame slot again.
    pub fn stop(mut self) -> Result<WorkerReport, WorkerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<WorkerReport, WorkerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(WorkerReport::default());
        };
        self.shared.run.store(false, Ordering::Release);
        if self.shared.state() == WorkerState::Running {
            self.shared.set_state(WorkerState::Stopping);
        }

        let result = thread.join().map_err(|_| WorkerError::Panicked);
        self.shared.set_state(WorkerState::Stopped);
        if let Ok(report) = &result {
            info!(
                "Recognition worker stopped: {} processed, {} failed, {} skipped",
                report.frames_processed, report.frames_failed, report.frames_skipped
            );
        }
        result
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.shutdown() {
                error!("Recognition worker ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::geometry::TextRegion;
    use std::path::Path;

    #[derive(Default)]
    struct CountingEngine {
        fail_init: bool,
        panic_on_image: bool,
        inits: Arc<AtomicU8>,
        shutdowns: Arc<AtomicU8>,
    }

    impl RecognitionEngine for CountingEngine {
        fn initialize(&mut self, _: &Path, _: &str) -> Result<(), EngineError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                Err(EngineError::Init("no model".into()))
            } else {
                Ok(())
            }
        }

        fn set_image(&mut self, _: &RgbFrame) -> Result<(), EngineError> {
            assert!(!self.panic_on_image, "engine blew up");
            Ok(())
        }

        fn text_regions(&mut self) -> Result<Vec<TextRegion>, EngineError> {
            Ok(vec![TextRegion::new(1, 2, 3, 4)])
        }

        fn text(&mut self) -> Result<String, EngineError> {
            Ok("text".into())
        }

        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            data_path: PathBuf::from("unused"),
            language: "eng".into(),
            poll_interval: Duration::from_millis(2),
            rotation: Rotation::Clockwise90,
        }
    }

    #[test]
    fn immediate_stop_tears_down_at_most_once() {
        let engine = CountingEngine::default();
        let (inits, shutdowns) = (engine.inits.clone(), engine.shutdowns.clone());
        let dispatcher = Dispatcher::new();
        let worker = RecognitionWorker::new(engine, Arc::new(FrameSlot::new()), dispatcher.sink(), settings());
        assert_eq!(worker.state(), WorkerState::Created);

        let handle = worker.start().unwrap();
        let report = handle.stop().unwrap();

        let inits = inits.load(Ordering::SeqCst);
        let shutdowns = shutdowns.load(Ordering::SeqCst);
        assert!(shutdowns <= 1);
        assert_eq!(shutdowns, inits);
        assert_eq!(report.engine_ready, inits == 1);
        assert_eq!(report.frames_processed, 0);
    }

    #[test]
    fn failed_initialization_is_reported_and_never_torn_down() {
        let engine = CountingEngine { fail_init: true, ..Default::default() };
        let shutdowns = engine.shutdowns.clone();
        let mut dispatcher = Dispatcher::new();
        let failures = Arc::new(AtomicU8::new(0));
        let f = failures.clone();
        dispatcher.set_event_listener(move |event| {
            if matches!(event, WorkerEvent::EngineFailed(_)) {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        let slot = Arc::new(FrameSlot::new());
        let handle = RecognitionWorker::new(engine, slot.clone(), dispatcher.sink(), settings())
            .start()
            .unwrap();

        // Wait for the failure report before feeding a frame.
        let deadline = Instant::now() + Duration::from_secs(5);
        while failures.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            dispatcher.dispatch_pending();
            thread::sleep(Duration::from_millis(1));
        }
        slot.publish(slot.acquire(2, 2));
        while slot.has_new_frame() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        let report = handle.stop().unwrap();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(!report.engine_ready);
        assert_eq!(report.frames_skipped, 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_worker_is_reported_by_stop() {
        let engine = CountingEngine { panic_on_image: true, ..Default::default() };
        let dispatcher = Dispatcher::new();
        let slot = Arc::new(FrameSlot::new());
        let handle = RecognitionWorker::new(engine, slot.clone(), dispatcher.sink(), settings())
            .start()
            .unwrap();
        slot.publish(slot.acquire(2, 2));

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
            if handle.thread.as_ref().is_some_and(|t| t.is_finished()) {
                break;
            }
        }
        assert!(matches!(handle.stop(), Err(WorkerError::Panicked)));
    }

    #[test]
    fn state_names_round_trip_through_u8() {
        for state in [
            WorkerState::Created,
            WorkerState::Running,
            WorkerState::Stopping,
            WorkerState::Stopped,
        ] {
            assert_eq!(WorkerState::from(state as u8), state);
        }
    }
}
