//! Capture Session
//!
//! The presentation-side controller. It owns the frame source and the
//! dispatcher, runs on the thread that receives frames, and keeps the
//! recognition worker's lifetime in lockstep with the source: the worker
//! starts once the source is configured and is joined before the source's
//! buffers are released.

use crate::decode::decode_into;
use crate::dispatch::{Dispatcher, RequestId, WorkerEvent};
use crate::engine::RecognitionEngine;
use crate::error::SessionError;
use crate::frame::PixelFormat;
use crate::geometry::{DisplayRect, DisplayScale, FocusArea, Resolution, best_resolution, focus_for_tap};
use crate::mailbox::FrameSlot;
use crate::source::{Flow, FrameSource};
use crate::worker::{RecognitionWorker, WorkerHandle, WorkerReport, WorkerSettings, WorkerState};
use log::{debug, info, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    /// Size of the surface regions are drawn on. Defaults to the upright
    /// capture size.
    pub display: Option<Resolution>,
    pub worker: WorkerSettings,
    /// Stop streaming after this many frames.
    pub max_frames: Option<u64>,
}

/// Text bounds currently drawn over the preview, in display coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Overlay {
    pub frame: u64,
    pub rects: Vec<DisplayRect>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_captured: u64,
    pub decode_errors: u64,
}

/// Summary returned by [`CaptureSession::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub capture: Resolution,
    pub frames_captured: u64,
    pub decode_errors: u64,
    /// Frames overwritten in the mailbox before the worker got to them.
    pub frames_dropped: u64,
    pub worker: WorkerReport,
}

/// The UI surface: one-shot recognition trigger and the text-bounds toggle.
pub struct Controls<'a> {
    dispatcher: &'a mut Dispatcher,
    overlay: &'a Rc<RefCell<Overlay>>,
    scale: DisplayScale,
    stats: SessionStats,
}

impl Controls<'_> {
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Arms a one-shot request: `listener` receives the text of the next
    /// frame the worker recognizes.
    pub fn make_ocr<F>(&mut self, listener: F) -> RequestId
    where
        F: FnOnce(String) + 'static,
    {
        self.dispatcher.request_text(listener)
    }

    pub fn text_request_pending(&self) -> bool {
        self.dispatcher.has_pending_text_request()
    }

    /// Toggles text-bounds drawing. The overlay is cleared either way.
    pub fn set_show_text_bounds(&mut self, show: bool) {
        if show {
            self.show_text_bounds(|_| {});
        } else {
            *self.overlay.borrow_mut() = Overlay::default();
            self.dispatcher.clear_regions_listener();
        }
    }

    /// Shows text bounds and calls `on_update` whenever the overlay changes.
    pub fn show_text_bounds<F>(&mut self, mut on_update: F)
    where
        F: FnMut(&Overlay) + 'static,
    {
        *self.overlay.borrow_mut() = Overlay::default();
        let overlay = self.overlay.clone();
        let scale = self.scale;
        self.dispatcher.set_regions_listener(move |batch| {
            let updated = Overlay {
                frame: batch.frame,
                rects: batch.regions.iter().map(|r| scale.apply(r)).collect(),
            };
            *overlay.borrow_mut() = updated.clone();
            on_update(&updated);
        });
    }

    pub fn showing_text_bounds(&self) -> bool {
        self.dispatcher.has_regions_listener()
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay.borrow().clone()
    }
}

pub struct CaptureSession<S> {
    // Declared first so an unclosed session joins the worker before the
    // source and frame buffers are dropped.
    worker: Option<WorkerHandle>,
    source: S,
    capture: Resolution,
    display: Resolution,
    format: PixelFormat,
    scale: DisplayScale,
    slot: Arc<FrameSlot>,
    dispatcher: Dispatcher,
    overlay: Rc<RefCell<Overlay>>,
    stats: SessionStats,
    max_frames: Option<u64>,
    poll_interval: Duration,
}

impl<S: FrameSource> CaptureSession<S> {
    /// Negotiates and configures the source, then starts the worker. A source
    /// that cannot be configured aborts the session before any thread starts.
    pub fn open<E>(mut source: S, engine: E, settings: SessionSettings) -> Result<Self, SessionError>
    where
        E: RecognitionEngine + 'static,
    {
        let capture = best_resolution(&source.supported_resolutions())?;
        source.configure(capture)?;

        let rotation = source.rotation();
        let display = settings.display.unwrap_or_else(|| rotation.apply(capture));
        let scale = DisplayScale::new(display, capture, rotation);
        info!(
            "Capturing {} {:?} frames, rotation {:?}, display {}",
            capture,
            source.pixel_format(),
            rotation,
            display
        );

        let slot = Arc::new(FrameSlot::new());
        let dispatcher = Dispatcher::new();
        let poll_interval = settings.worker.poll_interval;
        let worker_settings = WorkerSettings {
            rotation,
            ..settings.worker
        };
        let worker = RecognitionWorker::new(engine, slot.clone(), dispatcher.sink(), worker_settings).start()?;

        Ok(Self {
            format: source.pixel_format(),
            source,
            capture,
            display,
            scale,
            slot,
            dispatcher,
            overlay: Rc::new(RefCell::new(Overlay::default())),
            worker: Some(worker),
            stats: SessionStats::default(),
            max_frames: settings.max_frames,
            poll_interval,
        })
    }

    pub fn capture_resolution(&self) -> Resolution {
        self.capture
    }

    pub fn display_scale(&self) -> DisplayScale {
        self.scale
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker
            .as_ref()
            .map_or(WorkerState::Stopped, WorkerHandle::state)
    }

    pub fn controls(&mut self) -> Controls<'_> {
        Controls {
            dispatcher: &mut self.dispatcher,
            overlay: &self.overlay,
            scale: self.scale,
            stats: self.stats,
        }
    }

    /// Receives worker conditions such as an engine that failed to load.
    pub fn set_event_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&WorkerEvent) + 'static,
    {
        self.dispatcher.set_event_listener(listener);
    }

    /// Tap-to-focus at display point (`x`, `y`).
    pub fn tap(&mut self, x: f32, y: f32) -> Option<FocusArea> {
        let area = focus_for_tap(x, y, self.display)?;
        match self.source.focus(&area) {
            Ok(true) => debug!("Focusing on {:?}", area.area),
            Ok(false) => debug!("Frame source has no focus control"),
            Err(e) => warn!("Focus request failed: {}", e),
        }
        Some(area)
    }

    /// Delivers queued worker results on this thread.
    pub fn pump(&mut self) -> usize {
        self.dispatcher.dispatch_pending()
    }

    pub fn run(&mut self) -> Result<SessionStats, SessionError> {
        self.run_with(|_| Flow::Continue)
    }

    /// Streams frames into the mailbox until the source ends, `max_frames` is
    /// reached or `before_frame` returns [`Flow::Stop`]. `before_frame` runs
    /// ahead of each frame's publish, so a request armed there is served by
    /// that frame at the earliest.
    pub fn run_with<F>(&mut self, mut before_frame: F) -> Result<SessionStats, SessionError>
    where
        F: FnMut(&mut Controls<'_>) -> Flow,
    {
        let slot = &self.slot;
        let dispatcher = &mut self.dispatcher;
        let overlay = &self.overlay;
        let stats = &mut self.stats;
        let (capture, format, scale, max_frames) = (self.capture, self.format, self.scale, self.max_frames);

        self.source.stream(&mut |raw: &[u8]| {
            if max_frames.is_some_and(|max| stats.frames_captured >= max) {
                return Flow::Stop;
            }
            let mut controls = Controls {
                dispatcher: &mut *dispatcher,
                overlay,
                scale,
                stats: *stats,
            };
            if before_frame(&mut controls) == Flow::Stop {
                return Flow::Stop;
            }

            let mut frame = slot.acquire(capture.width, capture.height);
            match decode_into(format, raw, &mut frame.image) {
                Ok(()) => {
                    frame.captured_at = Instant::now();
                    slot.publish(frame);
                    stats.frames_captured += 1;
                }
                Err(e) => {
                    warn!("Dropping undecodable frame: {}", e);
                    stats.decode_errors += 1;
                    slot.recycle(frame);
                }
            }

            dispatcher.dispatch_pending();
            Flow::Continue
        })?;

        self.dispatcher.dispatch_pending();
        Ok(self.stats)
    }

    /// Keeps pumping results until the worker has taken the last frame and
    /// any text request is answered, or `timeout` passes.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.dispatcher.dispatch_pending();
            if !self.slot.has_new_frame() && !self.dispatcher.has_pending_text_request() {
                return true;
            }
            if Instant::now() >= deadline || self.worker_state() != WorkerState::Running {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Drops all listeners, stops and joins the worker, then releases the
    /// frame buffers. Results still in flight are discarded.
    pub fn close(mut self) -> Result<SessionReport, SessionError> {
        self.dispatcher.clear_all();
        let worker = match self.worker.take() {
            Some(handle) => handle.stop()?,
            None => WorkerReport::default(),
        };
        self.slot.clear();
        self.dispatcher.dispatch_pending();

        let report = SessionReport {
            capture: self.capture,
            frames_captured: self.stats.frames_captured,
            decode_errors: self.stats.decode_errors,
            frames_dropped: self.slot.dropped(),
            worker,
        };
        info!("Capture session closed: {:?}", report);
        Ok(report)
    }
}
