//! Frame Sources
//!
//! A frame source behaves like a camera preview: it negotiates a resolution,
//! then hands raw frames to a callback one at a time through a buffer it
//! reuses for the next frame once the callback returns.
//!
//! [`VideoFileSource`] replays a video file through ffmpeg and delivers NV21
//! preview frames; [`StillImageSource`] repeats a single picture.

use crate::error::CaptureError;
use crate::frame::PixelFormat;
use crate::geometry::{FocusArea, Resolution, Rotation};
use anyhow::{Context, anyhow};
use ffmpeg::format::{Pixel, input};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg_next as ffmpeg;
use image::imageops::{self, FilterType};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// What the frame callback wants the source to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub trait FrameSource {
    /// Preview sizes the source can deliver, in enumeration order.
    fn supported_resolutions(&self) -> Vec<Resolution>;

    fn pixel_format(&self) -> PixelFormat;

    /// Turn frames need before recognition. Camera sensors are mounted in
    /// landscape, so the default is a quarter turn clockwise.
    fn rotation(&self) -> Rotation {
        Rotation::Clockwise90
    }

    fn configure(&mut self, resolution: Resolution) -> Result<(), CaptureError>;

    /// Points focus and metering at `area`. Returns `false` when the source
    /// has no focus control.
    fn focus(&mut self, _area: &FocusArea) -> Result<bool, CaptureError> {
        Ok(false)
    }

    /// Streams frames until the source runs dry or `on_frame` returns
    /// [`Flow::Stop`]. The slice is only valid for the duration of the call.
    fn stream(&mut self, on_frame: &mut dyn FnMut(&[u8]) -> Flow) -> Result<(), CaptureError>;
}

fn check_supported(supported: &[Resolution], resolution: Resolution) -> Result<(), CaptureError> {
    if supported.contains(&resolution) {
        Ok(())
    } else {
        Err(CaptureError::UnsupportedResolution {
            width: resolution.width,
            height: resolution.height,
        })
    }
}

/// Native size followed by half and quarter sizes, rounded down to even.
fn preview_sizes(width: u32, height: u32) -> Vec<Resolution> {
    let mut sizes: Vec<Resolution> = [1u32, 2, 4]
        .into_iter()
        .map(|div| Resolution::new(width / div & !1, height / div & !1))
        .filter(|r| r.area() > 0)
        .collect();
    sizes.dedup();
    sizes
}

/// Sleeps as needed so frames are delivered no faster than `interval`.
struct Pacer {
    interval: Option<Duration>,
    next: Option<Instant>,
}

impl Pacer {
    fn new(interval: Option<Duration>) -> Self {
        Self { interval, next: None }
    }

    fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        if let Some(next) = self.next {
            if next > now {
                thread::sleep(next - now);
            }
        }
        self.next = Some(self.next.map_or(now, |n| n.max(now)) + interval);
    }
}

/// Replays a video file as if it were a camera delivering NV21 preview frames.
pub struct VideoFileSource {
    path: PathBuf,
    native: Resolution,
    frame_interval: Option<Duration>,
    realtime: bool,
    rotation: Rotation,
    configured: Option<Resolution>,
    raw: Vec<u8>,
}

impl VideoFileSource {
    /// Opens `path` and probes its video stream. Initializes ffmpeg.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let open_err = |source: anyhow::Error| CaptureError::Open {
            path: path.to_path_buf(),
            source,
        };
        ffmpeg::init().context("Failed to initialize FFmpeg").map_err(open_err)?;
        let ictx = input(path).context("Failed to open input file").map_err(open_err)?;
        let stream = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| open_err(anyhow!("Could not find video stream in file")))?;

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|c| c.decoder().video())
            .context("Failed to create video decoder")
            .map_err(open_err)?;

        let frame_rate = stream.avg_frame_rate();
        let frame_interval = (frame_rate.0 > 0 && frame_rate.1 > 0)
            .then(|| Duration::from_secs_f64(frame_rate.1 as f64 / frame_rate.0 as f64));

        let native = Resolution::new(decoder.width(), decoder.height());
        info!("Opened {:?}: {} video, frame interval {:?}", path, native, frame_interval);
        Ok(Self {
            path: path.to_path_buf(),
            native,
            frame_interval,
            realtime: false,
            rotation: Rotation::None,
            configured: None,
            raw: Vec::new(),
        })
    }

    /// Deliver frames at the file's frame rate instead of as fast as decoding allows.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Declares how the recorded frames must be turned before recognition.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Frame count from container metadata, or estimated from duration and
    /// frame rate. The estimate can be off for variable frame rate video.
    pub fn frame_count(&self) -> Option<u64> {
        let ictx = input(&self.path).ok()?;
        let stream = ictx.streams().best(Type::Video)?;
        if stream.frames() > 0 {
            return Some(stream.frames() as u64);
        }
        let duration = ictx.duration();
        let frame_rate = stream.avg_frame_rate();
        if duration > 0 && frame_rate.0 > 0 && frame_rate.1 > 0 {
            // Duration is in AV_TIME_BASE units (microseconds).
            let duration_secs = duration as f64 / 1_000_000.0;
            let fps = frame_rate.0 as f64 / frame_rate.1 as f64;
            return Some((duration_secs * fps).round() as u64);
        }
        None
    }

    fn stream_nv21(&mut self, target: Resolution, on_frame: &mut dyn FnMut(&[u8]) -> Flow) -> anyhow::Result<()> {
        let mut ictx = input(&self.path).context("Failed to open input file")?;
        let stream = ictx
            .streams()
            .best(Type::Video)
            .context("Could not find video stream")?;
        let video_stream_index = stream.index();

        let context_decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("Failed to create decoder context")?;
        let mut decoder = context_decoder
            .decoder()
            .video()
            .context("Failed to create video decoder")?;

        let mut scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::NV21,
            target.width,
            target.height,
            Flags::BILINEAR,
        )
        .context("Failed to create scaler")?;

        let mut pacer = Pacer::new(if self.realtime { self.frame_interval } else { None });
        let mut delivered = 0u64;
        let raw = &mut self.raw;

        let mut drain = |decoder: &mut ffmpeg::decoder::Video| -> anyhow::Result<Flow> {
            let mut decoded = Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let mut nv21 = Video::empty();
                scaler.run(&decoded, &mut nv21).context("Scaler failed")?;
                pack_nv21(&nv21, target, raw)?;

                pacer.wait();
                delivered += 1;
                if on_frame(raw.as_slice()) == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() == video_stream_index {
                decoder
                    .send_packet(&packet)
                    .context("Failed to send packet to decoder")?;
                if drain(&mut decoder)? == Flow::Stop {
                    debug!("Frame consumer stopped the stream early");
                    return Ok(());
                }
            }
        }
        decoder.send_eof()?;
        drain(&mut decoder)?;

        info!("Finished streaming {} frames from {:?}", delivered, self.path);
        Ok(())
    }
}

/// Copies the Y and interleaved VU planes of an ffmpeg NV21 frame into a
/// tightly packed buffer, dropping row padding.
fn pack_nv21(frame: &Video, size: Resolution, raw: &mut Vec<u8>) -> anyhow::Result<()> {
    let width = size.width as usize;
    let height = size.height as usize;
    raw.clear();
    raw.reserve(PixelFormat::Nv21.frame_size(size.width, size.height));

    for (plane, rows) in [(0, height), (1, height / 2)] {
        let data = frame.data(plane);
        let stride = frame.stride(plane);
        if stride == 0 {
            return Err(anyhow!("Invalid frame stride"));
        }
        for y in 0..rows {
            let start = y * stride;
            let end = start + width;
            if end > data.len() {
                return Err(anyhow!("Frame data is smaller than expected"));
            }
            raw.extend_from_slice(&data[start..end]);
        }
    }
    Ok(())
}

impl FrameSource for VideoFileSource {
    fn supported_resolutions(&self) -> Vec<Resolution> {
        preview_sizes(self.native.width, self.native.height)
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Nv21
    }

    fn rotation(&self) -> Rotation {
        self.rotation
    }

    fn configure(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        check_supported(&self.supported_resolutions(), resolution)?;
        self.raw = Vec::with_capacity(PixelFormat::Nv21.frame_size(resolution.width, resolution.height));
        self.configured = Some(resolution);
        Ok(())
    }

    fn stream(&mut self, on_frame: &mut dyn FnMut(&[u8]) -> Flow) -> Result<(), CaptureError> {
        let target = self.configured.ok_or(CaptureError::NotConfigured)?;
        self.stream_nv21(target, on_frame).map_err(CaptureError::Stream)
    }
}

/// Delivers one picture as RGB24 frames a fixed number of times.
pub struct StillImageSource {
    image: image::RgbImage,
    repeat: usize,
    interval: Option<Duration>,
    rotation: Rotation,
    configured: Option<image::RgbImage>,
}

impl StillImageSource {
    pub fn open(path: &Path, repeat: usize) -> Result<Self, CaptureError> {
        let image = image::open(path)
            .with_context(|| format!("Failed to load image {:?}", path))
            .map_err(|source| CaptureError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        Ok(Self::from_image(image, repeat))
    }

    pub fn from_image(image: image::RgbImage, repeat: usize) -> Self {
        Self {
            image,
            repeat,
            interval: None,
            rotation: Rotation::None,
            configured: None,
        }
    }

    /// Minimum spacing between delivered frames.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

impl FrameSource for StillImageSource {
    fn supported_resolutions(&self) -> Vec<Resolution> {
        let (w, h) = self.image.dimensions();
        preview_sizes(w, h)
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn rotation(&self) -> Rotation {
        self.rotation
    }

    fn configure(&mut self, resolution: Resolution) -> Result<(), CaptureError> {
        check_supported(&self.supported_resolutions(), resolution)?;
        let scaled = if self.image.dimensions() == (resolution.width, resolution.height) {
            self.image.clone()
        } else {
            imageops::resize(&self.image, resolution.width, resolution.height, FilterType::Triangle)
        };
        self.configured = Some(scaled);
        Ok(())
    }

    fn stream(&mut self, on_frame: &mut dyn FnMut(&[u8]) -> Flow) -> Result<(), CaptureError> {
        let image = self.configured.as_ref().ok_or(CaptureError::NotConfigured)?;
        let mut pacer = Pacer::new(self.interval);
        for _ in 0..self.repeat {
            pacer.wait();
            if on_frame(image.as_raw()) == Flow::Stop {
                break;
            }
        }
        Ok(())
    }
}
