//! Error types
//!
//! One enum per concern. Orchestration code (`run`, the binary) wraps these in
//! `anyhow` with context; the core modules return them directly so callers can
//! tell a dead capture device apart from a bad frame.

use std::path::PathBuf;
use thiserror::Error;

/// Failures acquiring or driving a frame source. Fatal to the capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open frame source {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("frame source reports no supported resolutions")]
    NoResolutions,
    #[error("frame source does not support {width}x{height}")]
    UnsupportedResolution { width: u32, height: u32 },
    #[error("frame source is not configured")]
    NotConfigured,
    #[error("frame stream failed: {0}")]
    Stream(#[source] anyhow::Error),
}

/// Failures reported by a recognition engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("language data for '{language}' not found under {path:?}")]
    MissingLanguageData { path: PathBuf, language: String },
    #[error("engine initialization failed: {0}")]
    Init(String),
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("engine rejected image: {0}")]
    SetImage(String),
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// Failures preparing the on-disk language data directory.
#[derive(Debug, Error)]
pub enum TessdataError {
    #[error("could not create directory {path:?}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not list bundled assets in {path:?}")]
    ListAssets {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not copy {from:?} to {to:?}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures converting raw sensor bytes to an image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("raw frame holds {actual} bytes, {expected} expected for {width}x{height}")]
    BufferTooSmall {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("{width}x{height} is not a valid size for this pixel format")]
    Dimensions { width: u32, height: u32 },
}

/// Failures managing the recognition worker thread.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("could not spawn recognition worker thread")]
    Spawn(#[source] std::io::Error),
    #[error("recognition worker thread panicked")]
    Panicked,
}

/// Failures of a capture session as a whole.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
