//! Language data provisioning
//!
//! Tesseract loads `<data_path>/tessdata/<lang>.traineddata`. Bundled models
//! are copied there on first run; files already present are left alone.

use crate::error::TessdataError;
use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

pub const TESSDATA_DIR: &str = "tessdata";
const TRAINEDDATA_EXT: &str = "traineddata";

/// Default data path, mirroring where the `tesseract-rs` build script caches
/// its downloads. The `tessdata/` directory lives beneath it.
pub fn default_data_path() -> Result<PathBuf> {
    let base_path = if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").context("HOME env var not set")?;
        PathBuf::from(home).join("Library").join("Application Support")
    } else if cfg!(target_os = "windows") {
        let appdata = std::env::var("APPDATA").context("APPDATA env var not set")?;
        PathBuf::from(appdata)
    } else {
        let home = std::env::var("HOME").context("HOME env var not set")?;
        PathBuf::from(home).join(".tesseract-rs")
    };
    Ok(base_path.join("tesseract-rs"))
}

/// Path of the model file for `language` under `data_path`.
pub fn model_path(data_path: &Path, language: &str) -> PathBuf {
    data_path
        .join(TESSDATA_DIR)
        .join(format!("{language}.{TRAINEDDATA_EXT}"))
}

/// Creates `<data_path>/tessdata` and copies every bundled `.traineddata`
/// file from `assets` that is not already there. Returns the names copied.
pub fn prepare(data_path: &Path, assets: Option<&Path>) -> Result<Vec<String>, TessdataError> {
    let target_dir = data_path.join(TESSDATA_DIR);
    if !target_dir.is_dir() {
        fs::create_dir_all(&target_dir).map_err(|source| TessdataError::CreateDir {
            path: target_dir.clone(),
            source,
        })?;
        info!("Created directory {:?}", target_dir);
    }

    let Some(assets) = assets else {
        return Ok(Vec::new());
    };

    let entries = fs::read_dir(assets).map_err(|source| TessdataError::ListAssets {
        path: assets.to_path_buf(),
        source,
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| TessdataError::ListAssets {
            path: assets.to_path_buf(),
            source,
        })?;
        let from = entry.path();
        if from.extension().and_then(|e| e.to_str()) != Some(TRAINEDDATA_EXT) || !from.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let to = target_dir.join(&file_name);
        if to.exists() {
            debug!("{:?} already present, skipping", to);
            continue;
        }
        fs::copy(&from, &to).map_err(|source| TessdataError::Copy {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        info!("Copied {:?} to tessdata", file_name);
        copied.push(file_name.to_string_lossy().into_owned());
    }
    copied.sort();
    Ok(copied)
}
