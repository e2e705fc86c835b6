//! Recognition Engine
//!
//! The worker talks to OCR through [`RecognitionEngine`]: set an image, then
//! query word boxes and/or full text for it. [`TesseractEngine`] is the
//! production implementation on top of `tesseract-rs`.

use crate::error::EngineError;
use crate::frame::RgbFrame;
use crate::geometry::TextRegion;
use crate::tessdata::{self, TESSDATA_DIR};
use log::{debug, info};
use std::path::Path;
use tesseract_rs::{TessPageIteratorLevel, TessPageSegMode, TesseractAPI};

/// A stateful text recognizer. `set_image` must precede every query.
pub trait RecognitionEngine: Send {
    /// One-time setup; may be slow (loads language models).
    fn initialize(&mut self, data_path: &Path, language: &str) -> Result<(), EngineError>;

    fn set_image(&mut self, image: &RgbFrame) -> Result<(), EngineError>;

    /// Word bounding boxes for the current image.
    fn text_regions(&mut self) -> Result<Vec<TextRegion>, EngineError>;

    /// Full UTF-8 text for the current image.
    fn text(&mut self) -> Result<String, EngineError>;

    /// Releases engine resources.
    fn shutdown(&mut self);
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for Box<E> {
    fn initialize(&mut self, data_path: &Path, language: &str) -> Result<(), EngineError> {
        (**self).initialize(data_path, language)
    }

    fn set_image(&mut self, image: &RgbFrame) -> Result<(), EngineError> {
        (**self).set_image(image)
    }

    fn text_regions(&mut self) -> Result<Vec<TextRegion>, EngineError> {
        (**self).text_regions()
    }

    fn text(&mut self) -> Result<String, EngineError> {
        (**self).text()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Tesseract in single-block page segmentation mode.
#[derive(Default)]
pub struct TesseractEngine {
    api: Option<TesseractAPI>,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn api(&self) -> Result<&TesseractAPI, EngineError> {
        self.api.as_ref().ok_or(EngineError::NotInitialized)
    }
}

impl RecognitionEngine for TesseractEngine {
    fn initialize(&mut self, data_path: &Path, language: &str) -> Result<(), EngineError> {
        let model = tessdata::model_path(data_path, language);
        if !model.is_file() {
            return Err(EngineError::MissingLanguageData {
                path: model,
                language: language.to_string(),
            });
        }

        let tessdata_dir = data_path.join(TESSDATA_DIR);
        let api = TesseractAPI::new();
        api.init(&tessdata_dir.to_string_lossy(), language)
            .map_err(|e| EngineError::Init(format!("language '{language}': {e}")))?;
        api.set_page_seg_mode(TessPageSegMode::PSM_SINGLE_BLOCK)
            .map_err(|e| EngineError::Init(e.to_string()))?;

        info!("Tesseract initialized with language '{}' from {:?}", language, tessdata_dir);
        self.api = Some(api);
        Ok(())
    }

    fn set_image(&mut self, image: &RgbFrame) -> Result<(), EngineError> {
        let api = self.api()?;
        api.set_image(
            image.as_raw(),
            image.width() as i32,
            image.height() as i32,
            3,                          // bytes per pixel for RGB
            (image.width() * 3) as i32, // bytes per line
        )
        .map_err(|e| EngineError::SetImage(e.to_string()))
    }

    fn text_regions(&mut self) -> Result<Vec<TextRegion>, EngineError> {
        let api = self.api()?;
        api.recognize()
            .map_err(|e| EngineError::Recognition(e.to_string()))?;
        let iter = api
            .get_iterator()
            .map_err(|e| EngineError::Recognition(e.to_string()))?;

        let mut regions = Vec::new();
        loop {
            if let Ok(bbox) = iter.get_bounding_box(TessPageIteratorLevel::RIL_WORD) {
                regions.push(TextRegion::from(bbox));
            }
            if !iter.next(TessPageIteratorLevel::RIL_WORD).unwrap_or(false) {
                break;
            }
        }
        debug!("Tesseract found {} word regions", regions.len());
        Ok(regions)
    }

    fn text(&mut self) -> Result<String, EngineError> {
        self.api()?
            .get_utf8_text()
            .map_err(|e| EngineError::Recognition(e.to_string()))
    }

    fn shutdown(&mut self) {
        if self.api.take().is_some() {
            info!("Tesseract released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_fail_before_initialization() {
        let mut engine = TesseractEngine::new();
        let image = RgbFrame::new(4, 4);
        assert!(matches!(engine.set_image(&image), Err(EngineError::NotInitialized)));
        assert!(matches!(engine.text(), Err(EngineError::NotInitialized)));
        engine.shutdown();
    }

    #[test]
    fn missing_language_data_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = TesseractEngine::new();
        let err = engine.initialize(dir.path(), "ukr").unwrap_err();
        match err {
            EngineError::MissingLanguageData { path, language } => {
                assert_eq!(language, "ukr");
                assert!(path.ends_with("tessdata/ukr.traineddata"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
