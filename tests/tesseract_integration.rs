use image::{ImageBuffer, Rgb};
use livetext::{RecognitionEngine, TesseractEngine, tessdata};

// Needs eng.traineddata under the default data path; run with:
// cargo test --test tesseract_integration -- --ignored
#[test]
#[ignore = "needs Tesseract language data installed locally"]
fn blank_frame_has_no_text() {
    let data_path = tessdata::default_data_path().expect("default data path");
    let mut engine = TesseractEngine::new();
    engine.initialize(&data_path, "eng").expect("engine initializes");

    let blank = ImageBuffer::from_pixel(320, 240, Rgb([255u8, 255, 255]));
    engine.set_image(&blank).expect("image accepted");
    assert!(engine.text_regions().map_or(true, |regions| regions.is_empty()));
    assert!(engine.text().expect("text").trim().is_empty());
    engine.shutdown();
}
