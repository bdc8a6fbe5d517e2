use image::{DynamicImage, GrayImage};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use std::path::Path;
use tracing::warn;

/// Single-line text recognition over a preprocessed binary image.
///
/// Implementations must treat internal failure as an empty result: a blank
/// extraction is a normal, expected outcome that validation catches
/// downstream, not an exceptional one.
pub trait TextRecognizer: Send + Sync {
    fn recognize_line(&self, image: &GrayImage) -> String;
}

/// ocrs-backed recognizer. Detection and recognition models are loaded once
/// from the configured directory and shared read-only afterwards.
pub struct OcrsRecognizer {
    engine: OcrEngine,
}

impl OcrsRecognizer {
    pub fn from_dir(models_dir: &Path) -> Result<Self, String> {
        let detection = Model::load_file(models_dir.join("text-detection.rten"))
            .map_err(|e| format!("Failed to load detection model: {}", e))?;
        let recognition = Model::load_file(models_dir.join("text-recognition.rten"))
            .map_err(|e| format!("Failed to load recognition model: {}", e))?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection),
            recognition_model: Some(recognition),
            ..Default::default()
        })
        .map_err(|e| format!("Failed to initialize OCR engine: {}", e))?;

        Ok(Self { engine })
    }
}

impl TextRecognizer for OcrsRecognizer {
    fn recognize_line(&self, image: &GrayImage) -> String {
        let rgb = DynamicImage::ImageLuma8(image.clone()).to_rgb8();

        let source = match ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions()) {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "image rejected by OCR engine");
                return String::new();
            }
        };
        let input = match self.engine.prepare_input(source) {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "failed to prepare OCR input");
                return String::new();
            }
        };

        match self.engine.get_text(&input) {
            // The regions are single-line by construction; anything past the
            // first line is stray noise.
            Ok(text) => text.lines().next().unwrap_or("").trim().to_string(),
            Err(e) => {
                warn!(error = %e, "text recognition failed");
                String::new()
            }
        }
    }
}
