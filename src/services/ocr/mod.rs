pub mod extractor;
pub mod preprocessing;
pub mod recognizer;

pub use extractor::{parse_abbreviated_number, OcrExtractor};
pub use recognizer::{OcrsRecognizer, TextRecognizer};
