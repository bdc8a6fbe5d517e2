use crate::models::region::RegionMap;
use crate::models::scan::{ProfileData, ResourceData, ResourceEntry};
use crate::services::ocr::preprocessing;
use crate::services::ocr::recognizer::TextRecognizer;
use image::{DynamicImage, GrayImage};
use std::path::Path;
use tracing::{debug, warn};

/// Characters that can legitimately appear in an abbreviated numeric value.
const NUMERIC_CHARS: &str = "0123456789.,KMB";
const DIGIT_CHARS: &str = "0123456789";

/// Parse OCR text into an integer, expanding K/M/B suffixes.
///
/// OCR noise is expected here: unparseable input yields 0, and the validator
/// downstream is responsible for flagging zero or implausible results.
pub fn parse_abbreviated_number(text: &str) -> i64 {
    let mut cleaned: String = text
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    let multiplier = match cleaned.chars().last() {
        Some('K') => {
            cleaned.pop();
            1_000.0
        }
        Some('M') => {
            cleaned.pop();
            1_000_000.0
        }
        Some('B') => {
            cleaned.pop();
            1_000_000_000.0
        }
        _ => 1.0,
    };

    match cleaned.parse::<f64>() {
        Ok(value) => (value * multiplier) as i64,
        Err(_) => 0,
    }
}

/// Region extraction and text recognition over normalized frames.
///
/// Owns the immutable region map and the recognition engine; both are shared
/// read-only across scans.
pub struct OcrExtractor {
    regions: RegionMap,
    recognizer: Box<dyn TextRecognizer>,
}

impl OcrExtractor {
    pub fn new(regions: RegionMap, recognizer: Box<dyn TextRecognizer>) -> Self {
        Self { regions, recognizer }
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Load a frame from disk and normalize it. `None` when the file is
    /// missing or undecodable.
    pub fn load_frame(&self, path: &Path) -> Option<DynamicImage> {
        match image::open(path) {
            Ok(img) => Some(self.normalize_frame(&img)),
            Err(e) => {
                warn!(?path, error = %e, "failed to load frame");
                None
            }
        }
    }

    /// Resize to the canonical resolution and sharpen. Region rectangles are
    /// resolution-independent only after this step.
    pub fn normalize_frame(&self, frame: &DynamicImage) -> DynamicImage {
        let (width, height) = self.regions.resolution();
        let resized = if (frame.width(), frame.height()) != (width, height) {
            frame.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
        } else {
            frame.clone()
        };
        preprocessing::sharpen(&resized)
    }

    /// Crop a named region out of a normalized frame.
    pub fn extract_region(&self, frame: &DynamicImage, name: &str) -> Option<DynamicImage> {
        let Some(region) = self.regions.get(name) else {
            warn!(name, "region not present in coordinate map");
            return None;
        };
        if !region.fits(frame.width(), frame.height()) {
            warn!(name, "region exceeds frame bounds");
            return None;
        }
        Some(frame.crop_imm(region.x1, region.y1, region.width(), region.height()))
    }

    /// Standard preprocessing: upscale, grayscale, Otsu binarize, pad.
    pub fn preprocess(&self, region: &DynamicImage, scale: f64, invert: bool) -> GrayImage {
        let scaled = preprocessing::scale(region, scale);
        let gray = scaled.to_luma8();
        let binary = preprocessing::otsu_binarize(&gray, invert);
        preprocessing::pad_border(&binary, 10, 10, 15, 15, 255)
    }

    /// Run single-line recognition, constrained to `whitelist` when given.
    /// Engine failure surfaces as an empty string, never as an error.
    pub fn recognize_text(&self, image: &GrayImage, whitelist: Option<&str>) -> String {
        let text = self.recognizer.recognize_line(image);
        match whitelist {
            Some(allowed) => text.chars().filter(|c| allowed.contains(*c)).collect(),
            None => text.trim().to_string(),
        }
    }

    /// Dual-strategy recognition for the pet-token region, which is small and
    /// noise-prone. Pipeline A is the standard 4x upscale and threshold;
    /// pipeline B erodes before thresholding. The longer recognized string
    /// wins: the target value is always multi-digit, and a spuriously short
    /// match from one pipeline is far more likely than both pipelines
    /// hallucinating the same longer wrong value.
    pub fn recognize_pet_token(&self, region: &DynamicImage) -> String {
        let scaled = preprocessing::scale(region, 4.0);
        let gray = scaled.to_luma8();

        let binary_a = preprocessing::otsu_binarize(&gray, false);
        let padded_a = preprocessing::pad_border(&binary_a, 20, 20, 20, 20, 255);
        let text_a = self.recognize_text(&padded_a, Some(DIGIT_CHARS));

        let eroded = preprocessing::erode_gray(&gray, 1);
        let binary_b = preprocessing::otsu_binarize(&eroded, false);
        let padded_b = preprocessing::pad_border(&binary_b, 20, 20, 20, 20, 255);
        let text_b = self.recognize_text(&padded_b, Some(DIGIT_CHARS));

        debug!(pipeline_a = %text_a, pipeline_b = %text_b, "pet token candidates");
        if text_b.len() > text_a.len() {
            text_b
        } else {
            text_a
        }
    }

    /// Extract lord name and power from a profile frame.
    pub fn scan_profile(&self, frame: &DynamicImage) -> ProfileData {
        let name = self
            .extract_region(frame, "profile_name")
            .map(|roi| {
                let prepared = self.preprocess(&roi, 2.0, false);
                self.recognize_text(&prepared, None)
            })
            .unwrap_or_default();

        let power_raw = self
            .extract_region(frame, "profile_power")
            .map(|roi| {
                let prepared = self.preprocess(&roi, 2.0, false);
                self.recognize_text(&prepared, Some(NUMERIC_CHARS))
            })
            .unwrap_or_default();

        ProfileData {
            name,
            power: parse_abbreviated_number(&power_raw),
            power_confidence: numeric_confidence(&power_raw),
            power_raw,
        }
    }

    /// Extract bag/total pairs for all four resource types.
    pub fn scan_resources(&self, frame: &DynamicImage) -> ResourceData {
        let mut data = ResourceData::default();
        for resource in ["gold", "wood", "ore", "mana"] {
            let bag_raw = self.scan_numeric_region(frame, &format!("res_{}_bag", resource));
            let total_raw = self.scan_numeric_region(frame, &format!("res_{}_total", resource));

            let entry = ResourceEntry {
                bag: parse_abbreviated_number(&bag_raw),
                total: parse_abbreviated_number(&total_raw),
                bag_raw,
                total_raw,
            };
            if let Some(slot) = data.entry_mut(resource) {
                *slot = entry;
            }
        }
        data
    }

    /// Extract a building level from the named region. Returns the level and
    /// the raw recognized text.
    pub fn scan_building_level(&self, frame: &DynamicImage, region: &str) -> (i64, String) {
        let raw = self
            .extract_region(frame, region)
            .map(|roi| {
                let prepared = self.preprocess(&roi, 2.0, false);
                self.recognize_text(&prepared, Some(DIGIT_CHARS))
            })
            .unwrap_or_default();

        let level = if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            raw.parse().unwrap_or(0)
        } else {
            0
        };
        (level, raw)
    }

    /// Extract the pet-token count via the dual-strategy pipeline.
    pub fn scan_pet_token(&self, frame: &DynamicImage) -> (i64, String) {
        let raw = self
            .extract_region(frame, "pet_token")
            .map(|roi| self.recognize_pet_token(&roi))
            .unwrap_or_default();

        let count = if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            raw.parse().unwrap_or(0)
        } else {
            0
        };
        (count, raw)
    }

    fn scan_numeric_region(&self, frame: &DynamicImage, region: &str) -> String {
        self.extract_region(frame, region)
            .map(|roi| {
                let prepared = self.preprocess(&roi, 2.0, false);
                self.recognize_text(&prepared, Some(NUMERIC_CHARS))
            })
            .unwrap_or_default()
    }
}

/// Share of characters in the raw text that belong to a numeric value.
/// Empty text has zero confidence.
fn numeric_confidence(raw: &str) -> f32 {
    if raw.is_empty() {
        return 0.0;
    }
    let valid = raw.chars().filter(|c| NUMERIC_CHARS.contains(*c)).count();
    valid as f32 / raw.chars().count() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::region::Region;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// Recognizer that replays a scripted sequence of results.
    struct ScriptedRecognizer {
        outputs: Mutex<VecDeque<String>>,
    }

    impl ScriptedRecognizer {
        fn new(outputs: &[&str]) -> Box<Self> {
            Box::new(Self {
                outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize_line(&self, _image: &GrayImage) -> String {
            self.outputs.lock().pop_front().unwrap_or_default()
        }
    }

    fn test_region_map() -> RegionMap {
        let mut regions = HashMap::new();
        let mut add = |name: &str, x1, y1, x2, y2| {
            regions.insert(name.to_string(), Region::new(x1, y1, x2, y2).unwrap());
        };
        add("profile_name", 10, 10, 90, 25);
        add("profile_power", 10, 30, 90, 45);
        for (i, resource) in ["gold", "wood", "ore", "mana"].iter().enumerate() {
            let y = 50 + i as u32 * 20;
            add(&format!("res_{}_bag", resource), 10, y, 60, y + 15);
            add(&format!("res_{}_total", resource), 70, y, 120, y + 15);
        }
        add("hall_level", 130, 10, 160, 25);
        add("market_level", 130, 30, 160, 45);
        add("pet_token", 130, 50, 170, 65);
        RegionMap::with_regions((200, 150), regions)
    }

    fn extractor(outputs: &[&str]) -> OcrExtractor {
        OcrExtractor::new(test_region_map(), ScriptedRecognizer::new(outputs))
    }

    fn blank_frame() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(200, 150, image::Rgb([40, 40, 40])))
    }

    // ── Numeric parsing ──

    #[test]
    fn test_parse_abbreviated_number_suffixes() {
        assert_eq!(parse_abbreviated_number("1.5K"), 1_500);
        assert_eq!(parse_abbreviated_number("2M"), 2_000_000);
        assert_eq!(parse_abbreviated_number("3B"), 3_000_000_000);
        assert_eq!(parse_abbreviated_number("42"), 42);
    }

    #[test]
    fn test_parse_abbreviated_number_noise() {
        assert_eq!(parse_abbreviated_number(""), 0);
        assert_eq!(parse_abbreviated_number("abc"), 0);
        assert_eq!(parse_abbreviated_number("K"), 0);
        assert_eq!(parse_abbreviated_number("12.34.56"), 0);
    }

    #[test]
    fn test_parse_abbreviated_number_separators() {
        assert_eq!(parse_abbreviated_number(" 1,234 "), 1_234);
        assert_eq!(parse_abbreviated_number("1, 5 M"), 15_000_000);
        assert_eq!(parse_abbreviated_number("2.75k"), 2_750);
    }

    #[test]
    fn test_parse_abbreviated_number_truncates() {
        assert_eq!(parse_abbreviated_number("1.2345K"), 1_234);
    }

    // ── Recognition plumbing ──

    #[test]
    fn test_recognize_text_applies_whitelist() {
        let ex = extractor(&["a1b2 c3"]);
        let img = GrayImage::from_pixel(10, 10, image::Luma([0u8]));
        assert_eq!(ex.recognize_text(&img, Some(DIGIT_CHARS)), "123");
    }

    #[test]
    fn test_recognize_text_empty_engine_output() {
        let ex = extractor(&[]);
        let img = GrayImage::from_pixel(10, 10, image::Luma([0u8]));
        assert_eq!(ex.recognize_text(&img, None), "");
    }

    #[test]
    fn test_extract_region_unknown_name() {
        let ex = extractor(&[]);
        assert!(ex.extract_region(&blank_frame(), "no_such_region").is_none());
    }

    #[test]
    fn test_extract_region_dimensions() {
        let ex = extractor(&[]);
        let roi = ex.extract_region(&blank_frame(), "profile_name").unwrap();
        assert_eq!((roi.width(), roi.height()), (80, 15));
    }

    #[test]
    fn test_normalize_frame_resizes_to_canonical() {
        let ex = extractor(&[]);
        let oversized =
            DynamicImage::ImageRgb8(image::RgbImage::from_pixel(400, 300, image::Rgb([10, 10, 10])));
        let normalized = ex.normalize_frame(&oversized);
        assert_eq!((normalized.width(), normalized.height()), (200, 150));
    }

    #[test]
    fn test_load_frame_missing_file() {
        let ex = extractor(&[]);
        assert!(ex.load_frame(Path::new("/nonexistent/frame.png")).is_none());
    }

    // ── Dual-strategy pet token ──

    #[test]
    fn test_pet_token_longer_string_wins_from_pipeline_b() {
        let ex = extractor(&["12", "3456"]);
        let roi = blank_frame();
        assert_eq!(ex.recognize_pet_token(&roi), "3456");
    }

    #[test]
    fn test_pet_token_longer_string_wins_from_pipeline_a() {
        let ex = extractor(&["3456", "12"]);
        let roi = blank_frame();
        assert_eq!(ex.recognize_pet_token(&roi), "3456");
    }

    #[test]
    fn test_pet_token_tie_prefers_pipeline_a() {
        let ex = extractor(&["11", "22"]);
        let roi = blank_frame();
        assert_eq!(ex.recognize_pet_token(&roi), "11");
    }

    // ── Typed scans ──

    #[test]
    fn test_scan_profile() {
        let ex = extractor(&["Arathor", "1.5M"]);
        let profile = ex.scan_profile(&blank_frame());

        assert_eq!(profile.name, "Arathor");
        assert_eq!(profile.power, 1_500_000);
        assert_eq!(profile.power_raw, "1.5M");
        assert!((profile.power_confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_scan_profile_empty_ocr_is_not_an_error() {
        let ex = extractor(&["", ""]);
        let profile = ex.scan_profile(&blank_frame());

        assert_eq!(profile.name, "");
        assert_eq!(profile.power, 0);
        assert_eq!(profile.power_confidence, 0.0);
    }

    #[test]
    fn test_scan_resources_order_and_parsing() {
        // bag/total per resource, in gold/wood/ore/mana order.
        let ex = extractor(&["10K", "50K", "2M", "3M", "0", "700", "1.5K", "2K"]);
        let resources = ex.scan_resources(&blank_frame());

        assert_eq!(resources.gold.bag, 10_000);
        assert_eq!(resources.gold.total, 50_000);
        assert_eq!(resources.wood.bag, 2_000_000);
        assert_eq!(resources.wood.total, 3_000_000);
        assert_eq!(resources.ore.bag, 0);
        assert_eq!(resources.ore.total, 700);
        assert_eq!(resources.mana.bag, 1_500);
        assert_eq!(resources.mana.total, 2_000);
        assert_eq!(resources.gold.bag_raw, "10K");
    }

    #[test]
    fn test_scan_building_level() {
        let ex = extractor(&["27"]);
        let (level, raw) = ex.scan_building_level(&blank_frame(), "hall_level");
        assert_eq!(level, 27);
        assert_eq!(raw, "27");
    }

    #[test]
    fn test_scan_building_level_garbage_yields_zero() {
        let ex = extractor(&[""]);
        let (level, raw) = ex.scan_building_level(&blank_frame(), "market_level");
        assert_eq!(level, 0);
        assert_eq!(raw, "");
    }

    #[test]
    fn test_scan_pet_token_parses_winner() {
        let ex = extractor(&["8", "1024"]);
        let (count, raw) = ex.scan_pet_token(&blank_frame());
        assert_eq!(count, 1024);
        assert_eq!(raw, "1024");
    }

    #[test]
    fn test_numeric_confidence() {
        assert_eq!(numeric_confidence(""), 0.0);
        assert!((numeric_confidence("1.5M") - 1.0).abs() < f32::EPSILON);
        assert!((numeric_confidence("1x5M") - 0.75).abs() < f32::EPSILON);
    }
}
