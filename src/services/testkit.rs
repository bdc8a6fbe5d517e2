//! Shared test doubles: a scriptable device channel, synthetic screens for
//! the detector, a scripted recognizer, and a recording event sink.

use crate::models::config::{DetectorConfig, Point, RouteStep, ScanConfig, ScreenKind};
use crate::models::region::{Region, RegionMap};
use crate::services::adb::DeviceChannel;
use crate::services::bridge::EventSink;
use crate::services::detector::{ScreenState, StateDetector, TemplateSet};
use crate::services::ocr::recognizer::TextRecognizer;
use crate::services::ocr::OcrExtractor;
use crate::services::sequencer::PollTiming;
use image::{DynamicImage, GrayImage, Luma};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Synthetic screens the mock channel can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    City,
    ProfileMenu,
    Loading,
    Blank,
    /// Capture fails outright.
    Failure,
}

pub const FRAME_CITY: Frame = Frame::City;
pub const FRAME_PROFILE_MENU: Frame = Frame::ProfileMenu;
pub const FRAME_LOADING: Frame = Frame::Loading;
pub const FRAME_BLANK: Frame = Frame::Blank;
pub const FRAME_FAILURE: Frame = Frame::Failure;

const FRAME_SIZE: u32 = 64;
const PATCH_SIZE: u32 = 16;

fn checkerboard() -> GrayImage {
    GrayImage::from_fn(PATCH_SIZE, PATCH_SIZE, |x, y| {
        Luma([if (x + y) % 2 == 0 { 255 } else { 0 }])
    })
}

fn vertical_stripes() -> GrayImage {
    GrayImage::from_fn(PATCH_SIZE, PATCH_SIZE, |x, _| {
        Luma([if x % 2 == 0 { 255 } else { 0 }])
    })
}

fn horizontal_stripes() -> GrayImage {
    GrayImage::from_fn(PATCH_SIZE, PATCH_SIZE, |_, y| {
        Luma([if y % 2 == 0 { 255 } else { 0 }])
    })
}

fn render(frame: Frame) -> Option<Vec<u8>> {
    let patch = match frame {
        Frame::City => Some(checkerboard()),
        Frame::ProfileMenu => Some(vertical_stripes()),
        Frame::Loading => Some(horizontal_stripes()),
        Frame::Blank => None,
        Frame::Failure => return None,
    };

    let mut img = GrayImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Luma([128u8]));
    if let Some(patch) = patch {
        for (x, y, p) in patch.enumerate_pixels() {
            img.put_pixel(x + 8, y + 8, *p);
        }
    }

    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encoding of a synthetic frame cannot fail");
    Some(bytes)
}

/// Detector over the synthetic template set: checkerboard is the city view,
/// vertical stripes the profile menu, horizontal stripes the loading screen.
pub fn test_detector() -> StateDetector {
    let templates = TemplateSet::from_parts(vec![
        (ScreenState::CityView, checkerboard()),
        (ScreenState::ProfileMenu, vertical_stripes()),
        (ScreenState::Loading, horizontal_stripes()),
    ]);
    StateDetector::new(templates, &DetectorConfig::default(), (FRAME_SIZE, FRAME_SIZE))
}

pub fn fast_timing() -> PollTiming {
    PollTiming {
        poll: Duration::from_millis(5),
        loading_poll: Duration::from_millis(5),
    }
}

/// Scan config with millisecond-scale sleeps for tests.
pub fn test_scan_config() -> ScanConfig {
    let route = [
        ScreenKind::Profile,
        ScreenKind::Resources,
        ScreenKind::Hall,
        ScreenKind::Market,
        ScreenKind::PetToken,
    ]
    .into_iter()
    .map(|screen| RouteStep {
        screen,
        taps: vec![Point::new(10, 10)],
        settle_ms: 1,
        back_presses: 1,
    })
    .collect();

    ScanConfig {
        package_name: "com.example.game".to_string(),
        lobby_timeout_secs: 1,
        nav_timeout_secs: 1,
        poll_interval_ms: 5,
        loading_poll_interval_ms: 5,
        clipboard_retries: 2,
        clipboard_sync_ms: 1,
        back_presses: 1,
        back_delay_ms: 1,
        stuck_task_timeout_secs: 120,
        profile_button: Point::new(25, 25),
        copy_id_button: Point::new(425, 200),
        route,
    }
}

/// Scriptable in-memory device. Frames and clipboard values are served from
/// FIFO queues, falling back to configurable defaults once drained.
#[derive(Default)]
pub struct MockChannel {
    frames: Mutex<VecDeque<Frame>>,
    frame_default: Mutex<Option<Frame>>,
    clipboard: Mutex<VecDeque<String>>,
    clipboard_default: Mutex<String>,
    devices: Mutex<Vec<String>>,
    foreground: Mutex<bool>,
    taps: Mutex<Vec<(u32, u32)>>,
    captures: Mutex<u32>,
    clipboard_reads: Mutex<u32>,
    backs: Mutex<u32>,
    launches: Mutex<u32>,
}

impl MockChannel {
    pub fn new() -> Self {
        let channel = Self::default();
        *channel.foreground.lock() = true;
        channel
    }

    pub fn push_frames(&self, frames: &[Frame]) {
        self.frames.lock().extend(frames.iter().copied());
    }

    pub fn set_frame_default(&self, frame: Frame) {
        *self.frame_default.lock() = Some(frame);
    }

    pub fn push_clipboard(&self, values: &[&str]) {
        self.clipboard.lock().extend(values.iter().map(|s| s.to_string()));
    }

    pub fn set_clipboard_default(&self, value: &str) {
        *self.clipboard_default.lock() = value.to_string();
    }

    pub fn set_devices(&self, serials: &[&str]) {
        *self.devices.lock() = serials.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_foreground(&self, foreground: bool) {
        *self.foreground.lock() = foreground;
    }

    pub fn taps(&self) -> Vec<(u32, u32)> {
        self.taps.lock().clone()
    }

    pub fn capture_count(&self) -> u32 {
        *self.captures.lock()
    }

    pub fn clipboard_reads(&self) -> u32 {
        *self.clipboard_reads.lock()
    }

    pub fn back_presses(&self) -> u32 {
        *self.backs.lock()
    }

    pub fn launches(&self) -> u32 {
        *self.launches.lock()
    }

    fn next_frame(&self) -> Option<Frame> {
        if let Some(frame) = self.frames.lock().pop_front() {
            return Some(frame);
        }
        *self.frame_default.lock()
    }
}

impl DeviceChannel for MockChannel {
    fn list_devices(&self) -> Vec<String> {
        self.devices.lock().clone()
    }

    fn ping(&self, _serial: &str) -> bool {
        true
    }

    fn tap(&self, _serial: &str, x: u32, y: u32) -> bool {
        self.taps.lock().push((x, y));
        true
    }

    fn swipe(&self, _serial: &str, _x1: u32, _y1: u32, _x2: u32, _y2: u32, _duration_ms: u32) -> bool {
        true
    }

    fn press_back(&self, _serial: &str) -> bool {
        *self.backs.lock() += 1;
        true
    }

    fn capture_frame(&self, _serial: &str) -> Option<Vec<u8>> {
        *self.captures.lock() += 1;
        render(self.next_frame()?)
    }

    fn read_clipboard(&self, _serial: &str) -> String {
        *self.clipboard_reads.lock() += 1;
        if let Some(value) = self.clipboard.lock().pop_front() {
            return value;
        }
        self.clipboard_default.lock().clone()
    }

    fn is_foreground(&self, _serial: &str, _package: &str) -> bool {
        *self.foreground.lock()
    }

    fn launch(&self, _serial: &str, _package: &str) -> bool {
        *self.launches.lock() += 1;
        true
    }
}

/// Recognizer that replays a scripted sequence, then empty strings.
pub struct ScriptedRecognizer {
    outputs: Mutex<VecDeque<String>>,
}

impl ScriptedRecognizer {
    pub fn new(outputs: &[&str]) -> Self {
        Self {
            outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
        }
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize_line(&self, _image: &GrayImage) -> String {
        self.outputs.lock().pop_front().unwrap_or_default()
    }
}

/// Region map matching the synthetic 200x150 canonical resolution.
pub fn test_region_map() -> RegionMap {
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

/// Extractor wired to a scripted recognizer over the synthetic region map.
pub fn scripted_extractor(outputs: &[&str]) -> OcrExtractor {
    OcrExtractor::new(test_region_map(), Box::new(ScriptedRecognizer::new(outputs)))
}

pub type EventLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Sink that records every published event for assertions.
pub struct RecordingSink {
    events: EventLog,
}

impl RecordingSink {
    pub fn new() -> (Self, EventLog) {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: Arc::clone(&events),
            },
            events,
        )
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &str, payload: &Value) {
        self.events.lock().push((event.to_string(), payload.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frames_classify_as_labeled() {
        let detector = test_detector();
        let channel = MockChannel::new();
        channel.push_frames(&[FRAME_CITY, FRAME_PROFILE_MENU, FRAME_LOADING, FRAME_BLANK, FRAME_FAILURE]);

        assert_eq!(detector.detect(&channel, "x"), ScreenState::CityView);
        assert_eq!(detector.detect(&channel, "x"), ScreenState::ProfileMenu);
        assert_eq!(detector.detect(&channel, "x"), ScreenState::Loading);
        assert_eq!(detector.detect(&channel, "x"), ScreenState::Unknown);
        assert_eq!(detector.detect(&channel, "x"), ScreenState::CaptureError);
    }
}
