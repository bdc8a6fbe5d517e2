//! Emulator fleet scanner: drives emulated Android devices through in-game
//! menus, infers the visible screen by template matching, extracts telemetry
//! via OCR, scores extraction reliability, and reports results through a
//! persistence/notification boundary.

pub mod models;
pub mod services;
pub mod utils;

pub use models::config::AppConfig;
pub use models::error::ScanError;
pub use models::scan::{PipelineRun, ScanReport};
pub use services::adb::{AdbCommandChannel, DeviceChannel};
pub use services::bridge::{spawn_bridge, BridgeHandle, EventSink, Storage};
pub use services::detector::{ScreenState, StateDetector, TemplateSet};
pub use services::ocr::{OcrExtractor, OcrsRecognizer};
pub use services::orchestrator::ScanOrchestrator;
pub use services::registry::DeviceRegistry;
