use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A tap coordinate in the canonical resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// ADB binary location and per-call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdbConfig {
    pub adb_path: PathBuf,
    /// Generic shell commands (input injection, dumpsys).
    pub command_timeout_secs: u64,
    /// Screen capture, which moves megabytes over the wire.
    pub capture_timeout_secs: u64,
    /// Liveness probes and clipboard reads.
    pub probe_timeout_secs: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            command_timeout_secs: 30,
            capture_timeout_secs: 15,
            probe_timeout_secs: 5,
        }
    }
}

/// Template matching parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorConfig {
    pub templates_dir: PathBuf,
    pub match_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            match_threshold: 0.8,
        }
    }
}

/// OCR model and coordinate map locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrConfig {
    /// Directory holding text-detection.rten and text-recognition.rten.
    pub models_dir: PathBuf,
    pub region_map_path: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            region_map_path: PathBuf::from("coordinate_map.json"),
        }
    }
}

/// Which extraction a captured screen feeds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScreenKind {
    Profile,
    Resources,
    Hall,
    Market,
    PetToken,
}

/// One screen in the capture route: taps to reach it, settle time before the
/// frame is taken, and back presses to leave it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteStep {
    pub screen: ScreenKind,
    pub taps: Vec<Point>,
    pub settle_ms: u64,
    pub back_presses: u32,
}

/// Scan pipeline tunables. Coordinates are swappable data for the target
/// game, not logic; the defaults match the reference layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    pub package_name: String,
    /// Bound on waiting for the game to reach a lobby screen.
    pub lobby_timeout_secs: u64,
    /// Bound on any single menu navigation.
    pub nav_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Longer poll used while a loading screen is up.
    pub loading_poll_interval_ms: u64,
    pub clipboard_retries: u32,
    pub clipboard_sync_ms: u64,
    pub back_presses: u32,
    pub back_delay_ms: u64,
    /// Busy devices idle past this bound are force-recovered.
    pub stuck_task_timeout_secs: u64,
    pub profile_button: Point,
    pub copy_id_button: Point,
    pub route: Vec<RouteStep>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            package_name: "com.example.game".to_string(),
            lobby_timeout_secs: 30,
            nav_timeout_secs: 10,
            poll_interval_ms: 2000,
            loading_poll_interval_ms: 3000,
            clipboard_retries: 3,
            clipboard_sync_ms: 2000,
            back_presses: 3,
            back_delay_ms: 1500,
            stuck_task_timeout_secs: 120,
            profile_button: Point::new(25, 25),
            copy_id_button: Point::new(425, 200),
            route: default_route(),
        }
    }
}

fn default_route() -> Vec<RouteStep> {
    vec![
        RouteStep {
            screen: ScreenKind::Profile,
            taps: vec![Point::new(25, 25)],
            settle_ms: 1500,
            back_presses: 1,
        },
        RouteStep {
            screen: ScreenKind::Resources,
            taps: vec![Point::new(640, 680)],
            settle_ms: 1500,
            back_presses: 1,
        },
        RouteStep {
            screen: ScreenKind::Hall,
            taps: vec![Point::new(320, 360)],
            settle_ms: 2000,
            back_presses: 1,
        },
        RouteStep {
            screen: ScreenKind::Market,
            taps: vec![Point::new(480, 360)],
            settle_ms: 2000,
            back_presses: 1,
        },
        RouteStep {
            screen: ScreenKind::PetToken,
            taps: vec![Point::new(600, 60)],
            settle_ms: 1500,
            back_presses: 1,
        },
    ]
}

/// Complete process configuration, constructed once at startup and passed by
/// reference into the orchestrator and its collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub adb: AdbConfig,
    pub detector: DetectorConfig,
    pub ocr: OcrConfig,
    pub scan: ScanConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.adb.adb_path, PathBuf::from("adb"));
        assert_eq!(config.adb.command_timeout_secs, 30);
        assert_eq!(config.adb.probe_timeout_secs, 5);

        assert_eq!(config.detector.match_threshold, 0.8);

        assert_eq!(config.scan.lobby_timeout_secs, 30);
        assert_eq!(config.scan.clipboard_retries, 3);
        assert_eq!(config.scan.profile_button, Point::new(25, 25));
        assert_eq!(config.scan.route.len(), 5);
        assert_eq!(config.scan.route[0].screen, ScreenKind::Profile);
    }

    #[test]
    fn test_app_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_screen_kind_snake_case() {
        assert_eq!(
            serde_json::to_string(&ScreenKind::PetToken).unwrap(),
            "\"pet_token\""
        );
    }

    #[test]
    fn test_route_customization_survives_round_trip() {
        let mut config = AppConfig::default();
        config.scan.route = vec![RouteStep {
            screen: ScreenKind::Resources,
            taps: vec![Point::new(1, 2), Point::new(3, 4)],
            settle_ms: 500,
            back_presses: 2,
        }];

        let json = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scan.route.len(), 1);
        assert_eq!(back.scan.route[0].taps.len(), 2);
    }
}
