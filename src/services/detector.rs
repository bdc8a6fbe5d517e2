use crate::models::config::DetectorConfig;
use crate::services::adb::DeviceChannel;
use image::GrayImage;
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Known game screens plus the two detection sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenState {
    /// Loading screen; masks everything else while up.
    Loading,
    /// Profile detail overlay.
    ProfileDetail,
    /// Profile menu.
    ProfileMenu,
    /// Events menu.
    EventsMenu,
    /// Base lobby, city view.
    CityView,
    /// Base lobby, map view.
    MapView,
    /// Screenshot could not be obtained or decoded.
    CaptureError,
    /// No template matched; usually a transition between screens.
    Unknown,
}

impl ScreenState {
    /// The two mutually exclusive steady-state lobby screens.
    pub const BASE: [ScreenState; 2] = [ScreenState::CityView, ScreenState::MapView];

    pub fn is_base(&self) -> bool {
        Self::BASE.contains(self)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScreenState::Loading => "loading",
            ScreenState::ProfileDetail => "profile_detail",
            ScreenState::ProfileMenu => "profile_menu",
            ScreenState::EventsMenu => "events_menu",
            ScreenState::CityView => "city_view",
            ScreenState::MapView => "map_view",
            ScreenState::CaptureError => "capture_error",
            ScreenState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ScreenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Detection order. Interrupting states (loading, overlays, sub-menus) can
/// spatially overlap fragments of a base screen, so they must be excluded
/// before either base screen is allowed to win.
const PRIORITY: [ScreenState; 6] = [
    ScreenState::Loading,
    ScreenState::ProfileDetail,
    ScreenState::ProfileMenu,
    ScreenState::EventsMenu,
    ScreenState::CityView,
    ScreenState::MapView,
];

/// Template filenames, mapped to the state each one identifies.
const TEMPLATE_FILES: [(&str, ScreenState); 6] = [
    ("lobby_loading.png", ScreenState::Loading),
    ("lobby_profile_detail.png", ScreenState::ProfileDetail),
    ("lobby_profile_menu.png", ScreenState::ProfileMenu),
    ("lobby_events.png", ScreenState::EventsMenu),
    ("lobby_hammer.png", ScreenState::CityView),
    ("lobby_magnifier.png", ScreenState::MapView),
];

/// Reference images keyed by screen state, loaded once and immutable.
#[derive(Debug)]
pub struct TemplateSet {
    templates: Vec<(ScreenState, GrayImage)>,
}

impl TemplateSet {
    /// Load every known template from `dir`. Missing or unreadable files are
    /// skipped with a warning so a partial set still detects what it can.
    pub fn load(dir: &Path) -> Result<Self, String> {
        if !dir.exists() {
            return Err(format!("Template directory not found: {:?}", dir));
        }

        let mut templates = Vec::new();
        for (filename, state) in TEMPLATE_FILES {
            let path = dir.join(filename);
            if !path.exists() {
                warn!(?path, "template missing, state will never be detected");
                continue;
            }
            match image::open(&path) {
                Ok(img) => templates.push((state, img.to_luma8())),
                Err(e) => warn!(?path, error = %e, "failed to load template"),
            }
        }

        if templates.is_empty() {
            return Err(format!("No templates loaded from {:?}", dir));
        }
        info!(count = templates.len(), "templates loaded into memory");
        Ok(Self { templates })
    }

    /// Build from in-memory images, for tests and embedded sets.
    pub fn from_parts(parts: Vec<(ScreenState, GrayImage)>) -> Self {
        Self { templates: parts }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Infers which game screen a device currently shows by normalized
/// cross-correlation against the template set.
pub struct StateDetector {
    templates: TemplateSet,
    threshold: f32,
    resolution: (u32, u32),
}

impl StateDetector {
    pub fn new(templates: TemplateSet, config: &DetectorConfig, resolution: (u32, u32)) -> Self {
        Self {
            templates,
            threshold: config.match_threshold,
            resolution,
        }
    }

    /// Capture a frame and classify it. Capture or decode failure yields the
    /// `CaptureError` sentinel rather than an error.
    pub fn detect<C: DeviceChannel>(&self, channel: &C, serial: &str) -> ScreenState {
        let Some(bytes) = channel.capture_frame(serial) else {
            return ScreenState::CaptureError;
        };
        let frame = match image::load_from_memory(&bytes) {
            Ok(img) => img,
            Err(e) => {
                warn!(serial, error = %e, "captured frame failed to decode");
                return ScreenState::CaptureError;
            }
        };

        let mut gray = frame.to_luma8();
        if gray.dimensions() != self.resolution {
            gray = image::imageops::resize(
                &gray,
                self.resolution.0,
                self.resolution.1,
                image::imageops::FilterType::Triangle,
            );
        }

        let state = self.match_state(&gray);
        debug!(serial, state = %state, "screen state detected");
        state
    }

    /// Classify an already-normalized frame. Scores every template in
    /// parallel, then takes the first state in priority order that meets the
    /// threshold.
    pub fn match_state(&self, frame: &GrayImage) -> ScreenState {
        let scores: Vec<(ScreenState, f32)> = self
            .templates
            .templates
            .par_iter()
            .map(|(state, template)| (*state, match_score(frame, template)))
            .collect();

        for state in PRIORITY {
            if let Some((_, score)) = scores.iter().find(|(s, _)| *s == state) {
                if *score >= self.threshold {
                    return state;
                }
            }
        }
        ScreenState::Unknown
    }
}

/// Best normalized cross-correlation score of `template` over `frame`.
/// A template larger than the frame cannot match.
fn match_score(frame: &GrayImage, template: &GrayImage) -> f32 {
    if template.width() > frame.width() || template.height() > frame.height() {
        return 0.0;
    }
    let result = match_template(frame, template, MatchTemplateMethod::CrossCorrelationNormalized);
    find_extremes(&result).max_value
}
