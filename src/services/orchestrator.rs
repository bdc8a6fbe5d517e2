use crate::models::config::{ScanConfig, ScreenKind};
use crate::models::error::ScanError;
use crate::models::scan::{
    LinkOutcome, PipelineRun, ProfileData, ResourceData, RunStatus, ScanReport, ScanStep,
};
use crate::services::adb::DeviceChannel;
use crate::services::bridge::BridgeHandle;
use crate::services::detector::{ScreenState, StateDetector};
use crate::services::ocr::OcrExtractor;
use crate::services::registry::DeviceRegistry;
use crate::services::sequencer::{
    ensure_app_running, extract_clipboard_value, navigate_to_screen, return_to_base,
    wait_for_state, PollTiming,
};
use crate::services::validator;
use image::DynamicImage;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TASK_LABEL: &str = "full_scan";

/// Everything recognized from the captured frames, before validation.
#[derive(Default)]
struct Extraction {
    profile: ProfileData,
    resources: ResourceData,
    hall_level: i64,
    market_level: i64,
    pet_token: i64,
    raw_text: String,
}

/// Top-level scan pipeline. One independent blocking worker per active run;
/// the device registry lock is the sole admission control keeping two runs
/// off the same device.
pub struct ScanOrchestrator<C: DeviceChannel> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: DeviceChannel> {
    channel: Arc<C>,
    registry: Arc<DeviceRegistry>,
    detector: StateDetector,
    extractor: OcrExtractor,
    bridge: BridgeHandle,
    config: ScanConfig,
    runs: Mutex<HashMap<String, PipelineRun>>,
}

impl<C: DeviceChannel> ScanOrchestrator<C> {
    pub fn new(
        channel: Arc<C>,
        registry: Arc<DeviceRegistry>,
        detector: StateDetector,
        extractor: OcrExtractor,
        bridge: BridgeHandle,
        config: ScanConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                registry,
                detector,
                extractor,
                bridge,
                config,
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submit a scan for a device. Non-blocking: the run executes on its own
    /// worker. Rejected without side effects when a run is already live for
    /// the device or the device lock is held.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_scan(&self, serial: &str) -> Result<(), ScanError> {
        {
            let runs = self.inner.runs.lock();
            if runs.get(serial).is_some_and(|run| run.is_running()) {
                return Err(ScanError::AlreadyRunning(serial.to_string()));
            }
        }

        if !self.inner.registry.acquire(serial, TASK_LABEL) {
            return Err(ScanError::LockContention(serial.to_string()));
        }

        // The previous terminal run for this device is overwritten here.
        self.inner
            .runs
            .lock()
            .insert(serial.to_string(), PipelineRun::new(serial));

        let inner = Arc::clone(&self.inner);
        let serial = serial.to_string();
        tokio::task::spawn_blocking(move || inner.run_worker(&serial));
        Ok(())
    }

    /// Drop the tracked run record for a device. The worker, if still alive,
    /// finishes on its own; there is no cancellation signal.
    pub fn stop_scan(&self, serial: &str) -> bool {
        self.inner.runs.lock().remove(serial).is_some()
    }

    pub fn run_status(&self, serial: &str) -> Option<PipelineRun> {
        self.inner.runs.lock().get(serial).cloned()
    }

    pub fn all_runs(&self) -> Vec<PipelineRun> {
        let runs = self.inner.runs.lock();
        let mut all: Vec<PipelineRun> = runs.values().cloned().collect();
        all.sort_by(|a, b| a.serial.cmp(&b.serial));
        all
    }
}

impl<C: DeviceChannel> Inner<C> {
    fn timing(&self) -> PollTiming {
        PollTiming::from_config(&self.config)
    }

    fn run_worker(&self, serial: &str) {
        let start = Instant::now();
        info!(serial, "scan worker started");

        let outcome = self.run_pipeline(serial, start);

        // Idempotent: a forced timeout may already have reclaimed the lock,
        // possibly handing the device to someone else. Losing ownership is
        // tolerated.
        self.registry.release(serial);

        match outcome {
            Ok((report, link_result)) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                self.bridge.publish(
                    "scan_completed",
                    json!({
                        "serial": serial,
                        "elapsed_ms": elapsed_ms,
                        "data": &report,
                        "game_id": &report.game_id,
                        "link_result": &link_result,
                    }),
                );
                self.with_run(serial, |run| {
                    run.status = RunStatus::Completed;
                    run.step = ScanStep::Done;
                    run.elapsed_ms = elapsed_ms;
                    run.report = Some(report);
                    run.link_result = link_result;
                });
                info!(serial, elapsed_ms, "scan completed");
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(serial, error = %reason, "scan failed");
                self.bridge.publish(
                    "scan_failed",
                    json!({ "serial": serial, "error": &reason }),
                );
                self.with_run(serial, |run| {
                    run.status = RunStatus::Failed;
                    run.step = ScanStep::Error;
                    run.elapsed_ms = start.elapsed().as_millis() as u64;
                    run.error = Some(reason);
                });
            }
        }
    }

    fn run_pipeline(
        &self,
        serial: &str,
        start: Instant,
    ) -> Result<(ScanReport, Option<LinkOutcome>), ScanError> {
        self.progress(serial, ScanStep::Starting, "");
        ensure_app_running(self.channel.as_ref(), serial, &self.config.package_name);

        self.progress(serial, ScanStep::ExtractingId, "Extracting game id from profile");
        let game_id = self.extract_game_id(serial);

        self.progress(serial, ScanStep::Capturing, "Navigating and capturing screens");
        let frames = self.capture_screens(serial)?;

        self.progress(serial, ScanStep::OcrProcessing, "Recognizing text regions");
        let extraction = self.run_extraction(frames);

        self.progress(serial, ScanStep::Parsing, "Validating parsed values");
        let report = self.assemble_report(serial, &extraction, game_id);
        // Stash the parsed data now: a later persistence failure must not
        // discard what was already extracted.
        self.with_run(serial, |run| run.report = Some(report.clone()));

        self.progress(serial, ScanStep::Saving, "Persisting snapshot");
        let duration_ms = start.elapsed().as_millis() as u64;
        let snapshot_id = self
            .bridge
            .save_snapshot(
                serial,
                &report,
                duration_ms,
                &extraction.raw_text,
                report.game_id.as_deref(),
            )
            .map_err(ScanError::Persistence)?;

        // Account association is best effort: its failure is logged and
        // surfaced, never fatal to the run.
        let link_result = report.game_id.as_deref().and_then(|game_id| {
            match self
                .bridge
                .link_or_queue_account(serial, game_id, &report.profile.name, snapshot_id)
            {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(serial, game_id, error = %e, "account link failed");
                    self.with_run(serial, |run| {
                        run.detail = format!("account link failed: {}", e);
                    });
                    None
                }
            }
        });

        Ok((report, link_result))
    }

    /// The extracting_id protocol: reach the lobby, open the profile menu,
    /// copy the id through the clipboard bridge, and always try to come back
    /// to a base screen. Every failure downgrades to `id_skipped`.
    fn extract_game_id(&self, serial: &str) -> Option<String> {
        let timing = self.timing();
        let channel = self.channel.as_ref();
        let nav_timeout = Duration::from_secs(self.config.nav_timeout_secs);

        let lobby = wait_for_state(
            channel,
            &self.detector,
            serial,
            &ScreenState::BASE,
            Duration::from_secs(self.config.lobby_timeout_secs),
            timing,
        );
        if lobby.is_none() {
            self.detail(serial, "id_skipped: game not in lobby");
            return None;
        }

        self.registry.heartbeat(serial);

        if !navigate_to_screen(
            channel,
            &self.detector,
            serial,
            self.config.profile_button,
            &[ScreenState::ProfileMenu],
            nav_timeout,
            timing,
        ) {
            self.detail(serial, "id_skipped: could not reach profile menu");
            self.back_to_base(serial);
            return None;
        }

        let game_id = extract_clipboard_value(
            channel,
            serial,
            self.config.copy_id_button,
            self.config.clipboard_retries,
            Duration::from_millis(self.config.clipboard_sync_ms),
        );

        // Back to the lobby regardless of whether the copy worked.
        self.back_to_base(serial);

        match game_id {
            Some(id) => {
                self.detail(serial, &format!("id_extracted: {}", id));
                Some(id)
            }
            None => {
                self.detail(serial, "id_skipped: clipboard copy failed");
                None
            }
        }
    }

    /// Walk the capture route, producing one normalized frame per screen.
    /// No frame is a hard failure that aborts the run.
    fn capture_screens(
        &self,
        serial: &str,
    ) -> Result<Vec<(ScreenKind, DynamicImage)>, ScanError> {
        let channel = self.channel.as_ref();
        let total = self.config.route.len();
        let mut frames = Vec::with_capacity(total);

        for (index, step) in self.config.route.iter().enumerate() {
            self.detail(
                serial,
                &format!("capturing {}/{}: {}", index + 1, total, screen_label(step.screen)),
            );
            self.registry.heartbeat(serial);

            for tap in &step.taps {
                channel.tap(serial, tap.x, tap.y);
            }
            std::thread::sleep(Duration::from_millis(step.settle_ms));

            let bytes = channel.capture_frame(serial).ok_or_else(|| {
                ScanError::Capture(format!(
                    "no frame for {} screen on {}",
                    screen_label(step.screen),
                    serial
                ))
            })?;
            let frame = image::load_from_memory(&bytes).map_err(|e| {
                ScanError::Capture(format!(
                    "undecodable frame for {} screen on {}: {}",
                    screen_label(step.screen),
                    serial,
                    e
                ))
            })?;
            frames.push((step.screen, self.extractor.normalize_frame(&frame)));

            for _ in 0..step.back_presses {
                channel.press_back(serial);
                std::thread::sleep(Duration::from_millis(self.config.back_delay_ms));
            }
        }

        // Settle back onto a base screen for the next run; best effort.
        self.back_to_base(serial);
        Ok(frames)
    }

    fn run_extraction(&self, frames: Vec<(ScreenKind, DynamicImage)>) -> Extraction {
        let mut extraction = Extraction::default();
        let mut raw_lines: Vec<String> = Vec::new();

        for (kind, frame) in &frames {
            match kind {
                ScreenKind::Profile => {
                    let profile = self.extractor.scan_profile(frame);
                    raw_lines.push(format!("profile_name: {}", profile.name));
                    raw_lines.push(format!("profile_power: {}", profile.power_raw));
                    extraction.profile = profile;
                }
                ScreenKind::Resources => {
                    let resources = self.extractor.scan_resources(frame);
                    for (name, entry) in resources.entries() {
                        raw_lines.push(format!("res_{}_bag: {}", name, entry.bag_raw));
                        raw_lines.push(format!("res_{}_total: {}", name, entry.total_raw));
                    }
                    extraction.resources = resources;
                }
                ScreenKind::Hall => {
                    let (level, raw) = self.extractor.scan_building_level(frame, "hall_level");
                    raw_lines.push(format!("hall_level: {}", raw));
                    extraction.hall_level = level;
                }
                ScreenKind::Market => {
                    let (level, raw) = self.extractor.scan_building_level(frame, "market_level");
                    raw_lines.push(format!("market_level: {}", raw));
                    extraction.market_level = level;
                }
                ScreenKind::PetToken => {
                    let (count, raw) = self.extractor.scan_pet_token(frame);
                    raw_lines.push(format!("pet_token: {}", raw));
                    extraction.pet_token = count;
                }
            }
        }

        extraction.raw_text = raw_lines.join("\n");
        extraction
    }

    /// Fold extraction and validation into the final report. Validation
    /// failures become error strings and reliability flags, never aborts.
    fn assemble_report(
        &self,
        serial: &str,
        extraction: &Extraction,
        game_id: Option<String>,
    ) -> ScanReport {
        let mut report = ScanReport::new(serial);
        report.profile = extraction.profile.clone();
        report.resources = extraction.resources.clone();
        report.hall_level = extraction.hall_level;
        report.market_level = extraction.market_level;
        report.pet_token = extraction.pet_token;
        report.game_id = game_id;

        let results = [
            validator::validate_profile(&report.profile),
            validator::validate_resources(&report.resources),
            validator::validate_building_level(report.hall_level),
            validator::validate_building_level(report.market_level),
            validator::validate_pet_token(report.pet_token),
        ];

        let mut errors = Vec::new();
        let mut reliable = true;
        for result in results {
            reliable &= result.is_reliable;
            errors.extend(result.errors);
        }

        report.is_reliable = reliable;
        report.errors = errors;
        report
    }

    fn back_to_base(&self, serial: &str) {
        let reached = return_to_base(
            self.channel.as_ref(),
            &self.detector,
            serial,
            self.config.back_presses,
            Duration::from_millis(self.config.back_delay_ms),
            Duration::from_secs(self.config.nav_timeout_secs),
            self.timing(),
        );
        if reached.is_none() {
            warn!(serial, "did not settle back onto a base screen");
        }
    }

    /// Record a step transition and broadcast it.
    fn progress(&self, serial: &str, step: ScanStep, detail: &str) {
        self.registry.heartbeat(serial);
        self.with_run(serial, |run| {
            run.step = step;
            run.detail = detail.to_string();
        });
        self.bridge.publish(
            "scan_progress",
            json!({ "serial": serial, "step": step, "detail": detail }),
        );
    }

    /// Update the detail line within the current step.
    fn detail(&self, serial: &str, detail: &str) {
        let step = self
            .runs
            .lock()
            .get(serial)
            .map(|run| run.step)
            .unwrap_or(ScanStep::Starting);
        self.with_run(serial, |run| run.detail = detail.to_string());
        self.bridge.publish(
            "scan_progress",
            json!({ "serial": serial, "step": step, "detail": detail }),
        );
    }

    fn with_run<F: FnOnce(&mut PipelineRun)>(&self, serial: &str, f: F) {
        let mut runs = self.runs.lock();
        if let Some(run) = runs.get_mut(serial) {
            f(run);
        }
    }
}

fn screen_label(kind: ScreenKind) -> &'static str {
    match kind {
        ScreenKind::Profile => "profile",
        ScreenKind::Resources => "resources",
        ScreenKind::Hall => "hall",
        ScreenKind::Market => "market",
        ScreenKind::PetToken => "pet_token",
    }
}
