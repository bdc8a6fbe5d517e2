use crate::models::config::{Point, ScanConfig};
use crate::services::adb::DeviceChannel;
use crate::services::detector::{ScreenState, StateDetector};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll cadence for state waiting. The loading screen is expected to change
/// on its own, so it gets the longer sleep.
#[derive(Debug, Clone, Copy)]
pub struct PollTiming {
    pub poll: Duration,
    pub loading_poll: Duration,
}

impl PollTiming {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            poll: Duration::from_millis(config.poll_interval_ms),
            loading_poll: Duration::from_millis(config.loading_poll_interval_ms),
        }
    }
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(2),
            loading_poll: Duration::from_secs(3),
        }
    }
}

/// Block until the device reaches one of `targets`, or until `timeout`.
///
/// This is the single blocking primitive every higher action builds on.
/// Returns the reached state, or `None` when the timeout elapsed first.
pub fn wait_for_state<C: DeviceChannel>(
    channel: &C,
    detector: &StateDetector,
    serial: &str,
    targets: &[ScreenState],
    timeout: Duration,
    timing: PollTiming,
) -> Option<ScreenState> {
    let start = Instant::now();
    debug!(serial, ?targets, timeout_secs = timeout.as_secs(), "waiting for state");

    loop {
        let current = detector.detect(channel, serial);
        if targets.contains(&current) {
            debug!(serial, state = %current, "target state reached");
            return Some(current);
        }

        if start.elapsed() >= timeout {
            warn!(serial, ?targets, last_seen = %current, "timed out waiting for state");
            return None;
        }

        let sleep = if current == ScreenState::Loading {
            timing.loading_poll
        } else {
            timing.poll
        };
        std::thread::sleep(sleep);
    }
}

/// Tap a known coordinate, then wait for the expected resulting screen.
pub fn navigate_to_screen<C: DeviceChannel>(
    channel: &C,
    detector: &StateDetector,
    serial: &str,
    tap: Point,
    expected: &[ScreenState],
    timeout: Duration,
    timing: PollTiming,
) -> bool {
    channel.tap(serial, tap.x, tap.y);
    wait_for_state(channel, detector, serial, expected, timeout, timing).is_some()
}

/// Tap the copy button and read the value back through the clipboard bridge.
///
/// The read races the device's clipboard sync, so it retries up to
/// `retries` times. A value is accepted once it passes the shape heuristic
/// (all digits, at least 5 of them) or, failing that, once it simply differs
/// from the pre-tap baseline.
pub fn extract_clipboard_value<C: DeviceChannel>(
    channel: &C,
    serial: &str,
    copy_button: Point,
    retries: u32,
    sync_delay: Duration,
) -> Option<String> {
    let baseline = channel.read_clipboard(serial);

    for attempt in 1..=retries {
        channel.tap(serial, copy_button.x, copy_button.y);
        std::thread::sleep(sync_delay);

        let current = channel.read_clipboard(serial);

        if looks_like_id(&current) {
            return Some(current);
        }
        if !current.is_empty() && current != baseline {
            return Some(current);
        }

        debug!(serial, attempt, retries, value = %current, "clipboard empty or stale, retrying");
    }

    warn!(serial, "clipboard extraction gave up after {} attempts", retries);
    None
}

/// Press back a fixed number of times, then wait for either base screen.
pub fn return_to_base<C: DeviceChannel>(
    channel: &C,
    detector: &StateDetector,
    serial: &str,
    presses: u32,
    delay: Duration,
    timeout: Duration,
    timing: PollTiming,
) -> Option<ScreenState> {
    for _ in 0..presses {
        channel.press_back(serial);
        std::thread::sleep(delay);
    }
    wait_for_state(channel, detector, serial, &ScreenState::BASE, timeout, timing)
}

/// Check that the target app holds the foreground, booting it if not.
/// Returns true when it was already running.
pub fn ensure_app_running<C: DeviceChannel>(channel: &C, serial: &str, package: &str) -> bool {
    if channel.is_foreground(serial, package) {
        return true;
    }
    info!(serial, package, "app not in foreground, launching");
    channel.launch(serial, package);
    false
}

/// Valid game-id heuristic: only digits and reasonably long.
fn looks_like_id(value: &str) -> bool {
    value.len() >= 5 && value.chars().all(|c| c.is_ascii_digit())
}
