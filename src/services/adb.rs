use crate::models::config::AdbConfig;
use regex::Regex;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

/// Request/response surface of one managed device.
///
/// Every call blocks with a bounded internal timeout and returns a failure
/// sentinel (false, empty string, `None`) instead of erroring: a slow or
/// wedged device must never hang its caller.
pub trait DeviceChannel: Send + Sync + 'static {
    fn list_devices(&self) -> Vec<String>;
    fn ping(&self, serial: &str) -> bool;
    fn tap(&self, serial: &str, x: u32, y: u32) -> bool;
    fn swipe(&self, serial: &str, x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u32) -> bool;
    fn press_back(&self, serial: &str) -> bool;
    /// Capture a screenshot straight to memory. No intermediate file.
    fn capture_frame(&self, serial: &str) -> Option<Vec<u8>>;
    fn read_clipboard(&self, serial: &str) -> String;
    fn is_foreground(&self, serial: &str, package: &str) -> bool;
    fn launch(&self, serial: &str, package: &str) -> bool;
}

/// ADB-backed channel implementation.
pub struct AdbCommandChannel {
    adb_path: PathBuf,
    command_timeout: Duration,
    capture_timeout: Duration,
    probe_timeout: Duration,
}

impl AdbCommandChannel {
    pub fn new(config: &AdbConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            capture_timeout: Duration::from_secs(config.capture_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        }
    }

    /// Run adb with a hard deadline. The child is killed on expiry and the
    /// call reports `None`; stdout is drained on a separate thread so large
    /// payloads (screenshots) cannot deadlock the pipe.
    fn run_adb(&self, serial: Option<&str>, args: &[&str], timeout: Duration) -> Option<Vec<u8>> {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = serial {
            cmd.args(["-s", serial]);
        }
        cmd.args(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null()).stdin(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(adb = %self.adb_path.display(), error = %e, "failed to spawn adb");
                return None;
            }
        };

        let mut stdout = child.stdout.take()?;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });

        match rx.recv_timeout(timeout) {
            Ok(buf) => {
                let _ = child.wait();
                Some(buf)
            }
            Err(_) => {
                warn!(serial = serial.unwrap_or("-"), ?args, "adb call timed out, killing child");
                let _ = child.kill();
                let _ = child.wait();
                None
            }
        }
    }

    fn run_adb_text(&self, serial: Option<&str>, args: &[&str], timeout: Duration) -> String {
        self.run_adb(serial, args, timeout)
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .unwrap_or_default()
    }
}

impl DeviceChannel for AdbCommandChannel {
    fn list_devices(&self) -> Vec<String> {
        let out = self.run_adb_text(None, &["devices"], self.command_timeout);
        parse_device_list(&out)
    }

    fn ping(&self, serial: &str) -> bool {
        let out = self.run_adb_text(Some(serial), &["shell", "echo", "ping"], self.probe_timeout);
        out.contains("ping")
    }

    fn tap(&self, serial: &str, x: u32, y: u32) -> bool {
        debug!(serial, x, y, "tap");
        self.run_adb(
            Some(serial),
            &["shell", "input", "tap", &x.to_string(), &y.to_string()],
            self.command_timeout,
        )
        .is_some()
    }

    fn swipe(&self, serial: &str, x1: u32, y1: u32, x2: u32, y2: u32, duration_ms: u32) -> bool {
        self.run_adb(
            Some(serial),
            &[
                "shell",
                "input",
                "swipe",
                &x1.to_string(),
                &y1.to_string(),
                &x2.to_string(),
                &y2.to_string(),
                &duration_ms.to_string(),
            ],
            self.command_timeout,
        )
        .is_some()
    }

    fn press_back(&self, serial: &str) -> bool {
        self.run_adb(Some(serial), &["shell", "input", "keyevent", "4"], self.command_timeout)
            .is_some()
    }

    fn capture_frame(&self, serial: &str) -> Option<Vec<u8>> {
        let bytes = self.run_adb(
            Some(serial),
            &["exec-out", "screencap", "-p"],
            self.capture_timeout,
        )?;
        if bytes.is_empty() {
            warn!(serial, "screencap returned no data");
            return None;
        }
        Some(bytes)
    }

    fn read_clipboard(&self, serial: &str) -> String {
        let out = self.run_adb_text(
            Some(serial),
            &["shell", "am", "broadcast", "-a", "clipper.get"],
            self.probe_timeout,
        );
        parse_clipper_output(&out)
    }

    fn is_foreground(&self, serial: &str, package: &str) -> bool {
        let out = self.run_adb_text(
            Some(serial),
            &["shell", "dumpsys", "window", "windows"],
            self.probe_timeout,
        );
        out.lines()
            .filter(|line| line.contains("mCurrentFocus") || line.contains("mFocusedApp"))
            .any(|line| line.contains(package))
    }

    fn launch(&self, serial: &str, package: &str) -> bool {
        debug!(serial, package, "launching app");
        self.run_adb(
            Some(serial),
            &[
                "shell",
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ],
            self.command_timeout,
        )
        .is_some()
    }
}

/// Parse `adb devices` output into the serials reporting state `device`.
fn parse_device_list(out: &str) -> Vec<String> {
    let mut serials: Vec<String> = out
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect();
    serials.sort();
    serials
}

/// Extract the `data="…"` payload from a clipper broadcast response.
fn parse_clipper_output(out: &str) -> String {
    let re = Regex::new(r#"data="([^"]*)""#).unwrap();
    re.captures(out)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
