use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile extraction: lord name plus power with its raw OCR text retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileData {
    pub name: String,
    pub power: i64,
    pub power_raw: String,
    /// Share of plausibly-numeric characters in the raw power text.
    pub power_confidence: f32,
}

/// One resource type: carried amount ("bag") and stockpile total.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceEntry {
    pub bag: i64,
    pub total: i64,
    pub bag_raw: String,
    pub total_raw: String,
}

/// The four tracked resource types.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceData {
    pub gold: ResourceEntry,
    pub wood: ResourceEntry,
    pub ore: ResourceEntry,
    pub mana: ResourceEntry,
}

impl ResourceData {
    /// Entries in fixed order, for iteration in validation and persistence.
    pub fn entries(&self) -> [(&'static str, &ResourceEntry); 4] {
        [
            ("gold", &self.gold),
            ("wood", &self.wood),
            ("ore", &self.ore),
            ("mana", &self.mana),
        ]
    }

    pub fn entry_mut(&mut self, resource: &str) -> Option<&mut ResourceEntry> {
        match resource {
            "gold" => Some(&mut self.gold),
            "wood" => Some(&mut self.wood),
            "ore" => Some(&mut self.ore),
            "mana" => Some(&mut self.mana),
            _ => None,
        }
    }
}

/// Complete scan result for a single device. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub serial: String,
    pub timestamp: DateTime<Utc>,
    pub profile: ProfileData,
    pub resources: ResourceData,
    pub hall_level: i64,
    pub market_level: i64,
    pub pet_token: i64,
    pub game_id: Option<String>,
    pub is_reliable: bool,
    pub errors: Vec<String>,
}

impl ScanReport {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            timestamp: Utc::now(),
            profile: ProfileData::default(),
            resources: ResourceData::default(),
            hall_level: 0,
            market_level: 0,
            pet_token: 0,
            game_id: None,
            is_reliable: true,
            errors: Vec::new(),
        }
    }
}

/// Pipeline step labels, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStep {
    Starting,
    ExtractingId,
    Capturing,
    OcrProcessing,
    Parsing,
    Saving,
    Done,
    Error,
}

impl std::fmt::Display for ScanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStep::Starting => "starting",
            ScanStep::ExtractingId => "extracting_id",
            ScanStep::Capturing => "capturing",
            ScanStep::OcrProcessing => "ocr_processing",
            ScanStep::Parsing => "parsing",
            ScanStep::Saving => "saving",
            ScanStep::Done => "done",
            ScanStep::Error => "error",
        };
        f.write_str(s)
    }
}

/// Terminal and non-terminal run states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Outcome of associating an extracted game id with account records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum LinkOutcome {
    Linked { account_id: i64 },
    Pending { pending_id: i64 },
}

/// Transient in-memory record of one pipeline run. At most one is tracked per
/// device; the next run for the same device overwrites it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    pub serial: String,
    pub status: RunStatus,
    pub step: ScanStep,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub report: Option<ScanReport>,
    pub error: Option<String>,
    pub link_result: Option<LinkOutcome>,
}

impl PipelineRun {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            status: RunStatus::Running,
            step: ScanStep::Starting,
            detail: String::new(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            report: None,
            error: None,
            link_result: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// One persisted snapshot, as returned by history queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRecord {
    pub id: i64,
    pub serial: String,
    pub saved_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub game_id: Option<String>,
    pub report: ScanReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_step_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ScanStep::ExtractingId).unwrap(),
            "\"extracting_id\""
        );
        assert_eq!(
            serde_json::to_string(&ScanStep::OcrProcessing).unwrap(),
            "\"ocr_processing\""
        );
        assert_eq!(ScanStep::Capturing.to_string(), "capturing");
    }

    #[test]
    fn test_link_outcome_tagged() {
        let linked = LinkOutcome::Linked { account_id: 7 };
        let json = serde_json::to_string(&linked).unwrap();
        assert!(json.contains("\"action\":\"linked\""), "got {}", json);

        let pending: LinkOutcome =
            serde_json::from_str(r#"{"action":"pending","pending_id":3}"#).unwrap();
        assert_eq!(pending, LinkOutcome::Pending { pending_id: 3 });
    }

    #[test]
    fn test_resource_entries_order() {
        let data = ResourceData::default();
        let names: Vec<&str> = data.entries().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["gold", "wood", "ore", "mana"]);
    }

    #[test]
    fn test_fresh_run_is_running() {
        let run = PipelineRun::new("emulator-5554");
        assert!(run.is_running());
        assert_eq!(run.step, ScanStep::Starting);
        assert!(run.report.is_none());
    }

    #[test]
    fn test_report_round_trip() {
        let mut report = ScanReport::new("emulator-5554");
        report.profile.name = "Arathor".to_string();
        report.profile.power = 1_500_000;
        report.resources.gold.bag = 10;
        report.resources.gold.total = 50;
        report.game_id = Some("88213344".to_string());

        let json = serde_json::to_string(&report).unwrap();
        let back: ScanReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, back);
    }
}
